pub mod api;
pub mod cli;
pub mod db;
pub mod lockout;
pub mod mailer;
pub mod password;
pub mod pipeline;
pub mod session;
pub mod token;

use std::sync::Arc;

use axum::Router;
use tokio::net::TcpListener;
use url::Url;

use db::Database;
use mailer::Mailer;
use session::SessionCookieManager;
use token::TokenService;

/// Shared application state handed to every pipeline stage.
#[derive(Clone)]
pub struct AppState {
    pub db: Database,
    pub tokens: TokenService,
    pub cookies: SessionCookieManager,
    pub mailer: Arc<dyn Mailer>,
    /// Public origin used when composing emailed links.
    pub base_url: Url,
}

impl AppState {
    pub fn new(
        db: Database,
        secret: impl Into<Vec<u8>>,
        secure_cookies: bool,
        mailer: Arc<dyn Mailer>,
        base_url: Url,
    ) -> Self {
        let tokens = TokenService::new(secret, db.clone());
        Self {
            db,
            tokens,
            cookies: SessionCookieManager::new(secure_cookies),
            mailer,
            base_url,
        }
    }
}

pub struct ServerConfig {
    /// Database connection (cloneable, uses connection pool internally)
    pub db: Database,
    /// Secret for signing session and action tokens
    pub secret: Vec<u8>,
    /// Public base URL, used for emailed links
    pub base_url: Url,
    /// Whether to set Secure flag on cookies (true in production with HTTPS)
    pub secure_cookies: bool,
    /// Outbound mail backend
    pub mailer: Arc<dyn Mailer>,
}

/// Create the application router with the given configuration.
pub fn create_app(config: &ServerConfig) -> Router {
    let state = AppState::new(
        config.db.clone(),
        config.secret.clone(),
        config.secure_cookies,
        config.mailer.clone(),
        config.base_url.clone(),
    );

    api::routes().with_state(state)
}

/// Run the server on the given listener. This function blocks until the server exits.
pub async fn run_server(config: ServerConfig, listener: TcpListener) -> Result<(), std::io::Error> {
    let app = create_app(&config);
    axum::serve(listener, app).await
}
