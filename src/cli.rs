//! CLI argument parsing, validation, and startup helpers.

use std::sync::Arc;

use clap::Parser;
use tracing::{error, info};
use url::Url;

use crate::ServerConfig;
use crate::db::Database;
use crate::mailer::LogMailer;

const MIN_SECRET_LENGTH: usize = 32;

#[derive(clap::ValueEnum, Clone, Debug, Default)]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
    Compact,
}

#[derive(Parser, Debug, Clone)]
#[command(
    name = "saucery",
    about = "Authentication and session service for the sauce review site"
)]
pub struct Args {
    /// Port to listen on
    #[arg(short, long, default_value = "7180")]
    pub port: u16,

    /// Path to SQLite database file
    #[arg(short, long, default_value = "saucery.db")]
    pub database: String,

    /// Public base URL used in emailed links (e.g., "https://example.com")
    #[arg(long, default_value = "http://localhost:7180")]
    pub base_url: String,

    /// Path to file containing the token secret. Prefer using SESSION_SECRET env var instead
    #[arg(long)]
    pub secret_file: Option<String>,

    /// Log output format
    #[arg(short, long, default_value = "pretty")]
    pub log_format: LogFormat,
}

/// Initialize logging based on the specified format.
pub fn init_logging(format: &LogFormat) {
    match format {
        LogFormat::Pretty => tracing_subscriber::fmt::init(),
        LogFormat::Json => tracing_subscriber::fmt().json().init(),
        LogFormat::Compact => tracing_subscriber::fmt().compact().init(),
    }
}

/// Load the token secret from environment variable or file.
/// Returns None and logs an error if the secret cannot be loaded.
pub fn load_session_secret(secret_file: Option<&str>) -> Option<String> {
    let secret = if let Ok(secret) = std::env::var("SESSION_SECRET") {
        // Clear the environment variable to prevent leaking
        // SAFETY: We're single-threaded at this point during startup,
        // and no other code is reading this environment variable.
        unsafe { std::env::remove_var("SESSION_SECRET") };
        secret
    } else if let Some(path) = secret_file {
        match std::fs::read_to_string(path) {
            Ok(content) => content.trim().to_string(),
            Err(e) => {
                error!(path = %path, error = %e, "Failed to read secret file");
                return None;
            }
        }
    } else {
        error!(
            "Token secret is required. Set SESSION_SECRET environment variable (recommended) or use --secret-file"
        );
        return None;
    };

    validate_secret(secret)
}

fn validate_secret(secret: String) -> Option<String> {
    if secret.len() < MIN_SECRET_LENGTH {
        error!(
            "Token secret is shorter than {} characters. Use a longer secret",
            MIN_SECRET_LENGTH
        );
        return None;
    }
    Some(secret)
}

/// Parse and validate the public base URL.
/// Returns None and logs an error if validation fails.
pub fn validate_base_url(base_url: &str) -> Option<Url> {
    let url = match Url::parse(base_url) {
        Ok(url) => url,
        Err(e) => {
            error!(url = %base_url, error = %e, "Invalid base URL");
            return None;
        }
    };

    let is_https = url.scheme() == "https";
    let is_localhost = url.host_str() == Some("localhost");

    if !is_https && !is_localhost {
        error!("Base URL must use HTTPS for non-localhost deployments");
        return None;
    }

    Some(url)
}

/// Build ServerConfig from validated arguments.
pub fn build_config(db: Database, base_url: Url, secret: String) -> ServerConfig {
    let secure_cookies = base_url.scheme() == "https";

    ServerConfig {
        db,
        secret: secret.into_bytes(),
        base_url,
        secure_cookies,
        mailer: Arc::new(LogMailer),
    }
}

/// Open the database, logging errors if it fails.
pub async fn open_database(path: &str) -> Option<Database> {
    match Database::open(path).await {
        Ok(db) => {
            info!(path = %path, "Database opened");
            Some(db)
        }
        Err(e) => {
            error!(path = %path, error = %e, "Failed to open database");
            None
        }
    }
}
