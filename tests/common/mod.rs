#![allow(dead_code)]

use std::sync::Arc;

use axum::Router;
use axum::body::Body;
use axum::http::Request;
use saucery::db::Database;
use saucery::mailer::MemoryMailer;
use saucery::{ServerConfig, create_app};
use serde_json::Value;
use tower::ServiceExt;
use url::Url;

pub const TEST_SECRET: &str = "integration-test-secret-0123456789";
pub const TEST_PASSWORD: &str = "correct horse battery";

pub struct TestApp {
    pub app: Router,
    pub db: Database,
    pub mailer: Arc<MemoryMailer>,
}

/// Create a test app backed by an in-memory database and a recording mailer.
pub async fn test_app() -> TestApp {
    build_app(Arc::new(MemoryMailer::new())).await
}

/// Same, but every mail delivery fails.
pub async fn test_app_with_failing_mailer() -> TestApp {
    build_app(Arc::new(MemoryMailer::failing())).await
}

async fn build_app(mailer: Arc<MemoryMailer>) -> TestApp {
    let db = Database::open(":memory:")
        .await
        .expect("Failed to open test database");
    let config = ServerConfig {
        db: db.clone(),
        secret: TEST_SECRET.as_bytes().to_vec(),
        base_url: Url::parse("http://localhost:7180").expect("Invalid URL"),
        secure_cookies: false,
        mailer: mailer.clone(),
    };
    TestApp {
        app: create_app(&config),
        db,
        mailer,
    }
}

pub fn post_json(uri: &str, body: Value) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

pub fn post_json_with_cookies(uri: &str, body: Value, cookies: &str) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header("content-type", "application/json")
        .header("cookie", cookies)
        .body(Body::from(body.to_string()))
        .unwrap()
}

pub fn post_empty(uri: &str) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .body(Body::empty())
        .unwrap()
}

pub fn post_empty_with_cookies(uri: &str, cookies: &str) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header("cookie", cookies)
        .body(Body::empty())
        .unwrap()
}

/// Parse the envelope out of a response body.
pub async fn body_json(response: axum::http::Response<Body>) -> Value {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

/// Extract Set-Cookie headers from a response.
pub fn extract_set_cookies(response: &axum::http::Response<Body>) -> Vec<String> {
    response
        .headers()
        .get_all("set-cookie")
        .iter()
        .filter_map(|v| v.to_str().ok())
        .map(|s| s.to_string())
        .collect()
}

/// The value of a named cookie among Set-Cookie headers, if present.
pub fn cookie_value(cookies: &[String], name: &str) -> Option<String> {
    cookies.iter().find_map(|c| {
        let (pair, _) = c.split_once(';')?;
        let (key, value) = pair.split_once('=')?;
        (key == name).then(|| value.to_string())
    })
}

/// Check if cookies contain a cookie being cleared (Max-Age=0).
pub fn has_cleared_cookie(cookies: &[String], cookie_name: &str) -> bool {
    cookies
        .iter()
        .any(|c| c.starts_with(&format!("{}=", cookie_name)) && c.contains("Max-Age=0"))
}

/// Turn login Set-Cookie headers into a Cookie request header.
pub fn as_cookie_header(set_cookies: &[String]) -> String {
    set_cookies
        .iter()
        .filter_map(|c| c.split(';').next())
        .collect::<Vec<_>>()
        .join("; ")
}

/// Register a user (which also logs in) and return the response.
pub async fn register(app: &Router, email: &str, password: &str) -> axum::http::Response<Body> {
    app.clone()
        .oneshot(post_json(
            "/auth/register",
            serde_json::json!({
                "email": email,
                "password": password,
                "confirmPassword": password,
                "displayName": "Test User",
            }),
        ))
        .await
        .unwrap()
}

pub async fn login(app: &Router, email: &str, password: &str) -> axum::http::Response<Body> {
    app.clone()
        .oneshot(post_json(
            "/auth/login",
            serde_json::json!({ "email": email, "password": password }),
        ))
        .await
        .unwrap()
}

/// Register a user and return a Cookie header holding the live session.
pub async fn register_with_session(app: &Router, email: &str) -> String {
    let response = register(app, email, TEST_PASSWORD).await;
    assert_eq!(response.status(), axum::http::StatusCode::OK);
    as_cookie_header(&extract_set_cookies(&response))
}

/// Pull the action token out of a recorded mail body.
pub fn token_from_mail(body: &str) -> String {
    body.split("token=")
        .nth(1)
        .expect("mail body has no token link")
        .split_whitespace()
        .next()
        .unwrap()
        .to_string()
}
