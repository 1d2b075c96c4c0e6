//! Logout clears the full cookie set regardless of session state.

mod common;

use axum::http::StatusCode;
use common::*;
use tower::ServiceExt;

#[tokio::test]
async fn test_logout_clears_cookies() {
    let TestApp { app, .. } = test_app().await;
    let session = register_with_session(&app, "alice@example.com").await;

    let response = app
        .clone()
        .oneshot(post_empty_with_cookies("/auth/logout", &session))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let cookies = extract_set_cookies(&response);
    assert_eq!(cookies.len(), 3);
    assert!(has_cleared_cookie(&cookies, "session-access-token"));
    assert!(has_cleared_cookie(&cookies, "session-refresh-token"));
    assert!(has_cleared_cookie(&cookies, "has-refresh-token"));

    let envelope = body_json(response).await;
    assert_eq!(envelope["isGood"], true);
    assert_eq!(envelope["msg"], "Successfully logged out.");
}

#[tokio::test]
async fn test_logout_without_session_still_succeeds() {
    let TestApp { app, .. } = test_app().await;

    let response = app
        .clone()
        .oneshot(post_empty("/auth/logout"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let cookies = extract_set_cookies(&response);
    assert_eq!(cookies.len(), 3);
    assert!(cookies.iter().all(|c| c.contains("Max-Age=0")));
}
