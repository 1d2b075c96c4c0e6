//! Email confirmation and resend flows.

mod common;

use axum::http::StatusCode;
use common::*;
use serde_json::json;
use tower::ServiceExt;

const MSG_BAD_LINK: &str = "Oops! Your URL may be expired or invalid. \
     Please request a new verification email and try again.";

#[tokio::test]
async fn test_confirm_email_with_registration_token() {
    let TestApp { app, db, mailer } = test_app().await;
    register(&app, "alice@example.com", TEST_PASSWORD).await;

    let sent = mailer.sent();
    let token = token_from_mail(&sent[0].body);

    let response = app
        .clone()
        .oneshot(post_json("/email/confirm", json!({ "token": token })))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let envelope = body_json(response).await;
    assert_eq!(envelope["isGood"], true);
    assert_eq!(envelope["msg"], "Your email has been verified! Thank you!");

    let user = db
        .users()
        .get_by_email("alice@example.com")
        .await
        .unwrap()
        .unwrap();
    assert!(user.email_verified);
}

#[tokio::test]
async fn test_confirm_email_rejects_bad_token() {
    let TestApp { app, .. } = test_app().await;

    let response = app
        .clone()
        .oneshot(post_json("/email/confirm", json!({ "token": "garbage" })))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    assert_eq!(body_json(response).await["msg"], MSG_BAD_LINK);
}

#[tokio::test]
async fn test_confirm_email_rejects_reset_purpose_token() {
    let TestApp { app, mailer, .. } = test_app().await;
    register(&app, "alice@example.com", TEST_PASSWORD).await;

    app.clone()
        .oneshot(post_json(
            "/password/forgot",
            json!({ "email": "alice@example.com" }),
        ))
        .await
        .unwrap();

    let sent = mailer.sent();
    let token = token_from_mail(&sent.last().unwrap().body);

    let response = app
        .clone()
        .oneshot(post_json("/email/confirm", json!({ "token": token })))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    assert_eq!(body_json(response).await["msg"], MSG_BAD_LINK);
}

#[tokio::test]
async fn test_confirm_email_requires_token_field() {
    let TestApp { app, .. } = test_app().await;

    let response = app
        .clone()
        .oneshot(post_json("/email/confirm", json!({})))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let envelope = body_json(response).await;
    assert_eq!(envelope["isGood"], false);
    assert_eq!(envelope["errorCode"], "validation");
}

#[tokio::test]
async fn test_resend_verification_sends_fresh_link() {
    let TestApp { app, db, mailer } = test_app().await;
    let session = register_with_session(&app, "alice@example.com").await;

    let response = app
        .clone()
        .oneshot(post_empty_with_cookies("/email/resend", &session))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        body_json(response).await["msg"],
        "Email verification resent! Thank you."
    );

    // Registration mail plus the resend, and the new link confirms
    let sent = mailer.sent();
    assert_eq!(sent.len(), 2);
    let token = token_from_mail(&sent[1].body);

    let response = app
        .clone()
        .oneshot(post_json("/email/confirm", json!({ "token": token })))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let user = db
        .users()
        .get_by_email("alice@example.com")
        .await
        .unwrap()
        .unwrap();
    assert!(user.email_verified);
}

#[tokio::test]
async fn test_resend_verification_requires_session() {
    let TestApp { app, .. } = test_app().await;

    let response = app
        .clone()
        .oneshot(post_empty("/email/resend"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_resend_verification_mail_failure() {
    let TestApp { app, mailer, .. } = test_app_with_failing_mailer().await;
    let session = register_with_session(&app, "alice@example.com").await;
    assert!(mailer.sent().is_empty());

    let response = app
        .clone()
        .oneshot(post_empty_with_cookies("/email/resend", &session))
        .await
        .unwrap();
    assert_ne!(response.status(), StatusCode::OK);
    let envelope = body_json(response).await;
    assert_eq!(envelope["isGood"], false);
    assert_eq!(
        envelope["msg"],
        "Could not resend verification email. User's account may be locked or inactive."
    );
}
