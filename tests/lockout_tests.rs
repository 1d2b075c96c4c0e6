//! Account lockout behavior through the login endpoint.

mod common;

use axum::http::StatusCode;
use common::*;
use saucery::lockout::{LOCK_DURATION_SECS, MAX_ATTEMPTS};
use saucery::token::now_unix;

const MSG_LOCKED: &str = "This account has been locked. Please try again in a few hours.";

#[tokio::test]
async fn test_five_failures_lock_the_account() {
    let TestApp { app, db, .. } = test_app().await;
    register(&app, "alice@example.com", TEST_PASSWORD).await;

    for i in 1..MAX_ATTEMPTS {
        let response = login(&app, "alice@example.com", "wrong password!").await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(
            body_json(response).await["msg"],
            "Invalid username or password."
        );

        let user = db
            .users()
            .get_by_email("alice@example.com")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(user.login_attempts, i);
        assert!(user.locked_until.is_none());
    }

    // The fifth failure arms the lock but still answers like any other
    // bad credential
    let response = login(&app, "alice@example.com", "wrong password!").await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(
        body_json(response).await["msg"],
        "Invalid username or password."
    );

    let now = now_unix().unwrap() as i64;
    let user = db
        .users()
        .get_by_email("alice@example.com")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(user.login_attempts, MAX_ATTEMPTS);
    let until = user.locked_until.expect("account should be locked");
    assert!((until - now - LOCK_DURATION_SECS).abs() <= 2);

    // The locked message starts on the attempt after the one that locked
    let response = login(&app, "alice@example.com", "wrong password!").await;
    assert_eq!(response.status(), StatusCode::FORBIDDEN);
    let envelope = body_json(response).await;
    assert_eq!(envelope["isGood"], false);
    assert_eq!(envelope["msg"], MSG_LOCKED);
}

#[tokio::test]
async fn test_locked_account_rejects_correct_password() {
    let TestApp { app, db, .. } = test_app().await;
    register(&app, "alice@example.com", TEST_PASSWORD).await;

    let user = db
        .users()
        .get_by_email("alice@example.com")
        .await
        .unwrap()
        .unwrap();
    let now = now_unix().unwrap() as i64;
    let until = now + LOCK_DURATION_SECS;
    db.users()
        .set_lockout(user.id, MAX_ATTEMPTS, Some(until))
        .await
        .unwrap();

    let response = login(&app, "alice@example.com", TEST_PASSWORD).await;
    assert_eq!(response.status(), StatusCode::FORBIDDEN);
    assert_eq!(body_json(response).await["msg"], MSG_LOCKED);

    // The attempt still counts, but the lock expiry is untouched
    let user = db
        .users()
        .get_by_email("alice@example.com")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(user.login_attempts, MAX_ATTEMPTS + 1);
    assert_eq!(user.locked_until, Some(until));
}

#[tokio::test]
async fn test_expired_lock_allows_login_and_resets_counters() {
    let TestApp { app, db, .. } = test_app().await;
    register(&app, "alice@example.com", TEST_PASSWORD).await;

    let user = db
        .users()
        .get_by_email("alice@example.com")
        .await
        .unwrap()
        .unwrap();
    let now = now_unix().unwrap() as i64;
    db.users()
        .set_lockout(user.id, MAX_ATTEMPTS + 2, Some(now - 60))
        .await
        .unwrap();

    let response = login(&app, "alice@example.com", TEST_PASSWORD).await;
    assert_eq!(response.status(), StatusCode::OK);

    let user = db
        .users()
        .get_by_email("alice@example.com")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(user.login_attempts, 0);
    assert!(user.locked_until.is_none());
}

#[tokio::test]
async fn test_successful_login_resets_failure_counter() {
    let TestApp { app, db, .. } = test_app().await;
    register(&app, "alice@example.com", TEST_PASSWORD).await;

    for _ in 0..3 {
        login(&app, "alice@example.com", "wrong password!").await;
    }

    let user = db
        .users()
        .get_by_email("alice@example.com")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(user.login_attempts, 3);

    let response = login(&app, "alice@example.com", TEST_PASSWORD).await;
    assert_eq!(response.status(), StatusCode::OK);

    let user = db
        .users()
        .get_by_email("alice@example.com")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(user.login_attempts, 0);
}
