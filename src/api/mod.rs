//! HTTP surface. Every endpoint is a stage pipeline; every response is
//! the envelope from `error.rs`.

pub mod auth;
pub mod email;
pub mod error;
pub mod password;

use axum::Router;

use crate::AppState;

// Messages shared across flows. Phrasing is load-bearing: the status-code
// generator in error.rs keys off these strings.
pub(crate) const MSG_MISSING_FIELDS: &str =
    "You did not pass the necessary fields. Please Try again.";
pub(crate) const MSG_INVALID_CREDENTIALS: &str = "Invalid username or password.";
pub(crate) const MSG_LOCKED: &str =
    "This account has been locked. Please try again in a few hours.";
pub(crate) const MSG_UNVERIFIED_ACCOUNT: &str =
    "Could not verify your account or your account is disabled.";

pub fn routes() -> Router<AppState> {
    Router::new()
        .nest("/auth", auth::routes())
        .nest("/password", password::routes())
        .nest("/email", email::routes())
}
