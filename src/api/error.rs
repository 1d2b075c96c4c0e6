//! Error taxonomy and the response envelope.
//!
//! Every endpoint answers with the same envelope shape whether it
//! succeeded or not, so the frontend only ever parses one thing. Status
//! codes are derived centrally from the envelope message rather than
//! chosen ad hoc at each call site.

use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::{Deserialize, Serialize};

use crate::db::{User, UserRole};
use crate::mailer::MailError;
use crate::token::TokenError;

/// Classified failure inside a pipeline stage. The message is user-facing
/// and doubles as the input to the status-code generator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthError {
    /// The request is well-formed HTTP but fails our rules.
    Validation(String),
    /// Credentials or tokens could not be trusted.
    Authentication(String),
    /// The referenced account does not exist.
    NotFound(String),
    /// Infrastructure trouble; the client may retry.
    Transient(String),
}

impl AuthError {
    pub fn message(&self) -> &str {
        match self {
            AuthError::Validation(msg)
            | AuthError::Authentication(msg)
            | AuthError::NotFound(msg)
            | AuthError::Transient(msg) => msg,
        }
    }

    pub fn code(&self) -> &'static str {
        match self {
            AuthError::Validation(_) => "validation",
            AuthError::Authentication(_) => "authentication",
            AuthError::NotFound(_) => "not-found",
            AuthError::Transient(_) => "transient",
        }
    }
}

impl std::fmt::Display for AuthError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.code(), self.message())
    }
}

impl std::error::Error for AuthError {}

impl From<sqlx::Error> for AuthError {
    fn from(err: sqlx::Error) -> Self {
        tracing::error!(error = %err, "database error");
        AuthError::Transient("Connection error. Please try again".to_string())
    }
}

impl From<TokenError> for AuthError {
    fn from(err: TokenError) -> Self {
        tracing::error!(error = %err, "token issuance error");
        AuthError::Transient("Could not create your token. Please try again".to_string())
    }
}

impl From<MailError> for AuthError {
    fn from(err: MailError) -> Self {
        tracing::error!(error = %err, "mail delivery error");
        AuthError::Transient("Could not send email. Please try again".to_string())
    }
}

/// The user view that leaves the server. No password hash, no lockout
/// counters, no row ids. `token` is only present on responses that mint
/// a fresh access token (login, refresh, password update).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PublicUser {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,
    pub display_name: String,
    pub email: String,
    #[serde(rename = "avatarURL")]
    pub avatar_url: String,
    pub is_admin: bool,
    pub email_verified: bool,
}

impl From<&User> for PublicUser {
    fn from(user: &User) -> Self {
        Self {
            token: None,
            display_name: user.display_name.clone(),
            email: user.email.clone(),
            avatar_url: user.avatar_url.clone(),
            is_admin: user.role == UserRole::Admin,
            email_verified: user.email_verified,
        }
    }
}

/// Uniform response body for every endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Envelope {
    pub is_good: bool,
    pub msg: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user: Option<PublicUser>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_code: Option<String>,
}

impl Envelope {
    pub fn ok(msg: impl Into<String>) -> Self {
        Self {
            is_good: true,
            msg: msg.into(),
            user: None,
            error_code: None,
        }
    }

    pub fn with_user(mut self, user: &User) -> Self {
        self.user = Some(PublicUser::from(user));
        self
    }

    /// Attach the user along with a freshly minted access token.
    pub fn with_user_token(mut self, user: &User, token: &str) -> Self {
        let mut public = PublicUser::from(user);
        public.token = Some(token.to_string());
        self.user = Some(public);
        self
    }

    pub fn error(err: &AuthError) -> Self {
        Self {
            is_good: false,
            msg: err.message().to_string(),
            user: None,
            error_code: Some(err.code().to_string()),
        }
    }
}

/// Derive the HTTP status for a failure envelope from its message.
/// Success envelopes are always 200; this is only consulted when
/// `is_good` is false.
pub fn status_for_message(msg: &str) -> StatusCode {
    let msg = msg.to_lowercase();
    if msg.contains("locked") {
        StatusCode::FORBIDDEN
    } else if msg.contains("expired") || msg.contains("relogin") || msg.contains("could not verify")
    {
        StatusCode::UNAUTHORIZED
    } else if msg.contains("connection error") {
        StatusCode::SERVICE_UNAVAILABLE
    } else if msg.contains("something went wrong") {
        StatusCode::INTERNAL_SERVER_ERROR
    } else {
        StatusCode::BAD_REQUEST
    }
}

impl IntoResponse for Envelope {
    fn into_response(self) -> Response {
        let status = if self.is_good {
            StatusCode::OK
        } else {
            status_for_message(&self.msg)
        };
        (status, Json(self)).into_response()
    }
}
