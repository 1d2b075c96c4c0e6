//! Signed, time-limited session and action tokens.
//!
//! Three kinds: short-lived access tokens, long-lived refresh tokens, and
//! single-purpose action tokens (email confirmation, password reset).
//! Every kind is signed with a key derived from the server secret plus the
//! subject user's current password hash, so a password change invalidates
//! all outstanding tokens without any blacklist.

use base64::Engine;
use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use std::time::{SystemTime, UNIX_EPOCH};

use crate::db::{Database, User};

/// Access token duration: 30 minutes
pub const ACCESS_TOKEN_TTL_SECS: u64 = 30 * 60;

/// Refresh token duration: 2 weeks
pub const REFRESH_TOKEN_TTL_SECS: u64 = 14 * 24 * 60 * 60;

/// Action token duration: 1 hour
pub const ACTION_TOKEN_TTL_SECS: u64 = 60 * 60;

/// Token kind discriminator carried in the `typ` claim.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TokenKind {
    /// Short-lived, authorizes individual requests. Subject = user uuid.
    Access,
    /// Long-lived, only mints new access tokens. Subject = user uuid.
    Refresh,
    /// Single-purpose, bound to one operation. Subject = email.
    Action,
}

/// What an action token is allowed to do. A confirmation token presented
/// to the reset flow is untrusted, and vice versa.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ActionPurpose {
    EmailConfirm,
    PasswordReset,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    /// Subject (user uuid for access/refresh, email for action tokens)
    pub sub: String,
    /// Token kind
    #[serde(rename = "typ")]
    pub kind: TokenKind,
    /// Action purpose (action tokens only)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub purpose: Option<ActionPurpose>,
    /// Issued at (Unix timestamp)
    pub iat: u64,
    /// Expiration time (Unix timestamp)
    pub exp: u64,
}

/// A freshly signed token plus its lifetime, for cookie max-age.
#[derive(Debug, Clone)]
pub struct IssuedToken {
    pub token: String,
    pub max_age: u64,
}

/// Issues and validates tokens. Holds the database only to fetch signing
/// material (the subject's current password hash) during validation.
#[derive(Clone)]
pub struct TokenService {
    secret: Vec<u8>,
    db: Database,
}

impl TokenService {
    pub fn new(secret: impl Into<Vec<u8>>, db: Database) -> Self {
        Self {
            secret: secret.into(),
            db,
        }
    }

    /// Signing-key material: server secret concatenated with the user's
    /// current password hash.
    fn key_material(&self, password_hash: &str) -> Vec<u8> {
        let mut material = self.secret.clone();
        material.extend_from_slice(password_hash.as_bytes());
        material
    }

    fn issue(
        &self,
        sub: &str,
        kind: TokenKind,
        purpose: Option<ActionPurpose>,
        ttl: u64,
        password_hash: &str,
    ) -> Result<IssuedToken, TokenError> {
        let now = now_unix()?;
        let claims = Claims {
            sub: sub.to_string(),
            kind,
            purpose,
            iat: now,
            exp: now + ttl,
        };

        let key = EncodingKey::from_secret(&self.key_material(password_hash));
        let token =
            jsonwebtoken::encode(&Header::default(), &claims, &key).map_err(TokenError::Encoding)?;

        Ok(IssuedToken {
            token,
            max_age: ttl,
        })
    }

    /// Issue an access token for a user.
    pub fn issue_access(&self, user: &User) -> Result<IssuedToken, TokenError> {
        self.issue(
            &user.uuid,
            TokenKind::Access,
            None,
            ACCESS_TOKEN_TTL_SECS,
            &user.password_hash,
        )
    }

    /// Issue a refresh token for a user.
    pub fn issue_refresh(&self, user: &User) -> Result<IssuedToken, TokenError> {
        self.issue(
            &user.uuid,
            TokenKind::Refresh,
            None,
            REFRESH_TOKEN_TTL_SECS,
            &user.password_hash,
        )
    }

    /// Issue the access + refresh pair handed out at login.
    pub fn issue_pair(&self, user: &User) -> Result<(IssuedToken, IssuedToken), TokenError> {
        Ok((self.issue_access(user)?, self.issue_refresh(user)?))
    }

    /// Issue an action token bound to one purpose. Subject is the email
    /// address, so the token stays resolvable however the account is later
    /// looked up.
    pub fn issue_action(
        &self,
        user: &User,
        purpose: ActionPurpose,
    ) -> Result<IssuedToken, TokenError> {
        self.issue(
            &user.email,
            TokenKind::Action,
            Some(purpose),
            ACTION_TOKEN_TTL_SECS,
            &user.password_hash,
        )
    }

    /// Validate an access token. `Ok(None)` means untrusted, with the cause
    /// (expired, tampered, unknown or inactive subject) deliberately not
    /// distinguished.
    pub async fn validate_access(&self, token: &str) -> Result<Option<User>, sqlx::Error> {
        let Some(sub) = peek_subject(token) else {
            return Ok(None);
        };
        let Some(user) = self.db.users().get_by_uuid(&sub).await? else {
            return Ok(None);
        };
        if !user.is_active {
            return Ok(None);
        }
        Ok(self
            .check(token, &user, TokenKind::Access, None)
            .then_some(user))
    }

    /// Validate a refresh token. Same untrusted contract as `validate_access`.
    pub async fn validate_refresh(&self, token: &str) -> Result<Option<User>, sqlx::Error> {
        let Some(sub) = peek_subject(token) else {
            return Ok(None);
        };
        let Some(user) = self.db.users().get_by_uuid(&sub).await? else {
            return Ok(None);
        };
        if !user.is_active {
            return Ok(None);
        }
        Ok(self
            .check(token, &user, TokenKind::Refresh, None)
            .then_some(user))
    }

    /// Validate an action token against the purpose of the consuming
    /// endpoint. A wrong purpose is untrusted like any other failure.
    pub async fn validate_action(
        &self,
        token: &str,
        purpose: ActionPurpose,
    ) -> Result<Option<User>, sqlx::Error> {
        let Some(sub) = peek_subject(token) else {
            return Ok(None);
        };
        let Some(user) = self.db.users().get_by_email(&sub).await? else {
            return Ok(None);
        };
        if !user.is_active {
            return Ok(None);
        }
        Ok(self
            .check(token, &user, TokenKind::Action, Some(purpose))
            .then_some(user))
    }

    /// Full signature + expiry + kind/purpose check against the user's
    /// current password hash.
    fn check(
        &self,
        token: &str,
        user: &User,
        kind: TokenKind,
        purpose: Option<ActionPurpose>,
    ) -> bool {
        let key = DecodingKey::from_secret(&self.key_material(&user.password_hash));
        let mut validation = Validation::new(Algorithm::HS256);
        validation.leeway = 0;

        let Ok(data) = jsonwebtoken::decode::<Claims>(token, &key, &validation) else {
            return false;
        };

        data.claims.kind == kind && data.claims.purpose == purpose
    }
}

/// Read the subject out of a token without verifying it. Verification
/// needs the subject first: the signing key depends on who the token
/// claims to be for.
fn peek_subject(token: &str) -> Option<String> {
    let payload = peek_payload(token)?;
    payload.get("sub")?.as_str().map(str::to_string)
}

/// Read the expiry claim without verifying. Only good for choosing a
/// user-facing message after full validation already failed; never a
/// trust decision.
pub fn peek_expiry(token: &str) -> Option<u64> {
    peek_payload(token)?.get("exp")?.as_u64()
}

fn peek_payload(token: &str) -> Option<serde_json::Value> {
    let payload = token.split('.').nth(1)?;
    let bytes = base64::engine::general_purpose::URL_SAFE_NO_PAD
        .decode(payload)
        .ok()?;
    serde_json::from_slice(&bytes).ok()
}

/// Current Unix time in seconds.
pub fn now_unix() -> Result<u64, TokenError> {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .map_err(|_| TokenError::TimeError)
}

/// Errors that can occur while issuing tokens. Validation failures are not
/// errors; they surface as an untrusted result.
#[derive(Debug)]
pub enum TokenError {
    /// Error encoding the token
    Encoding(jsonwebtoken::errors::Error),
    /// System time error
    TimeError,
}

impl std::fmt::Display for TokenError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TokenError::Encoding(e) => write!(f, "Failed to encode token: {}", e),
            TokenError::TimeError => write!(f, "System time error"),
        }
    }
}

impl std::error::Error for TokenError {}

#[cfg(test)]
mod tests {
    use super::*;

    async fn test_user(db: &Database) -> User {
        let uuid = uuid::Uuid::new_v4().to_string();
        let id = db
            .users()
            .create(&uuid, "alice@example.com", "hash-one", "Alice")
            .await
            .unwrap();
        db.users().get_by_id(id).await.unwrap().unwrap()
    }

    async fn service() -> (TokenService, Database) {
        let db = Database::open(":memory:").await.unwrap();
        (TokenService::new(&b"test-secret-material-0123456789ab"[..], db.clone()), db)
    }

    #[tokio::test]
    async fn test_issue_and_validate_access_token() {
        let (tokens, db) = service().await;
        let user = test_user(&db).await;

        let issued = tokens.issue_access(&user).unwrap();
        assert_eq!(issued.max_age, ACCESS_TOKEN_TTL_SECS);

        let validated = tokens.validate_access(&issued.token).await.unwrap();
        assert_eq!(validated.unwrap().id, user.id);
    }

    #[tokio::test]
    async fn test_access_token_rejected_as_refresh() {
        let (tokens, db) = service().await;
        let user = test_user(&db).await;

        let access = tokens.issue_access(&user).unwrap();
        let refresh = tokens.issue_refresh(&user).unwrap();

        assert!(tokens.validate_refresh(&access.token).await.unwrap().is_none());
        assert!(tokens.validate_access(&refresh.token).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_password_change_invalidates_outstanding_tokens() {
        let (tokens, db) = service().await;
        let user = test_user(&db).await;

        let access = tokens.issue_access(&user).unwrap();
        let refresh = tokens.issue_refresh(&user).unwrap();

        db.users()
            .update_password_hash(user.id, "hash-two")
            .await
            .unwrap();

        assert!(tokens.validate_access(&access.token).await.unwrap().is_none());
        assert!(tokens.validate_refresh(&refresh.token).await.unwrap().is_none());

        // A token issued against the new hash is good until its own expiry
        let user = db.users().get_by_id(user.id).await.unwrap().unwrap();
        let fresh = tokens.issue_access(&user).unwrap();
        assert!(tokens.validate_access(&fresh.token).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_action_token_purpose_is_enforced() {
        let (tokens, db) = service().await;
        let user = test_user(&db).await;

        let confirm = tokens
            .issue_action(&user, ActionPurpose::EmailConfirm)
            .unwrap();

        // Correct purpose
        assert!(tokens
            .validate_action(&confirm.token, ActionPurpose::EmailConfirm)
            .await
            .unwrap()
            .is_some());

        // A confirmation token cannot be replayed against the reset flow
        assert!(tokens
            .validate_action(&confirm.token, ActionPurpose::PasswordReset)
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn test_action_token_for_unknown_email_is_untrusted() {
        let (tokens, db) = service().await;
        let user = test_user(&db).await;

        let issued = tokens
            .issue_action(&user, ActionPurpose::PasswordReset)
            .unwrap();

        // Remove the account entirely (test shortcut; production only deactivates)
        sqlx::query("DELETE FROM users WHERE id = ?")
            .bind(user.id)
            .execute(db.pool())
            .await
            .unwrap();

        assert!(tokens
            .validate_action(&issued.token, ActionPurpose::PasswordReset)
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn test_inactive_user_tokens_are_untrusted() {
        let (tokens, db) = service().await;
        let user = test_user(&db).await;

        let access = tokens.issue_access(&user).unwrap();
        db.users().set_active(user.id, false).await.unwrap();

        assert!(tokens.validate_access(&access.token).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_expired_token_is_untrusted() {
        let (tokens, db) = service().await;
        let user = test_user(&db).await;

        // Sign an already-expired token with the correct key material
        let now = now_unix().unwrap();
        let claims = Claims {
            sub: user.uuid.clone(),
            kind: TokenKind::Access,
            purpose: None,
            iat: now - 100,
            exp: now - 50,
        };
        let key = EncodingKey::from_secret(&tokens.key_material(&user.password_hash));
        let token = jsonwebtoken::encode(&Header::default(), &claims, &key).unwrap();

        assert!(tokens.validate_access(&token).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_tampered_and_garbage_tokens_are_untrusted() {
        let (tokens, db) = service().await;
        let user = test_user(&db).await;

        let issued = tokens.issue_access(&user).unwrap();
        let mut tampered = issued.token.clone();
        tampered.push('x');

        assert!(tokens.validate_access(&tampered).await.unwrap().is_none());
        assert!(tokens.validate_access("not-a-token").await.unwrap().is_none());
        assert!(tokens.validate_access("").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_token_is_bound_to_its_subject() {
        let (tokens, db) = service().await;
        let alice = test_user(&db).await;

        let bob_id = db
            .users()
            .create(
                &uuid::Uuid::new_v4().to_string(),
                "bob@example.com",
                "hash-one",
                "Bob",
            )
            .await
            .unwrap();

        let issued = tokens.issue_access(&alice).unwrap();
        let validated = tokens.validate_access(&issued.token).await.unwrap().unwrap();
        assert_eq!(validated.id, alice.id);
        assert_ne!(validated.id, bob_id);
    }
}
