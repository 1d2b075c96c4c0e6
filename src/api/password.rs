//! Password lifecycle endpoints: authenticated update, forgot-password
//! requests, and token-driven reset.
//!
//! The forgot endpoint is enumeration-safe: it answers with the same
//! success envelope whether or not the address belongs to an account.
//! Only a mail transport failure surfaces as a real error, since by then
//! account existence is already implied to nobody but us.

use axum::Router;
use axum::extract::{Request, State};
use axum::response::Response;
use axum::routing::post;

use futures::future::BoxFuture;

use crate::AppState;
use crate::api::MSG_MISSING_FIELDS;
use crate::api::auth::VerifySession;
use crate::api::error::{AuthError, Envelope};
use crate::password::{MIN_PASSWORD_LENGTH, hash_password, verify_password};
use crate::pipeline::{Pipeline, Stage, StageContext, StageFlow, StagePosition};
use crate::token::ActionPurpose;

const MSG_RESET_SENT: &str = "Password reset email has been sent! Thank you!";
const MSG_NOT_LEGIT: &str = "Could not verify user as legit. Please log out and try again.";
const MSG_UPDATE_FAILED: &str =
    "Could not update password. User's account may be locked or inactive.";
const MSG_UPDATED: &str = "Your password has been updated! Thank you.";

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/update", post(update))
        .route("/forgot", post(forgot))
        .route("/reset", post(reset))
}

async fn update(State(state): State<AppState>, request: Request) -> Response {
    Pipeline::builder()
        .stage(VerifySession)
        .stage(ValidatePasswordUpdate)
        .terminal(UpdatePassword)
        .handle(state, request)
        .await
}

async fn forgot(State(state): State<AppState>, request: Request) -> Response {
    Pipeline::builder()
        .terminal(RequestPasswordReset)
        .handle(state, request)
        .await
}

async fn reset(State(state): State<AppState>, request: Request) -> Response {
    Pipeline::builder()
        .stage(ValidatePasswordReset)
        .terminal(ResetPassword)
        .handle(state, request)
        .await
}

/// Checks the update fields and re-proves the current password before
/// any write happens. The subject comes from the verified session, never
/// from the request body.
pub struct ValidatePasswordUpdate;

impl Stage for ValidatePasswordUpdate {
    fn name(&self) -> &'static str {
        "validate-password-update"
    }

    fn run<'a>(
        &'a self,
        ctx: &'a mut StageContext,
        _position: StagePosition,
    ) -> BoxFuture<'a, Result<StageFlow, AuthError>> {
        Box::pin(async move {
            let Some(user) = ctx.user.clone() else {
                return Err(AuthError::Validation(MSG_NOT_LEGIT.to_string()));
            };

            let (Some(password), Some(new_password), Some(confirm)) = (
                ctx.field("password"),
                ctx.field("newPassword"),
                ctx.field("confirmNewPassword"),
            ) else {
                return Err(AuthError::Validation(MSG_MISSING_FIELDS.to_string()));
            };

            if new_password.len() < MIN_PASSWORD_LENGTH {
                return Err(AuthError::Validation(format!(
                    "Your new password is too weak! Please make your password over {} characters long.",
                    MIN_PASSWORD_LENGTH
                )));
            }
            if password.len() < MIN_PASSWORD_LENGTH {
                return Err(AuthError::Validation(format!(
                    "Your password is too weak! Please make your password over {} characters long.",
                    MIN_PASSWORD_LENGTH
                )));
            }
            if new_password != confirm {
                return Err(AuthError::Validation(
                    "New passwords do not match. Please try again.".to_string(),
                ));
            }

            if !verify_password(password, &user.password_hash) {
                return Err(AuthError::Authentication(
                    "Could not authenticate user. Please try again.".to_string(),
                ));
            }

            Ok(StageFlow::Continue)
        })
    }
}

/// Writes the new hash and re-issues the full cookie set, since the hash
/// change just invalidated every outstanding token.
pub struct UpdatePassword;

impl Stage for UpdatePassword {
    fn name(&self) -> &'static str {
        "update-password"
    }

    fn run<'a>(
        &'a self,
        ctx: &'a mut StageContext,
        _position: StagePosition,
    ) -> BoxFuture<'a, Result<StageFlow, AuthError>> {
        Box::pin(async move {
            let Some(user) = ctx.user.clone() else {
                return Err(AuthError::Validation(MSG_NOT_LEGIT.to_string()));
            };
            let Some(new_password) = ctx.field("newPassword").map(str::to_string) else {
                return Err(AuthError::Validation(
                    "Could not find a new password to update to.".to_string(),
                ));
            };

            let hash = hash_password(&new_password).map_err(|err| {
                tracing::error!(error = %err, "password hashing failed");
                AuthError::Transient("Something went wrong. Please try again.".to_string())
            })?;

            let users = ctx.state.db.users();
            if !users.update_password_hash(user.id, &hash).await? {
                return Err(AuthError::Authentication(MSG_UPDATE_FAILED.to_string()));
            }

            // Tokens must be signed against the stored hash, so re-read it
            let Some(user) = users.get_by_id(user.id).await? else {
                return Err(AuthError::Authentication(MSG_UPDATE_FAILED.to_string()));
            };

            let (access, refresh) = ctx.state.tokens.issue_pair(&user)?;
            ctx.cookies
                .extend(ctx.state.cookies.login_cookies(&access, &refresh));

            tracing::info!(uuid = %user.uuid, "password updated");
            Ok(StageFlow::Respond(
                Envelope::ok(MSG_UPDATED).with_user_token(&user, &access.token),
            ))
        })
    }
}

/// Sends a reset link if the address has an account; answers identically
/// either way.
pub struct RequestPasswordReset;

impl Stage for RequestPasswordReset {
    fn name(&self) -> &'static str {
        "request-password-reset"
    }

    fn run<'a>(
        &'a self,
        ctx: &'a mut StageContext,
        _position: StagePosition,
    ) -> BoxFuture<'a, Result<StageFlow, AuthError>> {
        Box::pin(async move {
            let sent = StageFlow::Respond(Envelope::ok(MSG_RESET_SENT));

            let Some(email) = ctx.field("email").map(str::to_lowercase) else {
                return Ok(sent);
            };

            let user = match ctx.state.db.users().get_by_email(&email).await {
                Ok(Some(user)) if user.is_active => user,
                Ok(_) => return Ok(sent),
                Err(err) => {
                    // Even a store failure keeps the enumeration-safe shape
                    tracing::error!(error = %err, "reset lookup failed");
                    return Ok(sent);
                }
            };

            let issued = match ctx
                .state
                .tokens
                .issue_action(&user, ActionPurpose::PasswordReset)
            {
                Ok(issued) => issued,
                Err(err) => {
                    tracing::error!(error = %err, "reset token not issued");
                    return Ok(sent);
                }
            };

            if let Err(err) =
                ctx.state
                    .mailer
                    .send_password_reset(&ctx.state.base_url, &user.email, &issued.token)
            {
                tracing::error!(error = %err, "reset mail not sent");
                return Err(AuthError::Transient(
                    "We tried to email your account but something went wrong. Please try again."
                        .to_string(),
                ));
            }

            Ok(sent)
        })
    }
}

/// Checks the reset fields and redeems the action token, resolving the
/// subject for the reset stage behind it.
pub struct ValidatePasswordReset;

impl Stage for ValidatePasswordReset {
    fn name(&self) -> &'static str {
        "validate-password-reset"
    }

    fn run<'a>(
        &'a self,
        ctx: &'a mut StageContext,
        _position: StagePosition,
    ) -> BoxFuture<'a, Result<StageFlow, AuthError>> {
        Box::pin(async move {
            let (Some(token), Some(password), Some(confirm)) = (
                ctx.field("token").map(str::to_string),
                ctx.field("password"),
                ctx.field("confirmPassword"),
            ) else {
                return Err(AuthError::Validation(MSG_MISSING_FIELDS.to_string()));
            };

            if password.len() < MIN_PASSWORD_LENGTH {
                return Err(AuthError::Validation(format!(
                    "Your new password is too weak! Please make your password over {} characters long.",
                    MIN_PASSWORD_LENGTH
                )));
            }
            if confirm.len() < MIN_PASSWORD_LENGTH {
                return Err(AuthError::Validation(format!(
                    "Your password is too weak! Please make your password over {} characters long.",
                    MIN_PASSWORD_LENGTH
                )));
            }
            if password != confirm {
                return Err(AuthError::Validation(
                    "New passwords do not match. Please try again.".to_string(),
                ));
            }

            let Some(user) = ctx
                .state
                .tokens
                .validate_action(&token, ActionPurpose::PasswordReset)
                .await?
            else {
                return Err(AuthError::Authentication(
                    "Could not validate your token. It may be expired or your password \
                     has already been updated."
                        .to_string(),
                ));
            };

            ctx.user = Some(user);
            Ok(StageFlow::Continue)
        })
    }
}

/// Writes the new hash. No session is issued; the user logs in with the
/// new password. The hash change also spends the reset token.
pub struct ResetPassword;

impl Stage for ResetPassword {
    fn name(&self) -> &'static str {
        "reset-password"
    }

    fn run<'a>(
        &'a self,
        ctx: &'a mut StageContext,
        _position: StagePosition,
    ) -> BoxFuture<'a, Result<StageFlow, AuthError>> {
        Box::pin(async move {
            let Some(user) = ctx.user.clone() else {
                return Err(AuthError::Validation(MSG_NOT_LEGIT.to_string()));
            };
            let Some(password) = ctx.field("password").map(str::to_string) else {
                return Err(AuthError::Validation(
                    "Could not find a new password to update to.".to_string(),
                ));
            };

            let hash = hash_password(&password).map_err(|err| {
                tracing::error!(error = %err, "password hashing failed");
                AuthError::Transient("Something went wrong. Please try again.".to_string())
            })?;

            if !ctx.state.db.users().update_password_hash(user.id, &hash).await? {
                return Err(AuthError::Authentication(MSG_UPDATE_FAILED.to_string()));
            }

            tracing::info!(uuid = %user.uuid, "password reset completed");
            Ok(StageFlow::Respond(Envelope::ok(MSG_UPDATED)))
        })
    }
}
