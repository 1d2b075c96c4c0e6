//! Email verification endpoints: confirm via action token, and resend
//! the verification mail for a logged-in account.

use axum::Router;
use axum::extract::{Request, State};
use axum::response::Response;
use axum::routing::post;

use futures::future::BoxFuture;

use crate::AppState;
use crate::api::auth::VerifySession;
use crate::api::error::{AuthError, Envelope};
use crate::pipeline::{Pipeline, Stage, StageContext, StageFlow, StagePosition};
use crate::token::ActionPurpose;

const MSG_BAD_LINK: &str =
    "Oops! Your URL may be expired or invalid. Please request a new verification email and try again.";

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/confirm", post(confirm))
        .route("/resend", post(resend))
}

async fn confirm(State(state): State<AppState>, request: Request) -> Response {
    Pipeline::builder()
        .terminal(ConfirmEmail)
        .handle(state, request)
        .await
}

async fn resend(State(state): State<AppState>, request: Request) -> Response {
    Pipeline::builder()
        .stage(VerifySession)
        .terminal(ResendVerification)
        .handle(state, request)
        .await
}

/// Redeems an email-confirm action token and flips the verified flag.
pub struct ConfirmEmail;

impl Stage for ConfirmEmail {
    fn name(&self) -> &'static str {
        "confirm-email"
    }

    fn run<'a>(
        &'a self,
        ctx: &'a mut StageContext,
        _position: StagePosition,
    ) -> BoxFuture<'a, Result<StageFlow, AuthError>> {
        Box::pin(async move {
            let Some(token) = ctx.field("token").map(str::to_string) else {
                return Err(AuthError::Validation(
                    "Could not find an email address to verify. Please confirm email \
                     address is provided correctly and try again."
                        .to_string(),
                ));
            };

            let Some(user) = ctx
                .state
                .tokens
                .validate_action(&token, ActionPurpose::EmailConfirm)
                .await?
            else {
                return Err(AuthError::Authentication(MSG_BAD_LINK.to_string()));
            };

            if !ctx.state.db.users().set_email_verified(user.id, true).await? {
                return Err(AuthError::NotFound(MSG_BAD_LINK.to_string()));
            }

            tracing::info!(uuid = %user.uuid, "email verified");
            Ok(StageFlow::Respond(Envelope::ok(
                "Your email has been verified! Thank you!",
            )))
        })
    }
}

/// Issues a fresh confirmation token for the session user and mails it.
pub struct ResendVerification;

impl Stage for ResendVerification {
    fn name(&self) -> &'static str {
        "resend-verification"
    }

    fn run<'a>(
        &'a self,
        ctx: &'a mut StageContext,
        _position: StagePosition,
    ) -> BoxFuture<'a, Result<StageFlow, AuthError>> {
        Box::pin(async move {
            let Some(user) = ctx.user.clone() else {
                return Err(AuthError::Authentication(
                    "Could not find your email address. Your account may be locked or inactive."
                        .to_string(),
                ));
            };

            let issued = ctx
                .state
                .tokens
                .issue_action(&user, ActionPurpose::EmailConfirm)?;

            if let Err(err) =
                ctx.state
                    .mailer
                    .send_verification(&ctx.state.base_url, &user.email, &issued.token)
            {
                tracing::error!(error = %err, "verification mail not sent");
                return Err(AuthError::Transient(
                    "Could not resend verification email. User's account may be locked or \
                     inactive."
                        .to_string(),
                ));
            }

            Ok(StageFlow::Respond(Envelope::ok(
                "Email verification resent! Thank you.",
            )))
        })
    }
}
