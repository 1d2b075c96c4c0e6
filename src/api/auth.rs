//! Session endpoints: register, login, logout, verify, refresh, and the
//! admin / verified-email guards.
//!
//! Each handler is a pipeline composed at the route table. Stages that
//! double as guards (VerifySession, RequireAdmin, RequireVerifiedEmail)
//! respond when they hold the terminal slot and enrich the context
//! otherwise.

use axum::Router;
use axum::extract::{Request, State};
use axum::response::Response;
use axum::routing::post;
use futures::future::BoxFuture;
use uuid::Uuid;

use crate::AppState;
use crate::api::error::{AuthError, Envelope};
use crate::api::{MSG_INVALID_CREDENTIALS, MSG_LOCKED, MSG_MISSING_FIELDS, MSG_UNVERIFIED_ACCOUNT};
use crate::db::{UserRole, UserStore};
use crate::lockout::{self, LockState, Update};
use crate::password::{MIN_PASSWORD_LENGTH, hash_password, verify_password};
use crate::pipeline::{Pipeline, Stage, StageContext, StageFlow, StagePosition};
use crate::session::{ACCESS_COOKIE_NAME, REFRESH_COOKIE_NAME, get_cookie};
use crate::token::{ActionPurpose, now_unix, peek_expiry};

const MSG_SESSION_EXPIRED: &str = "Your login has expired. Please relogin and try again.";

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/register", post(register))
        .route("/login", post(login))
        .route("/logout", post(logout))
        .route("/verify", post(verify))
        .route("/refresh", post(refresh))
        .route("/admin", post(admin))
        .route("/verified-email", post(verified_email))
}

async fn register(State(state): State<AppState>, request: Request) -> Response {
    Pipeline::builder()
        .stage(ValidateRegister)
        .stage(Register)
        .terminal(Login)
        .handle(state, request)
        .await
}

async fn login(State(state): State<AppState>, request: Request) -> Response {
    Pipeline::builder()
        .terminal(Login)
        .handle(state, request)
        .await
}

async fn logout(State(state): State<AppState>, request: Request) -> Response {
    Pipeline::builder()
        .terminal(Logout)
        .handle(state, request)
        .await
}

async fn verify(State(state): State<AppState>, request: Request) -> Response {
    Pipeline::builder()
        .terminal(VerifySession)
        .handle(state, request)
        .await
}

async fn refresh(State(state): State<AppState>, request: Request) -> Response {
    Pipeline::builder()
        .terminal(Refresh)
        .handle(state, request)
        .await
}

async fn admin(State(state): State<AppState>, request: Request) -> Response {
    Pipeline::builder()
        .stage(VerifySession)
        .terminal(RequireAdmin)
        .handle(state, request)
        .await
}

async fn verified_email(State(state): State<AppState>, request: Request) -> Response {
    Pipeline::builder()
        .stage(VerifySession)
        .terminal(RequireVerifiedEmail)
        .handle(state, request)
        .await
}

/// Field checks for registration. All rule failures answer before any
/// store access happens.
pub struct ValidateRegister;

impl Stage for ValidateRegister {
    fn name(&self) -> &'static str {
        "validate-register"
    }

    fn run<'a>(
        &'a self,
        ctx: &'a mut StageContext,
        _position: StagePosition,
    ) -> BoxFuture<'a, Result<StageFlow, AuthError>> {
        Box::pin(async move {
            let (Some(email), Some(password), Some(confirm), Some(display_name)) = (
                ctx.field("email"),
                ctx.field("password"),
                ctx.field("confirmPassword"),
                ctx.field("displayName"),
            ) else {
                return Err(AuthError::Validation(MSG_MISSING_FIELDS.to_string()));
            };

            if display_name.trim().is_empty() {
                return Err(AuthError::Validation("You must supply a name.".to_string()));
            }
            if !is_plausible_email(email) {
                return Err(AuthError::Validation("That email is not valid.".to_string()));
            }
            if password.len() < MIN_PASSWORD_LENGTH {
                return Err(AuthError::Validation(format!(
                    "Your password is too weak! Please make your password over {} characters long.",
                    MIN_PASSWORD_LENGTH
                )));
            }
            if password != confirm {
                return Err(AuthError::Validation(
                    "Oops! Your passwords do not match.".to_string(),
                ));
            }

            Ok(StageFlow::Continue)
        })
    }
}

/// Creates the account and kicks off email verification, then hands the
/// request to the login stage so registration ends in a live session.
pub struct Register;

impl Stage for Register {
    fn name(&self) -> &'static str {
        "register"
    }

    fn run<'a>(
        &'a self,
        ctx: &'a mut StageContext,
        _position: StagePosition,
    ) -> BoxFuture<'a, Result<StageFlow, AuthError>> {
        Box::pin(async move {
            let (Some(email), Some(password), Some(display_name)) = (
                ctx.field("email").map(str::to_lowercase),
                ctx.field("password").map(str::to_string),
                ctx.field("displayName").map(str::to_string),
            ) else {
                return Err(AuthError::Validation(MSG_MISSING_FIELDS.to_string()));
            };

            let users = ctx.state.db.users();
            if users.get_by_email(&email).await?.is_some() {
                return Err(AuthError::Validation(
                    "Unable to register this user. Please try again.".to_string(),
                ));
            }

            let hash = hash_password(&password).map_err(|err| {
                tracing::error!(error = %err, "password hashing failed");
                AuthError::Transient("Something went wrong. Please try again.".to_string())
            })?;

            let uuid = Uuid::new_v4().to_string();
            let id = users.create(&uuid, &email, &hash, &display_name).await?;
            let Some(user) = users.get_by_id(id).await? else {
                return Err(AuthError::Transient(
                    "Connection error. Please try again".to_string(),
                ));
            };

            // The account outlives a failed verification mail; the user can
            // always hit the resend endpoint.
            match ctx.state.tokens.issue_action(&user, ActionPurpose::EmailConfirm) {
                Ok(issued) => {
                    if let Err(err) = ctx.state.mailer.send_verification(
                        &ctx.state.base_url,
                        &user.email,
                        &issued.token,
                    ) {
                        tracing::warn!(error = %err, "verification mail not sent at registration");
                    }
                }
                Err(err) => {
                    tracing::warn!(error = %err, "verification token not issued at registration");
                }
            }

            tracing::info!(uuid = %user.uuid, "user registered");
            ctx.user = Some(user);
            Ok(StageFlow::Continue)
        })
    }
}

/// Credential check with lockout accounting; on success, issues the
/// token pair and sets the session cookies.
pub struct Login;

impl Stage for Login {
    fn name(&self) -> &'static str {
        "login"
    }

    fn run<'a>(
        &'a self,
        ctx: &'a mut StageContext,
        _position: StagePosition,
    ) -> BoxFuture<'a, Result<StageFlow, AuthError>> {
        Box::pin(async move {
            let (Some(email), Some(password)) = (
                ctx.field("email").map(str::to_string),
                ctx.field("password").map(str::to_string),
            ) else {
                return Err(AuthError::Validation(MSG_MISSING_FIELDS.to_string()));
            };

            // A deactivated account answers exactly like an unknown one, so
            // login cannot be used to probe which accounts exist or are
            // disabled.
            let users = ctx.state.db.users();
            let user = match users.get_by_email(&email).await? {
                Some(user) if user.is_active => user,
                _ => {
                    return Err(AuthError::Authentication(MSG_INVALID_CREDENTIALS.to_string()));
                }
            };

            let now = now_unix()? as i64;

            // Locked accounts reject every attempt, correct password or
            // not, and keep counting without extending the lock.
            if lockout::lock_state(user.locked_until, now) == LockState::Locked {
                let update =
                    lockout::on_failed_attempt(user.login_attempts, user.locked_until, now);
                apply_lockout(&users, user.id, update).await?;
                return Err(AuthError::Authentication(MSG_LOCKED.to_string()));
            }

            if !verify_password(&password, &user.password_hash) {
                let update =
                    lockout::on_failed_attempt(user.login_attempts, user.locked_until, now);
                apply_lockout(&users, user.id, update).await?;

                // Even the attempt that arms the lock answers like any other
                // bad credential; the locked message starts on the next one.
                return Err(AuthError::Authentication(MSG_INVALID_CREDENTIALS.to_string()));
            }

            if let Update::Clear =
                lockout::on_successful_attempt(user.login_attempts, user.locked_until)
            {
                users.set_lockout(user.id, 0, None).await?;
            }

            let (access, refresh) = ctx.state.tokens.issue_pair(&user)?;
            ctx.cookies
                .extend(ctx.state.cookies.login_cookies(&access, &refresh));

            tracing::debug!(uuid = %user.uuid, "login succeeded");
            Ok(StageFlow::Respond(
                Envelope::ok("Successfully logged in.").with_user_token(&user, &access.token),
            ))
        })
    }
}

/// Expires all session cookies. Succeeds whether or not a session existed.
pub struct Logout;

impl Stage for Logout {
    fn name(&self) -> &'static str {
        "logout"
    }

    fn run<'a>(
        &'a self,
        ctx: &'a mut StageContext,
        _position: StagePosition,
    ) -> BoxFuture<'a, Result<StageFlow, AuthError>> {
        Box::pin(async move {
            let cleared = ctx.state.cookies.clear_all();
            ctx.cookies.extend(cleared);
            Ok(StageFlow::Respond(Envelope::ok("Successfully logged out.")))
        })
    }
}

/// Validates the access cookie. Terminal: answers with the user.
/// Pass-through: records the subject for the stages behind it.
pub struct VerifySession;

impl Stage for VerifySession {
    fn name(&self) -> &'static str {
        "verify-session"
    }

    fn run<'a>(
        &'a self,
        ctx: &'a mut StageContext,
        position: StagePosition,
    ) -> BoxFuture<'a, Result<StageFlow, AuthError>> {
        Box::pin(async move {
            let Some(token) = get_cookie(&ctx.headers, ACCESS_COOKIE_NAME).map(str::to_string)
            else {
                return Err(AuthError::Authentication(MSG_SESSION_EXPIRED.to_string()));
            };

            match ctx.state.tokens.validate_access(&token).await? {
                Some(user) => match position {
                    StagePosition::Terminal => Ok(StageFlow::Respond(
                        Envelope::ok("Found user.").with_user(&user),
                    )),
                    StagePosition::PassThrough => {
                        ctx.user = Some(user);
                        Ok(StageFlow::Continue)
                    }
                },
                None => {
                    // Unverified exp claim, used only to pick a message
                    let now = now_unix()?;
                    let msg = match peek_expiry(&token) {
                        Some(exp) if exp < now => MSG_SESSION_EXPIRED,
                        _ => MSG_UNVERIFIED_ACCOUNT,
                    };
                    Err(AuthError::Authentication(msg.to_string()))
                }
            }
        })
    }
}

/// Mints a new access token from the refresh cookie. Every failure path
/// tears the whole session down (fail closed).
pub struct Refresh;

impl Stage for Refresh {
    fn name(&self) -> &'static str {
        "refresh"
    }

    fn run<'a>(
        &'a self,
        ctx: &'a mut StageContext,
        _position: StagePosition,
    ) -> BoxFuture<'a, Result<StageFlow, AuthError>> {
        Box::pin(async move {
            let Some(token) = get_cookie(&ctx.headers, REFRESH_COOKIE_NAME).map(str::to_string)
            else {
                let cleared = ctx.state.cookies.clear_all();
                ctx.cookies.extend(cleared);
                return Err(AuthError::Authentication(
                    "Could not find expected cookies. Please try to relogin.".to_string(),
                ));
            };

            let Some(user) = ctx.state.tokens.validate_refresh(&token).await? else {
                let cleared = ctx.state.cookies.clear_all();
                ctx.cookies.extend(cleared);
                return Err(AuthError::Authentication(MSG_UNVERIFIED_ACCOUNT.to_string()));
            };

            let access = ctx.state.tokens.issue_access(&user)?;
            let cookie = ctx.state.cookies.access_cookie(&access);
            ctx.cookies.push(cookie);

            Ok(StageFlow::Respond(
                Envelope::ok("Successfully refreshed.").with_user_token(&user, &access.token),
            ))
        })
    }
}

/// Requires the verified subject to hold the admin role.
pub struct RequireAdmin;

impl Stage for RequireAdmin {
    fn name(&self) -> &'static str {
        "require-admin"
    }

    fn run<'a>(
        &'a self,
        ctx: &'a mut StageContext,
        position: StagePosition,
    ) -> BoxFuture<'a, Result<StageFlow, AuthError>> {
        Box::pin(async move {
            let Some(user) = ctx.user.clone() else {
                return Err(AuthError::Validation(
                    "Could not verify if you are an admin or not.".to_string(),
                ));
            };

            if user.role != UserRole::Admin {
                return Err(AuthError::Validation("User is not an admin.".to_string()));
            }

            match position {
                StagePosition::Terminal => Ok(StageFlow::Respond(
                    Envelope::ok("User is admin.").with_user(&user),
                )),
                StagePosition::PassThrough => Ok(StageFlow::Continue),
            }
        })
    }
}

/// Requires the verified subject to have a confirmed email address.
pub struct RequireVerifiedEmail;

impl Stage for RequireVerifiedEmail {
    fn name(&self) -> &'static str {
        "require-verified-email"
    }

    fn run<'a>(
        &'a self,
        ctx: &'a mut StageContext,
        position: StagePosition,
    ) -> BoxFuture<'a, Result<StageFlow, AuthError>> {
        Box::pin(async move {
            let Some(user) = ctx.user.clone() else {
                return Err(AuthError::Validation(
                    "Could not find a user to lookup. Please provide a valid user.".to_string(),
                ));
            };

            if !user.email_verified {
                return Err(AuthError::Validation(
                    "You have not verified your email yet! Please verify your email if you \
                     want to submit a sauce or add a review."
                        .to_string(),
                ));
            }

            match position {
                StagePosition::Terminal => Ok(StageFlow::Respond(
                    Envelope::ok("Email is verified.").with_user(&user),
                )),
                StagePosition::PassThrough => Ok(StageFlow::Continue),
            }
        })
    }
}

async fn apply_lockout(
    users: &UserStore,
    id: i64,
    update: Update,
) -> Result<(), sqlx::Error> {
    match update {
        Update::Persist {
            attempts,
            locked_until,
        } => users.set_lockout(id, attempts, locked_until).await,
        Update::Clear => users.set_lockout(id, 0, None).await,
        Update::None => Ok(()),
    }
}

// Full address validation belongs to the mail system; this only rejects
// obvious garbage before it reaches the store.
fn is_plausible_email(email: &str) -> bool {
    match email.split_once('@') {
        Some((local, domain)) => !local.is_empty() && domain.contains('.') && !domain.ends_with('.'),
        None => false,
    }
}
