//! Composable request pipelines.
//!
//! Each endpoint is a fixed chain of stages declared at router
//! construction. A stage either passes the request along, answers early
//! with an envelope, or fails with a classified error. Exactly one stage
//! per chain is marked terminal, and only at composition time; the
//! builder makes a chain without a terminal stage unrepresentable.

use std::sync::Arc;

use axum::body::to_bytes;
use axum::extract::Request;
use axum::http::{HeaderMap, HeaderValue, header::SET_COOKIE};
use axum::response::{IntoResponse, Response};
use futures::future::BoxFuture;

use crate::AppState;
use crate::api::MSG_MISSING_FIELDS;
use crate::api::error::{AuthError, Envelope};
use crate::db::User;

/// Request bodies past this size are rejected before JSON parsing.
const MAX_BODY_BYTES: usize = 64 * 1024;

/// Where a stage sits in its chain. Declared when the chain is built,
/// never probed at runtime.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StagePosition {
    PassThrough,
    Terminal,
}

/// What a stage decided.
pub enum StageFlow {
    /// Hand the request to the next stage.
    Continue,
    /// Answer now with this envelope.
    Respond(Envelope),
}

/// Shared per-request state threaded through a chain.
pub struct StageContext {
    pub state: AppState,
    pub headers: HeaderMap,
    pub body: serde_json::Value,
    /// Authenticated subject, set by verification stages for later ones.
    pub user: Option<User>,
    /// Set-Cookie values to attach to whatever response ends the chain.
    pub cookies: Vec<String>,
}

impl StageContext {
    /// A string field from the JSON body, if present.
    pub fn field(&self, name: &str) -> Option<&str> {
        self.body.get(name)?.as_str()
    }
}

/// One step of a request pipeline. `position` is the slot the stage was
/// given when the route was composed; a stage that can serve both as a
/// standalone endpoint and as a guard responds when terminal and enriches
/// the context when pass-through.
pub trait Stage: Send + Sync {
    /// Stable name for logs.
    fn name(&self) -> &'static str;

    fn run<'a>(
        &'a self,
        ctx: &'a mut StageContext,
        position: StagePosition,
    ) -> BoxFuture<'a, Result<StageFlow, AuthError>>;
}

/// An ordered stage chain ending in a terminal stage.
#[derive(Clone)]
pub struct Pipeline {
    stages: Arc<Vec<(Arc<dyn Stage>, StagePosition)>>,
}

pub struct PipelineBuilder {
    stages: Vec<(Arc<dyn Stage>, StagePosition)>,
}

impl Pipeline {
    pub fn builder() -> PipelineBuilder {
        PipelineBuilder { stages: Vec::new() }
    }

    /// Run the chain against an incoming request and produce the response.
    pub async fn handle(&self, state: AppState, request: Request) -> Response {
        let (parts, body) = request.into_parts();

        let body = match to_bytes(body, MAX_BODY_BYTES).await {
            Ok(bytes) if bytes.is_empty() => serde_json::Value::Null,
            Ok(bytes) => match serde_json::from_slice(&bytes) {
                Ok(value) => value,
                Err(_) => {
                    let err = AuthError::Validation(MSG_MISSING_FIELDS.to_string());
                    return Envelope::error(&err).into_response();
                }
            },
            Err(_) => {
                let err = AuthError::Validation(MSG_MISSING_FIELDS.to_string());
                return Envelope::error(&err).into_response();
            }
        };

        let mut ctx = StageContext {
            state,
            headers: parts.headers,
            body,
            user: None,
            cookies: Vec::new(),
        };

        let envelope = self.run(&mut ctx).await;
        attach_cookies(envelope.into_response(), &ctx.cookies)
    }

    async fn run(&self, ctx: &mut StageContext) -> Envelope {
        for (stage, position) in self.stages.iter() {
            match stage.run(ctx, *position).await {
                Ok(StageFlow::Continue) => match position {
                    StagePosition::PassThrough => {}
                    StagePosition::Terminal => {
                        tracing::error!(
                            stage = stage.name(),
                            "terminal stage did not produce a response"
                        );
                        let err = AuthError::Transient(
                            "Something went wrong. Please try again.".to_string(),
                        );
                        return Envelope::error(&err);
                    }
                },
                Ok(StageFlow::Respond(envelope)) => return envelope,
                Err(err) => {
                    tracing::warn!(stage = stage.name(), error = %err, "stage failed");
                    return Envelope::error(&err);
                }
            }
        }

        // Unreachable: the builder only yields chains that end in a
        // terminal stage, and a terminal stage always returns above.
        let err = AuthError::Transient("Something went wrong. Please try again.".to_string());
        Envelope::error(&err)
    }
}

impl PipelineBuilder {
    /// Append a pass-through stage.
    pub fn stage(mut self, stage: impl Stage + 'static) -> Self {
        self.stages.push((Arc::new(stage), StagePosition::PassThrough));
        self
    }

    /// Close the chain with its terminal stage.
    pub fn terminal(mut self, stage: impl Stage + 'static) -> Pipeline {
        self.stages.push((Arc::new(stage), StagePosition::Terminal));
        Pipeline {
            stages: Arc::new(self.stages),
        }
    }
}

fn attach_cookies(mut response: Response, cookies: &[String]) -> Response {
    let headers = response.headers_mut();
    for cookie in cookies {
        if let Ok(value) = HeaderValue::from_str(cookie) {
            headers.append(SET_COOKIE, value);
        }
    }
    response
}
