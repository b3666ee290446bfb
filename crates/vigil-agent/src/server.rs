//! HTTP API and WebSocket upgrade surface
//!
//! Every route sits behind the capability gate: the auth middleware
//! verifies the session token (Authorization header, session cookie, or
//! `token` query parameter for WebSocket upgrades, in that order) and
//! injects the decoded identity before any handler runs. The upgrade
//! itself is therefore rejected outright for an anonymous client; there
//! is no downgraded session.

use std::sync::Arc;

use axum::{
    async_trait,
    extract::{FromRequestParts, Path, Request, State, WebSocketUpgrade},
    http::{header, request::Parts, StatusCode},
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use anyhow::Context;
use serde::{Deserialize, Serialize};
use serde_json::json;
use thiserror::Error;

use vigil_core::auth::{token_from_cookie_header, token_from_query, SESSION_COOKIE};
use vigil_core::error::{GateError, MutateError};
use vigil_core::Identity;

use crate::connection;
use crate::logs::{self, LogCategory};
use crate::mutator::EscalationSecret;
use crate::procs::{ManagedProcess, ProcessAction};
use crate::state::AgentState;

/// Failures surfaced on the request/response path
#[derive(Debug, Error)]
pub enum ApiError {
    #[error(transparent)]
    Gate(#[from] GateError),

    #[error("Elevated role required")]
    Forbidden,

    #[error("Invalid request: {0}")]
    BadRequest(String),

    #[error(transparent)]
    Mutate(#[from] MutateError),

    #[error("{0}")]
    Upstream(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, body) = match &self {
            ApiError::Gate(GateError::Unauthenticated) => {
                (StatusCode::UNAUTHORIZED, json!({ "error": self.to_string() }))
            }
            ApiError::Gate(GateError::Unauthorized) | ApiError::Forbidden => {
                (StatusCode::FORBIDDEN, json!({ "error": self.to_string() }))
            }
            ApiError::BadRequest(_) => (StatusCode::BAD_REQUEST, json!({ "error": self.to_string() })),
            ApiError::Mutate(e) => match e {
                MutateError::BadRequest(_) => {
                    (StatusCode::BAD_REQUEST, json!({ "error": self.to_string() }))
                }
                MutateError::UnknownTarget(_) => {
                    (StatusCode::NOT_FOUND, json!({ "error": self.to_string() }))
                }
                // Distinguishable from a generic apply failure so the user
                // knows to retype the secret rather than fix the content
                MutateError::IncorrectSecret => (
                    StatusCode::UNAUTHORIZED,
                    json!({ "error": "Incorrect escalation secret" }),
                ),
                MutateError::Apply { details } => (
                    StatusCode::BAD_REQUEST,
                    json!({ "error": "Operation failed", "details": details }),
                ),
                MutateError::Stage(_) | MutateError::Read(_) => (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    json!({ "error": self.to_string() }),
                ),
            },
            ApiError::Upstream(_) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                json!({ "error": self.to_string() }),
            ),
        };
        (status, Json(body)).into_response()
    }
}

/// Identity injected by the auth middleware
#[derive(Debug, Clone)]
pub struct CurrentIdentity(pub Identity);

#[async_trait]
impl<S: Send + Sync> FromRequestParts<S> for CurrentIdentity {
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .extensions
            .get::<CurrentIdentity>()
            .cloned()
            .ok_or(ApiError::Gate(GateError::Unauthenticated))
    }
}

/// Extractor for routes restricted to the elevated role
pub struct RequireElevated(pub Identity);

#[async_trait]
impl<S: Send + Sync> FromRequestParts<S> for RequireElevated {
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let CurrentIdentity(identity) = CurrentIdentity::from_request_parts(parts, state).await?;
        if !identity.role.is_elevated() {
            return Err(ApiError::Forbidden);
        }
        Ok(RequireElevated(identity))
    }
}

fn extract_token(req: &Request) -> Option<String> {
    // Bearer header first, then the session cookie, then the query
    // parameter (browsers cannot set headers on a WebSocket upgrade)
    if let Some(value) = req
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|h| h.to_str().ok())
    {
        if let Some(token) = value.strip_prefix("Bearer ") {
            if !token.is_empty() {
                return Some(token.to_string());
            }
        }
    }

    if let Some(token) = req
        .headers()
        .get(header::COOKIE)
        .and_then(|h| h.to_str().ok())
        .and_then(|cookies| token_from_cookie_header(cookies, SESSION_COOKIE))
    {
        return Some(token.to_string());
    }

    req.uri()
        .query()
        .and_then(token_from_query)
        .map(|t| t.to_string())
}

/// Capability gate for every route: verify the token, inject the identity
async fn auth_middleware(
    State(state): State<Arc<AgentState>>,
    mut req: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let token = extract_token(&req).ok_or(GateError::Unauthenticated)?;
    let identity = state.verifier.verify(&token)?;
    req.extensions_mut().insert(CurrentIdentity(identity));
    Ok(next.run(req).await)
}

async fn ws_handler(
    ws: WebSocketUpgrade,
    CurrentIdentity(identity): CurrentIdentity,
    State(state): State<Arc<AgentState>>,
) -> Response {
    ws.on_upgrade(move |socket| connection::serve(socket, identity, state))
}

#[derive(Debug, Serialize)]
struct ConfigReadResponse {
    content: String,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct ConfigWriteRequest {
    content: String,
    escalation_secret: String,
}

#[derive(Debug, Serialize)]
struct MessageResponse {
    message: String,
}

#[derive(Debug, Serialize)]
struct SuccessResponse {
    success: bool,
}

#[derive(Debug, Serialize)]
struct LogsResponse {
    lines: String,
}

async fn read_config(
    RequireElevated(_): RequireElevated,
    State(state): State<Arc<AgentState>>,
    Path(target): Path<String>,
) -> Result<Json<ConfigReadResponse>, ApiError> {
    let content = state.mutator.read(&target).await?;
    Ok(Json(ConfigReadResponse { content }))
}

async fn write_config(
    RequireElevated(_): RequireElevated,
    State(state): State<Arc<AgentState>>,
    Path(target): Path<String>,
    Json(req): Json<ConfigWriteRequest>,
) -> Result<Json<MessageResponse>, ApiError> {
    let secret = EscalationSecret::new(req.escalation_secret);
    state.mutator.apply(&target, &req.content, &secret).await?;
    Ok(Json(MessageResponse {
        message: "Configuration saved and service reloaded".to_string(),
    }))
}

async fn list_processes(
    CurrentIdentity(_): CurrentIdentity,
    State(state): State<Arc<AgentState>>,
) -> Result<Json<Vec<ManagedProcess>>, ApiError> {
    let procs = state
        .processes
        .list()
        .await
        .map_err(|e| ApiError::Upstream(format!("Failed to list processes: {:#}", e)))?;
    Ok(Json(procs))
}

async fn process_action(
    RequireElevated(_): RequireElevated,
    State(state): State<Arc<AgentState>>,
    Path((id, action)): Path<(u32, String)>,
) -> Result<Json<SuccessResponse>, ApiError> {
    let action = ProcessAction::parse(&action)
        .ok_or_else(|| ApiError::BadRequest(format!("unknown action: {}", action)))?;
    state
        .processes
        .act(id, action)
        .await
        .map_err(|e| ApiError::Upstream(format!("Process action failed: {:#}", e)))?;
    Ok(Json(SuccessResponse { success: true }))
}

async fn get_logs(
    RequireElevated(_): RequireElevated,
    Path(category): Path<String>,
) -> Result<Json<LogsResponse>, ApiError> {
    let category = LogCategory::parse(&category)
        .ok_or_else(|| ApiError::BadRequest(format!("unknown log category: {}", category)))?;
    let lines = logs::tail(category)
        .await
        .map_err(|e| ApiError::Upstream(format!("Failed to read logs: {:#}", e)))?;
    Ok(Json(LogsResponse { lines }))
}

/// Build the agent's router with the capability gate layered over it
pub fn router(state: Arc<AgentState>) -> Router {
    Router::new()
        .route("/api/channel", get(ws_handler))
        .route("/api/config/:target", get(read_config).put(write_config))
        .route("/api/processes", get(list_processes))
        .route("/api/processes/:id/:action", post(process_action))
        .route("/api/logs/:category", get(get_logs))
        .layer(middleware::from_fn_with_state(
            Arc::clone(&state),
            auth_middleware,
        ))
        .with_state(state)
}

/// Bind and serve until the shutdown signal
pub async fn serve(state: Arc<AgentState>) -> anyhow::Result<()> {
    let bind_addr = state.config.bind_addr.clone();
    let listener = tokio::net::TcpListener::bind(&bind_addr)
        .await
        .with_context(|| format!("Failed to bind {}", bind_addr))?;
    tracing::info!("Vigil agent listening on {}", listener.local_addr()?);

    axum::serve(listener, router(state))
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    Ok(())
}

async fn shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
    tracing::info!("Shutdown signal received");
}
