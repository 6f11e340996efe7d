//! Local HTTP control surface for the session registry.
//!
//! `GET /health`, `GET /sessions`, `GET /sessions/{id}`,
//! `POST /sessions/start`, `POST /sessions/stop`, bound to loopback on
//! `config.http_port`.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::models::session::{Session, SessionMode};
use crate::registry::SessionRegistry;
use crate::{AppError, GlobalConfig, Result};

/// Shared state handed to every handler.
#[derive(Debug, Clone)]
pub struct AppState {
    /// Loaded configuration.
    pub config: Arc<GlobalConfig>,
    /// The single-session registry.
    pub registry: Arc<SessionRegistry>,
}

/// Body of `POST /sessions/start`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StartRequest {
    /// Project to preview.
    pub target_directory: Option<PathBuf>,
    /// Launch mode; `dev` when omitted.
    #[serde(default)]
    pub mode: SessionMode,
}

/// Body of `GET /sessions`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionsResponse {
    /// The live session, if any.
    pub current_session: Option<Session>,
    /// 1 with a current session, else 0.
    pub total_sessions: usize,
}

struct ApiError {
    status: StatusCode,
    message: String,
}

impl ApiError {
    fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status, Json(json!({ "error": self.message }))).into_response()
    }
}

impl From<AppError> for ApiError {
    fn from(err: AppError) -> Self {
        let status = match err {
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::Persistence(_) | AppError::Io(_) => StatusCode::INTERNAL_SERVER_ERROR,
            _ => StatusCode::BAD_REQUEST,
        };
        Self::new(status, err.to_string())
    }
}

async fn health() -> impl IntoResponse {
    Json(json!({ "status": "ok", "timestamp": Utc::now() }))
}

async fn list_sessions(State(state): State<AppState>) -> Json<SessionsResponse> {
    let current_session = state.registry.current_session();
    Json(SessionsResponse {
        total_sessions: usize::from(current_session.is_some()),
        current_session,
    })
}

async fn get_session(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> std::result::Result<Json<Session>, ApiError> {
    state
        .registry
        .session(&id)
        .map(Json)
        .map_err(|_| ApiError::new(StatusCode::NOT_FOUND, "Session not found"))
}

async fn start_session(
    State(state): State<AppState>,
    Json(request): Json<StartRequest>,
) -> std::result::Result<Response, ApiError> {
    let Some(target) = request.target_directory else {
        return Err(ApiError::new(
            StatusCode::BAD_REQUEST,
            "targetDirectory is required",
        ));
    };
    match state.registry.start_session(&target, request.mode).await {
        Ok(session) => Ok(Json(json!({ "success": true, "session": session })).into_response()),
        Err(err) => {
            warn!(target = %target.display(), %err, "session start rejected");
            Err(err.into())
        }
    }
}

async fn stop_session(State(state): State<AppState>) -> impl IntoResponse {
    let message = match state.registry.stop_current_session().await {
        Some(session) => format!("Session {} stopped", session.id),
        None => "No active session".to_owned(),
    };
    Json(json!({ "success": true, "message": message }))
}

/// Routes bound to `state`.
#[must_use]
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/sessions", get(list_sessions))
        .route("/sessions/start", post(start_session))
        .route("/sessions/stop", post(stop_session))
        .route("/sessions/{id}", get(get_session))
        .with_state(state)
}

/// Serve the control API on `127.0.0.1:<http_port>` until `ct` is cancelled.
///
/// The current session is not stopped here; the caller owns shutdown order.
///
/// # Errors
///
/// Returns `AppError::Config` if the listener cannot bind or the server fails.
pub async fn serve(state: AppState, ct: CancellationToken) -> Result<()> {
    let bind = SocketAddr::from(([127, 0, 0, 1], state.config.http_port));
    let listener = tokio::net::TcpListener::bind(bind)
        .await
        .map_err(|err| AppError::Config(format!("failed to bind HTTP on {bind}: {err}")))?;

    info!(%bind, "starting preview control API");

    axum::serve(listener, router(state))
        .with_graceful_shutdown(async move { ct.cancelled().await })
        .await
        .map_err(|err| AppError::Config(format!("HTTP server error: {err}")))?;

    info!("preview control API shut down");
    Ok(())
}
