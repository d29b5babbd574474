//! HTTP request handlers

use super::sse::sse_stream;
use super::types::{
    CommandRequest, CommandResponse, CreateSessionRequest, ErrorResponse, SessionListResponse,
    SessionResponse, SuccessResponse,
};
use super::AppState;
use crate::runtime::SessionError;
use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};

/// Create the API router
pub fn create_router(state: AppState) -> Router {
    Router::new()
        // Session creation and listing
        .route("/api/sessions", post(create_session).get(list_sessions))
        // Current observable state
        .route("/api/sessions/:id", get(get_session))
        // Player input
        .route("/api/sessions/:id/commands", post(submit_command))
        // SSE streaming
        .route("/api/sessions/:id/stream", get(stream_session))
        // Lifecycle
        .route("/api/sessions/:id/end", post(end_session))
        // Version
        .route("/version", get(get_version))
        .with_state(state)
}

// ============================================================
// Sessions
// ============================================================

async fn create_session(
    State(state): State<AppState>,
    payload: Option<Json<CreateSessionRequest>>,
) -> Result<(StatusCode, Json<SessionResponse>), AppError> {
    let request = payload.map(|Json(r)| r).unwrap_or_default();

    let handle = match request.session_id.as_deref().map(str::trim) {
        Some("") => return Err(AppError::BadRequest("session_id must not be empty".to_string())),
        Some(id) => state.registry.get_or_create(id).await?,
        None => state.registry.create().await?,
    };

    let session_state = state.registry.observe(&handle.session_id).await?;
    Ok((
        StatusCode::CREATED,
        Json(SessionResponse {
            session_id: handle.session_id,
            state: session_state,
        }),
    ))
}

async fn list_sessions(State(state): State<AppState>) -> Json<SessionListResponse> {
    Json(SessionListResponse {
        sessions: state.registry.list_active().await,
    })
}

async fn get_session(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<SessionResponse>, AppError> {
    let session_state = state.registry.observe(&id).await?;
    Ok(Json(SessionResponse {
        session_id: id,
        state: session_state,
    }))
}

// ============================================================
// Commands
// ============================================================

async fn submit_command(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(payload): Json<CommandRequest>,
) -> Result<(StatusCode, Json<CommandResponse>), AppError> {
    state.registry.submit(&id, &payload.text).await?;
    Ok((StatusCode::ACCEPTED, Json(CommandResponse { queued: true })))
}

// ============================================================
// SSE Streaming
// ============================================================

async fn stream_session(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, AppError> {
    // Subscribe first so nothing between the state read and the stream is lost
    let broadcast_rx = state.registry.subscribe(&id).await?;
    let session_state = state.registry.observe(&id).await?;
    Ok(sse_stream(id, session_state, broadcast_rx))
}

// ============================================================
// Lifecycle
// ============================================================

async fn end_session(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<SuccessResponse>, AppError> {
    state.registry.evict(&id).await?;
    Ok(Json(SuccessResponse { success: true }))
}

// ============================================================
// Version
// ============================================================

async fn get_version() -> &'static str {
    concat!("storyloom ", env!("CARGO_PKG_VERSION"))
}

// ============================================================
// Error Handling
// ============================================================

#[derive(Debug)]
enum AppError {
    BadRequest(String),
    NotFound(String),
    Unavailable(String),
    Internal(String),
}

impl From<SessionError> for AppError {
    fn from(error: SessionError) -> Self {
        match error {
            SessionError::SessionNotFound(_) => AppError::NotFound(error.to_string()),
            SessionError::Closed(_) => AppError::Unavailable(error.to_string()),
            SessionError::Store(e) => {
                tracing::error!(error = %e, "Snapshot store failed");
                AppError::Internal(e.to_string())
            }
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            AppError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            AppError::NotFound(msg) => (StatusCode::NOT_FOUND, msg),
            AppError::Unavailable(msg) => (StatusCode::SERVICE_UNAVAILABLE, msg),
            AppError::Internal(msg) => (StatusCode::INTERNAL_SERVER_ERROR, msg),
        };

        let body = Json(ErrorResponse::new(message));
        (status, body).into_response()
    }
}
