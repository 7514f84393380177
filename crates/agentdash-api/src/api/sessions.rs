// Session HTTP routes
//
// Sessions are derived from events and owned by the registry; these routes
// are read-only views of it.

use agentdash_core::{SessionKey, SessionRegistry, SessionState, SessionStatus};
use axum::{
    extract::{Path, Query, State},
    routing::get,
    Json, Router,
};
use serde::Deserialize;
use std::sync::Arc;
use utoipa::IntoParams;

use super::common::{ApiError, ErrorResponse, ListResponse};

/// App state for sessions routes
#[derive(Clone)]
pub struct AppState {
    pub registry: Arc<SessionRegistry>,
}

impl AppState {
    pub fn new(registry: Arc<SessionRegistry>) -> Self {
        Self { registry }
    }
}

/// Create session routes
pub fn routes(state: AppState) -> Router {
    Router::new()
        .route("/sessions", get(list_sessions))
        .route("/sessions/:app/:session_id", get(get_session))
        .with_state(state)
}

/// Query parameters for the sessions list
#[derive(Debug, Default, Deserialize, IntoParams)]
pub struct SessionsQuery {
    /// Filter by status: `active` or `stopped`.
    #[param(example = "active")]
    pub status: Option<String>,
}

/// GET /sessions - List sessions, most recently active first
#[utoipa::path(
    get,
    path = "/sessions",
    params(SessionsQuery),
    responses(
        (status = 200, description = "List of sessions", body = ListResponse<SessionState>),
        (status = 400, description = "Unknown status filter", body = ErrorResponse)
    ),
    tag = "sessions"
)]
pub async fn list_sessions(
    State(state): State<AppState>,
    Query(query): Query<SessionsQuery>,
) -> Result<Json<ListResponse<SessionState>>, ApiError> {
    let status = query
        .status
        .as_deref()
        .map(str::parse::<SessionStatus>)
        .transpose()
        .map_err(ApiError::BadRequest)?;

    Ok(Json(ListResponse::new(state.registry.list(status))))
}

/// GET /sessions/{app}/{session_id} - Get one session
#[utoipa::path(
    get,
    path = "/sessions/{app}/{session_id}",
    params(
        ("app" = String, Path, description = "Producer identifier"),
        ("session_id" = String, Path, description = "Session ID within the app")
    ),
    responses(
        (status = 200, description = "Session found", body = SessionState),
        (status = 404, description = "Session not found", body = ErrorResponse)
    ),
    tag = "sessions"
)]
pub async fn get_session(
    State(state): State<AppState>,
    Path((app, session_id)): Path<(String, String)>,
) -> Result<Json<SessionState>, ApiError> {
    let key = SessionKey::new(app, session_id);
    state
        .registry
        .get(&key)
        .map(Json)
        .ok_or_else(|| ApiError::NotFound(format!("Session {key} not found")))
}
