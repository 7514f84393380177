// Event HTTP routes
//
// POST /events is the producer side (agent hooks). The GET routes are the
// historical side of the dashboard; they read the store directly and never
// touch the hub.
//
// Offset-based resumption: `since_sequence` returns events with a higher
// sequence, and `next_since_sequence` tells single-session readers where to
// continue.

use agentdash_core::{Event, EventQuery, EventStore, FilterOptions};
use axum::{
    body::Bytes,
    extract::{rejection::BytesRejection, DefaultBodyLimit, Query, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use utoipa::{IntoParams, ToSchema};
use uuid::Uuid;

use super::common::{ApiError, ErrorResponse, ListResponse};
use crate::services::IngestService;

// ============================================
// App State and Routes
// ============================================

/// App state for events routes
#[derive(Clone)]
pub struct AppState {
    pub ingest: Arc<IngestService>,
    pub store: Arc<dyn EventStore>,
}

impl AppState {
    pub fn new(ingest: Arc<IngestService>, store: Arc<dyn EventStore>) -> Self {
        Self { ingest, store }
    }
}

/// Create event routes
pub fn routes(state: AppState) -> Router {
    let body_limit = state.ingest.limits().max_event_bytes;
    Router::new()
        .route("/events", post(create_event).get(list_events))
        .route("/events/recent", get(recent_events))
        .route("/events/filter-options", get(filter_options))
        .layer(DefaultBodyLimit::max(body_limit))
        .with_state(state)
}

// ============================================
// Request / Response types
// ============================================

/// Event submitted by an agent hook
#[derive(Debug, Clone, Deserialize, Serialize, ToSchema)]
pub struct CreateEventRequest {
    /// Producer identifier.
    #[schema(example = "claude-code")]
    pub app: String,
    /// Agent run identifier, unique within `app`.
    #[schema(example = "s1")]
    pub session_id: String,
    /// Lifecycle point. Unrecognized values are accepted.
    #[schema(example = "PreToolUse")]
    pub event_type: String,
    /// Hook payload, stored as-is.
    #[serde(default)]
    #[schema(value_type = Object)]
    pub payload: Option<serde_json::Value>,
    /// Short human-readable description.
    #[serde(default)]
    pub summary: Option<String>,
}

/// Acknowledgement of an accepted event
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct CreateEventResponse {
    /// Server-assigned sequence within the session, starting at 1.
    pub sequence: u64,
    /// Server-assigned event ID.
    pub id: Uuid,
}

/// Query parameters for the events list
#[derive(Debug, Default, Deserialize, IntoParams)]
pub struct EventsQuery {
    /// Only events from this app.
    pub app: Option<String>,
    /// Only events from this session id.
    pub session_id: Option<String>,
    /// Only events with sequence > since_sequence.
    #[param(example = 0)]
    pub since_sequence: Option<u64>,
    /// Maximum number of events to return. Defaults to 100, capped at 1000.
    #[param(example = 100)]
    pub limit: Option<usize>,
}

/// Query parameters for recent events
#[derive(Debug, Default, Deserialize, IntoParams)]
pub struct RecentQuery {
    /// Number of events to return. Defaults to 100, capped at 1000.
    #[param(example = 100)]
    pub limit: Option<usize>,
}

/// Paginated response for events list with offset-based resumption.
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct EventsResponse {
    /// Array of events, in append order.
    pub data: Vec<Event>,
    /// Whether more events are available beyond this page.
    pub has_more: bool,
    /// Pass as `since_sequence` to get the next page. Only set when the
    /// query is scoped to a single session (`app` and `session_id`).
    pub next_since_sequence: Option<u64>,
}

const DEFAULT_LIMIT: usize = 100;
const MAX_LIMIT: usize = 1000;

fn clamp_limit(limit: Option<usize>) -> usize {
    limit.unwrap_or(DEFAULT_LIMIT).clamp(1, MAX_LIMIT)
}

// ============================================
// HTTP Handlers
// ============================================

/// POST /events - Submit an event
///
/// Fire-and-forget producers: the response only acknowledges storage.
#[utoipa::path(
    post,
    path = "/events",
    request_body = CreateEventRequest,
    responses(
        (status = 200, description = "Event accepted", body = CreateEventResponse),
        (status = 400, description = "Malformed or invalid event", body = ErrorResponse),
        (status = 413, description = "Event too large", body = ErrorResponse),
        (status = 503, description = "Event store unavailable", body = ErrorResponse)
    ),
    tag = "events"
)]
pub async fn create_event(
    State(state): State<AppState>,
    body: Result<Bytes, BytesRejection>,
) -> Result<Json<CreateEventResponse>, ApiError> {
    let body = body.map_err(|rejection| {
        if rejection.status() == StatusCode::PAYLOAD_TOO_LARGE {
            tracing::warn!("rejected event body over the size limit");
            ApiError::PayloadTooLarge(format!(
                "event exceeds the limit of {} bytes",
                state.ingest.limits().max_event_bytes
            ))
        } else {
            ApiError::BadRequest(rejection.body_text())
        }
    })?;

    let receipt = state.ingest.ingest_bytes(&body).await?;

    Ok(Json(CreateEventResponse {
        sequence: receipt.sequence,
        id: receipt.id,
    }))
}

/// GET /events - List stored events
#[utoipa::path(
    get,
    path = "/events",
    params(EventsQuery),
    responses(
        (status = 200, description = "Events list with pagination info", body = EventsResponse),
        (status = 503, description = "Event store unavailable", body = ErrorResponse)
    ),
    tag = "events"
)]
pub async fn list_events(
    State(state): State<AppState>,
    Query(query): Query<EventsQuery>,
) -> Result<Json<EventsResponse>, ApiError> {
    let limit = clamp_limit(query.limit);
    let single_session = query.app.is_some() && query.session_id.is_some();

    // Fetch one extra row to detect has_more
    let mut events = state
        .store
        .query(&EventQuery {
            app: query.app,
            session_id: query.session_id,
            since_sequence: query.since_sequence,
            limit: limit + 1,
        })
        .await?;

    let has_more = events.len() > limit;
    events.truncate(limit);

    let next_since_sequence = if single_session {
        events
            .last()
            .map(|e| e.sequence)
            .or(query.since_sequence)
    } else {
        None
    };

    Ok(Json(EventsResponse {
        data: events,
        has_more,
        next_since_sequence,
    }))
}

/// GET /events/recent - Latest events across all sessions
#[utoipa::path(
    get,
    path = "/events/recent",
    params(RecentQuery),
    responses(
        (status = 200, description = "Latest events, oldest first", body = ListResponse<Event>),
        (status = 503, description = "Event store unavailable", body = ErrorResponse)
    ),
    tag = "events"
)]
pub async fn recent_events(
    State(state): State<AppState>,
    Query(query): Query<RecentQuery>,
) -> Result<Json<ListResponse<Event>>, ApiError> {
    let events = state.store.recent(clamp_limit(query.limit)).await?;
    Ok(Json(ListResponse::new(events)))
}

/// GET /events/filter-options - Distinct apps, session ids and event types
#[utoipa::path(
    get,
    path = "/events/filter-options",
    responses(
        (status = 200, description = "Filter values", body = FilterOptions),
        (status = 503, description = "Event store unavailable", body = ErrorResponse)
    ),
    tag = "events"
)]
pub async fn filter_options(
    State(state): State<AppState>,
) -> Result<Json<FilterOptions>, ApiError> {
    Ok(Json(state.store.filter_options().await?))
}
