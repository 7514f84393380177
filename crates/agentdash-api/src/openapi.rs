// OpenAPI specification generation
//
// Used by the server (Swagger UI) and the export-openapi binary.

use crate::api;
use crate::api::{ErrorResponse, ListResponse};
use crate::services::{ResumeCursor, StreamRequest};
use agentdash_core::{Event, EventEnvelope, FilterOptions, SessionState, SessionStatus};
use utoipa::OpenApi;

/// OpenAPI documentation for the agentdash API
#[derive(OpenApi)]
#[openapi(
    paths(
        api::events::create_event,
        api::events::list_events,
        api::events::recent_events,
        api::events::filter_options,
        api::sessions::list_sessions,
        api::sessions::get_session,
        api::stream::stream_events,
    ),
    components(
        schemas(
            Event, EventEnvelope, FilterOptions,
            SessionState, SessionStatus,
            ErrorResponse,
            api::events::CreateEventRequest,
            api::events::CreateEventResponse,
            api::events::EventsResponse,
            ListResponse<Event>,
            ListResponse<SessionState>,
            // Stream handshake
            StreamRequest, ResumeCursor,
        )
    ),
    tags(
        (name = "events", description = "Event ingestion and history"),
        (name = "sessions", description = "Session state derived from events"),
        (name = "stream", description = "Live event stream (WebSocket)")
    ),
    info(
        title = "Agentdash API",
        description = "Collects lifecycle events from coding agents and streams them to dashboards",
        license(name = "MIT", url = "https://opensource.org/licenses/MIT")
    )
)]
pub struct ApiDoc;

impl ApiDoc {
    /// Generate the OpenAPI spec as a pretty-printed JSON string
    pub fn to_json() -> Result<String, serde_json::Error> {
        Self::openapi().to_pretty_json()
    }
}
