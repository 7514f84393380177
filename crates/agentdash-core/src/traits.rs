// Core traits for pluggable backends
//
// The ingestion pipeline and the subscription gateway only see `EventStore`:
// - In-memory implementation for dev mode and tests (crate::memory)
// - PostgreSQL implementation for production (agentdash-storage)

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[cfg(feature = "openapi")]
use utoipa::ToSchema;

use crate::error::Result;
use crate::event::{Event, NewEvent};
use crate::session::{SessionKey, SessionSummary};

/// Filter for historical reads
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EventQuery {
    pub app: Option<String>,
    pub session_id: Option<String>,
    /// Only events with `sequence > since_sequence`
    pub since_sequence: Option<u64>,
    pub limit: usize,
}

impl EventQuery {
    /// Query one session's events after a known sequence.
    pub fn session(key: &SessionKey, since_sequence: u64, limit: usize) -> Self {
        Self {
            app: Some(key.app.clone()),
            session_id: Some(key.session_id.clone()),
            since_sequence: Some(since_sequence),
            limit,
        }
    }

    /// Whether an event passes the filters (ignores `limit`).
    pub fn matches(&self, event: &Event) -> bool {
        self.app.as_deref().map_or(true, |app| event.app == app)
            && self
                .session_id
                .as_deref()
                .map_or(true, |session_id| event.session_id == session_id)
            && self
                .since_sequence
                .map_or(true, |since| event.sequence > since)
    }
}

/// Distinct values seen by the store, for dashboard filter dropdowns
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(ToSchema))]
pub struct FilterOptions {
    pub apps: Vec<String>,
    pub session_ids: Vec<String>,
    pub event_types: Vec<String>,
}

/// Append-only event log
///
/// `append` is the single serialization point for sequence numbers: it must
/// assign the next sequence for the event's session atomically with the write,
/// so sequences stay contiguous from 1 under concurrent producers. Appends for
/// different sessions must not serialize behind each other.
#[async_trait]
pub trait EventStore: Send + Sync {
    /// Append an event and return the stored record with its sequence.
    ///
    /// Once this returns `Ok`, the event is visible to every later `query`.
    async fn append(&self, event: NewEvent, received_at: DateTime<Utc>) -> Result<Event>;

    /// Events matching the query, in append order (sequence order within a session).
    async fn query(&self, query: &EventQuery) -> Result<Vec<Event>>;

    /// The latest `limit` events across all sessions, oldest first.
    async fn recent(&self, limit: usize) -> Result<Vec<Event>>;

    /// One summary per session that has at least one stored event.
    async fn sessions(&self) -> Result<Vec<SessionSummary>>;

    /// Distinct apps, session ids and event types.
    async fn filter_options(&self) -> Result<FilterOptions>;
}
