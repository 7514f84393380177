// Database models (internal, converted to core types at the repository edge)

use agentdash_core::{Event, EventType, SessionKey, SessionSummary, StoreError};
use chrono::{DateTime, Utc};
use sqlx::FromRow;
use uuid::Uuid;

// ============================================
// Event models
// ============================================

#[derive(Debug, Clone, FromRow)]
pub struct EventRow {
    pub position: i64,
    pub id: Uuid,
    pub app: String,
    pub session_id: String,
    pub sequence: i64,
    pub event_type: String,
    pub payload: sqlx::types::JsonValue,
    pub summary: Option<String>,
    pub received_at: DateTime<Utc>,
}

impl TryFrom<EventRow> for Event {
    type Error = StoreError;

    fn try_from(row: EventRow) -> Result<Self, Self::Error> {
        let sequence = u64::try_from(row.sequence).map_err(|_| {
            StoreError::corrupt(format!(
                "negative sequence {} for event {}",
                row.sequence, row.id
            ))
        })?;
        Ok(Event {
            id: row.id,
            app: row.app,
            session_id: row.session_id,
            event_type: EventType::from(row.event_type),
            payload: row.payload,
            summary: row.summary,
            received_at: row.received_at,
            sequence,
        })
    }
}

// ============================================
// Session counter models
// ============================================

#[derive(Debug, Clone, FromRow)]
pub struct SessionRow {
    pub app: String,
    pub session_id: String,
    pub last_sequence: i64,
    pub started_at: DateTime<Utc>,
    pub last_event_at: DateTime<Utc>,
    pub last_event_type: String,
}

impl TryFrom<SessionRow> for SessionSummary {
    type Error = StoreError;

    fn try_from(row: SessionRow) -> Result<Self, Self::Error> {
        let last_sequence = u64::try_from(row.last_sequence).map_err(|_| {
            StoreError::corrupt(format!(
                "negative last_sequence for session {}:{}",
                row.app, row.session_id
            ))
        })?;
        Ok(SessionSummary {
            key: SessionKey::new(row.app, row.session_id),
            last_sequence,
            first_event_at: row.started_at,
            last_event_at: row.last_event_at,
            last_event_type: EventType::from(row.last_event_type),
        })
    }
}
