// Ingest service
//
// Pipeline for one submitted event: validate → store → registry → hub.
// The last three steps run under a per-session async lock, so the hub sees
// each session's events in the order the store numbered them. Sessions never
// wait on each other.

use agentdash_core::{
    validate_bytes, BroadcastHub, EventLimits, EventStore, NewEvent, SessionKey, SessionRegistry,
    SessionState, StoreError, ValidationError,
};
use chrono::Utc;
use dashmap::DashMap;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::Mutex;
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum IngestError {
    #[error(transparent)]
    Validation(ValidationError),

    #[error("event of {size} bytes exceeds the limit of {limit} bytes")]
    PayloadTooLarge { size: usize, limit: usize },

    #[error("failed to append event: {0}")]
    StoreUnavailable(#[source] StoreError),
}

impl From<ValidationError> for IngestError {
    fn from(err: ValidationError) -> Self {
        match err {
            ValidationError::PayloadTooLarge { size, limit } => {
                IngestError::PayloadTooLarge { size, limit }
            }
            other => IngestError::Validation(other),
        }
    }
}

/// Result of an accepted event
#[derive(Debug, Clone)]
pub struct IngestReceipt {
    pub id: Uuid,
    pub sequence: u64,
    pub session: SessionState,
}

pub struct IngestService {
    store: Arc<dyn EventStore>,
    registry: Arc<SessionRegistry>,
    hub: BroadcastHub,
    limits: EventLimits,
    session_locks: DashMap<SessionKey, Arc<Mutex<()>>>,
}

impl IngestService {
    pub fn new(
        store: Arc<dyn EventStore>,
        registry: Arc<SessionRegistry>,
        hub: BroadcastHub,
        limits: EventLimits,
    ) -> Self {
        Self {
            store,
            registry,
            hub,
            limits,
            session_locks: DashMap::new(),
        }
    }

    pub fn limits(&self) -> &EventLimits {
        &self.limits
    }

    /// Validate a raw request body and ingest it.
    pub async fn ingest_bytes(&self, body: &[u8]) -> Result<IngestReceipt, IngestError> {
        let new_event = validate_bytes(body, &self.limits).map_err(|e| {
            tracing::warn!(error = %e, bytes = body.len(), "rejected event");
            IngestError::from(e)
        })?;
        self.ingest(new_event).await
    }

    /// Append, record and publish an already validated event.
    ///
    /// Exactly one append per call. Session state and subscribers only see the
    /// event after the append succeeded, and a store failure changes nothing.
    pub async fn ingest(&self, new_event: NewEvent) -> Result<IngestReceipt, IngestError> {
        let key = new_event.key();
        if new_event.event_type.is_unknown() {
            tracing::info!(
                app = %key.app,
                session_id = %key.session_id,
                event_type = %new_event.event_type,
                "accepted unrecognized event type"
            );
        }

        let lock = self.session_lock(&key);
        let _guard = lock.lock().await;

        // Never earlier than the session's last event, so received_at is monotonic
        let now = Utc::now();
        let received_at = self
            .registry
            .get(&key)
            .map_or(now, |session| session.last_event_at.max(now));

        let event = self
            .store
            .append(new_event, received_at)
            .await
            .map_err(|e| {
                tracing::error!(
                    app = %key.app,
                    session_id = %key.session_id,
                    error = %e,
                    "failed to append event"
                );
                IngestError::StoreUnavailable(e)
            })?;

        // Session state only moves once the event is durable
        let session = self.registry.record_event(
            &event.app,
            &event.session_id,
            &event.event_type,
            received_at,
        );

        let receipt = IngestReceipt {
            id: event.id,
            sequence: event.sequence,
            session: session.clone(),
        };

        let recipients = self.hub.publish(event, session);
        tracing::debug!(
            app = %key.app,
            session_id = %key.session_id,
            sequence = receipt.sequence,
            recipients,
            "event ingested"
        );

        Ok(receipt)
    }

    fn session_lock(&self, key: &SessionKey) -> Arc<Mutex<()>> {
        if let Some(lock) = self.session_locks.get(key) {
            return Arc::clone(lock.value());
        }
        Arc::clone(self.session_locks.entry(key.clone()).or_default().value())
    }
}
