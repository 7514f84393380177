// In-memory implementations for dev mode and testing
//
// These implementations keep all data in memory, making them perfect for:
// - Running the server without a database
// - Unit tests
// - Quick prototyping

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use parking_lot::Mutex;
use std::collections::BTreeSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use crate::error::Result;
use crate::event::{Event, NewEvent};
use crate::session::{SessionKey, SessionSummary};
use crate::traits::{EventQuery, EventStore, FilterOptions};

// ============================================================================
// InMemoryEventStore - Stores events in memory
// ============================================================================

#[derive(Debug, Clone)]
struct StoredEvent {
    /// Global append position, used to order events across sessions
    position: u64,
    event: Event,
}

#[derive(Debug, Default)]
struct SessionLog {
    events: Vec<StoredEvent>,
}

/// In-memory event store
///
/// Each session owns its own log behind its own mutex, so appends to
/// different sessions never contend. Sequence numbers are derived from the
/// log length while the session lock is held.
#[derive(Debug, Default)]
pub struct InMemoryEventStore {
    sessions: DashMap<SessionKey, Arc<Mutex<SessionLog>>>,
    next_position: AtomicU64,
}

impl InMemoryEventStore {
    /// Create a new in-memory event store
    pub fn new() -> Self {
        Self::default()
    }

    /// Total number of stored events
    pub fn len(&self) -> usize {
        self.sessions
            .iter()
            .map(|entry| entry.value().lock().events.len())
            .sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn log(&self, key: &SessionKey) -> Option<Arc<Mutex<SessionLog>>> {
        self.sessions.get(key).map(|entry| Arc::clone(entry.value()))
    }

    /// Matching events from every session that passes the app/session filters.
    ///
    /// Each session contributes at most `per_session` events, taken from the
    /// front or the back of its log.
    fn collect(
        &self,
        query: &EventQuery,
        per_session: usize,
        from_back: bool,
    ) -> Vec<StoredEvent> {
        let mut collected = Vec::new();
        for entry in self.sessions.iter() {
            let key = entry.key();
            if query.app.as_deref().is_some_and(|app| key.app != app) {
                continue;
            }
            if query
                .session_id
                .as_deref()
                .is_some_and(|session_id| key.session_id != session_id)
            {
                continue;
            }
            let log = entry.value().lock();
            let matching = log.events.iter().filter(|stored| query.matches(&stored.event));
            if from_back {
                let mut tail: Vec<StoredEvent> = matching.rev().take(per_session).cloned().collect();
                tail.reverse();
                collected.extend(tail);
            } else {
                collected.extend(matching.take(per_session).cloned());
            }
        }
        collected.sort_by_key(|stored| stored.position);
        collected
    }
}

#[async_trait]
impl EventStore for InMemoryEventStore {
    async fn append(&self, event: NewEvent, received_at: DateTime<Utc>) -> Result<Event> {
        let key = event.key();
        let log = Arc::clone(self.sessions.entry(key).or_default().value());

        let mut log = log.lock();
        let sequence = log.events.len() as u64 + 1;
        let position = self.next_position.fetch_add(1, Ordering::SeqCst);
        let stored = Event::from_new(event, sequence, received_at);
        log.events.push(StoredEvent {
            position,
            event: stored.clone(),
        });

        Ok(stored)
    }

    async fn query(&self, query: &EventQuery) -> Result<Vec<Event>> {
        if let (Some(app), Some(session_id)) = (&query.app, &query.session_id) {
            let Some(log) = self.log(&SessionKey::new(app, session_id)) else {
                return Ok(Vec::new());
            };
            let log = log.lock();
            // Sequences are contiguous from 1, so the index of `since + 1` is `since`.
            let skip = query.since_sequence.unwrap_or(0) as usize;
            return Ok(log
                .events
                .iter()
                .skip(skip)
                .take(query.limit)
                .map(|stored| stored.event.clone())
                .collect());
        }

        let mut collected = self.collect(query, query.limit, false);
        collected.truncate(query.limit);
        Ok(collected.into_iter().map(|stored| stored.event).collect())
    }

    async fn recent(&self, limit: usize) -> Result<Vec<Event>> {
        let collected = self.collect(&EventQuery::default(), limit, true);
        let skip = collected.len().saturating_sub(limit);
        Ok(collected
            .into_iter()
            .skip(skip)
            .map(|stored| stored.event)
            .collect())
    }

    async fn sessions(&self) -> Result<Vec<SessionSummary>> {
        let mut summaries: Vec<SessionSummary> = self
            .sessions
            .iter()
            .filter_map(|entry| {
                let log = entry.value().lock();
                let first = log.events.first()?;
                let last = log.events.last()?;
                Some(SessionSummary {
                    key: entry.key().clone(),
                    last_sequence: last.event.sequence,
                    first_event_at: first.event.received_at,
                    last_event_at: last.event.received_at,
                    last_event_type: last.event.event_type.clone(),
                })
            })
            .collect();
        summaries.sort_by(|a, b| a.key.cmp(&b.key));
        Ok(summaries)
    }

    async fn filter_options(&self) -> Result<FilterOptions> {
        let mut apps = BTreeSet::new();
        let mut session_ids = BTreeSet::new();
        let mut event_types = BTreeSet::new();
        for entry in self.sessions.iter() {
            apps.insert(entry.key().app.clone());
            session_ids.insert(entry.key().session_id.clone());
            let log = entry.value().lock();
            for stored in &log.events {
                event_types.insert(stored.event.event_type.to_string());
            }
        }
        Ok(FilterOptions {
            apps: apps.into_iter().collect(),
            session_ids: session_ids.into_iter().collect(),
            event_types: event_types.into_iter().collect(),
        })
    }
}
