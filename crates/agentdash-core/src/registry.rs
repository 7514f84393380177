// Session registry
//
// Tracks per-session lifecycle state derived from observed events. The map is
// sharded (dashmap), so mutations for one key are linearized by the entry lock
// while unrelated sessions update in parallel. Sessions are never removed.

use chrono::{DateTime, Utc};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::time::Duration;

use crate::event::EventType;
use crate::session::{SessionKey, SessionState, SessionStatus, SessionSummary};

/// Default idle period after which an active session is considered stopped
pub const DEFAULT_IDLE_TIMEOUT: Duration = Duration::from_secs(600);

#[derive(Debug)]
pub struct SessionRegistry {
    sessions: DashMap<SessionKey, SessionState>,
    idle_timeout: Duration,
}

impl SessionRegistry {
    pub fn new(idle_timeout: Duration) -> Self {
        Self {
            sessions: DashMap::new(),
            idle_timeout,
        }
    }

    pub fn idle_timeout(&self) -> Duration {
        self.idle_timeout
    }

    /// Record an observed event and return the resulting session state.
    ///
    /// Creates the session on first sight. `last_event_at` never moves
    /// backwards, even if `observed_at` does.
    pub fn record_event(
        &self,
        app: &str,
        session_id: &str,
        event_type: &EventType,
        observed_at: DateTime<Utc>,
    ) -> SessionState {
        let status = if event_type.is_terminal() {
            SessionStatus::Stopped
        } else {
            SessionStatus::Active
        };

        match self.sessions.entry(SessionKey::new(app, session_id)) {
            Entry::Vacant(vacant) => {
                tracing::debug!(app, session_id, %event_type, "session started");
                let state = SessionState {
                    app: app.to_string(),
                    session_id: session_id.to_string(),
                    status,
                    started_at: observed_at,
                    last_event_at: observed_at,
                    event_count: 1,
                    last_event_type: Some(event_type.clone()),
                };
                vacant.insert(state.clone());
                state
            }
            Entry::Occupied(mut occupied) => {
                let state = occupied.get_mut();
                if state.status == SessionStatus::Stopped && status == SessionStatus::Active {
                    tracing::debug!(app, session_id, %event_type, "session reactivated");
                } else if state.status == SessionStatus::Active && status == SessionStatus::Stopped {
                    tracing::debug!(app, session_id, %event_type, "session stopped");
                }
                if observed_at > state.last_event_at {
                    state.last_event_at = observed_at;
                }
                state.event_count += 1;
                state.status = status;
                state.last_event_type = Some(event_type.clone());
                state.clone()
            }
        }
    }

    pub fn get(&self, key: &SessionKey) -> Option<SessionState> {
        self.sessions.get(key).map(|entry| entry.value().clone())
    }

    /// All sessions, most recently active first.
    pub fn list(&self, status: Option<SessionStatus>) -> Vec<SessionState> {
        let mut sessions: Vec<SessionState> = self
            .sessions
            .iter()
            .filter(|entry| status.map_or(true, |s| entry.value().status == s))
            .map(|entry| entry.value().clone())
            .collect();
        sessions.sort_by(|a, b| b.last_event_at.cmp(&a.last_event_at));
        sessions
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    /// Mark active sessions idle for at least `idle_timeout` as stopped.
    ///
    /// Returns the sessions that transitioned. Bookkeeping only: a later
    /// event reactivates the session.
    pub fn sweep_idle(&self, now: DateTime<Utc>) -> Vec<SessionState> {
        let Ok(idle_timeout) = chrono::Duration::from_std(self.idle_timeout) else {
            return Vec::new();
        };

        let mut transitioned = Vec::new();
        for mut entry in self.sessions.iter_mut() {
            let state = entry.value_mut();
            if state.status == SessionStatus::Active && now - state.last_event_at >= idle_timeout {
                state.status = SessionStatus::Stopped;
                transitioned.push(state.clone());
            }
        }
        if !transitioned.is_empty() {
            tracing::info!(count = transitioned.len(), "idle sessions marked stopped");
        }
        transitioned
    }

    /// Seed the registry from store summaries, keeping any session already known.
    pub fn restore(&self, summaries: impl IntoIterator<Item = SessionSummary>) -> usize {
        let mut restored = 0;
        for summary in summaries {
            if let Entry::Vacant(vacant) = self.sessions.entry(summary.key.clone()) {
                let status = if summary.last_event_type.is_terminal() {
                    SessionStatus::Stopped
                } else {
                    SessionStatus::Active
                };
                vacant.insert(SessionState {
                    app: summary.key.app,
                    session_id: summary.key.session_id,
                    status,
                    started_at: summary.first_event_at,
                    last_event_at: summary.last_event_at,
                    event_count: summary.last_sequence,
                    last_event_type: Some(summary.last_event_type),
                });
                restored += 1;
            }
        }
        restored
    }
}

impl Default for SessionRegistry {
    fn default() -> Self {
        Self::new(DEFAULT_IDLE_TIMEOUT)
    }
}
