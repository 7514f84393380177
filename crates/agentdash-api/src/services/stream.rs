// Stream session
//
// One subscriber connection from registration to close, independent of the
// transport. Phases: Connecting → Backfilling → Live → Closed.
//
// The hub subscription is taken in `connect`, before any history is read, so
// events published while backfilling are queued rather than lost. A cursor per
// session (highest sequence delivered) filters the overlap between history and
// the live queue, which keeps delivery per session strictly increasing.

use agentdash_core::{
    BroadcastHub, Delivery, Event, EventQuery, EventStore, HubMessage, SessionKey,
    SessionRegistry, SessionState, Subscription,
};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::mpsc;
use utoipa::ToSchema;

/// Upper bound on a client-requested `backfill_limit`
pub const MAX_BACKFILL_LIMIT: usize = 1000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StreamConfig {
    /// Events sent on connect when the client gives no cursor
    pub initial_backfill_limit: usize,
    /// Page size when replaying a session from a cursor
    pub backfill_page_size: usize,
    /// How long to wait for the optional resume message
    pub handshake_timeout: Duration,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            initial_backfill_limit: 100,
            backfill_page_size: 500,
            handshake_timeout: Duration::from_millis(500),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamPhase {
    Connecting,
    Backfilling,
    Live,
    Closed,
}

/// Highest sequence the client already has for one session
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct ResumeCursor {
    pub app: String,
    pub session_id: String,
    pub sequence: u64,
}

/// Optional first message from the client
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct StreamRequest {
    #[serde(default)]
    pub resume_from: Vec<ResumeCursor>,
    #[serde(default)]
    pub backfill_limit: Option<usize>,
}

/// Frames written to the client
#[derive(Debug, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerFrame<'a> {
    Connected {
        subscription_id: u64,
    },
    Event {
        event: &'a Event,
        #[serde(skip_serializing_if = "Option::is_none")]
        session_state: Option<&'a SessionState>,
    },
    Session {
        session: &'a SessionState,
    },
    Gap {
        missed: u64,
    },
    Live {
        backfilled: usize,
    },
}

impl ServerFrame<'_> {
    pub fn to_json(&self) -> Option<String> {
        match serde_json::to_string(self) {
            Ok(json) => Some(json),
            Err(e) => {
                tracing::error!(error = %e, "failed to serialize stream frame");
                None
            }
        }
    }
}

#[derive(Debug, Error)]
#[error("stream closed by peer")]
pub struct StreamClosed;

/// Where a stream session writes its frames
#[async_trait]
pub trait FrameSink: Send {
    async fn send_frame(&mut self, frame: String) -> Result<(), StreamClosed>;
}

#[async_trait]
impl FrameSink for mpsc::Sender<String> {
    async fn send_frame(&mut self, frame: String) -> Result<(), StreamClosed> {
        self.send(frame).await.map_err(|_| StreamClosed)
    }
}

pub struct StreamSession {
    subscription: Subscription,
    store: Arc<dyn EventStore>,
    registry: Arc<SessionRegistry>,
    config: StreamConfig,
    cursors: HashMap<SessionKey, u64>,
    phase: StreamPhase,
}

impl StreamSession {
    /// Register with the hub. Nothing published after this returns is missed.
    pub fn connect(
        hub: &BroadcastHub,
        store: Arc<dyn EventStore>,
        registry: Arc<SessionRegistry>,
        config: StreamConfig,
    ) -> Self {
        Self {
            subscription: hub.subscribe(),
            store,
            registry,
            config,
            cursors: HashMap::new(),
            phase: StreamPhase::Connecting,
        }
    }

    pub fn id(&self) -> u64 {
        self.subscription.id()
    }

    pub fn phase(&self) -> StreamPhase {
        self.phase
    }

    pub fn cursor(&self, key: &SessionKey) -> Option<u64> {
        self.cursors.get(key).copied()
    }

    pub fn connected_frame(&self) -> Option<String> {
        ServerFrame::Connected {
            subscription_id: self.id(),
        }
        .to_json()
    }

    /// Backfill, then forward live messages until the hub closes or the sink fails.
    pub async fn run<S: FrameSink>(
        mut self,
        request: StreamRequest,
        sink: &mut S,
    ) -> Result<(), StreamClosed> {
        let result = async {
            self.backfill(&request, sink).await?;
            while self.next_live(sink).await? {}
            Ok::<(), StreamClosed>(())
        }
        .await;
        self.phase = StreamPhase::Closed;
        result
    }

    /// Replay history, then announce the switch to live delivery.
    ///
    /// With cursors, each listed session is paged from its cursor. Without,
    /// the most recent events across all sessions are sent. Returns the number
    /// of events delivered.
    pub async fn backfill<S: FrameSink>(
        &mut self,
        request: &StreamRequest,
        sink: &mut S,
    ) -> Result<usize, StreamClosed> {
        self.phase = StreamPhase::Backfilling;
        let mut backfilled = 0;

        if request.resume_from.is_empty() {
            let limit = request
                .backfill_limit
                .unwrap_or(self.config.initial_backfill_limit)
                .min(MAX_BACKFILL_LIMIT);
            if limit > 0 {
                match self.store.recent(limit).await {
                    Ok(events) => {
                        for event in &events {
                            if self.deliver_stored(event, sink).await? {
                                backfilled += 1;
                            }
                        }
                    }
                    Err(e) => {
                        tracing::warn!(subscription_id = self.id(), error = %e, "initial backfill failed");
                    }
                }
            }
        } else {
            for cursor in &request.resume_from {
                let key = SessionKey::new(&cursor.app, &cursor.session_id);
                let entry = self.cursors.entry(key).or_insert(0);
                *entry = (*entry).max(cursor.sequence);
            }
            let keys: Vec<SessionKey> = self.cursors.keys().cloned().collect();
            for key in keys {
                backfilled += self.backfill_session(&key, sink).await?;
            }
        }

        tracing::debug!(subscription_id = self.id(), backfilled, "backfill complete");
        if let Some(frame) = (ServerFrame::Live { backfilled }).to_json() {
            sink.send_frame(frame).await?;
        }
        self.phase = StreamPhase::Live;
        Ok(backfilled)
    }

    async fn backfill_session<S: FrameSink>(
        &mut self,
        key: &SessionKey,
        sink: &mut S,
    ) -> Result<usize, StreamClosed> {
        let page_size = self.config.backfill_page_size.max(1);
        let mut delivered = 0;
        let mut returned_any = false;
        loop {
            let since = self.cursor(key).unwrap_or(0);
            let page = match self
                .store
                .query(&EventQuery::session(key, since, page_size))
                .await
            {
                Ok(page) => page,
                Err(e) => {
                    tracing::warn!(
                        subscription_id = self.id(),
                        session = %key,
                        error = %e,
                        "session backfill failed"
                    );
                    return Ok(delivered);
                }
            };
            returned_any |= !page.is_empty();
            for event in &page {
                if self.deliver_stored(event, sink).await? {
                    delivered += 1;
                }
            }
            if page.len() < page_size {
                break;
            }
        }
        if !returned_any {
            self.clamp_stale_cursor(key).await;
        }
        Ok(delivered)
    }

    /// Pull a resume cursor back to the store's head when the store has never
    /// held that sequence, e.g. a client resuming across an in-memory restart.
    /// Otherwise live events at or below the cursor would be dropped as seen.
    async fn clamp_stale_cursor(&mut self, key: &SessionKey) {
        let Some(cursor) = self.cursor(key).filter(|&c| c > 0) else {
            return;
        };
        // Sequences are gapless, so the cursor is valid iff its own event is stored
        match self
            .store
            .query(&EventQuery::session(key, cursor - 1, 1))
            .await
        {
            Ok(found) if found.is_empty() => {
                let head = self
                    .registry
                    .get(key)
                    .map_or(0, |session| session.event_count)
                    .min(cursor - 1);
                tracing::warn!(
                    subscription_id = self.id(),
                    session = %key,
                    cursor,
                    head,
                    "resume cursor ahead of store, resetting"
                );
                self.cursors.insert(key.clone(), head);
            }
            Ok(_) => {}
            Err(e) => {
                tracing::warn!(
                    subscription_id = self.id(),
                    session = %key,
                    error = %e,
                    "resume cursor check failed"
                );
            }
        }
    }

    /// Handle one hub delivery. Returns false once the hub has closed the subscription.
    pub async fn next_live<S: FrameSink>(&mut self, sink: &mut S) -> Result<bool, StreamClosed> {
        let Some(delivery) = self.subscription.recv().await else {
            self.phase = StreamPhase::Closed;
            return Ok(false);
        };

        match delivery {
            Delivery::Message(HubMessage::Event(envelope)) => {
                self.deliver(&envelope.event, Some(&envelope.session_state), sink)
                    .await?;
            }
            Delivery::Message(HubMessage::Session(session)) => {
                if let Some(frame) = (ServerFrame::Session { session: &session }).to_json() {
                    sink.send_frame(frame).await?;
                }
            }
            Delivery::Gap { missed } => {
                tracing::warn!(subscription_id = self.id(), missed, "subscriber fell behind");
                if let Some(frame) = (ServerFrame::Gap { missed }).to_json() {
                    sink.send_frame(frame).await?;
                }
            }
        }
        Ok(true)
    }

    async fn deliver_stored<S: FrameSink>(
        &mut self,
        event: &Event,
        sink: &mut S,
    ) -> Result<bool, StreamClosed> {
        let session_state = self.registry.get(&event.key());
        self.deliver(event, session_state.as_ref(), sink).await
    }

    /// Send an event unless the client already has it. Advances the cursor.
    async fn deliver<S: FrameSink>(
        &mut self,
        event: &Event,
        session_state: Option<&SessionState>,
        sink: &mut S,
    ) -> Result<bool, StreamClosed> {
        let key = event.key();
        if self
            .cursors
            .get(&key)
            .is_some_and(|&cursor| event.sequence <= cursor)
        {
            return Ok(false);
        }

        if let Some(frame) = (ServerFrame::Event {
            event,
            session_state,
        })
        .to_json()
        {
            sink.send_frame(frame).await?;
        }
        self.cursors.insert(key, event.sequence);
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::IngestService;
    use agentdash_core::{EventLimits, InMemoryEventStore};
    use serde_json::{json, Value};

    #[async_trait]
    impl FrameSink for Vec<String> {
        async fn send_frame(&mut self, frame: String) -> Result<(), StreamClosed> {
            self.push(frame);
            Ok(())
        }
    }

    struct Fixture {
        store: Arc<InMemoryEventStore>,
        registry: Arc<SessionRegistry>,
        hub: BroadcastHub,
        ingest: IngestService,
    }

    impl Fixture {
        fn new(queue_capacity: usize) -> Self {
            let store = Arc::new(InMemoryEventStore::new());
            let registry = Arc::new(SessionRegistry::default());
            let hub = BroadcastHub::new(queue_capacity);
            let ingest = IngestService::new(
                store.clone(),
                registry.clone(),
                hub.clone(),
                EventLimits::default(),
            );
            Self {
                store,
                registry,
                hub,
                ingest,
            }
        }

        fn session(&self, config: StreamConfig) -> StreamSession {
            StreamSession::connect(&self.hub, self.store.clone(), self.registry.clone(), config)
        }

        async fn emit(&self, session_id: &str, event_type: &str) -> u64 {
            let body = serde_json::to_vec(&json!({
                "app": "demo",
                "session_id": session_id,
                "event_type": event_type,
            }))
            .unwrap();
            self.ingest.ingest_bytes(&body).await.unwrap().sequence
        }
    }

    fn parse(frames: &[String]) -> Vec<Value> {
        frames
            .iter()
            .map(|f| serde_json::from_str(f).unwrap())
            .collect()
    }

    /// (session_id, sequence) of every event frame
    fn event_sequences(frames: &[Value]) -> Vec<(String, u64)> {
        frames
            .iter()
            .filter(|f| f["type"] == "event")
            .map(|f| {
                (
                    f["event"]["session_id"].as_str().unwrap().to_string(),
                    f["event"]["sequence"].as_u64().unwrap(),
                )
            })
            .collect()
    }

    async fn drain_live(session: &mut StreamSession, sink: &mut Vec<String>) {
        while session.subscription.pending() > 0 {
            assert!(session.next_live(sink).await.unwrap());
        }
    }

    #[tokio::test]
    async fn test_initial_backfill_sends_recent_then_live_marker() {
        let fx = Fixture::new(64);
        for _ in 0..5 {
            fx.emit("s1", "PreToolUse").await;
        }

        let mut session = fx.session(StreamConfig {
            initial_backfill_limit: 3,
            ..Default::default()
        });
        assert_eq!(session.phase(), StreamPhase::Connecting);

        let mut sink = Vec::new();
        let backfilled = session
            .backfill(&StreamRequest::default(), &mut sink)
            .await
            .unwrap();
        assert_eq!(backfilled, 3);
        assert_eq!(session.phase(), StreamPhase::Live);

        let frames = parse(&sink);
        assert_eq!(
            event_sequences(&frames),
            vec![("s1".into(), 3), ("s1".into(), 4), ("s1".into(), 5)]
        );
        let last = frames.last().unwrap();
        assert_eq!(last["type"], "live");
        assert_eq!(last["backfilled"], 3);
        // Stored events carry the current session snapshot
        assert_eq!(frames[0]["session_state"]["status"], "active");
    }

    #[tokio::test]
    async fn test_resume_backfill_pages_from_cursor() {
        let fx = Fixture::new(64);
        for _ in 0..7 {
            fx.emit("s1", "PostToolUse").await;
        }
        fx.emit("other", "PostToolUse").await;

        let mut session = fx.session(StreamConfig {
            backfill_page_size: 2,
            ..Default::default()
        });
        let request: StreamRequest = serde_json::from_value(json!({
            "resume_from": [{"app": "demo", "session_id": "s1", "sequence": 2}]
        }))
        .unwrap();

        let mut sink = Vec::new();
        let backfilled = session.backfill(&request, &mut sink).await.unwrap();
        assert_eq!(backfilled, 5);
        let sequences: Vec<u64> = event_sequences(&parse(&sink))
            .into_iter()
            .map(|(_, seq)| seq)
            .collect();
        assert_eq!(sequences, vec![3, 4, 5, 6, 7]);
        assert_eq!(session.cursor(&SessionKey::new("demo", "s1")), Some(7));
    }

    #[tokio::test]
    async fn test_events_published_during_backfill_are_not_duplicated() {
        let fx = Fixture::new(64);
        fx.emit("s1", "UserPromptSubmit").await;

        // Subscribed now; these land both in the store and in the live queue
        let mut session = fx.session(StreamConfig::default());
        fx.emit("s1", "PreToolUse").await;
        fx.emit("s1", "PostToolUse").await;

        let mut sink = Vec::new();
        session
            .backfill(&StreamRequest::default(), &mut sink)
            .await
            .unwrap();
        fx.emit("s1", "Stop").await;
        drain_live(&mut session, &mut sink).await;

        let sequences: Vec<u64> = event_sequences(&parse(&sink))
            .into_iter()
            .map(|(_, seq)| seq)
            .collect();
        assert_eq!(sequences, vec![1, 2, 3, 4]);
    }

    #[tokio::test]
    async fn test_gap_is_forwarded_and_recoverable_by_resume() {
        let fx = Fixture::new(10);
        let mut session = fx.session(StreamConfig {
            initial_backfill_limit: 0,
            ..Default::default()
        });
        let mut sink = Vec::new();
        session
            .backfill(&StreamRequest::default(), &mut sink)
            .await
            .unwrap();

        // 11 events into a 10-slot queue: sequence 1 is dropped
        for _ in 0..11 {
            fx.emit("s1", "PostToolUse").await;
        }
        drain_live(&mut session, &mut sink).await;

        let frames = parse(&sink);
        let gap = frames.iter().find(|f| f["type"] == "gap").unwrap();
        assert_eq!(gap["missed"], 1);
        let live: Vec<u64> = event_sequences(&frames).into_iter().map(|(_, s)| s).collect();
        assert_eq!(live, (2..=11).collect::<Vec<u64>>());

        // Reconnect resuming from the predecessor of the dropped event
        let mut recovery = fx.session(StreamConfig::default());
        let mut recovered = Vec::new();
        recovery
            .backfill(
                &StreamRequest {
                    resume_from: vec![ResumeCursor {
                        app: "demo".into(),
                        session_id: "s1".into(),
                        sequence: 0,
                    }],
                    backfill_limit: None,
                },
                &mut recovered,
            )
            .await
            .unwrap();
        let recovered: Vec<u64> = event_sequences(&parse(&recovered))
            .into_iter()
            .map(|(_, seq)| seq)
            .collect();
        assert_eq!(recovered, (1..=11).collect::<Vec<u64>>());
    }

    #[tokio::test]
    async fn test_cursor_ahead_of_store_is_reset() {
        // Store restarted empty; the client still remembers sequence 5
        let fx = Fixture::new(64);
        let mut session = fx.session(StreamConfig::default());
        let request: StreamRequest = serde_json::from_value(json!({
            "resume_from": [{"app": "demo", "session_id": "s1", "sequence": 5}]
        }))
        .unwrap();

        let mut sink = Vec::new();
        let backfilled = session.backfill(&request, &mut sink).await.unwrap();
        assert_eq!(backfilled, 0);
        let key = SessionKey::new("demo", "s1");
        assert_eq!(session.cursor(&key), Some(0));

        for _ in 0..3 {
            fx.emit("s1", "PreToolUse").await;
        }
        drain_live(&mut session, &mut sink).await;

        let sequences: Vec<u64> = event_sequences(&parse(&sink))
            .into_iter()
            .map(|(_, seq)| seq)
            .collect();
        assert_eq!(sequences, vec![1, 2, 3]);
        assert_eq!(session.cursor(&key), Some(3));
    }

    #[tokio::test]
    async fn test_cursor_at_head_is_kept() {
        let fx = Fixture::new(64);
        for _ in 0..3 {
            fx.emit("s1", "PreToolUse").await;
        }
        let mut session = fx.session(StreamConfig::default());
        let request: StreamRequest = serde_json::from_value(json!({
            "resume_from": [{"app": "demo", "session_id": "s1", "sequence": 3}]
        }))
        .unwrap();

        let mut sink = Vec::new();
        session.backfill(&request, &mut sink).await.unwrap();
        assert_eq!(session.cursor(&SessionKey::new("demo", "s1")), Some(3));

        fx.emit("s1", "Stop").await;
        drain_live(&mut session, &mut sink).await;
        let sequences: Vec<u64> = event_sequences(&parse(&sink))
            .into_iter()
            .map(|(_, seq)| seq)
            .collect();
        assert_eq!(sequences, vec![4]);
    }

    #[tokio::test]
    async fn test_session_updates_are_forwarded() {
        let fx = Fixture::new(8);
        let mut session = fx.session(StreamConfig::default());
        let mut sink = Vec::new();
        session
            .backfill(&StreamRequest::default(), &mut sink)
            .await
            .unwrap();
        sink.clear();

        let state = fx.registry.record_event(
            "demo",
            "s1",
            &agentdash_core::EventType::Stop,
            chrono::Utc::now(),
        );
        fx.hub.publish_session(state);
        assert!(session.next_live(&mut sink).await.unwrap());

        let frames = parse(&sink);
        assert_eq!(frames[0]["type"], "session");
        assert_eq!(frames[0]["session"]["status"], "stopped");
    }

    #[tokio::test]
    async fn test_run_ends_when_hub_closes() {
        let fx = Fixture::new(8);
        let session = fx.session(StreamConfig::default());
        fx.hub.close_all();

        let mut sink = Vec::new();
        session
            .run(StreamRequest::default(), &mut sink)
            .await
            .unwrap();
        assert_eq!(parse(&sink).last().unwrap()["type"], "live");
    }

    #[test]
    fn test_connected_frame_shape() {
        let frame: Value = serde_json::from_str(
            &ServerFrame::Connected { subscription_id: 7 }.to_json().unwrap(),
        )
        .unwrap();
        assert_eq!(frame, json!({"type": "connected", "subscription_id": 7}));
    }
}
