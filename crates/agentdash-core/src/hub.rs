// Broadcast hub
//
// Fans accepted events out to every live subscription. Each subscription owns
// a bounded FIFO; publishing pushes into every queue under a short
// synchronous lock and never waits on a slow consumer. When a queue is full
// the oldest item is dropped and the subscriber is told how many it missed.

use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use tokio::sync::Notify;

#[cfg(feature = "openapi")]
use utoipa::ToSchema;

use crate::event::Event;
use crate::session::SessionState;

/// Default per-subscriber queue capacity
pub const DEFAULT_QUEUE_CAPACITY: usize = 256;

/// An accepted event plus the session snapshot taken when it was recorded
#[derive(Debug, Clone, PartialEq, Serialize)]
#[cfg_attr(feature = "openapi", derive(ToSchema))]
pub struct EventEnvelope {
    pub event: Event,
    pub session_state: SessionState,
}

/// Item carried on a subscription queue
#[derive(Debug, Clone)]
pub enum HubMessage {
    Event(Arc<EventEnvelope>),
    /// Session state change not tied to an event (idle sweep)
    Session(Arc<SessionState>),
}

/// What a subscriber receives
#[derive(Debug, Clone)]
pub enum Delivery {
    Message(HubMessage),
    /// `missed` items were dropped from this subscriber's queue
    Gap { missed: u64 },
}

#[derive(Debug, Default)]
struct QueueState {
    items: VecDeque<HubMessage>,
    /// Drops not yet reported to the subscriber
    missed: u64,
    closed: bool,
}

#[derive(Debug)]
struct SubscriberQueue {
    state: Mutex<QueueState>,
    notify: Notify,
    capacity: usize,
    /// Lifetime drop count, for logging
    dropped: AtomicU64,
}

impl SubscriberQueue {
    fn new(capacity: usize) -> Self {
        Self {
            state: Mutex::new(QueueState::default()),
            notify: Notify::new(),
            capacity: capacity.max(1),
            dropped: AtomicU64::new(0),
        }
    }

    /// Push without waiting. Returns false if the oldest item had to be dropped.
    fn push(&self, message: HubMessage) -> bool {
        let delivered_cleanly = {
            let mut state = self.state.lock();
            if state.closed {
                return true;
            }
            let overflow = state.items.len() >= self.capacity;
            if overflow {
                state.items.pop_front();
                state.missed += 1;
            }
            state.items.push_back(message);
            !overflow
        };
        if !delivered_cleanly {
            self.dropped.fetch_add(1, Ordering::Relaxed);
        }
        // Stores a permit if the receiver is not parked yet
        self.notify.notify_one();
        delivered_cleanly
    }

    fn close(&self) {
        {
            let mut state = self.state.lock();
            state.closed = true;
            state.items.clear();
        }
        self.notify.notify_one();
    }

    fn try_take(&self) -> Taken {
        let mut state = self.state.lock();
        if state.closed {
            return Taken::Closed;
        }
        if state.missed > 0 {
            let missed = std::mem::take(&mut state.missed);
            return Taken::Delivery(Delivery::Gap { missed });
        }
        match state.items.pop_front() {
            Some(message) => Taken::Delivery(Delivery::Message(message)),
            None => Taken::Empty,
        }
    }
}

enum Taken {
    Delivery(Delivery),
    Empty,
    Closed,
}

#[derive(Debug)]
struct HubInner {
    subscribers: RwLock<HashMap<u64, Arc<SubscriberQueue>>>,
    next_id: AtomicU64,
    capacity: usize,
    closed: AtomicBool,
}

/// Fan-out point between ingestion and connected subscribers.
///
/// Cloning is cheap; clones share the same subscriber set.
#[derive(Debug, Clone)]
pub struct BroadcastHub {
    inner: Arc<HubInner>,
}

impl BroadcastHub {
    pub fn new(capacity: usize) -> Self {
        Self {
            inner: Arc::new(HubInner {
                subscribers: RwLock::new(HashMap::new()),
                next_id: AtomicU64::new(1),
                capacity,
                closed: AtomicBool::new(false),
            }),
        }
    }

    pub fn capacity(&self) -> usize {
        self.inner.capacity
    }

    /// Register a new subscription. Everything published after this call
    /// returns is queued for it.
    pub fn subscribe(&self) -> Subscription {
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        let queue = Arc::new(SubscriberQueue::new(self.inner.capacity));
        if self.inner.closed.load(Ordering::Acquire) {
            queue.close();
        } else {
            self.inner
                .subscribers
                .write()
                .insert(id, Arc::clone(&queue));
            tracing::debug!(subscription_id = id, "subscription registered");
        }
        Subscription {
            id,
            queue,
            hub: Arc::downgrade(&self.inner),
        }
    }

    /// Fan an event out to every subscription. Returns the number of recipients.
    pub fn publish(&self, event: Event, session_state: SessionState) -> usize {
        let envelope = Arc::new(EventEnvelope {
            event,
            session_state,
        });
        self.fan_out(HubMessage::Event(envelope))
    }

    /// Fan a session state change out to every subscription.
    pub fn publish_session(&self, session_state: SessionState) -> usize {
        self.fan_out(HubMessage::Session(Arc::new(session_state)))
    }

    fn fan_out(&self, message: HubMessage) -> usize {
        let subscribers = self.inner.subscribers.read();
        for (id, queue) in subscribers.iter() {
            if !queue.push(message.clone()) {
                tracing::warn!(
                    subscription_id = id,
                    total_dropped = queue.dropped.load(Ordering::Relaxed),
                    "subscriber queue full, dropped oldest message"
                );
            }
        }
        subscribers.len()
    }

    pub fn subscriber_count(&self) -> usize {
        self.inner.subscribers.read().len()
    }

    /// End every subscription and refuse new ones. Used on shutdown.
    pub fn close_all(&self) {
        self.inner.closed.store(true, Ordering::Release);
        let subscribers: Vec<Arc<SubscriberQueue>> =
            self.inner.subscribers.write().drain().map(|(_, q)| q).collect();
        tracing::info!(count = subscribers.len(), "closing all subscriptions");
        for queue in subscribers {
            queue.close();
        }
    }
}

impl Default for BroadcastHub {
    fn default() -> Self {
        Self::new(DEFAULT_QUEUE_CAPACITY)
    }
}

/// One subscriber's view of the hub. Unregisters on drop.
#[derive(Debug)]
pub struct Subscription {
    id: u64,
    queue: Arc<SubscriberQueue>,
    hub: Weak<HubInner>,
}

impl Subscription {
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Wait for the next delivery. Returns `None` once the hub has closed
    /// this subscription.
    pub async fn recv(&mut self) -> Option<Delivery> {
        loop {
            match self.queue.try_take() {
                Taken::Delivery(delivery) => return Some(delivery),
                Taken::Closed => return None,
                Taken::Empty => self.queue.notify.notified().await,
            }
        }
    }

    /// Take the next delivery if one is already queued.
    pub fn try_recv(&mut self) -> Option<Delivery> {
        match self.queue.try_take() {
            Taken::Delivery(delivery) => Some(delivery),
            Taken::Empty | Taken::Closed => None,
        }
    }

    /// Number of queued messages not yet received
    pub fn pending(&self) -> usize {
        self.queue.state.lock().items.len()
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(hub) = self.hub.upgrade() {
            if hub.subscribers.write().remove(&self.id).is_some() {
                tracing::debug!(subscription_id = self.id, "subscription removed");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::{EventType, NewEvent};
    use crate::session::SessionStatus;
    use chrono::Utc;
    use serde_json::json;
    use std::time::Duration;

    fn envelope_parts(session_id: &str, sequence: u64) -> (Event, SessionState) {
        let now = Utc::now();
        let event = Event::from_new(
            NewEvent {
                app: "demo".to_string(),
                session_id: session_id.to_string(),
                event_type: EventType::PostToolUse,
                payload: json!({}),
                summary: None,
            },
            sequence,
            now,
        );
        let state = SessionState {
            app: "demo".to_string(),
            session_id: session_id.to_string(),
            status: SessionStatus::Active,
            started_at: now,
            last_event_at: now,
            event_count: sequence,
            last_event_type: Some(EventType::PostToolUse),
        };
        (event, state)
    }

    fn publish_seq(hub: &BroadcastHub, session_id: &str, sequence: u64) {
        let (event, state) = envelope_parts(session_id, sequence);
        hub.publish(event, state);
    }

    fn expect_sequence(delivery: Option<Delivery>) -> u64 {
        match delivery {
            Some(Delivery::Message(HubMessage::Event(envelope))) => envelope.event.sequence,
            other => panic!("expected event delivery, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_publish_reaches_every_subscriber_in_order() {
        let hub = BroadcastHub::new(16);
        let mut a = hub.subscribe();
        let mut b = hub.subscribe();

        for seq in 1..=3 {
            publish_seq(&hub, "s1", seq);
        }

        for sub in [&mut a, &mut b] {
            for seq in 1..=3 {
                assert_eq!(expect_sequence(sub.recv().await), seq);
            }
            assert!(sub.try_recv().is_none());
        }
    }

    #[tokio::test]
    async fn test_publish_without_subscribers_is_a_noop() {
        let hub = BroadcastHub::default();
        let (event, state) = envelope_parts("s1", 1);
        assert_eq!(hub.publish(event, state), 0);
    }

    #[tokio::test]
    async fn test_full_queue_drops_oldest_and_reports_gap() {
        let hub = BroadcastHub::new(10);
        let mut sub = hub.subscribe();

        for seq in 1..=10 {
            publish_seq(&hub, "s1", seq);
        }
        assert_eq!(sub.pending(), 10);

        // 11th publish must not block and evicts sequence 1
        publish_seq(&hub, "s1", 11);
        assert_eq!(sub.pending(), 10);

        match sub.recv().await {
            Some(Delivery::Gap { missed }) => assert_eq!(missed, 1),
            other => panic!("expected gap, got {other:?}"),
        }
        for seq in 2..=11 {
            assert_eq!(expect_sequence(sub.recv().await), seq);
        }
        assert!(sub.try_recv().is_none());
    }

    #[tokio::test]
    async fn test_slow_subscriber_does_not_affect_others() {
        let hub = BroadcastHub::new(2);
        let mut slow = hub.subscribe();
        let mut fast = hub.subscribe();

        for seq in 1..=5 {
            publish_seq(&hub, "s1", seq);
            assert_eq!(expect_sequence(fast.recv().await), seq);
        }

        match slow.recv().await {
            Some(Delivery::Gap { missed }) => assert_eq!(missed, 3),
            other => panic!("expected gap, got {other:?}"),
        }
        assert_eq!(expect_sequence(slow.recv().await), 4);
        assert_eq!(expect_sequence(slow.recv().await), 5);
    }

    #[tokio::test]
    async fn test_recv_wakes_on_publish() {
        let hub = BroadcastHub::default();
        let mut sub = hub.subscribe();

        let publisher = hub.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            publish_seq(&publisher, "s1", 1);
        });

        let delivery = tokio::time::timeout(Duration::from_secs(2), sub.recv())
            .await
            .expect("recv should wake");
        assert_eq!(expect_sequence(delivery), 1);
    }

    #[tokio::test]
    async fn test_session_updates_are_queued() {
        let hub = BroadcastHub::default();
        let mut sub = hub.subscribe();
        let (_, mut state) = envelope_parts("s1", 4);
        state.status = SessionStatus::Stopped;

        assert_eq!(hub.publish_session(state), 1);
        match sub.recv().await {
            Some(Delivery::Message(HubMessage::Session(session))) => {
                assert_eq!(session.status, SessionStatus::Stopped)
            }
            other => panic!("expected session update, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_drop_unregisters() {
        let hub = BroadcastHub::default();
        let sub = hub.subscribe();
        let other = hub.subscribe();
        assert_eq!(hub.subscriber_count(), 2);

        drop(sub);
        assert_eq!(hub.subscriber_count(), 1);
        drop(other);
        assert_eq!(hub.subscriber_count(), 0);
    }

    #[tokio::test]
    async fn test_close_all_ends_subscriptions() {
        let hub = BroadcastHub::default();
        let mut sub = hub.subscribe();
        publish_seq(&hub, "s1", 1);

        let waiter = tokio::spawn(async move { sub.recv().await.is_none() });
        hub.close_all();
        assert!(waiter.await.unwrap());
        assert_eq!(hub.subscriber_count(), 0);

        // Late subscribers are closed immediately
        let mut late = hub.subscribe();
        assert!(late.recv().await.is_none());
    }
}
