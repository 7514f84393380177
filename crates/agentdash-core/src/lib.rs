// Event pipeline core
//
// This crate holds the storage-agnostic pieces of the dashboard event service:
// validation of incoming hook events, per-session lifecycle tracking, the
// append-only store abstraction and the fan-out hub feeding live subscribers.
//
// Key design decisions:
// - EventStore is a trait so the API can run against Postgres or in memory
// - Sequence numbers are assigned by the store, never by the caller
// - The registry and hub are synchronous shared structures (dashmap, parking_lot);
//   nothing on the publish path awaits
// - A slow subscriber loses its own oldest messages and gets a gap marker,
//   it never slows down producers or other subscribers

pub mod error;
pub mod event;
pub mod hub;
pub mod registry;
pub mod session;
pub mod traits;

// In-memory store for dev mode and testing
pub mod memory;

// Re-exports for convenience
pub use error::{Result, StoreError, ValidationError};
pub use event::{validate, validate_bytes, Event, EventLimits, EventType, NewEvent};
pub use hub::{BroadcastHub, Delivery, EventEnvelope, HubMessage, Subscription};
pub use memory::InMemoryEventStore;
pub use registry::SessionRegistry;
pub use session::{SessionKey, SessionState, SessionStatus, SessionSummary};
pub use traits::{EventQuery, EventStore, FilterOptions};
