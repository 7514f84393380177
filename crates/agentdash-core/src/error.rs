// Error types for the event pipeline

use thiserror::Error;

/// Result type alias for event store operations
pub type Result<T> = std::result::Result<T, StoreError>;

/// Reasons an inbound event submission is rejected before it reaches the store
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ValidationError {
    /// The request body is not a JSON object
    #[error("event must be a JSON object")]
    NotAnObject,

    /// A required field is absent or null
    #[error("missing required field: {0}")]
    MissingField(&'static str),

    /// A field is present but has the wrong shape
    #[error("invalid field {field}: {reason}")]
    InvalidField {
        field: &'static str,
        reason: String,
    },

    /// The body could not be parsed as JSON at all
    #[error("malformed JSON: {0}")]
    MalformedJson(String),

    /// Serialized event exceeds the configured limit
    #[error("event is {size} bytes, limit is {limit} bytes")]
    PayloadTooLarge { size: usize, limit: usize },
}

impl ValidationError {
    /// Create an invalid field error
    pub fn invalid(field: &'static str, reason: impl Into<String>) -> Self {
        ValidationError::InvalidField {
            field,
            reason: reason.into(),
        }
    }
}

/// Errors raised by an event store backend
#[derive(Debug, Error)]
pub enum StoreError {
    /// Storage layer fault (connection lost, disk full, constraint violation)
    #[error("event store unavailable: {0}")]
    Unavailable(String),

    /// Stored data could not be decoded
    #[error("corrupt event record: {0}")]
    Corrupt(String),
}

impl StoreError {
    /// Create an unavailable error
    pub fn unavailable(msg: impl Into<String>) -> Self {
        StoreError::Unavailable(msg.into())
    }

    /// Create a corrupt record error
    pub fn corrupt(msg: impl Into<String>) -> Self {
        StoreError::Corrupt(msg.into())
    }
}
