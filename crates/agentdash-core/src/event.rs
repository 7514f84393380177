// Event entity type and validation
//
// Events are the immutable records produced by agent hooks. Producers are
// untrusted: everything arriving over the wire goes through `validate` before
// it can be appended to a store.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use uuid::Uuid;

#[cfg(feature = "openapi")]
use utoipa::ToSchema;

use crate::error::ValidationError;
use crate::session::SessionKey;

/// Lifecycle point reported by an agent hook
///
/// Serialized as the raw hook name. Values outside the known set are kept
/// verbatim in `Unknown` so new hook types flow through without a release.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum EventType {
    SessionStart,
    UserPromptSubmit,
    PreToolUse,
    PostToolUse,
    Notification,
    PreCompact,
    SubagentStop,
    Stop,
    SessionEnd,
    Unknown(String),
}

impl EventType {
    pub fn as_str(&self) -> &str {
        match self {
            EventType::SessionStart => "SessionStart",
            EventType::UserPromptSubmit => "UserPromptSubmit",
            EventType::PreToolUse => "PreToolUse",
            EventType::PostToolUse => "PostToolUse",
            EventType::Notification => "Notification",
            EventType::PreCompact => "PreCompact",
            EventType::SubagentStop => "SubagentStop",
            EventType::Stop => "Stop",
            EventType::SessionEnd => "SessionEnd",
            EventType::Unknown(other) => other,
        }
    }

    /// Whether this event ends the session it belongs to.
    ///
    /// `SubagentStop` only ends a child agent, the parent session keeps running.
    pub fn is_terminal(&self) -> bool {
        matches!(self, EventType::Stop | EventType::SessionEnd)
    }

    pub fn is_unknown(&self) -> bool {
        matches!(self, EventType::Unknown(_))
    }
}

impl From<&str> for EventType {
    fn from(s: &str) -> Self {
        match s {
            "SessionStart" => EventType::SessionStart,
            "UserPromptSubmit" => EventType::UserPromptSubmit,
            "PreToolUse" => EventType::PreToolUse,
            "PostToolUse" => EventType::PostToolUse,
            "Notification" => EventType::Notification,
            "PreCompact" => EventType::PreCompact,
            "SubagentStop" => EventType::SubagentStop,
            "Stop" => EventType::Stop,
            "SessionEnd" => EventType::SessionEnd,
            other => EventType::Unknown(other.to_string()),
        }
    }
}

impl From<String> for EventType {
    fn from(s: String) -> Self {
        match EventType::from(s.as_str()) {
            EventType::Unknown(_) => EventType::Unknown(s),
            known => known,
        }
    }
}

impl From<EventType> for String {
    fn from(event_type: EventType) -> Self {
        match event_type {
            EventType::Unknown(other) => other,
            known => known.as_str().to_string(),
        }
    }
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A validated submission that has not been assigned a sequence yet
#[derive(Debug, Clone, PartialEq)]
pub struct NewEvent {
    pub app: String,
    pub session_id: String,
    pub event_type: EventType,
    pub payload: Value,
    pub summary: Option<String>,
}

impl NewEvent {
    pub fn key(&self) -> SessionKey {
        SessionKey::new(&self.app, &self.session_id)
    }
}

/// Event - an accepted hook submission, immutable once stored
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(ToSchema))]
pub struct Event {
    /// Server-assigned record ID.
    pub id: Uuid,
    /// Producer identifier (e.g. the project the agent runs in).
    #[cfg_attr(feature = "openapi", schema(example = "demo"))]
    pub app: String,
    /// Agent run identifier, unique within `app`.
    #[cfg_attr(feature = "openapi", schema(example = "s1"))]
    pub session_id: String,
    /// Hook name. Unrecognized names are passed through unchanged.
    #[cfg_attr(feature = "openapi", schema(value_type = String, example = "PreToolUse"))]
    pub event_type: EventType,
    /// Hook payload as JSON. Structure depends on event_type.
    #[cfg_attr(feature = "openapi", schema(value_type = Object))]
    pub payload: Value,
    /// Short human-readable description.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub summary: Option<String>,
    /// When the server accepted the event.
    pub received_at: DateTime<Utc>,
    /// Position within the session, contiguous from 1.
    pub sequence: u64,
}

impl Event {
    /// Build the stored record for a validated submission.
    pub fn from_new(new_event: NewEvent, sequence: u64, received_at: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::now_v7(),
            app: new_event.app,
            session_id: new_event.session_id,
            event_type: new_event.event_type,
            payload: new_event.payload,
            summary: new_event.summary,
            received_at,
            sequence,
        }
    }

    pub fn key(&self) -> SessionKey {
        SessionKey::new(&self.app, &self.session_id)
    }
}

// ============================================
// Validation
// ============================================

/// Size limits applied to inbound events
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EventLimits {
    /// Upper bound on the serialized event (all fields together)
    pub max_event_bytes: usize,
    /// Upper bound on `app`, `session_id` and `event_type`
    pub max_key_bytes: usize,
}

pub const DEFAULT_MAX_EVENT_BYTES: usize = 1024 * 1024; // 1 MB
pub const DEFAULT_MAX_KEY_BYTES: usize = 256;

impl Default for EventLimits {
    fn default() -> Self {
        Self {
            max_event_bytes: DEFAULT_MAX_EVENT_BYTES,
            max_key_bytes: DEFAULT_MAX_KEY_BYTES,
        }
    }
}

impl EventLimits {
    pub fn with_max_event_bytes(mut self, max_event_bytes: usize) -> Self {
        self.max_event_bytes = max_event_bytes;
        self
    }
}

/// Parse and validate a raw request body.
pub fn validate_bytes(body: &[u8], limits: &EventLimits) -> Result<NewEvent, ValidationError> {
    if body.len() > limits.max_event_bytes {
        return Err(ValidationError::PayloadTooLarge {
            size: body.len(),
            limit: limits.max_event_bytes,
        });
    }
    let raw: Value =
        serde_json::from_slice(body).map_err(|e| ValidationError::MalformedJson(e.to_string()))?;
    validate(&raw, limits)
}

/// Validate a raw submission into a `NewEvent`.
///
/// Pure: no clocks, no IDs, no I/O.
pub fn validate(raw: &Value, limits: &EventLimits) -> Result<NewEvent, ValidationError> {
    let object = raw.as_object().ok_or(ValidationError::NotAnObject)?;

    let app = required_key(object.get("app"), "app", limits)?;
    let session_id = required_key(object.get("session_id"), "session_id", limits)?;
    let event_type = required_key(object.get("event_type"), "event_type", limits)?;

    let payload = match object.get("payload") {
        None | Some(Value::Null) => Value::Object(Default::default()),
        Some(Value::String(text)) if looks_like_encoded_json(text) => {
            return Err(ValidationError::invalid(
                "payload",
                "must be structured JSON, not an encoded JSON string",
            ));
        }
        Some(value) => value.clone(),
    };

    let summary = match object.get("summary") {
        None | Some(Value::Null) => None,
        Some(Value::String(s)) => Some(s.clone()),
        Some(_) => return Err(ValidationError::invalid("summary", "must be a string")),
    };

    let payload_bytes = serde_json::to_vec(&payload)
        .map_err(|e| ValidationError::invalid("payload", e.to_string()))?
        .len();
    let size = app.len()
        + session_id.len()
        + event_type.len()
        + payload_bytes
        + summary.as_ref().map(String::len).unwrap_or(0);
    if size > limits.max_event_bytes {
        return Err(ValidationError::PayloadTooLarge {
            size,
            limit: limits.max_event_bytes,
        });
    }

    Ok(NewEvent {
        app,
        session_id,
        event_type: EventType::from(event_type),
        payload,
        summary,
    })
}

fn required_key(
    value: Option<&Value>,
    field: &'static str,
    limits: &EventLimits,
) -> Result<String, ValidationError> {
    let value = match value {
        None | Some(Value::Null) => return Err(ValidationError::MissingField(field)),
        Some(value) => value,
    };
    let text = value
        .as_str()
        .ok_or_else(|| ValidationError::invalid(field, "must be a string"))?;
    if text.trim().is_empty() {
        return Err(ValidationError::invalid(field, "must not be empty"));
    }
    if text.len() > limits.max_key_bytes {
        return Err(ValidationError::invalid(
            field,
            format!("longer than {} bytes", limits.max_key_bytes),
        ));
    }
    Ok(text.to_string())
}

fn looks_like_encoded_json(text: &str) -> bool {
    let trimmed = text.trim();
    let bracketed = (trimmed.starts_with('{') && trimmed.ends_with('}'))
        || (trimmed.starts_with('[') && trimmed.ends_with(']'));
    bracketed && serde_json::from_str::<Value>(trimmed).is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_event_type_round_trips_known_names() {
        for name in [
            "SessionStart",
            "UserPromptSubmit",
            "PreToolUse",
            "PostToolUse",
            "Notification",
            "PreCompact",
            "SubagentStop",
            "Stop",
            "SessionEnd",
        ] {
            let event_type = EventType::from(name);
            assert!(!event_type.is_unknown(), "{name} should be known");
            assert_eq!(event_type.as_str(), name);
        }
    }

    #[test]
    fn test_unknown_event_type_is_preserved() {
        let event_type = EventType::from("FutureHook".to_string());
        assert_eq!(event_type, EventType::Unknown("FutureHook".to_string()));
        assert_eq!(serde_json::to_value(&event_type).unwrap(), json!("FutureHook"));
    }

    #[test]
    fn test_terminal_event_types() {
        assert!(EventType::Stop.is_terminal());
        assert!(EventType::SessionEnd.is_terminal());
        assert!(!EventType::SubagentStop.is_terminal());
        assert!(!EventType::PreToolUse.is_terminal());
    }

    #[test]
    fn test_validate_accepts_minimal_event() {
        let raw = json!({
            "app": "demo",
            "session_id": "s1",
            "event_type": "UserPromptSubmit",
            "payload": {"prompt": "hi"}
        });

        let event = validate(&raw, &EventLimits::default()).unwrap();

        assert_eq!(event.app, "demo");
        assert_eq!(event.session_id, "s1");
        assert_eq!(event.event_type, EventType::UserPromptSubmit);
        assert_eq!(event.payload["prompt"], "hi");
        assert_eq!(event.summary, None);
    }

    #[test]
    fn test_validate_defaults_missing_payload_to_object() {
        let raw = json!({"app": "demo", "session_id": "s1", "event_type": "Stop"});
        let event = validate(&raw, &EventLimits::default()).unwrap();
        assert_eq!(event.payload, json!({}));
    }

    #[test]
    fn test_validate_accepts_scalar_and_array_payloads() {
        for payload in [json!(42), json!(true), json!("plain text"), json!([1, 2])] {
            let raw = json!({
                "app": "demo",
                "session_id": "s1",
                "event_type": "Notification",
                "payload": payload
            });
            assert!(validate(&raw, &EventLimits::default()).is_ok());
        }
    }

    #[test]
    fn test_validate_rejects_encoded_json_payload() {
        let raw = json!({
            "app": "demo",
            "session_id": "s1",
            "event_type": "PreToolUse",
            "payload": "{\"tool_name\": \"Bash\"}"
        });

        let err = validate(&raw, &EventLimits::default()).unwrap_err();
        assert!(matches!(err, ValidationError::InvalidField { field: "payload", .. }));
    }

    #[test]
    fn test_validate_rejects_missing_and_empty_keys() {
        let missing = json!({"session_id": "s1", "event_type": "Stop"});
        assert_eq!(
            validate(&missing, &EventLimits::default()).unwrap_err(),
            ValidationError::MissingField("app")
        );

        let empty = json!({"app": "  ", "session_id": "s1", "event_type": "Stop"});
        assert!(matches!(
            validate(&empty, &EventLimits::default()).unwrap_err(),
            ValidationError::InvalidField { field: "app", .. }
        ));

        let wrong_type = json!({"app": "demo", "session_id": 7, "event_type": "Stop"});
        assert!(matches!(
            validate(&wrong_type, &EventLimits::default()).unwrap_err(),
            ValidationError::InvalidField { field: "session_id", .. }
        ));
    }

    #[test]
    fn test_validate_rejects_non_object() {
        assert_eq!(
            validate(&json!([1, 2, 3]), &EventLimits::default()).unwrap_err(),
            ValidationError::NotAnObject
        );
    }

    #[test]
    fn test_validate_rejects_non_string_summary() {
        let raw = json!({
            "app": "demo",
            "session_id": "s1",
            "event_type": "Stop",
            "summary": {"text": "done"}
        });
        assert!(matches!(
            validate(&raw, &EventLimits::default()).unwrap_err(),
            ValidationError::InvalidField { field: "summary", .. }
        ));
    }

    #[test]
    fn test_validate_rejects_oversized_payload() {
        let limits = EventLimits::default().with_max_event_bytes(64);
        let raw = json!({
            "app": "demo",
            "session_id": "s1",
            "event_type": "PostToolUse",
            "payload": {"output": "x".repeat(100)}
        });

        let err = validate(&raw, &limits).unwrap_err();
        assert!(matches!(err, ValidationError::PayloadTooLarge { limit: 64, .. }));
    }

    #[test]
    fn test_validate_bytes_checks_raw_size_before_parsing() {
        let limits = EventLimits::default().with_max_event_bytes(8);
        let err = validate_bytes(b"not even json, but long", &limits).unwrap_err();
        assert!(matches!(err, ValidationError::PayloadTooLarge { .. }));
    }

    #[test]
    fn test_validate_bytes_reports_malformed_json() {
        let err = validate_bytes(b"{\"app\":", &EventLimits::default()).unwrap_err();
        assert!(matches!(err, ValidationError::MalformedJson(_)));
    }

    #[test]
    fn test_event_serialization() {
        let new_event = validate(
            &json!({
                "app": "demo",
                "session_id": "s1",
                "event_type": "PreToolUse",
                "payload": {"tool_name": "Bash"},
                "summary": "Running tests"
            }),
            &EventLimits::default(),
        )
        .unwrap();
        let event = Event::from_new(new_event, 3, Utc::now());

        let json = serde_json::to_value(&event).unwrap();

        assert_eq!(json["event_type"], "PreToolUse");
        assert_eq!(json["sequence"], 3);
        assert_eq!(json["payload"]["tool_name"], "Bash");
        assert_eq!(json["summary"], "Running tests");
    }
}
