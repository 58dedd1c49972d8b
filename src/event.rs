//! Event — the envelope every realtime message travels in.
//!
//! ARCHITECTURE
//! ============
//! Each WebSocket text frame carries exactly one `{ "event", "data" }`
//! object. The `event` name is namespaced (`"player:join"`,
//! `"crypto:priceUpdate"`) and `data` is whatever payload that event
//! defines. The WS handler decodes inbound envelopes into typed
//! `protocol::ClientEvent` values and never inspects `data` itself.
//!
//! DESIGN
//! ======
//! - Error replies are plain strings on a dedicated `*Error` event; there
//!   is no request/response correlation on this wire.
//! - Construction is infallible: payloads that fail to serialize become
//!   `null` rather than aborting a broadcast.

use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

// =============================================================================
// TYPES
// =============================================================================

/// The universal message type.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    /// Namespaced event name, e.g. `"lobby:update"`.
    pub event: String,
    /// Event payload. Missing on the wire reads as `null`.
    #[serde(default)]
    pub data: serde_json::Value,
}

// =============================================================================
// ERROR CODES
// =============================================================================

/// Grepable error code for protocol errors surfaced to clients.
pub trait ErrorCode: std::fmt::Display {
    fn error_code(&self) -> &'static str;
}

// =============================================================================
// CONSTRUCTORS
// =============================================================================

/// Current time as milliseconds since Unix epoch.
#[must_use]
pub fn now_ms() -> i64 {
    let Ok(dur) = SystemTime::now().duration_since(UNIX_EPOCH) else {
        return 0;
    };
    i64::try_from(dur.as_millis()).unwrap_or(0)
}

impl Event {
    /// Build an event from any serializable payload.
    pub fn new(event: impl Into<String>, data: impl Serialize) -> Self {
        Self { event: event.into(), data: serde_json::to_value(data).unwrap_or_default() }
    }

    /// Build an error event whose payload is the error's display string.
    pub fn error(event: impl Into<String>, err: &(impl ErrorCode + ?Sized)) -> Self {
        Self { event: event.into(), data: serde_json::Value::String(err.to_string()) }
    }

    /// Whether this is one of the `*Error` reply events.
    #[must_use]
    pub fn is_error(&self) -> bool {
        self.event.ends_with("Error") || self.prefix() == "gateway"
    }
}

// =============================================================================
// ROUTING
// =============================================================================

impl Event {
    /// Extract the event namespace (everything before the first ':').
    #[must_use]
    pub fn prefix(&self) -> &str {
        let Some((prefix, _)) = self.event.split_once(':') else {
            return &self.event;
        };
        prefix
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, thiserror::Error)]
    #[error("room ABC not found")]
    struct Missing;

    impl ErrorCode for Missing {
        fn error_code(&self) -> &'static str {
            "E_ROOM_NOT_FOUND"
        }
    }

    #[test]
    fn new_serializes_payload() {
        let event = Event::new("test:messageReceived", serde_json::json!({"message": "hi"}));
        assert_eq!(event.event, "test:messageReceived");
        assert_eq!(event.data["message"], "hi");
    }

    #[test]
    fn missing_data_reads_as_null() {
        let event: Event = serde_json::from_str(r#"{"event":"scanData:request"}"#).expect("parse");
        assert_eq!(event.event, "scanData:request");
        assert!(event.data.is_null());
    }

    #[test]
    fn error_payload_is_plain_string() {
        let event = Event::error("player:joinError", &Missing);
        assert_eq!(event.data, serde_json::Value::String("room ABC not found".into()));
        assert!(event.is_error());
    }

    #[test]
    fn prefix_extraction() {
        let event = Event::new("crypto:priceUpdate", ());
        assert_eq!(event.prefix(), "crypto");

        let event = Event::new("noseparator", ());
        assert_eq!(event.prefix(), "noseparator");
        assert!(!event.is_error());
    }

    #[test]
    fn now_ms_is_positive() {
        assert!(now_ms() > 0);
    }
}
