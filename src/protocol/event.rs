//! Event payload type.
//!
//! Events are unsolicited notifications pushed from the executor to the
//! caller. They never touch the pending table.

// ============================================================================
// Imports
// ============================================================================

use serde::{Deserialize, Serialize};

use crate::value::Value;

// ============================================================================
// EventPayload
// ============================================================================

/// An event notification from executor to caller.
///
/// # Format
///
/// ```json
/// { "eventType": "tab-created", "listenerId": "l-4", "data": { ... } }
/// ```
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventPayload {
    /// Event name.
    #[serde(default)]
    pub event_type: String,

    /// Subscription the event belongs to, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub listener_id: Option<String>,

    /// Event data.
    #[serde(default)]
    pub data: Value,
}

impl EventPayload {
    /// Creates an event.
    #[inline]
    #[must_use]
    pub fn new(event_type: impl Into<String>, data: impl Into<Value>) -> Self {
        Self {
            event_type: event_type.into(),
            listener_id: None,
            data: data.into(),
        }
    }

    /// Addresses the event to a listener.
    #[inline]
    #[must_use]
    pub fn with_listener(mut self, listener_id: impl Into<String>) -> Self {
        self.listener_id = Some(listener_id.into());
        self
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_serialization() {
        let event = EventPayload::new("tab-created", Value::object([("tabId", 3)]))
            .with_listener("l-1");
        let json = serde_json::to_string(&event).expect("serialize");

        assert!(json.contains("\"eventType\":\"tab-created\""));
        assert!(json.contains("\"listenerId\":\"l-1\""));
    }

    #[test]
    fn test_event_without_listener_omits_field() {
        let event = EventPayload::new("closed", Value::Null);
        let json = serde_json::to_string(&event).expect("serialize");
        assert!(!json.contains("listenerId"));
    }

    #[test]
    fn test_listener_only_event_parses() {
        let event: EventPayload =
            serde_json::from_str(r#"{"listenerId":"l-2","data":[1,2]}"#).expect("parse");
        assert_eq!(event.listener_id.as_deref(), Some("l-2"));
        assert!(event.event_type.is_empty());
    }
}
