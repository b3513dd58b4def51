//! Shape-routed wire message.

// ============================================================================
// Imports
// ============================================================================

use serde::de::Error as DeError;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value as Json;

use crate::error::{Error, Result};

use super::{EventPayload, RequestPayload, ResponsePayload};

// ============================================================================
// Message
// ============================================================================

/// Any payload that crosses a transport.
///
/// Messages carry no type marker. The kind is recovered from the shape:
///
/// | Key present | Kind |
/// |-------------|------|
/// | `responseId` | [`Message::Response`] |
/// | `listenerId` or `eventType` | [`Message::Event`] |
/// | `command` | [`Message::Request`] |
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Message {
    /// Caller to executor.
    Request(RequestPayload),
    /// Executor to caller, correlated.
    Response(ResponsePayload),
    /// Executor to caller, unsolicited.
    Event(EventPayload),
}

impl Message {
    /// Routes a decoded JSON object by shape.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Protocol`] for non-objects and unrecognised shapes,
    /// or [`Error::Json`] when the fields do not fit the detected shape.
    pub fn from_json(json: Json) -> Result<Self> {
        let Json::Object(map) = &json else {
            return Err(Error::protocol("message must be a JSON object"));
        };

        if map.contains_key("responseId") {
            Ok(Self::Response(serde_json::from_value(json)?))
        } else if map.contains_key("listenerId") || map.contains_key("eventType") {
            Ok(Self::Event(serde_json::from_value(json)?))
        } else if map.contains_key("command") {
            Ok(Self::Request(serde_json::from_value(json)?))
        } else {
            Err(Error::protocol("message is neither a request, response nor event"))
        }
    }

    /// Short kind name for logging.
    #[inline]
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Request(_) => "request",
            Self::Response(_) => "response",
            Self::Event(_) => "event",
        }
    }
}

impl<'de> Deserialize<'de> for Message {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let json = Json::deserialize(deserializer)?;
        Self::from_json(json).map_err(D::Error::custom)
    }
}

impl From<RequestPayload> for Message {
    fn from(payload: RequestPayload) -> Self {
        Self::Request(payload)
    }
}

impl From<ResponsePayload> for Message {
    fn from(payload: ResponsePayload) -> Self {
        Self::Response(payload)
    }
}

impl From<EventPayload> for Message {
    fn from(payload: EventPayload) -> Self {
        Self::Event(payload)
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    use crate::identifiers::MessageId;
    use crate::protocol::Command;
    use crate::value::Value;

    #[test]
    fn test_routes_response() {
        let message: Message =
            serde_json::from_str(r#"{"responseId":"4","data":null}"#).expect("parse");
        assert!(matches!(message, Message::Response(ref r) if r.response_id.as_str() == "4"));
        assert_eq!(message.kind(), "response");
    }

    #[test]
    fn test_routes_event_by_listener_or_type() {
        let by_listener: Message =
            serde_json::from_str(r#"{"listenerId":"a","data":1}"#).expect("parse");
        let by_type: Message =
            serde_json::from_str(r#"{"eventType":"closed","data":1}"#).expect("parse");
        assert!(matches!(by_listener, Message::Event(_)));
        assert!(matches!(by_type, Message::Event(_)));
    }

    #[test]
    fn test_response_wins_over_event_keys() {
        let message: Message =
            serde_json::from_str(r#"{"responseId":"1","eventType":"x","data":2}"#).expect("parse");
        assert!(matches!(message, Message::Response(_)));
    }

    #[test]
    fn test_routes_request() {
        let request = RequestPayload::new(Command::new("api").arg(1), MessageId::from("1"));
        let json = serde_json::to_string(&Message::from(request.clone())).expect("serialize");
        let message: Message = serde_json::from_str(&json).expect("parse");
        assert_eq!(message, Message::Request(request));
    }

    #[test]
    fn test_rejects_unknown_shape() {
        let err = Message::from_json(serde_json::json!({ "hello": "world" })).unwrap_err();
        assert!(matches!(err, Error::Protocol { .. }));

        let err = Message::from_json(serde_json::json!([1, 2])).unwrap_err();
        assert!(matches!(err, Error::Protocol { .. }));
    }

    #[test]
    fn test_event_data_keeps_rich_values() {
        let event = EventPayload::new("buf", Value::Buffer(vec![1, 2, 3]));
        let json = serde_json::to_string(&Message::from(event.clone())).expect("serialize");
        let message: Message = serde_json::from_str(&json).expect("parse");
        assert_eq!(message, Message::Event(event));
    }
}
