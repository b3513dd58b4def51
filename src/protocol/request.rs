//! Request and Response payload types.
//!
//! A request names a command and carries its arguments. The executor answers
//! with exactly one response whose `responseId` echoes the request's
//! `messageId`. Errors raised by the handler travel as the response `data`.

// ============================================================================
// Imports
// ============================================================================

use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::identifiers::MessageId;
use crate::value::Value;

// ============================================================================
// Command
// ============================================================================

/// A command as the caller describes it, before a message id is assigned.
///
/// # Example
///
/// ```ignore
/// let command = Command::new("Session.create")
///     .arg("chrome")
///     .arg(Value::object([("headless", true)]));
/// ```
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Command {
    /// Command name, usually `Module.method`.
    pub command: String,

    /// Positional arguments.
    pub args: Vec<Value>,

    /// Optional caller-side sequence number, echoed for diagnostics.
    pub command_id: Option<u64>,
}

impl Command {
    /// Creates a command with no arguments.
    #[inline]
    #[must_use]
    pub fn new(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
            args: Vec::new(),
            command_id: None,
        }
    }

    /// Appends one argument.
    #[inline]
    #[must_use]
    pub fn arg(mut self, value: impl Into<Value>) -> Self {
        self.args.push(value.into());
        self
    }

    /// Replaces all arguments.
    #[inline]
    #[must_use]
    pub fn args(mut self, args: impl IntoIterator<Item = Value>) -> Self {
        self.args = args.into_iter().collect();
        self
    }

    /// Sets the caller-side command id.
    #[inline]
    #[must_use]
    pub fn command_id(mut self, command_id: u64) -> Self {
        self.command_id = Some(command_id);
        self
    }
}

// ============================================================================
// RequestPayload
// ============================================================================

/// A request from caller to executor.
///
/// # Format
///
/// ```json
/// {
///   "command": "Session.create",
///   "commandId": 3,
///   "messageId": "12",
///   "sendTime": { "__type": "DateIso", "value": "2024-05-01T12:00:00Z" },
///   "args": ["chrome"]
/// }
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RequestPayload {
    /// Command name.
    pub command: String,

    /// Optional caller-side sequence number.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub command_id: Option<u64>,

    /// Correlation id, unique among the connection's pending requests.
    pub message_id: MessageId,

    /// When the caller sent the request.
    #[serde(default = "Utc::now", with = "send_time")]
    pub send_time: DateTime<Utc>,

    /// Positional arguments.
    #[serde(default)]
    pub args: Vec<Value>,
}

impl RequestPayload {
    /// Stamps a command with its message id and the current time.
    #[must_use]
    pub fn new(command: Command, message_id: MessageId) -> Self {
        Self {
            command: command.command,
            command_id: command.command_id,
            message_id,
            send_time: Utc::now(),
            args: command.args,
        }
    }
}

/// `sendTime` travels as a tagged date; plain millis and ISO strings are
/// accepted from callers that do not use the typed encoding.
mod send_time {
    use super::*;

    use serde::de::Error as DeError;
    use serde::{Deserializer, Serializer};

    pub fn serialize<S: Serializer>(time: &DateTime<Utc>, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        Value::Date(*time).serialize(serializer)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> std::result::Result<DateTime<Utc>, D::Error> {
        match Value::deserialize(deserializer)? {
            Value::Date(time) => Ok(time),
            Value::Null => Ok(Utc::now()),
            Value::Int(millis) => Utc
                .timestamp_millis_opt(millis)
                .single()
                .ok_or_else(|| D::Error::custom(format!("sendTime out of range: {millis}"))),
            Value::String(text) => DateTime::parse_from_rfc3339(&text)
                .map(|time| time.with_timezone(&Utc))
                .map_err(D::Error::custom),
            other => Err(D::Error::custom(format!("invalid sendTime: {other:?}"))),
        }
    }
}

// ============================================================================
// ResponsePayload
// ============================================================================

/// A response from executor to caller.
///
/// # Format
///
/// ```json
/// { "responseId": "12", "data": { "ok": true } }
/// ```
///
/// On failure `data` holds a tagged error value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResponsePayload {
    /// Echoes the request's `messageId`.
    pub response_id: MessageId,

    /// Result value or error value.
    #[serde(default)]
    pub data: Value,
}

impl ResponsePayload {
    /// Creates a response.
    #[inline]
    #[must_use]
    pub fn new(response_id: MessageId, data: impl Into<Value>) -> Self {
        Self {
            response_id,
            data: data.into(),
        }
    }

    /// Returns `true` if the response carries an error.
    #[inline]
    #[must_use]
    pub fn is_error(&self) -> bool {
        matches!(self.data, Value::Error(_))
    }

    /// Extracts the result value.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Remote`] if the response carries an error.
    pub fn into_result(self) -> Result<Value> {
        match self.data {
            Value::Error(remote) => Err(Error::Remote(remote)),
            data => Ok(data),
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
