//! Rich values carried as command arguments, results and event data.
//!
//! JSON alone cannot carry dates, binary buffers, big integers, maps, sets,
//! errors or non-finite floats. [`Value`] models them directly, and its serde
//! implementation writes them as tagged objects so they survive the wire:
//!
//! ```json
//! { "__type": "DateIso", "value": "2024-05-01T12:00:00.250Z" }
//! { "__type": "Buffer64", "value": "aGVsbG8=" }
//! { "__type": "Error", "value": { "name": "TimeoutError", "message": "..." } }
//! ```
//!
//! Objects with an unrecognised `__type` are kept as plain objects.

// ============================================================================
// Imports
// ============================================================================

use std::collections::BTreeMap;
use std::fmt;

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use chrono::{DateTime, SecondsFormat, Utc};
use serde::de::Error as DeError;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::{Map as JsonMap, Number, Value as Json};

// ============================================================================
// Constants
// ============================================================================

/// Key marking a tagged value.
const TYPE_KEY: &str = "__type";

/// Key holding a tagged value's payload.
const VALUE_KEY: &str = "value";

mod tag {
    pub const NUMBER: &str = "number";
    pub const STRING: &str = "string";
    pub const BOOLEAN: &str = "boolean";
    pub const BIGINT: &str = "bigint";
    pub const NAN: &str = "NaN";
    pub const INFINITY: &str = "Infinity";
    pub const NEG_INFINITY: &str = "-Infinity";
    pub const DATE: &str = "DateIso";
    pub const BUFFER: &str = "Buffer64";
    pub const ARRAY_BUFFER: &str = "ArrayBuffer64";
    pub const MAP: &str = "Map";
    pub const SET: &str = "Set";
    pub const ERROR: &str = "Error";
}

// ============================================================================
// Value
// ============================================================================

/// A dynamically typed value that survives serialization unchanged.
#[derive(Debug, Clone, PartialEq, Default)]
pub enum Value {
    /// Absent value.
    #[default]
    Null,
    /// Boolean.
    Bool(bool),
    /// Integer that fits in 64 bits.
    Int(i64),
    /// Floating point number, including NaN and infinities.
    Float(f64),
    /// Integer beyond the 64-bit range.
    BigInt(i128),
    /// UTF-8 string.
    String(String),
    /// Point in time.
    Date(DateTime<Utc>),
    /// Raw bytes.
    Buffer(Vec<u8>),
    /// Ordered list.
    Array(Vec<Value>),
    /// String-keyed object.
    Object(BTreeMap<String, Value>),
    /// Map with arbitrary keys, in insertion order.
    Map(Vec<(Value, Value)>),
    /// Set of values, in insertion order.
    Set(Vec<Value>),
    /// Error raised by a remote handler.
    Error(RemoteError),
}

impl Value {
    /// Builds an object from key/value pairs.
    #[must_use]
    pub fn object<K, V>(entries: impl IntoIterator<Item = (K, V)>) -> Self
    where
        K: Into<String>,
        V: Into<Value>,
    {
        Self::Object(
            entries
                .into_iter()
                .map(|(key, value)| (key.into(), value.into()))
                .collect(),
        )
    }

    /// Returns `true` for [`Value::Null`].
    #[inline]
    #[must_use]
    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    /// Returns the string, if this is one.
    #[inline]
    #[must_use]
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::String(value) => Some(value),
            _ => None,
        }
    }

    /// Returns the boolean, if this is one.
    #[inline]
    #[must_use]
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Bool(value) => Some(*value),
            _ => None,
        }
    }

    /// Returns an integer view of numeric values without losing precision.
    #[must_use]
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Self::Int(value) => Some(*value),
            Self::BigInt(value) => i64::try_from(*value).ok(),
            Self::Float(value) if value.fract() == 0.0 && value.is_finite() => {
                Some(*value as i64)
            }
            _ => None,
        }
    }

    /// Returns a floating point view of numeric values.
    #[must_use]
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Int(value) => Some(*value as f64),
            Self::Float(value) => Some(*value),
            Self::BigInt(value) => Some(*value as f64),
            _ => None,
        }
    }

    /// Returns the date, if this is one.
    #[inline]
    #[must_use]
    pub fn as_date(&self) -> Option<&DateTime<Utc>> {
        match self {
            Self::Date(value) => Some(value),
            _ => None,
        }
    }

    /// Returns the bytes, if this is a buffer.
    #[inline]
    #[must_use]
    pub fn as_buffer(&self) -> Option<&[u8]> {
        match self {
            Self::Buffer(value) => Some(value),
            _ => None,
        }
    }

    /// Returns the items, if this is an array.
    #[inline]
    #[must_use]
    pub fn as_array(&self) -> Option<&[Value]> {
        match self {
            Self::Array(items) => Some(items),
            _ => None,
        }
    }

    /// Returns the entries, if this is an object.
    #[inline]
    #[must_use]
    pub fn as_object(&self) -> Option<&BTreeMap<String, Value>> {
        match self {
            Self::Object(map) => Some(map),
            _ => None,
        }
    }

    /// Returns the error, if this is one.
    #[inline]
    #[must_use]
    pub fn as_error(&self) -> Option<&RemoteError> {
        match self {
            Self::Error(error) => Some(error),
            _ => None,
        }
    }

    /// Looks up a key in an object.
    #[inline]
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.as_object().and_then(|map| map.get(key))
    }
}

// ============================================================================
// Value - Tagged JSON
// ============================================================================

impl Value {
    /// Encodes into JSON, tagging every non-JSON type.
    #[must_use]
    pub fn to_json(&self) -> Json {
        match self {
            Self::Null => Json::Null,
            Self::Bool(value) => Json::Bool(*value),
            Self::Int(value) => Json::from(*value),
            Self::Float(value) => float_to_json(*value),
            Self::BigInt(value) => tagged(tag::BIGINT, Json::String(value.to_string())),
            Self::String(value) => Json::String(value.clone()),
            Self::Date(value) => tagged(
                tag::DATE,
                Json::String(value.to_rfc3339_opts(SecondsFormat::AutoSi, true)),
            ),
            Self::Buffer(bytes) => tagged(tag::BUFFER, Json::String(STANDARD.encode(bytes))),
            Self::Array(items) => Json::Array(items.iter().map(Self::to_json).collect()),
            Self::Object(map) => Json::Object(
                map.iter()
                    .map(|(key, value)| (key.clone(), value.to_json()))
                    .collect(),
            ),
            Self::Map(entries) => tagged(
                tag::MAP,
                Json::Array(
                    entries
                        .iter()
                        .map(|(key, value)| Json::Array(vec![key.to_json(), value.to_json()]))
                        .collect(),
                ),
            ),
            Self::Set(items) => tagged(
                tag::SET,
                Json::Array(items.iter().map(Self::to_json).collect()),
            ),
            Self::Error(error) => tagged(tag::ERROR, error.to_json()),
        }
    }

    /// Decodes JSON, reviving tagged values.
    ///
    /// # Errors
    ///
    /// Returns a description of the first malformed tagged value.
    pub fn from_json(json: Json) -> Result<Self, String> {
        match json {
            Json::Null => Ok(Self::Null),
            Json::Bool(value) => Ok(Self::Bool(value)),
            Json::Number(number) => Ok(number_to_value(&number)),
            Json::String(value) => Ok(Self::String(value)),
            Json::Array(items) => items
                .into_iter()
                .map(Self::from_json)
                .collect::<Result<Vec<_>, _>>()
                .map(Self::Array),
            Json::Object(mut map) => {
                let type_tag = map.get(TYPE_KEY).and_then(Json::as_str).map(str::to_string);
                if let Some(type_tag) = type_tag
                    && let Some(revived) = revive_tagged(&type_tag, &mut map)?
                {
                    return Ok(revived);
                }
                map.into_iter()
                    .map(|(key, value)| Self::from_json(value).map(|value| (key, value)))
                    .collect::<Result<BTreeMap<_, _>, _>>()
                    .map(Self::Object)
            }
        }
    }
}

fn tagged(type_tag: &str, value: Json) -> Json {
    let mut map = JsonMap::new();
    map.insert(TYPE_KEY.to_string(), Json::String(type_tag.to_string()));
    map.insert(VALUE_KEY.to_string(), value);
    Json::Object(map)
}

fn tag_only(type_tag: &str) -> Json {
    let mut map = JsonMap::new();
    map.insert(TYPE_KEY.to_string(), Json::String(type_tag.to_string()));
    Json::Object(map)
}

fn float_to_json(value: f64) -> Json {
    if value.is_nan() {
        tag_only(tag::NAN)
    } else if value == f64::INFINITY {
        tag_only(tag::INFINITY)
    } else if value == f64::NEG_INFINITY {
        tag_only(tag::NEG_INFINITY)
    } else {
        Number::from_f64(value).map_or(Json::Null, Json::Number)
    }
}

fn number_to_value(number: &Number) -> Value {
    if let Some(value) = number.as_i64() {
        Value::Int(value)
    } else if let Some(value) = number.as_u64() {
        Value::BigInt(i128::from(value))
    } else {
        Value::Float(number.as_f64().unwrap_or(f64::NAN))
    }
}

/// Revives a tagged object. `Ok(None)` leaves it as a plain object.
fn revive_tagged(type_tag: &str, map: &mut JsonMap<String, Json>) -> Result<Option<Value>, String> {
    let had_value = map.contains_key(VALUE_KEY);
    let value = map.remove(VALUE_KEY).unwrap_or(Json::Null);
    let revived = match type_tag {
        tag::NUMBER | tag::STRING | tag::BOOLEAN => Value::from_json(value)?,
        tag::NAN => Value::Float(f64::NAN),
        tag::INFINITY => Value::Float(f64::INFINITY),
        tag::NEG_INFINITY => Value::Float(f64::NEG_INFINITY),
        tag::BIGINT => {
            let text = value.as_str().ok_or("bigint value must be a string")?;
            let parsed = text
                .parse::<i128>()
                .map_err(|e| format!("invalid bigint {text:?}: {e}"))?;
            Value::BigInt(parsed)
        }
        tag::DATE => {
            let text = value.as_str().ok_or("date value must be a string")?;
            let parsed = DateTime::parse_from_rfc3339(text)
                .map_err(|e| format!("invalid date {text:?}: {e}"))?;
            Value::Date(parsed.with_timezone(&Utc))
        }
        tag::BUFFER | tag::ARRAY_BUFFER => {
            let text = value.as_str().ok_or("buffer value must be a string")?;
            let bytes = STANDARD
                .decode(text)
                .map_err(|e| format!("invalid base64 buffer: {e}"))?;
            Value::Buffer(bytes)
        }
        tag::MAP => {
            let Json::Array(pairs) = value else {
                return Err("map value must be an array of pairs".to_string());
            };
            let mut entries = Vec::with_capacity(pairs.len());
            for pair in pairs {
                match pair {
                    Json::Array(mut kv) if kv.len() == 2 => {
                        let entry_value = Value::from_json(kv.pop().unwrap_or(Json::Null))?;
                        let entry_key = Value::from_json(kv.pop().unwrap_or(Json::Null))?;
                        entries.push((entry_key, entry_value));
                    }
                    _ => return Err("map entries must be [key, value] pairs".to_string()),
                }
            }
            Value::Map(entries)
        }
        tag::SET => {
            let Json::Array(items) = value else {
                return Err("set value must be an array".to_string());
            };
            Value::Set(
                items
                    .into_iter()
                    .map(Value::from_json)
                    .collect::<Result<Vec<_>, _>>()?,
            )
        }
        tag::ERROR => Value::Error(RemoteError::from_json(value)?),
        _ => {
            if had_value {
                map.insert(VALUE_KEY.to_string(), value);
            }
            return Ok(None);
        }
    };
    Ok(Some(revived))
}

impl Serialize for Value {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.to_json().serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for Value {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let json = Json::deserialize(deserializer)?;
        Self::from_json(json).map_err(D::Error::custom)
    }
}

// ============================================================================
// Value - Conversions
// ============================================================================

impl From<bool> for Value {
    fn from(value: bool) -> Self {
        Self::Bool(value)
    }
}

impl From<i32> for Value {
    fn from(value: i32) -> Self {
        Self::Int(i64::from(value))
    }
}

impl From<u32> for Value {
    fn from(value: u32) -> Self {
        Self::Int(i64::from(value))
    }
}

impl From<i64> for Value {
    fn from(value: i64) -> Self {
        Self::Int(value)
    }
}

impl From<u64> for Value {
    fn from(value: u64) -> Self {
        i64::try_from(value).map_or(Self::BigInt(i128::from(value)), Self::Int)
    }
}

impl From<f64> for Value {
    fn from(value: f64) -> Self {
        Self::Float(value)
    }
}

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Self::String(value.to_string())
    }
}

impl From<String> for Value {
    fn from(value: String) -> Self {
        Self::String(value)
    }
}

impl From<DateTime<Utc>> for Value {
    fn from(value: DateTime<Utc>) -> Self {
        Self::Date(value)
    }
}

impl From<Vec<Value>> for Value {
    fn from(value: Vec<Value>) -> Self {
        Self::Array(value)
    }
}

impl From<BTreeMap<String, Value>> for Value {
    fn from(value: BTreeMap<String, Value>) -> Self {
        Self::Object(value)
    }
}

impl From<RemoteError> for Value {
    fn from(value: RemoteError) -> Self {
        Self::Error(value)
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(value: Option<T>) -> Self {
        value.map_or(Self::Null, Into::into)
    }
}

// ============================================================================
// RemoteErrorKind
// ============================================================================

/// Closed set of error classes the connection core treats specially.
///
/// The wire carries an error `name`; it is mapped to a kind once, at decode
/// time, and all classification afterwards matches on the kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RemoteErrorKind {
    /// The remote connection is gone.
    Disconnected,
    /// The remote session was closed or never existed.
    SessionClosedOrMissing,
    /// The remote could not launch its browser.
    BrowserLaunch,
    /// The remote is missing required system dependencies.
    DependenciesMissing,
    /// A remote wait timed out.
    Timeout,
    /// A remote wait was cancelled.
    Canceled,
    /// Any other error.
    Other,
}

impl RemoteErrorKind {
    /// Maps a wire error name to its kind.
    #[must_use]
    pub fn from_name(name: &str) -> Self {
        match name {
            "DisconnectedError" => Self::Disconnected,
            "SessionClosedOrMissingError" => Self::SessionClosedOrMissing,
            "BrowserLaunchError" => Self::BrowserLaunch,
            "DependenciesMissingError" => Self::DependenciesMissing,
            "TimeoutError" => Self::Timeout,
            "CanceledPromiseError" => Self::Canceled,
            _ => Self::Other,
        }
    }

    /// Wire name used when an error of this kind is created locally.
    #[must_use]
    pub const fn default_name(self) -> &'static str {
        match self {
            Self::Disconnected => "DisconnectedError",
            Self::SessionClosedOrMissing => "SessionClosedOrMissingError",
            Self::BrowserLaunch => "BrowserLaunchError",
            Self::DependenciesMissing => "DependenciesMissingError",
            Self::Timeout => "TimeoutError",
            Self::Canceled => "CanceledPromiseError",
            Self::Other => "Error",
        }
    }

    /// Returns `true` for infrastructure provisioning failures.
    #[inline]
    #[must_use]
    pub const fn is_launch_error(self) -> bool {
        matches!(self, Self::BrowserLaunch | Self::DependenciesMissing)
    }
}

// ============================================================================
// RemoteError
// ============================================================================

/// An error as it travels inside a response's `data`.
#[derive(Debug, Clone, PartialEq)]
pub struct RemoteError {
    /// Classification.
    pub kind: RemoteErrorKind,
    /// Error name as sent on the wire.
    pub name: String,
    /// Human readable message.
    pub message: String,
    /// Stack trace from the remote, if any.
    pub stack: Option<String>,
    /// Set by the executor when the error happened while it was shutting down.
    pub is_disconnecting: bool,
    /// Extra properties attached to the error.
    pub data: BTreeMap<String, Value>,
}

impl RemoteError {
    /// Creates an error of the given kind with its default name.
    #[must_use]
    pub fn new(kind: RemoteErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            name: kind.default_name().to_string(),
            message: message.into(),
            stack: None,
            is_disconnecting: false,
            data: BTreeMap::new(),
        }
    }

    /// Creates an error from a wire name, classifying it.
    #[must_use]
    pub fn named(name: impl Into<String>, message: impl Into<String>) -> Self {
        let name = name.into();
        Self {
            kind: RemoteErrorKind::from_name(&name),
            name,
            message: message.into(),
            stack: None,
            is_disconnecting: false,
            data: BTreeMap::new(),
        }
    }

    /// Attaches an extra property.
    #[must_use]
    pub fn with_data(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.data.insert(key.into(), value.into());
        self
    }

    /// Attaches a stack trace.
    #[must_use]
    pub fn with_stack(mut self, stack: impl Into<String>) -> Self {
        self.stack = Some(stack.into());
        self
    }

    fn to_json(&self) -> Json {
        let mut map = JsonMap::new();
        for (key, value) in &self.data {
            map.insert(key.clone(), value.to_json());
        }
        map.insert("name".to_string(), Json::String(self.name.clone()));
        map.insert("message".to_string(), Json::String(self.message.clone()));
        if let Some(stack) = &self.stack {
            map.insert("stack".to_string(), Json::String(stack.clone()));
        }
        if self.is_disconnecting {
            map.insert("isDisconnecting".to_string(), Json::Bool(true));
        }
        Json::Object(map)
    }

    fn from_json(json: Json) -> Result<Self, String> {
        let Json::Object(mut map) = json else {
            return Err("error value must be an object".to_string());
        };
        let name = match map.remove("name") {
            Some(Json::String(name)) => name,
            _ => "Error".to_string(),
        };
        let message = match map.remove("message") {
            Some(Json::String(message)) => message,
            _ => String::new(),
        };
        let stack = match map.remove("stack") {
            Some(Json::String(stack)) => Some(stack),
            _ => None,
        };
        let is_disconnecting = matches!(map.remove("isDisconnecting"), Some(Json::Bool(true)));
        let data = map
            .into_iter()
            .map(|(key, value)| Value::from_json(value).map(|value| (key, value)))
            .collect::<Result<BTreeMap<_, _>, _>>()?;

        Ok(Self {
            kind: RemoteErrorKind::from_name(&name),
            name,
            message,
            stack,
            is_disconnecting,
            data,
        })
    }
}

impl fmt::Display for RemoteError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.name, self.message)
    }
}

impl std::error::Error for RemoteError {}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    use chrono::TimeZone;
    use proptest::prelude::*;

    fn round_trip(value: &Value) -> Value {
        let text = serde_json::to_string(value).expect("serialize");
        serde_json::from_str(&text).expect("deserialize")
    }

    #[test]
    fn test_date_survives_as_date() {
        let date = Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap();
        let value = Value::object([("ok", Value::Date(date))]);

        let text = serde_json::to_string(&value).unwrap();
        assert!(text.contains("\"__type\":\"DateIso\""));

        let revived = round_trip(&value);
        assert_eq!(revived.get("ok").and_then(Value::as_date), Some(&date));
    }

    #[test]
    fn test_buffer_is_base64() {
        let value = Value::Buffer(b"hello".to_vec());
        let json = value.to_json();
        assert_eq!(json["__type"], "Buffer64");
        assert_eq!(json["value"], "aGVsbG8=");
        assert_eq!(round_trip(&value), value);
    }

    #[test]
    fn test_array_buffer_tag_is_accepted() {
        let json: Json = serde_json::json!({ "__type": "ArrayBuffer64", "value": "aGk=" });
        assert_eq!(Value::from_json(json).unwrap(), Value::Buffer(b"hi".to_vec()));
    }

    #[test]
    fn test_non_finite_floats() {
        assert!(matches!(round_trip(&Value::Float(f64::NAN)), Value::Float(v) if v.is_nan()));
        assert_eq!(round_trip(&Value::Float(f64::INFINITY)), Value::Float(f64::INFINITY));
        assert_eq!(
            round_trip(&Value::Float(f64::NEG_INFINITY)),
            Value::Float(f64::NEG_INFINITY)
        );
    }

    #[test]
    fn test_map_and_set() {
        let value = Value::Array(vec![
            Value::Map(vec![(Value::Int(1), Value::from("one"))]),
            Value::Set(vec![Value::from("a"), Value::from("b")]),
        ]);
        assert_eq!(round_trip(&value), value);
    }

    #[test]
    fn test_error_keeps_kind_and_extras() {
        let error = RemoteError::named("SessionClosedOrMissingError", "session gone")
            .with_data("sessionId", "abc")
            .with_stack("at foo");
        let revived = round_trip(&Value::Error(error.clone()));

        let Value::Error(revived) = revived else {
            panic!("expected error value");
        };
        assert_eq!(revived.kind, RemoteErrorKind::SessionClosedOrMissing);
        assert_eq!(revived, error);
    }

    #[test]
    fn test_is_disconnecting_flag() {
        let mut error = RemoteError::new(RemoteErrorKind::Other, "closing");
        error.is_disconnecting = true;
        let json = Value::Error(error).to_json();
        assert_eq!(json["value"]["isDisconnecting"], true);
    }

    #[test]
    fn test_unknown_tag_stays_object() {
        let json: Json = serde_json::json!({ "__type": "Mystery", "value": 3 });
        let value = Value::from_json(json).unwrap();
        assert_eq!(value.get("__type").and_then(Value::as_str), Some("Mystery"));
        assert_eq!(value.get("value").and_then(Value::as_i64), Some(3));
    }

    #[test]
    fn test_unknown_tag_without_value_is_unchanged() {
        let json: Json = serde_json::json!({ "__type": "Mystery" });
        let value = Value::from_json(json).unwrap();
        assert_eq!(value, Value::object([("__type", "Mystery")]));
    }

    #[test]
    fn test_malformed_date_is_rejected() {
        let json: Json = serde_json::json!({ "__type": "DateIso", "value": "yesterday" });
        assert!(Value::from_json(json).is_err());
    }

    #[test]
    fn test_large_unsigned_becomes_bigint() {
        assert_eq!(Value::from(u64::MAX), Value::BigInt(i128::from(u64::MAX)));
        assert_eq!(round_trip(&Value::from(u64::MAX)), Value::BigInt(i128::from(u64::MAX)));
    }

    #[test]
    fn test_kind_names() {
        for kind in [
            RemoteErrorKind::Disconnected,
            RemoteErrorKind::SessionClosedOrMissing,
            RemoteErrorKind::BrowserLaunch,
            RemoteErrorKind::DependenciesMissing,
            RemoteErrorKind::Timeout,
            RemoteErrorKind::Canceled,
        ] {
            assert_eq!(RemoteErrorKind::from_name(kind.default_name()), kind);
        }
        assert_eq!(RemoteErrorKind::from_name("TypeError"), RemoteErrorKind::Other);
    }

    fn remote_error() -> impl Strategy<Value = RemoteError> {
        (
            prop_oneof![
                Just("Error"),
                Just("TypeError"),
                Just("SessionClosedOrMissingError"),
                Just("DependenciesMissingError"),
            ],
            ".*",
            proptest::option::of("[a-z ]{0,12}"),
            any::<bool>(),
            proptest::collection::btree_map("x_[a-z]{1,4}", any::<i64>().prop_map(Value::Int), 0..3),
        )
            .prop_map(|(name, message, stack, is_disconnecting, data)| {
                let mut error = RemoteError::named(name, message);
                error.stack = stack;
                error.is_disconnecting = is_disconnecting;
                error.data = data;
                error
            })
    }

    fn leaf() -> impl Strategy<Value = Value> {
        prop_oneof![
            Just(Value::Null),
            any::<bool>().prop_map(Value::Bool),
            any::<i64>().prop_map(Value::Int),
            // Eighths print and parse back exactly.
            any::<i32>().prop_map(|n| Value::Float(f64::from(n) / 8.0)),
            Just(Value::Float(f64::INFINITY)),
            Just(Value::Float(f64::NEG_INFINITY)),
            any::<i128>().prop_map(Value::BigInt),
            ".*".prop_map(Value::String),
            proptest::collection::vec(any::<u8>(), 0..32).prop_map(Value::Buffer),
            (0i64..4_102_444_800_000).prop_map(|millis| {
                Value::Date(Utc.timestamp_millis_opt(millis).unwrap())
            }),
            remote_error().prop_map(Value::Error),
        ]
    }

    fn nested() -> impl Strategy<Value = Value> {
        leaf().prop_recursive(3, 24, 4, |inner| {
            prop_oneof![
                proptest::collection::vec(inner.clone(), 0..4).prop_map(Value::Array),
                proptest::collection::btree_map("[a-z]{1,6}", inner.clone(), 0..4).prop_map(Value::Object),
                proptest::collection::vec((inner.clone(), inner.clone()), 0..3).prop_map(Value::Map),
                proptest::collection::vec(inner, 0..4).prop_map(Value::Set),
            ]
        })
    }

    proptest! {
        #[test]
        fn prop_typed_json_round_trip(value in nested()) {
            prop_assert_eq!(round_trip(&value), value);
        }
    }
}
