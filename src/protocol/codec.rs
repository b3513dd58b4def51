//! Pluggable message serializer.

// ============================================================================
// Imports
// ============================================================================

use std::fmt;

use serde_json::Value as Json;

use crate::error::Result;

use super::Message;

// ============================================================================
// MessageCodec
// ============================================================================

/// Converts messages to and from their text frame representation.
///
/// Socket transports use a codec on every frame. The in-process bridge can
/// be given one so messages take the same path they would on a real wire.
pub trait MessageCodec: Send + Sync + fmt::Debug {
    /// Encodes a message into a text frame.
    ///
    /// # Errors
    ///
    /// Returns an error if the message cannot be represented.
    fn encode(&self, message: &Message) -> Result<String>;

    /// Decodes a text frame into a message.
    ///
    /// # Errors
    ///
    /// Returns an error for malformed or unroutable frames.
    fn decode(&self, text: &str) -> Result<Message>;
}

// ============================================================================
// TypedJsonCodec
// ============================================================================

/// JSON codec that preserves rich values through `__type` tagging.
#[derive(Debug, Clone, Copy, Default)]
pub struct TypedJsonCodec;

impl MessageCodec for TypedJsonCodec {
    fn encode(&self, message: &Message) -> Result<String> {
        Ok(serde_json::to_string(message)?)
    }

    fn decode(&self, text: &str) -> Result<Message> {
        let json: Json = serde_json::from_str(text)?;
        Message::from_json(json)
    }
}

// ============================================================================
// Tests
// ============================================================================
