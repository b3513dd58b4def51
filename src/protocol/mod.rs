//! Wire protocol message types.
//!
//! # Protocol Overview
//!
//! | Message Type | Direction | Purpose |
//! |--------------|-----------|---------|
//! | `Request` | Caller → Executor | Command request |
//! | `Response` | Executor → Caller | Command result or error |
//! | `Event` | Executor → Caller | Unsolicited notification |
//!
//! Messages are routed by shape, not by a type marker; see [`Message`].
//!
//! # Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | `request` | Command, RequestPayload and ResponsePayload |
//! | `event` | EventPayload |
//! | `message` | Shape-routed Message enum |
//! | `codec` | MessageCodec trait and TypedJsonCodec |

// ============================================================================
// Submodules
// ============================================================================

/// Pluggable message serializer.
pub mod codec;

/// Event message types.
pub mod event;

/// Shape-routed wire message.
pub mod message;

/// Request and Response message types.
pub mod request;

// ============================================================================
// Re-exports
// ============================================================================

pub use codec::{MessageCodec, TypedJsonCodec};
pub use event::EventPayload;
pub use message::Message;
pub use request::{Command, RequestPayload, ResponsePayload};
