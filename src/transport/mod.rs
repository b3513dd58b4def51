//! Transport layer.
//!
//! A transport moves [`Message`]s between the two ends of one connection.
//! Connections never touch sockets directly; they only see this contract.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────┐                             ┌────────────────────┐
//! │ ConnectionToCore │                             │ ConnectionToClient │
//! │                  │   WebSocket / HTTP / Bridge │                    │
//! │ TransportToCore  │◄───────────────────────────►│ TransportToClient  │
//! │                  │                             │  → ApiRegistry     │
//! └──────────────────┘                             └────────────────────┘
//! ```
//!
//! # Signals
//!
//! Every transport emits exactly three [`TransportEvent`]s: `Connected`,
//! `Disconnected(error)` and `Message(message)`. Once `Disconnected` has been
//! emitted no further `Message` is emitted until the transport connects again.
//!
//! # Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | `emitting` | In-process transport pair and bridge |
//! | `ws` | Persistent WebSocket transports and server |
//! | `http` | One-shot HTTP transport and server |

// ============================================================================
// Submodules
// ============================================================================

/// In-process transport pair joined by a bridge.
pub mod emitting;

/// One-shot HTTP transport.
pub mod http;

/// Persistent WebSocket transports.
pub mod ws;

// ============================================================================
// Imports
// ============================================================================

use std::time::Duration;

use async_trait::async_trait;

use crate::error::{Error, Result};
use crate::events::Emitter;
use crate::protocol::Message;

// ============================================================================
// Re-exports
// ============================================================================

pub use emitting::{EmittingTransport, TransportBridge};
pub use http::{HttpApiServer, HttpTransportToClient};
pub use ws::{WsServer, WsTransportToClient, WsTransportToCore};

// ============================================================================
// TransportEvent
// ============================================================================

/// Signal emitted by a transport.
#[derive(Debug, Clone)]
pub enum TransportEvent {
    /// The channel became usable.
    Connected,
    /// The channel is gone, with the error that ended it, if any.
    Disconnected(Option<Error>),
    /// A message arrived.
    Message(Message),
}

// ============================================================================
// Transport
// ============================================================================

/// Minimal send/receive/lifecycle contract of a channel.
#[async_trait]
pub trait Transport: Send + Sync + 'static {
    /// Sends one message.
    ///
    /// # Errors
    ///
    /// Fails if the channel is not usable or the message cannot be encoded.
    async fn send(&self, message: Message) -> Result<()>;

    /// Establishes the channel. Transports that are born connected keep the
    /// default, which does nothing.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Connection`] or [`Error::ConnectionTimeout`] when the
    /// channel could not be established.
    async fn connect(&self, timeout: Option<Duration>) -> Result<()> {
        let _ = timeout;
        Ok(())
    }

    /// Tears the channel down, optionally because of a fatal error.
    async fn disconnect(&self, error: Option<Error>) {
        let _ = error;
    }

    /// Returns `true` while the channel is usable.
    fn is_connected(&self) -> bool;

    /// Host this transport talks to. Tags disconnect errors.
    fn host(&self) -> &str;

    /// Identifier of the remote peer, if known.
    fn remote_id(&self) -> Option<&str> {
        None
    }

    /// Signal stream of this transport.
    fn events(&self) -> &Emitter<TransportEvent>;
}
