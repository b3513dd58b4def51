//! Error types for the connection core.
//!
//! This module defines all error types used throughout the crate.
//!
//! # Usage
//!
//! All fallible operations return [`Result<T>`] which uses [`Error`]:
//!
//! ```ignore
//! use corelink::{Command, ConnectionToCore, Result};
//!
//! async fn example(connection: &ConnectionToCore) -> Result<()> {
//!     let reply = connection.send_request(Command::new("Core.ping"), None).await?;
//!     println!("{reply:?}");
//!     Ok(())
//! }
//! ```
//!
//! # Error Categories
//!
//! | Category | Variants |
//! |----------|----------|
//! | Connection | [`Error::Connection`], [`Error::ConnectionTimeout`], [`Error::Disconnected`] |
//! | Request | [`Error::Timeout`], [`Error::Canceled`], [`Error::Remote`] |
//! | Protocol | [`Error::Protocol`], [`Error::UnknownCommand`], [`Error::PayloadTooLarge`] |
//! | External | [`Error::Io`], [`Error::Json`], [`Error::WebSocket`], [`Error::ChannelClosed`] |
//!
//! `Error` is `Clone`: a single failure is shared by every caller coalesced onto
//! the same connect or disconnect, and fanned out to every cancelled request.

// ============================================================================
// Imports
// ============================================================================

use std::io::Error as IoError;
use std::result::Result as StdResult;
use std::sync::Arc;

use thiserror::Error;
use tokio::sync::oneshot::error::RecvError;
use tokio_tungstenite::tungstenite::Error as WsError;

use crate::identifiers::MessageId;
use crate::value::{RemoteError, RemoteErrorKind};

// ============================================================================
// Result Alias
// ============================================================================

/// Result type alias using crate [`enum@Error`].
pub type Result<T> = StdResult<T, Error>;

// ============================================================================
// Error Enum
// ============================================================================

/// Main error type for the crate.
#[derive(Error, Debug, Clone)]
pub enum Error {
    // ========================================================================
    // Connection Errors
    // ========================================================================
    /// Transport could not be established.
    ///
    /// Returned by `connect` when a dial or handshake fails. A channel that was
    /// live and then lost reports [`Error::Disconnected`] instead.
    #[error("Connection failed: {message}")]
    Connection {
        /// Description of the connection error.
        message: String,
    },

    /// Transport did not connect within the requested timeout.
    #[error("Connection timeout after {timeout_ms}ms")]
    ConnectionTimeout {
        /// Milliseconds waited before timeout.
        timeout_ms: u64,
    },

    /// The connection is gone, was torn down, or the remote reported that the
    /// session is closed.
    #[error("The connection to {host} has been disconnected")]
    Disconnected {
        /// Host of the transport that was disconnected.
        host: String,
    },

    // ========================================================================
    // Request Errors
    // ========================================================================
    /// A pending request was not answered within its timeout.
    #[error("Request {message_id} timed out after {timeout_ms}ms")]
    Timeout {
        /// Correlation id of the request.
        message_id: MessageId,
        /// Milliseconds waited before timeout.
        timeout_ms: u64,
    },

    /// A pending operation was cancelled before it could settle.
    #[error("Canceled: {message}")]
    Canceled {
        /// Why the operation was cancelled.
        message: String,
    },

    /// Error raised by the remote command handler.
    #[error("{0}")]
    Remote(RemoteError),

    // ========================================================================
    // Protocol Errors
    // ========================================================================
    /// Malformed or unroutable payload.
    #[error("Protocol error: {message}")]
    Protocol {
        /// Description of the protocol violation.
        message: String,
    },

    /// No handler is registered under the requested command.
    #[error("Unknown command: {command}")]
    UnknownCommand {
        /// The unrecognized command name.
        command: String,
    },

    /// Request body exceeded the configured maximum.
    #[error("Payload too large: exceeds {limit_bytes} bytes")]
    PayloadTooLarge {
        /// Configured byte limit.
        limit_bytes: usize,
    },

    // ========================================================================
    // External Errors
    // ========================================================================
    /// IO error.
    #[error("IO error: {0}")]
    Io(Arc<IoError>),

    /// JSON serialization error.
    #[error("JSON error: {0}")]
    Json(Arc<serde_json::Error>),

    /// WebSocket error.
    #[error("WebSocket error: {0}")]
    WebSocket(Arc<WsError>),

    /// Internal channel closed before a value was delivered.
    #[error("Channel closed")]
    ChannelClosed,
}

// ============================================================================
// Conversions
// ============================================================================

impl From<IoError> for Error {
    fn from(err: IoError) -> Self {
        Self::Io(Arc::new(err))
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Self::Json(Arc::new(err))
    }
}

impl From<WsError> for Error {
    fn from(err: WsError) -> Self {
        Self::WebSocket(Arc::new(err))
    }
}

impl From<RecvError> for Error {
    fn from(_: RecvError) -> Self {
        Self::ChannelClosed
    }
}

impl From<RemoteError> for Error {
    fn from(err: RemoteError) -> Self {
        Self::Remote(err)
    }
}

// ============================================================================
// Error Constructors
// ============================================================================

impl Error {
    /// Creates a connection error.
    #[inline]
    pub fn connection(message: impl Into<String>) -> Self {
        Self::Connection {
            message: message.into(),
        }
    }

    /// Creates a connection timeout error.
    #[inline]
    pub fn connection_timeout(timeout_ms: u64) -> Self {
        Self::ConnectionTimeout { timeout_ms }
    }

    /// Creates a disconnected error tagged with the transport's host.
    #[inline]
    pub fn disconnected(host: impl Into<String>) -> Self {
        Self::Disconnected { host: host.into() }
    }

    /// Creates a request timeout error.
    #[inline]
    pub fn timeout(message_id: MessageId, timeout_ms: u64) -> Self {
        Self::Timeout {
            message_id,
            timeout_ms,
        }
    }

    /// Creates a cancellation error.
    #[inline]
    pub fn canceled(message: impl Into<String>) -> Self {
        Self::Canceled {
            message: message.into(),
        }
    }

    /// Creates a protocol error.
    #[inline]
    pub fn protocol(message: impl Into<String>) -> Self {
        Self::Protocol {
            message: message.into(),
        }
    }

    /// Creates an unknown command error.
    #[inline]
    pub fn unknown_command(command: impl Into<String>) -> Self {
        Self::UnknownCommand {
            command: command.into(),
        }
    }

    /// Creates a payload too large error.
    #[inline]
    pub fn payload_too_large(limit_bytes: usize) -> Self {
        Self::PayloadTooLarge { limit_bytes }
    }
}

// ============================================================================
// Error Predicates
// ============================================================================

impl Error {
    /// Returns `true` if this error cancelled a pending request.
    ///
    /// A disconnect is a cancellation: every request swept by it reports
    /// [`Error::Disconnected`].
    #[inline]
    #[must_use]
    pub fn is_canceled(&self) -> bool {
        match self {
            Self::Canceled { .. } | Self::Disconnected { .. } => true,
            Self::Remote(remote) => matches!(
                remote.kind,
                RemoteErrorKind::Canceled | RemoteErrorKind::Disconnected
            ),
            _ => false,
        }
    }

    /// Returns `true` if this is a timeout error.
    #[inline]
    #[must_use]
    pub fn is_timeout(&self) -> bool {
        match self {
            Self::ConnectionTimeout { .. } | Self::Timeout { .. } => true,
            Self::Remote(remote) => remote.kind == RemoteErrorKind::Timeout,
            _ => false,
        }
    }

    /// Returns `true` if this is a connection error.
    #[inline]
    #[must_use]
    pub fn is_connection_error(&self) -> bool {
        matches!(
            self,
            Self::Connection { .. }
                | Self::ConnectionTimeout { .. }
                | Self::Disconnected { .. }
                | Self::WebSocket(_)
        )
    }

    /// Returns `true` if the remote failed to provision its infrastructure.
    ///
    /// These errors are never folded into [`Error::Disconnected`].
    #[inline]
    #[must_use]
    pub fn is_launch_error(&self) -> bool {
        matches!(self, Self::Remote(remote) if remote.kind.is_launch_error())
    }

    /// Converts this error into its wire representation.
    #[must_use]
    pub fn to_remote(&self) -> RemoteError {
        let kind = match self {
            Self::Remote(remote) => return remote.clone(),
            Self::Disconnected { .. } => RemoteErrorKind::Disconnected,
            Self::Timeout { .. } | Self::ConnectionTimeout { .. } => RemoteErrorKind::Timeout,
            Self::Canceled { .. } => RemoteErrorKind::Canceled,
            _ => RemoteErrorKind::Other,
        };
        RemoteError::new(kind, self.to_string())
    }
}

// ============================================================================
// Tests
// ============================================================================
