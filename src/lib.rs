//! Corelink - transport-agnostic RPC connection core.
//!
//! This library connects a caller to a command executor over any message
//! channel and gives request/response correlation, pushed events and a
//! reconnect policy on top of it.
//!
//! # Architecture
//!
//! The core follows a caller/executor model:
//!
//! - **Caller**: [`ConnectionToCore`] sends commands and receives events
//! - **Executor**: [`ConnectionToClient`] runs commands from an [`ApiRegistry`]
//!
//! Key design principles:
//!
//! - Connections only see the [`Transport`] contract, never sockets
//! - Every request settles exactly once: response, timeout or cancel
//! - Messages are routed by shape (`responseId`, `listenerId`/`eventType`)
//! - Implicit reconnects are throttled so a dead remote is not stampeded
//!
//! # Quick Start
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use corelink::{ApiRegistry, Command, Duplexer, Result, Value};
//!
//! #[tokio::main]
//! async fn main() -> Result<()> {
//!     // Register handlers on the executor side
//!     let mut registry = ApiRegistry::<()>::new();
//!     registry.register("Core.ping", |_args, _meta| async { Ok(Value::from("pong")) });
//!     let registry = Arc::new(registry);
//!
//!     // Join a caller to it in-process
//!     let duplex = Duplexer::serialized().from_client(&registry, ());
//!
//!     // The first request connects implicitly
//!     let reply = duplex.to_core.send_request(Command::new("Core.ping"), None).await?;
//!     println!("Reply: {reply:?}");
//!
//!     Ok(())
//! }
//! ```
//!
//! # Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | [`connection`] | [`ConnectionToCore`], [`ConnectionToClient`], [`ApiRegistry`], [`Duplexer`] |
//! | [`transport`] | [`Transport`] trait, WebSocket, HTTP and in-process transports |
//! | [`protocol`] | Wire message types and the [`MessageCodec`] |
//! | [`pending`] | Pending request table |
//! | [`value`] | Typed wire [`Value`] |
//! | [`error`] | Error types and [`Result`] alias |
//!
//! # Transports
//!
//! - **WebSocket**: persistent, keepalive pings, reconnect on demand
//! - **HTTP**: one request, one response, no reconnects
//! - **Bridge**: two in-process transports, optionally serializing

// ============================================================================
// Modules
// ============================================================================

/// Caller and executor connections.
///
/// - [`ConnectionToCore`] - caller-side state machine
/// - [`ConnectionToClient`] - executor-side dispatch
/// - [`ApiRegistry`] - named command handlers
pub mod connection;

/// Error types and result aliases.
///
/// All fallible operations return [`Result<T>`] which uses [`Error`].
pub mod error;

/// Typed event fan-out.
pub mod events;

/// Message correlation identifiers.
pub mod identifiers;

/// Connection and transport options.
pub mod options;

/// Pending request table.
pub mod pending;

/// Wire protocol message types.
pub mod protocol;

/// Single-shot shared completion.
pub mod resolvable;

/// Transport contract and implementations.
pub mod transport;

/// Typed wire values.
pub mod value;

// ============================================================================
// Re-exports
// ============================================================================

// Connection types
pub use connection::{
    ApiRegistry, ClientEvent, ConnectAction, ConnectOptions, ConnectionEvent, ConnectionHooks,
    ConnectionToClient, ConnectionToCore, ConnectionToCoreBuilder, Duplex, Duplexer,
    MetadataFactory,
};

// Error types
pub use error::{Error, Result};

// Identifier types
pub use identifiers::MessageId;

// Option types
pub use options::{ConnectionOptions, HttpOptions, KeepaliveOptions};

// Pending request types
pub use pending::{PendingMessages, PendingRequest};

// Protocol types
pub use protocol::{
    Command, EventPayload, Message, MessageCodec, RequestPayload, ResponsePayload, TypedJsonCodec,
};

// Transport types
pub use transport::{
    EmittingTransport, HttpApiServer, HttpTransportToClient, Transport, TransportBridge,
    TransportEvent, WsServer, WsTransportToClient, WsTransportToCore,
};

// Value types
pub use value::{RemoteError, RemoteErrorKind, Value};
