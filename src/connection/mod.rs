//! Connections built on top of transports.
//!
//! | Type | Side | Description |
//! |------|------|-------------|
//! | [`ConnectionToCore`] | Caller | Requests, events, connect/disconnect lifecycle |
//! | [`ConnectionToClient`] | Executor | Dispatches inbound requests to an [`ApiRegistry`] |
//! | [`ApiRegistry`] | Executor | Named command handlers |
//! | [`Duplexer`] | Both | Caller and executor joined in-process |

// ============================================================================
// Submodules
// ============================================================================

/// In-process pairing of both sides.
pub mod duplexer;

/// Command handler registry.
pub mod registry;

/// Executor side.
pub mod to_client;

/// Caller side state machine.
pub mod to_core;

// ============================================================================
// Re-exports
// ============================================================================

pub use duplexer::{Duplex, Duplexer};
pub use registry::{ApiRegistry, Handler, MetadataFactory};
pub use to_client::{ClientEvent, ConnectionToClient};
pub use to_core::{
    ActionHook, ConnectAction, ConnectOptions, ConnectionEvent, ConnectionHooks, ConnectionToCore,
    ConnectionToCoreBuilder, TerminatedHook,
};
