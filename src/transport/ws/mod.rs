//! Persistent WebSocket transports.
//!
//! | Type | Side | Description |
//! |------|------|-------------|
//! | [`WsTransportToCore`] | Caller | Dials the executor, reconnects on demand |
//! | [`WsTransportToClient`] | Executor | Wraps one accepted socket |
//! | [`WsServer`] | Executor | Accept loop feeding an `ApiRegistry` |
//!
//! Both transports run the same event loop: a ping every 10s and a forced
//! disconnect after 30s without inbound traffic, so half-open sockets are
//! detected even when the peer never sends a close.

// ============================================================================
// Submodules
// ============================================================================

/// Accept loop binding sockets to a registry.
pub mod server;

/// Event loop shared by both socket transports.
mod socket;

/// Executor side of a socket.
pub mod to_client;

/// Caller side of a socket.
pub mod to_core;

// ============================================================================
// Re-exports
// ============================================================================

pub use server::WsServer;
pub use to_client::WsTransportToClient;
pub use to_core::WsTransportToCore;
