//! One-shot HTTP transport.
//!
//! No persistent connection and no reconnects: one request in, one
//! response out, then the transport is disconnected.

// ============================================================================
// Submodules
// ============================================================================

/// Axum server in front of an `ApiRegistry`.
pub mod server;

/// Executor side of one HTTP exchange.
pub mod to_client;

// ============================================================================
// Re-exports
// ============================================================================

pub use server::HttpApiServer;
pub use to_client::{HttpRequestParts, HttpTransportToClient};
