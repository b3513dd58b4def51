//! Co-located caller and executor over an in-process bridge.

// ============================================================================
// Imports
// ============================================================================

use std::sync::Arc;

use crate::protocol::{MessageCodec, TypedJsonCodec};
use crate::transport::TransportBridge;

use super::{ApiRegistry, ConnectionToClient, ConnectionToCore, ConnectionToCoreBuilder};

// ============================================================================
// Duplex
// ============================================================================

/// Both ends of one in-process connection.
pub struct Duplex<M> {
    /// Caller side.
    pub to_core: ConnectionToCore,
    /// Executor side.
    pub to_client: ConnectionToClient<M>,
}

// ============================================================================
// Duplexer
// ============================================================================

/// Wires a [`ConnectionToCore`] straight to an [`ApiRegistry`] with no I/O.
///
/// # Example
///
/// ```ignore
/// let duplex = Duplexer::serialized().from_client(&registry, ());
/// let reply = duplex.to_core.send_request(Command::new("Core.ping"), None).await?;
/// ```
#[derive(Debug, Clone, Default)]
pub struct Duplexer {
    codec: Option<Arc<dyn MessageCodec>>,
}

impl Duplexer {
    /// Hands messages over without serializing them.
    #[must_use]
    pub fn new() -> Self {
        Self { codec: None }
    }

    /// Round-trips every message through the wire codec.
    #[must_use]
    pub fn serialized() -> Self {
        Self {
            codec: Some(Arc::new(TypedJsonCodec)),
        }
    }

    /// Builds both ends with a default caller side.
    ///
    /// Must be called from within a tokio runtime.
    pub fn from_client<M>(&self, registry: &Arc<ApiRegistry<M>>, metadata: M) -> Duplex<M>
    where
        M: Clone + Send + Sync + 'static,
    {
        self.from_core(|builder| builder, registry, metadata)
    }

    /// Builds both ends, letting `configure` set up the caller side's hooks
    /// and options.
    ///
    /// Must be called from within a tokio runtime.
    pub fn from_core<M, F>(&self, configure: F, registry: &Arc<ApiRegistry<M>>, metadata: M) -> Duplex<M>
    where
        M: Clone + Send + Sync + 'static,
        F: FnOnce(ConnectionToCoreBuilder) -> ConnectionToCoreBuilder,
    {
        let bridge = TransportBridge::with_codec(self.codec.clone());
        let to_client = registry.create_connection(bridge.transport_to_client, metadata);
        let to_core = configure(ConnectionToCore::builder(bridge.transport_to_core)).build();

        Duplex { to_core, to_client }
    }
}

// ============================================================================
// Tests
// ============================================================================
