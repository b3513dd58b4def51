//! In-process transport pair.
//!
//! Two [`EmittingTransport`]s joined by a [`TransportBridge`] behave like a
//! duplex socket without any I/O. Delivery always hops through the
//! scheduler, never through a same-stack call, so reentrancy bugs that a real
//! wire would expose are not masked.

// ============================================================================
// Imports
// ============================================================================

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use async_trait::async_trait;
use tracing::{debug, trace, warn};

use crate::error::{Error, Result};
use crate::events::{Emitter, Subscription};
use crate::protocol::{Message, MessageCodec, TypedJsonCodec};

use super::{Transport, TransportEvent};

// ============================================================================
// Constants
// ============================================================================

/// Host reported by in-process transports.
const DIRECT_HOST: &str = "direct";

// ============================================================================
// EmittingTransport
// ============================================================================

/// One side of an in-process transport pair.
///
/// [`send`](Transport::send) publishes on [`outbound`](Self::outbound);
/// [`deliver`](Self::deliver) injects an inbound message.
pub struct EmittingTransport {
    connected: AtomicBool,
    /// Messages sent by the owning connection.
    outbound: Emitter<Message>,
    events: Emitter<TransportEvent>,
}

impl EmittingTransport {
    /// Creates the caller side. It starts disconnected and connects on demand.
    #[must_use]
    pub fn to_core() -> Self {
        Self::with_state(false)
    }

    /// Creates the executor side. It is born connected.
    #[must_use]
    pub fn to_client() -> Self {
        Self::with_state(true)
    }

    fn with_state(connected: bool) -> Self {
        Self {
            connected: AtomicBool::new(connected),
            outbound: Emitter::buffered(),
            events: Emitter::buffered(),
        }
    }

    /// Stream of messages sent through this side.
    pub fn outbound(&self) -> Subscription<Message> {
        self.outbound.subscribe()
    }

    /// Emits an inbound message. Dropped while disconnected.
    pub fn deliver(&self, message: Message) {
        if !self.is_connected() {
            trace!(kind = message.kind(), "Dropping message for disconnected transport");
            return;
        }
        self.events.emit(TransportEvent::Message(message));
    }
}

#[async_trait]
impl Transport for EmittingTransport {
    async fn send(&self, message: Message) -> Result<()> {
        if !self.is_connected() {
            return Err(Error::disconnected(DIRECT_HOST));
        }
        self.outbound.emit(message);
        Ok(())
    }

    async fn connect(&self, _timeout: Option<Duration>) -> Result<()> {
        if !self.connected.swap(true, Ordering::AcqRel) {
            self.events.emit(TransportEvent::Connected);
        }
        Ok(())
    }

    async fn disconnect(&self, error: Option<Error>) {
        if self.connected.swap(false, Ordering::AcqRel) {
            self.events.emit(TransportEvent::Disconnected(error));
        }
    }

    #[inline]
    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Acquire)
    }

    fn host(&self) -> &str {
        DIRECT_HOST
    }

    fn remote_id(&self) -> Option<&str> {
        Some(DIRECT_HOST)
    }

    fn events(&self) -> &Emitter<TransportEvent> {
        &self.events
    }
}

// ============================================================================
// TransportBridge
// ============================================================================

/// Joins two [`EmittingTransport`]s so each one's sends arrive at the other.
///
/// # Example
///
/// ```ignore
/// let bridge = TransportBridge::serialized();
/// let client = registry.create_connection(bridge.transport_to_client.clone(), ());
/// let core = ConnectionToCore::builder(bridge.transport_to_core.clone()).build();
/// ```
pub struct TransportBridge {
    /// Side owned by a [`ConnectionToCore`](crate::ConnectionToCore).
    pub transport_to_core: Arc<EmittingTransport>,
    /// Side owned by a [`ConnectionToClient`](crate::ConnectionToClient).
    pub transport_to_client: Arc<EmittingTransport>,
}

impl TransportBridge {
    /// Creates a bridge that hands messages over as-is.
    ///
    /// Must be called from within a tokio runtime.
    #[must_use]
    pub fn new() -> Self {
        Self::with_codec(None)
    }

    /// Creates a bridge that round-trips every message through the wire codec.
    ///
    /// Must be called from within a tokio runtime.
    #[must_use]
    pub fn serialized() -> Self {
        Self::with_codec(Some(Arc::new(TypedJsonCodec)))
    }

    /// Creates a bridge with an optional codec.
    ///
    /// Must be called from within a tokio runtime.
    #[must_use]
    pub fn with_codec(codec: Option<Arc<dyn MessageCodec>>) -> Self {
        let transport_to_core = Arc::new(EmittingTransport::to_core());
        let transport_to_client = Arc::new(EmittingTransport::to_client());

        tokio::spawn(Self::forward(
            transport_to_core.outbound(),
            Arc::downgrade(&transport_to_client),
            codec.clone(),
        ));
        tokio::spawn(Self::forward(
            transport_to_client.outbound(),
            Arc::downgrade(&transport_to_core),
            codec,
        ));

        Self {
            transport_to_core,
            transport_to_client,
        }
    }

    /// Forwards one direction until the sending side is dropped.
    async fn forward(
        mut outbound: Subscription<Message>,
        target: Weak<EmittingTransport>,
        codec: Option<Arc<dyn MessageCodec>>,
    ) {
        while let Some(message) = outbound.recv().await {
            tokio::task::yield_now().await;

            let message = match &codec {
                Some(codec) => match codec.encode(&message).and_then(|text| codec.decode(&text)) {
                    Ok(message) => message,
                    Err(e) => {
                        warn!(error = %e, "Bridge failed to round-trip message");
                        continue;
                    }
                },
                None => message,
            };

            let Some(target) = target.upgrade() else {
                break;
            };
            target.deliver(message);
        }

        debug!("Bridge forwarder stopped");
    }
}

impl Default for TransportBridge {
    fn default() -> Self {
        Self::new()
    }
}

// ============================================================================
// Tests
// ============================================================================
