//! Caller side of a WebSocket connection.
//!
//! Owns dialing. A failed dial is reported by [`connect`](Transport::connect)
//! as [`Error::Connection`] and never emits `Disconnected`; once the socket is
//! open, any loss is reported through the `Disconnected` signal instead.

// ============================================================================
// Imports
// ============================================================================

use std::sync::Arc;
use std::sync::atomic::Ordering;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio_tungstenite::connect_async;
use tracing::{debug, info};

use crate::error::{Error, Result};
use crate::events::Emitter;
use crate::options::KeepaliveOptions;
use crate::protocol::{Message, MessageCodec, TypedJsonCodec};
use crate::transport::{Transport, TransportEvent};

use super::socket::{SocketHandle, SocketState, error_close_frame, normal_close_frame};

// ============================================================================
// WsTransportToCore
// ============================================================================

/// WebSocket transport dialing an executor.
///
/// # Example
///
/// ```ignore
/// let transport = Arc::new(WsTransportToCore::new("localhost:1818"));
/// let connection = ConnectionToCore::builder(transport).build();
/// ```
pub struct WsTransportToCore {
    state: Arc<SocketState>,
    socket: Mutex<Option<SocketHandle>>,
    /// Serializes dials.
    dialing: tokio::sync::Mutex<()>,
    codec: Arc<dyn MessageCodec>,
    keepalive: KeepaliveOptions,
}

impl WsTransportToCore {
    /// Creates a transport for `host`.
    ///
    /// Accepts `host:port` or a full `ws://` / `wss://` URL.
    #[must_use]
    pub fn new(host: impl AsRef<str>) -> Self {
        Self {
            state: Arc::new(SocketState::new(normalize_host(host.as_ref()), false)),
            socket: Mutex::new(None),
            dialing: tokio::sync::Mutex::new(()),
            codec: Arc::new(TypedJsonCodec),
            keepalive: KeepaliveOptions::default(),
        }
    }

    /// Replaces the wire codec.
    #[must_use]
    pub fn with_codec(mut self, codec: Arc<dyn MessageCodec>) -> Self {
        self.codec = codec;
        self
    }

    /// Replaces the keepalive policy.
    #[must_use]
    pub fn with_keepalive(mut self, keepalive: KeepaliveOptions) -> Self {
        self.keepalive = keepalive;
        self
    }

    fn handle(&self) -> Option<SocketHandle> {
        self.socket.lock().clone()
    }
}

/// Prefixes `ws://` when no scheme is given.
fn normalize_host(host: &str) -> String {
    if host.starts_with("ws://") || host.starts_with("wss://") {
        host.to_string()
    } else {
        format!("ws://{host}")
    }
}

#[async_trait]
impl Transport for WsTransportToCore {
    async fn send(&self, message: Message) -> Result<()> {
        let Some(handle) = self.handle() else {
            return Err(Error::disconnected(self.host()));
        };
        handle
            .send_message(self.codec.as_ref(), &message, self.host())
            .await
    }

    async fn connect(&self, timeout: Option<Duration>) -> Result<()> {
        let _dialing = self.dialing.lock().await;
        if self.is_connected() {
            return Ok(());
        }

        let host = self.host();
        debug!(host, "Dialing");

        let dial = connect_async(host);
        let dialed = match timeout {
            Some(limit) => tokio::time::timeout(limit, dial)
                .await
                .map_err(|_| Error::connection_timeout(limit.as_millis() as u64))?,
            None => dial.await,
        };
        let (stream, _response) =
            dialed.map_err(|e| Error::connection(format!("could not connect to {host}: {e}")))?;

        self.state.connected.store(true, Ordering::Release);
        self.state.events.emit(TransportEvent::Connected);

        let handle = SocketHandle::spawn(
            stream,
            Arc::clone(&self.state),
            Arc::clone(&self.codec),
            self.keepalive,
        );
        *self.socket.lock() = Some(handle);

        info!(host, "Connected");
        Ok(())
    }

    async fn disconnect(&self, error: Option<Error>) {
        let handle = self.socket.lock().take();
        let Some(handle) = handle else {
            return;
        };

        let frame = match &error {
            Some(error) => error_close_frame(error),
            None => normal_close_frame(),
        };
        handle.close(Some(frame));
        handle.closed().await;

        debug!(host = self.host(), "Disconnected");
    }

    #[inline]
    fn is_connected(&self) -> bool {
        self.state.is_connected()
    }

    fn host(&self) -> &str {
        &self.state.host
    }

    fn events(&self) -> &Emitter<TransportEvent> {
        &self.state.events
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    use std::net::{IpAddr, Ipv4Addr, SocketAddr};

    use tokio::net::TcpListener;

    #[test]
    fn test_normalize_host() {
        assert_eq!(normalize_host("localhost:1818"), "ws://localhost:1818");
        assert_eq!(normalize_host("ws://localhost:1818"), "ws://localhost:1818");
        assert_eq!(normalize_host("wss://example.com/core"), "wss://example.com/core");
    }

    #[tokio::test]
    async fn test_send_before_connect_is_disconnected() {
        let transport = WsTransportToCore::new("localhost:1");
        let err = transport
            .send(crate::protocol::EventPayload::default().into())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Disconnected { .. }));
    }

    #[tokio::test]
    async fn test_failed_dial_is_connection_error_without_disconnect_signal() {
        // Bind then drop to find a port nobody listens on.
        let listener = TcpListener::bind(SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), 0))
            .await
            .expect("bind");
        let port = listener.local_addr().expect("addr").port();
        drop(listener);

        let transport = WsTransportToCore::new(format!("127.0.0.1:{port}"));
        let mut events = transport.events().subscribe();

        let err = transport
            .connect(Some(Duration::from_secs(5)))
            .await
            .unwrap_err();
        assert!(err.is_connection_error());
        assert!(!transport.is_connected());
        assert!(events.try_recv().is_err());
    }
}
