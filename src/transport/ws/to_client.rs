//! Executor side of a WebSocket connection.

// ============================================================================
// Imports
// ============================================================================

use std::sync::Arc;

use async_trait::async_trait;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio_tungstenite::WebSocketStream;
use tracing::debug;

use crate::error::{Error, Result};
use crate::events::Emitter;
use crate::options::KeepaliveOptions;
use crate::protocol::{Message, MessageCodec};
use crate::transport::{Transport, TransportEvent};

use super::socket::{SocketHandle, SocketState, error_close_frame, normal_close_frame};

// ============================================================================
// WsTransportToClient
// ============================================================================

/// WebSocket transport wrapping an accepted socket.
///
/// Born connected; it never reconnects. `remote_id` is the peer address.
pub struct WsTransportToClient {
    state: Arc<SocketState>,
    socket: SocketHandle,
    codec: Arc<dyn MessageCodec>,
}

impl WsTransportToClient {
    /// Starts the event loop on an upgraded stream.
    ///
    /// Must be called from within a tokio runtime.
    pub fn new<S>(
        stream: WebSocketStream<S>,
        remote_id: impl Into<String>,
        codec: Arc<dyn MessageCodec>,
        keepalive: KeepaliveOptions,
    ) -> Self
    where
        S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    {
        let state = Arc::new(SocketState::new(remote_id, true));
        let socket = SocketHandle::spawn(stream, Arc::clone(&state), Arc::clone(&codec), keepalive);

        Self {
            state,
            socket,
            codec,
        }
    }
}

#[async_trait]
impl Transport for WsTransportToClient {
    async fn send(&self, message: Message) -> Result<()> {
        if !self.is_connected() {
            return Err(Error::disconnected(self.host()));
        }
        self.socket
            .send_message(self.codec.as_ref(), &message, self.host())
            .await
    }

    async fn disconnect(&self, error: Option<Error>) {
        let frame = match &error {
            Some(error) => error_close_frame(error),
            None => normal_close_frame(),
        };
        self.socket.close(Some(frame));
        self.socket.closed().await;

        debug!(remote_id = self.host(), "Client socket closed");
    }

    #[inline]
    fn is_connected(&self) -> bool {
        self.state.is_connected()
    }

    fn host(&self) -> &str {
        &self.state.host
    }

    fn remote_id(&self) -> Option<&str> {
        Some(&self.state.host)
    }

    fn events(&self) -> &Emitter<TransportEvent> {
        &self.state.events
    }
}
