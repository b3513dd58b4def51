//! WebSocket server binding accepted sockets to an [`ApiRegistry`].
//!
//! # Connection Flow
//!
//! 1. `WsServer::bind` binds a listener (port 0 picks a random port)
//! 2. The accept loop upgrades each TCP connection to a WebSocket
//! 3. Each socket becomes a [`WsTransportToClient`] bound to the registry
//! 4. `WsServer::shutdown` stops accepting and closes every client

// ============================================================================
// Imports
// ============================================================================

use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use parking_lot::Mutex;
use tokio::net::{TcpListener, TcpStream};
use tokio::time::timeout;
use tracing::{debug, error, info, warn};

use crate::connection::{ApiRegistry, ConnectionToClient, MetadataFactory};
use crate::error::{Error, Result};
use crate::options::KeepaliveOptions;
use crate::protocol::TypedJsonCodec;

use super::WsTransportToClient;

// ============================================================================
// Constants
// ============================================================================

/// How often the accept loop re-checks the shutdown flag.
const ACCEPT_POLL_INTERVAL: Duration = Duration::from_millis(100);

// ============================================================================
// Types
// ============================================================================

type ClientList<M> = Arc<Mutex<Vec<ConnectionToClient<M>>>>;

// ============================================================================
// WsServer
// ============================================================================

/// Accepts WebSocket clients and serves an [`ApiRegistry`] to each.
///
/// # Example
///
/// ```ignore
/// let server = WsServer::bind(addr, Arc::new(registry), metadata, KeepaliveOptions::default()).await?;
/// let transport = WsTransportToCore::new(server.ws_url());
/// ```
pub struct WsServer<M> {
    local_addr: SocketAddr,
    shutdown: Arc<AtomicBool>,
    clients: ClientList<M>,
}

impl<M: Send + 'static> WsServer<M> {
    /// Binds the server and starts the accept loop.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Io`] if binding fails.
    pub async fn bind(
        addr: SocketAddr,
        registry: Arc<ApiRegistry<M>>,
        metadata: MetadataFactory<M>,
        keepalive: KeepaliveOptions,
    ) -> Result<Self> {
        let listener = TcpListener::bind(addr).await?;
        let local_addr = listener.local_addr()?;

        let server = Self {
            local_addr,
            shutdown: Arc::new(AtomicBool::new(false)),
            clients: Arc::new(Mutex::new(Vec::new())),
        };

        tokio::spawn(accept_loop(
            listener,
            Arc::clone(&server.shutdown),
            Arc::clone(&server.clients),
            registry,
            metadata,
            keepalive,
        ));

        info!(%local_addr, "WebSocket server bound");
        Ok(server)
    }

    /// Returns the WebSocket URL for this server.
    #[inline]
    #[must_use]
    pub fn ws_url(&self) -> String {
        format!("ws://{}", self.local_addr)
    }

    /// Returns the bound address.
    #[inline]
    #[must_use]
    pub const fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Returns the number of live client connections.
    #[must_use]
    pub fn connection_count(&self) -> usize {
        let mut clients = self.clients.lock();
        clients.retain(|client| !client.is_disconnected());
        clients.len()
    }

    /// Disconnects every client while keeping the listener open.
    pub async fn close_clients(&self) {
        let clients: Vec<_> = self.clients.lock().drain(..).collect();
        let count = clients.len();

        for client in clients {
            client.disconnect(None).await;
        }

        debug!(count, "Closed client connections");
    }

    /// Stops accepting and disconnects every client.
    pub async fn shutdown(&self) {
        info!(local_addr = %self.local_addr, "WebSocket server shutting down");
        self.shutdown.store(true, Ordering::SeqCst);
        self.close_clients().await;
    }
}

impl<M> Drop for WsServer<M> {
    fn drop(&mut self) {
        self.shutdown.store(true, Ordering::SeqCst);
    }
}

// ============================================================================
// Accept Loop
// ============================================================================

async fn accept_loop<M: Send + 'static>(
    listener: TcpListener,
    shutdown: Arc<AtomicBool>,
    clients: ClientList<M>,
    registry: Arc<ApiRegistry<M>>,
    metadata: MetadataFactory<M>,
    keepalive: KeepaliveOptions,
) {
    debug!("Accept loop started");

    loop {
        if shutdown.load(Ordering::SeqCst) {
            debug!("Accept loop shutting down");
            break;
        }

        // Accept with timeout to allow checking shutdown flag
        match timeout(ACCEPT_POLL_INTERVAL, listener.accept()).await {
            Ok(Ok((stream, addr))) => {
                let clients = Arc::clone(&clients);
                let registry = Arc::clone(&registry);
                let metadata = Arc::clone(&metadata);
                tokio::spawn(async move {
                    match upgrade(stream, addr, keepalive).await {
                        Ok(transport) => {
                            let client = registry.create_connection_with(Arc::new(transport), metadata);
                            let mut clients = clients.lock();
                            clients.retain(|client| !client.is_disconnected());
                            clients.push(client);
                        }
                        Err(e) => warn!(error = %e, %addr, "Connection handling failed"),
                    }
                });
            }
            Ok(Err(e)) => {
                error!(error = %e, "Accept failed");
            }
            Err(_) => continue,
        }
    }

    debug!("Accept loop terminated");
}

async fn upgrade(
    stream: TcpStream,
    addr: SocketAddr,
    keepalive: KeepaliveOptions,
) -> Result<WsTransportToClient> {
    debug!(%addr, "New TCP connection");

    let ws_stream = tokio_tungstenite::accept_async(stream)
        .await
        .map_err(|e| Error::connection(format!("WebSocket upgrade failed: {e}")))?;

    info!(%addr, "WebSocket client connected");

    Ok(WsTransportToClient::new(
        ws_stream,
        addr.to_string(),
        Arc::new(TypedJsonCodec),
        keepalive,
    ))
}
