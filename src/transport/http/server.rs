//! HTTP server answering every path through an [`ApiRegistry`].

// ============================================================================
// Imports
// ============================================================================

use std::net::SocketAddr;
use std::sync::Arc;

use axum::Router;
use axum::extract::{ConnectInfo, Request, State};
use axum::http::{StatusCode, header};
use axum::response::{IntoResponse, Response};
use parking_lot::Mutex;
use tokio::net::TcpListener;
use tokio::sync::oneshot;
use tracing::{debug, error, info, warn};

use crate::connection::{ApiRegistry, MetadataFactory};
use crate::error::{Error, Result};
use crate::options::HttpOptions;
use crate::value::Value;

use super::{HttpRequestParts, HttpTransportToClient};

// ============================================================================
// Constants
// ============================================================================

/// Content type of every response.
const RESPONSE_CONTENT_TYPE: &str = "text/json";

// ============================================================================
// HttpState
// ============================================================================

struct HttpState<M> {
    registry: Arc<ApiRegistry<M>>,
    metadata: MetadataFactory<M>,
    options: HttpOptions,
}

// ============================================================================
// HttpApiServer
// ============================================================================

/// One-shot HTTP front end of an [`ApiRegistry`].
///
/// The command comes from the body's `command` field or from the URL path,
/// so `POST /Session/create` and `POST /` with `{"command":"Session.create"}`
/// are equivalent.
pub struct HttpApiServer {
    local_addr: SocketAddr,
    shutdown_tx: Mutex<Option<oneshot::Sender<()>>>,
}

impl HttpApiServer {
    /// Binds the server and starts serving in the background.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Io`] if binding fails.
    pub async fn bind<M: Send + 'static>(
        addr: SocketAddr,
        registry: Arc<ApiRegistry<M>>,
        metadata: MetadataFactory<M>,
        options: HttpOptions,
    ) -> Result<Self> {
        let state = Arc::new(HttpState {
            registry,
            metadata,
            options,
        });

        let app = Router::new()
            .fallback(handle_route::<M>)
            .with_state(state);

        let listener = TcpListener::bind(addr).await?;
        let local_addr = listener.local_addr()?;
        let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();

        tokio::spawn(async move {
            let served = axum::serve(
                listener,
                app.into_make_service_with_connect_info::<SocketAddr>(),
            )
            .with_graceful_shutdown(async {
                let _ = shutdown_rx.await;
            })
            .await;

            if let Err(e) = served {
                error!(error = %e, "HTTP server error");
            }
        });

        info!(%local_addr, "HTTP server listening");

        Ok(Self {
            local_addr,
            shutdown_tx: Mutex::new(Some(shutdown_tx)),
        })
    }

    /// Returns the bound address.
    #[inline]
    #[must_use]
    pub const fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Returns the base URL of this server.
    #[inline]
    #[must_use]
    pub fn url(&self) -> String {
        format!("http://{}", self.local_addr)
    }

    /// Stops accepting requests. In-flight requests complete.
    pub fn shutdown(&self) {
        if let Some(shutdown_tx) = self.shutdown_tx.lock().take() {
            info!(local_addr = %self.local_addr, "HTTP server shutting down");
            let _ = shutdown_tx.send(());
        }
    }
}

impl Drop for HttpApiServer {
    fn drop(&mut self) {
        self.shutdown();
    }
}

// ============================================================================
// Handler
// ============================================================================

async fn handle_route<M: Send + 'static>(
    State(state): State<Arc<HttpState<M>>>,
    request: Request,
) -> Response {
    let (parts, body) = request.into_parts();
    let limit = state.options.max_payload_bytes;

    let remote_id = parts
        .extensions
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| addr.to_string());

    let Ok(body) = axum::body::to_bytes(body, limit).await else {
        warn!(remote_id = ?remote_id, limit, "HTTP body rejected");
        return error_response(StatusCode::PAYLOAD_TOO_LARGE, &Error::payload_too_large(limit));
    };

    let content_type = parts
        .headers
        .get(header::CONTENT_TYPE)
        .and_then(|value| value.to_str().ok());

    let http_parts = HttpRequestParts {
        path: parts.uri.path(),
        query: parts.uri.query(),
        content_type,
        body: &body,
    };

    let (transport, response_rx) =
        match HttpTransportToClient::from_request(http_parts, remote_id, state.options) {
            Ok(created) => created,
            Err(e) => {
                debug!(error = %e, "HTTP request rejected");
                let status = match e {
                    Error::PayloadTooLarge { .. } => StatusCode::PAYLOAD_TOO_LARGE,
                    _ => StatusCode::BAD_REQUEST,
                };
                return error_response(status, &e);
            }
        };

    if let Err(e) = state
        .registry
        .handle_http_route(&transport, &state.metadata)
        .await
    {
        error!(error = %e, "HTTP route failed");
        return error_response(StatusCode::INTERNAL_SERVER_ERROR, &e);
    }

    match response_rx.await {
        Ok(text) => ([(header::CONTENT_TYPE, RESPONSE_CONTENT_TYPE)], text).into_response(),
        Err(_) => error_response(StatusCode::INTERNAL_SERVER_ERROR, &Error::ChannelClosed),
    }
}

/// Error body: a tagged error value.
fn error_response(status: StatusCode, error: &Error) -> Response {
    let body = Value::Error(error.to_remote()).to_json().to_string();
    (status, [(header::CONTENT_TYPE, RESPONSE_CONTENT_TYPE)], body).into_response()
}
