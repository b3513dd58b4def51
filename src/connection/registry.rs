//! Named command handlers.
//!
//! Handlers are registered explicitly at startup and looked up by command
//! name. A handler receives the request's positional arguments plus a
//! metadata value produced per request by the embedding application.

// ============================================================================
// Imports
// ============================================================================

use std::any::Any;
use std::fmt;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use futures_util::FutureExt;
use futures_util::future::BoxFuture;
use rustc_hash::FxHashMap;
use tracing::{Instrument, Span, debug, info_span};

use crate::error::{Error, Result};
use crate::protocol::{RequestPayload, ResponsePayload};
use crate::transport::http::HttpTransportToClient;
use crate::transport::Transport;
use crate::value::{RemoteError, RemoteErrorKind, Value};

use super::ConnectionToClient;

// ============================================================================
// Types
// ============================================================================

/// A registered command handler.
pub type Handler<M> = Box<dyn Fn(Vec<Value>, M) -> BoxFuture<'static, Result<Value>> + Send + Sync>;

/// Produces handler metadata from the raw request, the request's logging span
/// and the remote's identifier.
pub type MetadataFactory<M> =
    Arc<dyn Fn(&RequestPayload, &Span, Option<&str>) -> M + Send + Sync>;

// ============================================================================
// ApiRegistry
// ============================================================================

/// Map from command name to handler.
///
/// # Example
///
/// ```ignore
/// let mut registry = ApiRegistry::<()>::new();
/// registry.register("Core.ping", |_args, _meta| async { Ok(Value::from("pong")) });
/// let registry = Arc::new(registry);
/// ```
pub struct ApiRegistry<M> {
    handlers: FxHashMap<String, Handler<M>>,
}

impl<M: Send + 'static> ApiRegistry<M> {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self {
            handlers: FxHashMap::default(),
        }
    }

    /// Registers a handler, replacing any previous one for the same command.
    pub fn register<F, Fut>(&mut self, command: impl Into<String>, handler: F) -> &mut Self
    where
        F: Fn(Vec<Value>, M) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Value>> + Send + 'static,
    {
        let handler: Handler<M> = Box::new(move |args: Vec<Value>, metadata: M| -> BoxFuture<'static, Result<Value>> {
            Box::pin(handler(args, metadata))
        });
        self.handlers.insert(command.into(), handler);
        self
    }

    /// Returns `true` if a handler is registered for `command`.
    #[inline]
    #[must_use]
    pub fn has(&self, command: &str) -> bool {
        self.handlers.contains_key(command)
    }

    /// Returns the registered command names.
    pub fn commands(&self) -> impl Iterator<Item = &str> {
        self.handlers.keys().map(String::as_str)
    }

    /// Runs the handler for `command`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::UnknownCommand`] if nothing is registered, the
    /// handler's own error, or a remote error if the handler panicked.
    pub async fn invoke(&self, command: &str, args: Vec<Value>, metadata: M) -> Result<Value> {
        let Some(handler) = self.handlers.get(command) else {
            return Err(Error::unknown_command(command));
        };

        match AssertUnwindSafe(handler(args, metadata)).catch_unwind().await {
            Ok(result) => result,
            Err(panic) => Err(Error::Remote(RemoteError::new(
                RemoteErrorKind::Other,
                format!("handler for {command} panicked: {}", panic_message(panic.as_ref())),
            ))),
        }
    }

    /// Binds a transport to this registry with fixed metadata.
    ///
    /// Must be called from within a tokio runtime.
    pub fn create_connection(
        self: &Arc<Self>,
        transport: Arc<dyn Transport>,
        metadata: M,
    ) -> ConnectionToClient<M>
    where
        M: Clone + Sync,
    {
        self.create_connection_with(transport, Arc::new(move |_, _, _| metadata.clone()))
    }

    /// Binds a transport to this registry with per-request metadata.
    ///
    /// Must be called from within a tokio runtime.
    pub fn create_connection_with(
        self: &Arc<Self>,
        transport: Arc<dyn Transport>,
        metadata: MetadataFactory<M>,
    ) -> ConnectionToClient<M> {
        ConnectionToClient::new(transport, Arc::clone(self), metadata)
    }

    /// Serves a single HTTP exchange.
    ///
    /// Reads the request without subscribing to the transport, runs the
    /// handler and always writes exactly one response; handler errors become
    /// the response `data`.
    ///
    /// # Errors
    ///
    /// Returns an error only if the request was already read or the response
    /// could not be written.
    pub async fn handle_http_route(
        &self,
        transport: &HttpTransportToClient,
        metadata: &MetadataFactory<M>,
    ) -> Result<()> {
        let request = transport.read_request()?;
        let remote_id = transport.remote_id();
        let span = request_span(&request, remote_id);
        let metadata = metadata(&request, &span, remote_id);

        let RequestPayload {
            command,
            message_id,
            args,
            ..
        } = request;

        let result = self
            .invoke(&command, args, metadata)
            .instrument(span.clone())
            .await;
        let data = response_data(&command, result, false);

        transport
            .send(ResponsePayload::new(message_id, data).into())
            .instrument(span)
            .await
    }
}

impl<M: Send + 'static> Default for ApiRegistry<M> {
    fn default() -> Self {
        Self::new()
    }
}

impl<M> fmt::Debug for ApiRegistry<M> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ApiRegistry")
            .field("commands", &self.handlers.keys().collect::<Vec<_>>())
            .finish()
    }
}

// ============================================================================
// Helpers
// ============================================================================

/// Span wrapping the handling of one request.
pub(crate) fn request_span(request: &RequestPayload, remote_id: Option<&str>) -> Span {
    info_span!(
        "api_request",
        command = %request.command,
        message_id = %request.message_id,
        remote_id = remote_id.unwrap_or("-"),
    )
}

/// Turns a handler outcome into response data.
pub(crate) fn response_data(command: &str, result: Result<Value>, is_disconnecting: bool) -> Value {
    match result {
        Ok(value) => value,
        Err(error) => {
            debug!(command, error = %error, is_disconnecting, "Handler failed");
            let mut remote = error.to_remote();
            if is_disconnecting {
                remote.is_disconnecting = true;
            }
            Value::Error(remote)
        }
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> &str {
    if let Some(message) = panic.downcast_ref::<&str>() {
        message
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message
    } else {
        "unknown panic"
    }
}

// ============================================================================
// Tests
// ============================================================================
