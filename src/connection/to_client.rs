//! Executor side of a persistent connection.
//!
//! A [`ConnectionToClient`] subscribes to its transport, runs every inbound
//! request through the [`ApiRegistry`] and writes the response back on the
//! same transport. Requests are handled concurrently, each in its own task.

// ============================================================================
// Imports
// ============================================================================

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use tracing::{Instrument, debug, info, trace, warn};

use crate::error::{Error, Result};
use crate::events::{Emitter, Subscription};
use crate::protocol::{EventPayload, Message, RequestPayload, ResponsePayload};
use crate::resolvable::Resolvable;
use crate::transport::{Transport, TransportEvent};

use super::registry::{ApiRegistry, MetadataFactory, request_span, response_data};

// ============================================================================
// ClientEvent
// ============================================================================

/// Signal emitted by a [`ConnectionToClient`].
#[derive(Debug, Clone)]
pub enum ClientEvent {
    /// The bound transport is gone.
    Disconnected(Option<Error>),
}

// ============================================================================
// ConnectionToClient
// ============================================================================

/// A transport bound to an [`ApiRegistry`].
///
/// Cloning is cheap; every clone drives the same connection. Request handling
/// stops once every clone is dropped.
pub struct ConnectionToClient<M> {
    inner: Arc<ClientInner<M>>,
}

struct ClientInner<M> {
    transport: Arc<dyn Transport>,
    registry: Arc<ApiRegistry<M>>,
    metadata: MetadataFactory<M>,
    disconnect_action: Mutex<Option<Arc<Resolvable<()>>>>,
    disconnected: AtomicBool,
    events: Emitter<ClientEvent>,
}

impl<M> Clone for ConnectionToClient<M> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<M: Send + 'static> ConnectionToClient<M> {
    /// Binds `transport` to `registry` and starts handling requests.
    ///
    /// Must be called from within a tokio runtime.
    pub(crate) fn new(
        transport: Arc<dyn Transport>,
        registry: Arc<ApiRegistry<M>>,
        metadata: MetadataFactory<M>,
    ) -> Self {
        let events = transport.events().subscribe();

        let inner = Arc::new(ClientInner {
            transport,
            registry,
            metadata,
            disconnect_action: Mutex::new(None),
            disconnected: AtomicBool::new(false),
            events: Emitter::new(),
        });

        tokio::spawn(Self::run_event_loop(Arc::downgrade(&inner), events));

        debug!(remote_id = ?inner.transport.remote_id(), "Client connection created");
        Self { inner }
    }

    async fn run_event_loop(inner: Weak<ClientInner<M>>, mut events: Subscription<TransportEvent>) {
        while let Some(event) = events.recv().await {
            let Some(inner) = inner.upgrade() else {
                break;
            };
            let connection = Self { inner };

            match event {
                TransportEvent::Message(Message::Request(request)) => {
                    tokio::spawn(async move {
                        if let Err(e) = connection.handle_request(request).await {
                            warn!(error = %e, "Failed to send response");
                        }
                    });
                }
                TransportEvent::Message(other) => {
                    debug!(kind = other.kind(), "Ignoring non-request message");
                }
                TransportEvent::Connected => {}
                TransportEvent::Disconnected(error) => {
                    connection.on_disconnected(error);
                    break;
                }
            }
        }

        trace!("Client connection event loop terminated");
    }

    // ========================================================================
    // Requests and Events
    // ========================================================================

    /// Runs one request and writes its response.
    ///
    /// Handler errors are shipped as the response `data`. A response that
    /// cannot be delivered because the channel is already gone is dropped.
    ///
    /// # Errors
    ///
    /// Returns an error if the response could not be written while the
    /// channel was still up.
    pub async fn handle_request(&self, request: RequestPayload) -> Result<()> {
        let transport = &self.inner.transport;
        let remote_id = transport.remote_id();
        let span = request_span(&request, remote_id);
        let metadata = (self.inner.metadata)(&request, &span, remote_id);

        let RequestPayload {
            command,
            message_id,
            args,
            ..
        } = request;

        async move {
            debug!("Handling request");
            let result = self.inner.registry.invoke(&command, args, metadata).await;
            let data = response_data(&command, result, self.is_disconnecting());

            match transport.send(ResponsePayload::new(message_id, data).into()).await {
                Ok(()) => Ok(()),
                Err(e) if e.is_canceled() || !transport.is_connected() => {
                    debug!(error = %e, "Dropping response for closed channel");
                    Ok(())
                }
                Err(e) => Err(e),
            }
        }
        .instrument(span)
        .await
    }

    /// Pushes an unsolicited event to the caller.
    ///
    /// # Errors
    ///
    /// Returns an error if the transport cannot send.
    pub async fn send_event(&self, event: EventPayload) -> Result<()> {
        trace!(event_type = %event.event_type, "Sending event");
        self.inner.transport.send(event.into()).await
    }

    // ========================================================================
    // Lifecycle
    // ========================================================================

    /// Tears down the bound transport. Concurrent calls share one teardown.
    pub async fn disconnect(&self, error: Option<Error>) {
        let (action, is_new) = {
            let mut slot = self.inner.disconnect_action.lock();
            match slot.as_ref() {
                Some(action) => (Arc::clone(action), false),
                None => {
                    let action = Arc::new(Resolvable::new());
                    *slot = Some(Arc::clone(&action));
                    (action, true)
                }
            }
        };

        if !is_new {
            action.promise().await;
            return;
        }

        info!(remote_id = ?self.remote_id(), "Disconnecting client connection");
        self.inner.transport.disconnect(error.clone()).await;
        self.on_disconnected(error);
        action.resolve(());
    }

    fn on_disconnected(&self, error: Option<Error>) {
        if self.inner.disconnected.swap(true, Ordering::AcqRel) {
            return;
        }
        info!(remote_id = ?self.remote_id(), "Client connection disconnected");
        self.inner.events.emit(ClientEvent::Disconnected(error));
        self.inner.events.clear();
    }

    /// Returns `true` while a disconnect is underway or the channel is gone.
    #[inline]
    #[must_use]
    pub fn is_disconnecting(&self) -> bool {
        self.inner.disconnect_action.lock().is_some()
            || self.is_disconnected()
            || !self.inner.transport.is_connected()
    }

    /// Returns `true` once the connection has terminated.
    #[inline]
    #[must_use]
    pub fn is_disconnected(&self) -> bool {
        self.inner.disconnected.load(Ordering::Acquire)
    }

    /// Identifier of the remote peer, if the transport knows it.
    #[inline]
    #[must_use]
    pub fn remote_id(&self) -> Option<&str> {
        self.inner.transport.remote_id()
    }

    /// The bound transport.
    #[inline]
    #[must_use]
    pub fn transport(&self) -> &Arc<dyn Transport> {
        &self.inner.transport
    }

    /// Subscribes to connection signals.
    ///
    /// Streams end after the `Disconnected` signal.
    pub fn events(&self) -> Subscription<ClientEvent> {
        self.inner.events.subscribe()
    }
}

impl<M> fmt::Debug for ConnectionToClient<M> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionToClient")
            .field("remote_id", &self.inner.transport.remote_id())
            .field("disconnected", &self.inner.disconnected.load(Ordering::Relaxed))
            .finish_non_exhaustive()
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    use crate::identifiers::MessageId;
    use crate::protocol::Command;
    use crate::transport::EmittingTransport;
    use crate::value::{RemoteErrorKind, Value};

    fn registry() -> Arc<ApiRegistry<u32>> {
        let mut registry = ApiRegistry::new();
        registry
            .register("add", |args: Vec<Value>, offset: u32| async move {
                let sum: i64 = args.iter().filter_map(Value::as_i64).sum();
                Ok(Value::from(sum + i64::from(offset)))
            })
            .register("fail", |_args, _meta| async move { Err(Error::protocol("nope")) });
        Arc::new(registry)
    }

    async fn next_response(outbound: &mut Subscription<Message>) -> ResponsePayload {
        match outbound.recv().await {
            Some(Message::Response(response)) => response,
            other => panic!("unexpected message: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_request_is_answered_on_same_transport() {
        let transport = Arc::new(EmittingTransport::to_client());
        let mut outbound = transport.outbound();
        let _connection = registry().create_connection(transport.clone(), 10);

        let request = RequestPayload::new(
            Command::new("add").arg(1).arg(2),
            MessageId::from("m-1"),
        );
        transport.deliver(request.into());

        let response = next_response(&mut outbound).await;
        assert_eq!(response.response_id, MessageId::from("m-1"));
        assert_eq!(response.data, Value::Int(13));
    }

    #[tokio::test]
    async fn test_unknown_command_is_response_data() {
        let transport = Arc::new(EmittingTransport::to_client());
        let mut outbound = transport.outbound();
        let _connection = registry().create_connection(transport.clone(), 0);

        transport.deliver(RequestPayload::new(Command::new("missing"), MessageId::from("m-2")).into());

        let response = next_response(&mut outbound).await;
        let remote = response.data.as_error().expect("error data");
        assert_eq!(remote.kind, RemoteErrorKind::Other);
        assert!(remote.message.contains("missing"));
        assert!(!remote.is_disconnecting);
    }

    #[tokio::test]
    async fn test_send_event() {
        let transport = Arc::new(EmittingTransport::to_client());
        let mut outbound = transport.outbound();
        let connection = registry().create_connection(transport.clone(), 0);

        connection
            .send_event(EventPayload::new("tick", 1).with_listener("l-1"))
            .await
            .unwrap();

        match outbound.recv().await {
            Some(Message::Event(event)) => {
                assert_eq!(event.event_type, "tick");
                assert_eq!(event.listener_id.as_deref(), Some("l-1"));
            }
            other => panic!("unexpected message: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_disconnect_is_coalesced() {
        let transport = Arc::new(EmittingTransport::to_client());
        let connection = registry().create_connection(transport.clone(), 0);
        let mut events = connection.events();

        tokio::join!(connection.disconnect(None), connection.disconnect(None));

        assert!(connection.is_disconnected());
        assert!(!transport.is_connected());
        assert!(matches!(events.recv().await, Some(ClientEvent::Disconnected(None))));
        assert!(events.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_transport_loss_marks_disconnected() {
        let transport = Arc::new(EmittingTransport::to_client());
        let connection = registry().create_connection(transport.clone(), 0);
        let mut events = connection.events();

        transport.disconnect(Some(Error::connection("reset"))).await;

        assert!(matches!(events.recv().await, Some(ClientEvent::Disconnected(Some(_)))));
        assert!(connection.is_disconnected());
        assert!(connection.is_disconnecting());
    }

    #[tokio::test]
    async fn test_listeners_released_on_terminate() {
        let transport = Arc::new(EmittingTransport::to_client());
        let connection = registry().create_connection(transport.clone(), 0);
        let mut events = connection.events();

        transport.disconnect(None).await;

        assert!(matches!(events.recv().await, Some(ClientEvent::Disconnected(None))));
        assert!(events.recv().await.is_none());
        assert!(connection.is_disconnected());
    }
}
