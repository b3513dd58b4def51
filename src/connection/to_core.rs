//! Caller side of a connection.
//!
//! [`ConnectionToCore`] turns a [`Transport`] into request/response calls with
//! connection lifecycle management:
//!
//! - concurrent `connect` calls share one connect, and the after-connect hook
//!   runs exactly once per successful connect;
//! - `disconnect` is idempotent and cancels every pending request;
//! - `send_request` connects implicitly, but never sooner than
//!   [`ConnectionOptions::minimum_auto_reconnect`] after the last disconnect;
//! - requests sent from inside a hook survive the table-wide cancel and are
//!   settled explicitly when the connection terminates.
//!
//! # Example
//!
//! ```ignore
//! use corelink::{Command, ConnectionToCore, WsTransportToCore};
//!
//! let transport = Arc::new(WsTransportToCore::new("localhost:1818"));
//! let connection = ConnectionToCore::builder(transport)
//!     .after_connect(|connection, _action| async move {
//!         connection.send_request(Command::new("Core.connect"), None).await?;
//!         Ok(())
//!     })
//!     .build();
//!
//! let reply = connection.send_request(Command::new("Session.create"), None).await?;
//! ```

// ============================================================================
// Imports
// ============================================================================

use std::fmt;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use futures_util::future::BoxFuture;
use parking_lot::Mutex;
use tokio::time::Instant;
use tracing::{debug, error, info, trace, warn};

use crate::error::{Error, Result};
use crate::events::{Emitter, Subscription};
use crate::identifiers::MessageId;
use crate::options::ConnectionOptions;
use crate::pending::PendingMessages;
use crate::protocol::{Command, EventPayload, Message, RequestPayload, ResponsePayload};
use crate::resolvable::Resolvable;
use crate::transport::{Transport, TransportEvent};
use crate::value::{RemoteErrorKind, Value};

// ============================================================================
// Hooks
// ============================================================================

/// Hook receiving the connect or disconnect action it runs under.
pub type ActionHook =
    Arc<dyn Fn(ConnectionToCore, Arc<ConnectAction>) -> BoxFuture<'static, Result<()>> + Send + Sync>;

/// Hook run after the connection terminates.
pub type TerminatedHook = Arc<dyn Fn(ConnectionToCore) -> BoxFuture<'static, Result<()>> + Send + Sync>;

/// Lifecycle hooks, fixed at build time.
#[derive(Clone, Default)]
pub struct ConnectionHooks {
    /// Runs after the transport connects, before `connect` resolves. A
    /// failure fails the connect.
    pub after_connect: Option<ActionHook>,
    /// Runs before the transport is torn down. Failures are logged.
    pub before_disconnect: Option<ActionHook>,
    /// Runs once per termination, orderly or not. Failures are logged.
    pub after_disconnect: Option<TerminatedHook>,
}

impl fmt::Debug for ConnectionHooks {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionHooks")
            .field("after_connect", &self.after_connect.is_some())
            .field("before_disconnect", &self.before_disconnect.is_some())
            .field("after_disconnect", &self.after_disconnect.is_some())
            .finish()
    }
}

// ============================================================================
// ConnectAction
// ============================================================================

/// One in-flight or completed connect or disconnect.
///
/// Every caller coalesced onto the same operation observes the same outcome.
pub struct ConnectAction {
    start_time: Instant,
    is_automatic: bool,
    is_calling_hook: AtomicBool,
    hook_message_id: Mutex<Option<MessageId>>,
    /// Fatal error a disconnect was started with.
    error: Option<Error>,
    outcome: Resolvable<Result<()>>,
}

impl ConnectAction {
    fn new(is_automatic: bool, error: Option<Error>) -> Self {
        Self {
            start_time: Instant::now(),
            is_automatic,
            is_calling_hook: AtomicBool::new(false),
            hook_message_id: Mutex::new(None),
            error,
            outcome: Resolvable::new(),
        }
    }

    /// When the action started.
    #[inline]
    #[must_use]
    pub fn start_time(&self) -> Instant {
        self.start_time
    }

    /// Returns `true` if the connect was started by `send_request`.
    #[inline]
    #[must_use]
    pub fn is_automatic(&self) -> bool {
        self.is_automatic
    }

    /// Returns `true` while a hook runs under this action.
    #[inline]
    #[must_use]
    pub fn is_calling_hook(&self) -> bool {
        self.is_calling_hook.load(Ordering::Acquire)
    }

    /// Id of the request a hook currently has in flight.
    #[inline]
    #[must_use]
    pub fn hook_message_id(&self) -> Option<MessageId> {
        self.hook_message_id.lock().clone()
    }

    /// Returns `true` once the action settled.
    #[inline]
    #[must_use]
    pub fn is_resolved(&self) -> bool {
        self.outcome.is_resolved()
    }

    /// The fatal error of a disconnect, or the failure of a connect.
    #[must_use]
    pub fn error(&self) -> Option<Error> {
        self.error
            .clone()
            .or_else(|| self.outcome.get().and_then(Result::err))
    }

    /// Waits for the action to settle.
    ///
    /// # Errors
    ///
    /// Returns the error the action failed with.
    pub async fn wait(&self) -> Result<()> {
        self.outcome.promise().await
    }

    fn set_calling_hook(&self, calling: bool) {
        self.is_calling_hook.store(calling, Ordering::Release);
    }

    fn set_hook_message_id(&self, id: MessageId) {
        *self.hook_message_id.lock() = Some(id);
    }

    fn clear_hook_message_id(&self, id: &MessageId) {
        let mut slot = self.hook_message_id.lock();
        if slot.as_ref() == Some(id) {
            *slot = None;
        }
    }

    fn is_settled_ok(&self) -> bool {
        matches!(self.outcome.get(), Some(Ok(())))
    }
}

impl fmt::Debug for ConnectAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectAction")
            .field("is_automatic", &self.is_automatic)
            .field("is_calling_hook", &self.is_calling_hook())
            .field("hook_message_id", &self.hook_message_id())
            .field("is_resolved", &self.is_resolved())
            .finish_non_exhaustive()
    }
}

// ============================================================================
// ConnectOptions
// ============================================================================

/// Options of a single [`ConnectionToCore::connect`] call.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ConnectOptions {
    /// Gives up on the transport connect after this long.
    pub timeout: Option<Duration>,
    /// Marks the connect as started by `send_request`.
    pub is_auto_connect: bool,
    /// Overwrites the connection's auto-reconnect flag when set.
    pub should_auto_reconnect: Option<bool>,
}

impl ConnectOptions {
    /// Creates the default options.
    #[inline]
    #[must_use]
    pub const fn new() -> Self {
        Self {
            timeout: None,
            is_auto_connect: false,
            should_auto_reconnect: None,
        }
    }

    /// Sets the transport connect timeout.
    #[inline]
    #[must_use]
    pub const fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Overwrites the auto-reconnect flag on connect.
    #[inline]
    #[must_use]
    pub const fn with_should_auto_reconnect(mut self, enabled: bool) -> Self {
        self.should_auto_reconnect = Some(enabled);
        self
    }

    const fn automatic(timeout: Option<Duration>) -> Self {
        Self {
            timeout,
            is_auto_connect: true,
            should_auto_reconnect: None,
        }
    }
}

// ============================================================================
// ConnectionEvent
// ============================================================================

/// Signal emitted by a [`ConnectionToCore`].
#[derive(Debug, Clone)]
pub enum ConnectionEvent {
    /// A connect completed, hooks included.
    Connected,
    /// The connection terminated, with the fatal error if there was one.
    Disconnected(Option<Error>),
    /// The remote pushed an event.
    Event(EventPayload),
}

// ============================================================================
// Builder
// ============================================================================

/// Builder for [`ConnectionToCore`].
pub struct ConnectionToCoreBuilder {
    transport: Arc<dyn Transport>,
    hooks: ConnectionHooks,
    options: ConnectionOptions,
}

impl ConnectionToCoreBuilder {
    /// Sets the reconnect policy.
    #[must_use]
    pub fn options(mut self, options: ConnectionOptions) -> Self {
        self.options = options;
        self
    }

    /// Replaces all hooks at once.
    #[must_use]
    pub fn hooks(mut self, hooks: ConnectionHooks) -> Self {
        self.hooks = hooks;
        self
    }

    /// Sets the after-connect hook.
    #[must_use]
    pub fn after_connect<F, Fut>(mut self, hook: F) -> Self
    where
        F: Fn(ConnectionToCore, Arc<ConnectAction>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<()>> + Send + 'static,
    {
        self.hooks.after_connect = Some(Arc::new(
            move |connection: ConnectionToCore, action: Arc<ConnectAction>| -> BoxFuture<'static, Result<()>> {
                Box::pin(hook(connection, action))
            },
        ));
        self
    }

    /// Sets the before-disconnect hook.
    #[must_use]
    pub fn before_disconnect<F, Fut>(mut self, hook: F) -> Self
    where
        F: Fn(ConnectionToCore, Arc<ConnectAction>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<()>> + Send + 'static,
    {
        self.hooks.before_disconnect = Some(Arc::new(
            move |connection: ConnectionToCore, action: Arc<ConnectAction>| -> BoxFuture<'static, Result<()>> {
                Box::pin(hook(connection, action))
            },
        ));
        self
    }

    /// Sets the after-disconnect hook.
    #[must_use]
    pub fn after_disconnect<F, Fut>(mut self, hook: F) -> Self
    where
        F: Fn(ConnectionToCore) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<()>> + Send + 'static,
    {
        self.hooks.after_disconnect = Some(Arc::new(
            move |connection: ConnectionToCore| -> BoxFuture<'static, Result<()>> { Box::pin(hook(connection)) },
        ));
        self
    }

    /// Builds the connection and subscribes it to the transport.
    ///
    /// Must be called from within a tokio runtime.
    #[must_use]
    pub fn build(self) -> ConnectionToCore {
        let events = self.transport.events().subscribe();

        let inner = Arc::new(CoreInner {
            state: Mutex::new(CoreState {
                connect_action: None,
                disconnect_action: None,
                auto_reconnect: self.options.auto_reconnect,
                last_disconnect: None,
                did_call_connection_terminated: false,
            }),
            transport: self.transport,
            pending: PendingMessages::new(),
            hooks: self.hooks,
            options: self.options,
            events: Emitter::new(),
        });

        tokio::spawn(ConnectionToCore::run_event_loop(Arc::downgrade(&inner), events));

        ConnectionToCore { inner }
    }
}

// ============================================================================
// ConnectionToCore
// ============================================================================

/// Client-side connection state machine.
///
/// Cloning is cheap; every clone drives the same connection.
#[derive(Clone)]
pub struct ConnectionToCore {
    inner: Arc<CoreInner>,
}

struct CoreInner {
    transport: Arc<dyn Transport>,
    pending: PendingMessages,
    hooks: ConnectionHooks,
    options: ConnectionOptions,
    /// Never held across an await.
    state: Mutex<CoreState>,
    events: Emitter<ConnectionEvent>,
}

struct CoreState {
    connect_action: Option<Arc<ConnectAction>>,
    disconnect_action: Option<Arc<ConnectAction>>,
    auto_reconnect: bool,
    last_disconnect: Option<Instant>,
    did_call_connection_terminated: bool,
}

/// What a `connect` call does once it has inspected the state.
enum ConnectStep {
    Skip,
    Join(Arc<ConnectAction>),
    Drive(Arc<ConnectAction>),
}

impl ConnectionToCore {
    /// Starts building a connection over `transport`.
    #[must_use]
    pub fn builder(transport: Arc<dyn Transport>) -> ConnectionToCoreBuilder {
        ConnectionToCoreBuilder {
            transport,
            hooks: ConnectionHooks::default(),
            options: ConnectionOptions::default(),
        }
    }

    /// Creates a connection without hooks.
    ///
    /// Must be called from within a tokio runtime.
    #[must_use]
    pub fn new(transport: Arc<dyn Transport>) -> Self {
        Self::builder(transport).build()
    }

    // ========================================================================
    // Event Loop
    // ========================================================================

    async fn run_event_loop(inner: Weak<CoreInner>, mut events: Subscription<TransportEvent>) {
        while let Some(event) = events.recv().await {
            let Some(inner) = inner.upgrade() else {
                break;
            };
            let connection = Self { inner };

            match event {
                TransportEvent::Message(message) => connection.on_message(message),
                TransportEvent::Connected => {
                    debug!(host = connection.host(), "Transport connected");
                }
                TransportEvent::Disconnected(error) => {
                    // Past its before-disconnect hook, an explicit disconnect
                    // terminates with its own error and awaits the
                    // after-disconnect hook itself.
                    if connection.is_disconnect_underway() {
                        debug!(host = connection.host(), "Transport closed by explicit disconnect");
                        continue;
                    }
                    if connection.on_connection_terminated(error) {
                        tokio::spawn(async move { connection.run_after_disconnect_hook().await });
                    }
                }
            }
        }

        trace!("Connection event loop terminated");
    }

    fn on_message(&self, message: Message) {
        match message {
            Message::Response(response) => self.on_response(response),
            Message::Event(event) => self.on_event(event),
            Message::Request(request) => {
                warn!(command = %request.command, "Ignoring request sent to the caller side");
            }
        }
    }

    fn on_response(&self, response: ResponsePayload) {
        let ResponsePayload { response_id, data } = response;

        let settled = match data {
            Value::Error(mut remote) => {
                let is_disconnected = self.inner.state.lock().disconnect_action.is_some()
                    || remote.kind == RemoteErrorKind::SessionClosedOrMissing
                    || remote.is_disconnecting;
                remote.is_disconnecting = false;

                let error = if is_disconnected && !remote.kind.is_launch_error() {
                    Error::disconnected(self.host())
                } else {
                    Error::Remote(remote)
                };
                self.inner.pending.reject(&response_id, error)
            }
            data => self.inner.pending.resolve(&response_id, data),
        };

        if !settled {
            warn!(message_id = %response_id, "Response for unknown request");
        }
    }

    fn on_event(&self, event: EventPayload) {
        debug!(event_type = %event.event_type, listener_id = ?event.listener_id, "Event received");
        self.inner.events.emit(ConnectionEvent::Event(event));
    }

    /// Settles everything bound to the current connection.
    ///
    /// Returns `false` if this termination was already handled, so the
    /// after-disconnect hook runs once per termination.
    fn on_connection_terminated(&self, error: Option<Error>) -> bool {
        let (connect_action, disconnect_action) = {
            let mut state = self.inner.state.lock();
            if state.did_call_connection_terminated {
                return false;
            }
            state.did_call_connection_terminated = true;
            state.last_disconnect = Some(Instant::now());
            (state.connect_action.take(), state.disconnect_action.clone())
        };

        let host = self.host();
        info!(host, error = ?error, "Connection terminated");
        self.inner.events.emit(ConnectionEvent::Disconnected(error));

        if let Some(action) = connect_action
            && let Some(id) = action.hook_message_id()
        {
            if action.is_automatic() {
                self.inner.pending.resolve(&id, Value::Null);
            } else {
                self.inner.pending.reject(&id, Error::disconnected(host));
            }
        }

        if let Some(action) = disconnect_action
            && let Some(id) = action.hook_message_id()
        {
            self.inner.pending.resolve(&id, Value::Null);
        }

        let canceled = self.inner.pending.cancel(&Error::disconnected(host));
        if canceled > 0 {
            debug!(host, canceled, "Canceled pending requests");
        }
        true
    }

    // ========================================================================
    // Lifecycle
    // ========================================================================

    /// Connects the transport and runs the after-connect hook.
    ///
    /// Concurrent calls share one connect. Returns immediately while a
    /// before-disconnect hook is running.
    ///
    /// # Errors
    ///
    /// Returns the transport's connect error or the hook's error. The failed
    /// action is cleared so the next call retries.
    pub async fn connect(&self, options: ConnectOptions) -> Result<()> {
        let step = {
            let mut state = self.inner.state.lock();
            if state
                .disconnect_action
                .as_ref()
                .is_some_and(|action| action.is_calling_hook())
            {
                ConnectStep::Skip
            } else if let Some(action) = state.connect_action.as_ref() {
                ConnectStep::Join(Arc::clone(action))
            } else {
                if let Some(enabled) = options.should_auto_reconnect {
                    state.auto_reconnect = enabled;
                }
                let action = Arc::new(ConnectAction::new(options.is_auto_connect, None));
                state.connect_action = Some(Arc::clone(&action));
                state.disconnect_action = None;
                ConnectStep::Drive(action)
            }
        };

        let action = match step {
            ConnectStep::Skip => return Ok(()),
            ConnectStep::Join(action) => return action.wait().await,
            ConnectStep::Drive(action) => action,
        };

        let host = self.host();
        info!(host, automatic = action.is_automatic(), "Connecting");

        match self.establish(&action, options.timeout).await {
            Ok(()) => {
                action.outcome.resolve(Ok(()));
                info!(host, "Connected");
                self.inner.events.emit(ConnectionEvent::Connected);
                Ok(())
            }
            Err(e) => {
                {
                    let mut state = self.inner.state.lock();
                    if state
                        .connect_action
                        .as_ref()
                        .is_some_and(|current| Arc::ptr_eq(current, &action))
                    {
                        state.connect_action = None;
                    }
                }
                warn!(host, error = %e, "Connect failed");
                action.outcome.resolve(Err(e.clone()));
                Err(e)
            }
        }
    }

    async fn establish(&self, action: &Arc<ConnectAction>, timeout: Option<Duration>) -> Result<()> {
        self.inner.transport.connect(timeout).await?;
        self.inner.state.lock().did_call_connection_terminated = false;
        self.run_after_connect_hook(action).await
    }

    /// Cancels pending requests and tears the transport down.
    ///
    /// Disables implicit reconnects. Concurrent and repeated calls share one
    /// disconnect.
    pub async fn disconnect(&self, fatal_error: Option<Error>) {
        let action = {
            let mut state = self.inner.state.lock();
            state.auto_reconnect = false;
            match state.disconnect_action.as_ref() {
                Some(action) => Err(Arc::clone(action)),
                None => {
                    let action = Arc::new(ConnectAction::new(false, fatal_error));
                    state.disconnect_action = Some(Arc::clone(&action));
                    Ok(action)
                }
            }
        };

        let action = match action {
            Ok(action) => action,
            Err(existing) => {
                let _ = existing.wait().await;
                return;
            }
        };

        let host = self.host();
        info!(host, "Disconnecting");

        let canceled = self.inner.pending.cancel(&Error::disconnected(host));
        if canceled > 0 {
            debug!(host, canceled, "Canceled pending requests");
        }

        self.run_before_disconnect_hook(&action).await;
        self.inner.transport.disconnect(action.error.clone()).await;

        if self.on_connection_terminated(action.error.clone()) {
            self.run_after_disconnect_hook().await;
        }
        self.inner.state.lock().connect_action = None;

        info!(host, "Disconnected");
        action.outcome.resolve(Ok(()));
    }

    // ========================================================================
    // Requests
    // ========================================================================

    /// Sends a command and waits for its response.
    ///
    /// Connects first when [`should_auto_connect`](Self::should_auto_connect)
    /// allows it. Returns `Ok(None)` when the request was canceled by a
    /// disconnect that was underway while it ran.
    ///
    /// # Errors
    ///
    /// Returns the implicit connect's error, the transport's send error,
    /// [`Error::Timeout`], [`Error::Disconnected`] or the remote's error.
    pub async fn send_request(&self, command: Command, timeout: Option<Duration>) -> Result<Option<Value>> {
        let (connect_hook, disconnect_hook, disconnected_before) = {
            let state = self.inner.state.lock();
            (
                state
                    .connect_action
                    .clone()
                    .filter(|action| action.is_calling_hook()),
                state
                    .disconnect_action
                    .clone()
                    .filter(|action| action.is_calling_hook()),
                state
                    .disconnect_action
                    .as_ref()
                    .is_some_and(|action| action.is_resolved()),
            )
        };

        if self.should_auto_connect() {
            self.connect(ConnectOptions::automatic(timeout)).await?;
        }

        let from_hook = connect_hook.is_some() || disconnect_hook.is_some();
        let pending = self.inner.pending.create(timeout, from_hook);
        let id = pending.id().clone();

        for action in [&connect_hook, &disconnect_hook].into_iter().flatten() {
            action.set_hook_message_id(id.clone());
        }

        let payload = RequestPayload::new(command, id.clone());
        trace!(message_id = %id, command = %payload.command, from_hook, "Sending request");

        let result = tokio::try_join!(pending.response(), self.inner.transport.send(payload.into()));

        for action in [&connect_hook, &disconnect_hook].into_iter().flatten() {
            action.clear_hook_message_id(&id);
        }

        match result {
            Ok((value, ())) => Ok(Some(value)),
            Err(e) => {
                self.inner.pending.delete(&id);

                let disconnecting = self.inner.state.lock().disconnect_action.is_some();
                if e.is_canceled() && disconnecting && !disconnected_before {
                    debug!(message_id = %id, "Request canceled by disconnect");
                    return Ok(None);
                }
                Err(e)
            }
        }
    }

    fn is_disconnect_underway(&self) -> bool {
        self.inner
            .state
            .lock()
            .disconnect_action
            .as_ref()
            .is_some_and(|action| !action.is_resolved() && !action.is_calling_hook())
    }

    /// Returns `true` if `send_request` would connect implicitly.
    ///
    /// Never while auto-reconnect is off, a connect exists, or a
    /// before-disconnect hook has a request in flight. Otherwise only once
    /// the throttle window since the last disconnect has elapsed.
    #[must_use]
    pub fn should_auto_connect(&self) -> bool {
        let state = self.inner.state.lock();

        if !state.auto_reconnect || state.connect_action.is_some() {
            return false;
        }
        if state
            .disconnect_action
            .as_ref()
            .is_some_and(|action| action.hook_message_id().is_some())
        {
            return false;
        }

        match state.last_disconnect {
            None => true,
            Some(at) => at.elapsed() >= self.inner.options.minimum_auto_reconnect,
        }
    }

    // ========================================================================
    // Hooks
    // ========================================================================

    async fn run_after_connect_hook(&self, action: &Arc<ConnectAction>) -> Result<()> {
        let Some(hook) = self.inner.hooks.after_connect.clone() else {
            return Ok(());
        };

        {
            let state = self.inner.state.lock();
            let is_current = state
                .connect_action
                .as_ref()
                .is_some_and(|current| Arc::ptr_eq(current, action));
            if state.disconnect_action.is_some() || !is_current || action.is_resolved() {
                return Ok(());
            }
        }

        action.set_calling_hook(true);
        let result = hook(self.clone(), Arc::clone(action)).await;
        action.set_calling_hook(false);
        result
    }

    async fn run_before_disconnect_hook(&self, action: &Arc<ConnectAction>) {
        let Some(hook) = self.inner.hooks.before_disconnect.clone() else {
            return;
        };

        action.set_calling_hook(true);
        if let Err(e) = hook(self.clone(), Arc::clone(action)).await {
            error!(host = self.host(), error = %e, "Error in beforeDisconnect hook");
        }
        action.set_calling_hook(false);
    }

    async fn run_after_disconnect_hook(&self) {
        let Some(hook) = self.inner.hooks.after_disconnect.clone() else {
            return;
        };

        if let Err(e) = hook(self.clone()).await {
            error!(host = self.host(), error = %e, "Error in afterDisconnect hook");
        }
    }

    // ========================================================================
    // Accessors
    // ========================================================================

    /// Returns `true` after a successful connect while the transport is up.
    #[must_use]
    pub fn is_connected(&self) -> bool {
        let connected = self
            .inner
            .state
            .lock()
            .connect_action
            .as_ref()
            .is_some_and(|action| action.is_settled_ok());
        connected && self.inner.transport.is_connected()
    }

    /// Returns `true` once `disconnect` was called and no connect followed.
    #[must_use]
    pub fn is_disconnecting(&self) -> bool {
        self.inner.state.lock().disconnect_action.is_some()
    }

    /// Current connect action, if any.
    #[must_use]
    pub fn connect_action(&self) -> Option<Arc<ConnectAction>> {
        self.inner.state.lock().connect_action.clone()
    }

    /// Current disconnect action, if any.
    #[must_use]
    pub fn disconnect_action(&self) -> Option<Arc<ConnectAction>> {
        self.inner.state.lock().disconnect_action.clone()
    }

    /// Returns `true` while `send_request` may connect implicitly at all.
    #[must_use]
    pub fn auto_reconnect(&self) -> bool {
        self.inner.state.lock().auto_reconnect
    }

    /// Number of requests awaiting a response.
    #[inline]
    #[must_use]
    pub fn pending_count(&self) -> usize {
        self.inner.pending.len()
    }

    /// Host of the underlying transport.
    #[inline]
    #[must_use]
    pub fn host(&self) -> &str {
        self.inner.transport.host()
    }

    /// The underlying transport.
    #[inline]
    #[must_use]
    pub fn transport(&self) -> &Arc<dyn Transport> {
        &self.inner.transport
    }

    /// Subscribes to connection signals.
    pub fn events(&self) -> Subscription<ConnectionEvent> {
        self.inner.events.subscribe()
    }
}

impl fmt::Debug for ConnectionToCore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionToCore")
            .field("host", &self.host())
            .field("pending", &self.pending_count())
            .field("hooks", &self.inner.hooks)
            .finish_non_exhaustive()
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    use std::sync::atomic::AtomicUsize;

    use crate::transport::EmittingTransport;
    use crate::value::RemoteError;

    /// Caller-side transport whose peer is the test itself.
    fn harness() -> (Arc<EmittingTransport>, Subscription<Message>) {
        let transport = Arc::new(EmittingTransport::to_core());
        let outbound = transport.outbound();
        (transport, outbound)
    }

    async fn next_request(outbound: &mut Subscription<Message>) -> RequestPayload {
        match outbound.recv().await {
            Some(Message::Request(request)) => request,
            other => panic!("unexpected message: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_concurrent_connects_run_hook_once() {
        let (transport, _outbound) = harness();
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);

        let connection = ConnectionToCore::builder(transport)
            .after_connect(move |_connection, _action| {
                let counter = Arc::clone(&counter);
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    Ok(())
                }
            })
            .build();

        let (a, b) = tokio::join!(
            connection.connect(ConnectOptions::new()),
            connection.connect(ConnectOptions::new())
        );
        a.unwrap();
        b.unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(connection.is_connected());
    }

    #[tokio::test]
    async fn test_send_request_auto_connects_and_resolves() {
        let (transport, mut outbound) = harness();
        let connection = ConnectionToCore::new(transport.clone());

        let caller = connection.clone();
        let reply = tokio::spawn(async move {
            caller
                .send_request(Command::new("Core.ping").arg("x"), None)
                .await
        });

        let request = next_request(&mut outbound).await;
        assert_eq!(request.command, "Core.ping");
        assert_eq!(request.args, vec![Value::from("x")]);
        transport.deliver(ResponsePayload::new(request.message_id, "pong").into());

        let value = reply.await.unwrap().unwrap();
        assert_eq!(value, Some(Value::from("pong")));
        assert!(connection.is_connected());
        assert_eq!(connection.pending_count(), 0);
    }

    #[tokio::test]
    async fn test_remote_error_rejects() {
        let (transport, mut outbound) = harness();
        let connection = ConnectionToCore::new(transport.clone());

        let caller = connection.clone();
        let reply = tokio::spawn(async move { caller.send_request(Command::new("fail"), None).await });

        let request = next_request(&mut outbound).await;
        let remote = RemoteError::named("TypeError", "bad");
        transport.deliver(ResponsePayload::new(request.message_id, Value::Error(remote)).into());

        let err = reply.await.unwrap().unwrap_err();
        assert!(matches!(err, Error::Remote(ref remote) if remote.name == "TypeError"));
    }

    #[tokio::test]
    async fn test_session_closed_becomes_disconnected() {
        let (transport, mut outbound) = harness();
        let connection = ConnectionToCore::new(transport.clone());

        let caller = connection.clone();
        let reply = tokio::spawn(async move { caller.send_request(Command::new("x"), None).await });

        let request = next_request(&mut outbound).await;
        let remote = RemoteError::named("SessionClosedOrMissingError", "gone");
        transport.deliver(ResponsePayload::new(request.message_id, Value::Error(remote)).into());

        let err = reply.await.unwrap().unwrap_err();
        assert!(matches!(err, Error::Disconnected { ref host } if host == "direct"));
    }

    #[tokio::test]
    async fn test_launch_error_is_not_normalized() {
        let (transport, mut outbound) = harness();
        let connection = ConnectionToCore::new(transport.clone());

        let caller = connection.clone();
        let reply = tokio::spawn(async move { caller.send_request(Command::new("x"), None).await });

        let request = next_request(&mut outbound).await;
        let mut remote = RemoteError::named("BrowserLaunchError", "no browser");
        remote.is_disconnecting = true;
        transport.deliver(ResponsePayload::new(request.message_id, Value::Error(remote)).into());

        let err = reply.await.unwrap().unwrap_err();
        assert!(err.is_launch_error());
    }

    #[tokio::test]
    async fn test_events_are_forwarded() {
        let (transport, _outbound) = harness();
        let connection = ConnectionToCore::new(transport.clone());
        let mut events = connection.events();

        connection.connect(ConnectOptions::new()).await.unwrap();
        assert!(matches!(events.recv().await, Some(ConnectionEvent::Connected)));

        transport.deliver(EventPayload::new("tick", 3).with_listener("l-1").into());
        match events.recv().await {
            Some(ConnectionEvent::Event(event)) => {
                assert_eq!(event.event_type, "tick");
                assert_eq!(event.data, Value::Int(3));
            }
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_disconnect_cancels_and_disables_reconnect() {
        let (transport, mut outbound) = harness();
        let connection = ConnectionToCore::new(transport.clone());

        let caller = connection.clone();
        let reply = tokio::spawn(async move { caller.send_request(Command::new("slow"), None).await });
        let _ = next_request(&mut outbound).await;

        tokio::join!(connection.disconnect(None), connection.disconnect(None));

        assert_eq!(reply.await.unwrap().unwrap(), None);
        assert!(!connection.auto_reconnect());
        assert!(!connection.should_auto_connect());
        assert!(!transport.is_connected());
        assert_eq!(connection.pending_count(), 0);
    }

    #[tokio::test]
    async fn test_request_after_disconnect_fails() {
        let (transport, _outbound) = harness();
        let connection = ConnectionToCore::new(transport);
        connection.connect(ConnectOptions::new()).await.unwrap();
        connection.disconnect(None).await;

        let err = connection
            .send_request(Command::new("late"), None)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Disconnected { .. }));
    }

    #[tokio::test(start_paused = true)]
    async fn test_reconnect_is_throttled() {
        let (transport, _outbound) = harness();
        let options = ConnectionOptions::new().with_minimum_auto_reconnect(Duration::from_millis(200));
        let connection = ConnectionToCore::builder(transport.clone())
            .options(options)
            .build();
        let mut events = connection.events();

        connection.connect(ConnectOptions::new()).await.unwrap();
        assert!(matches!(events.recv().await, Some(ConnectionEvent::Connected)));

        transport.disconnect(None).await;
        assert!(matches!(events.recv().await, Some(ConnectionEvent::Disconnected(None))));
        assert!(!connection.should_auto_connect());

        let err = connection
            .send_request(Command::new("x"), None)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Disconnected { .. }));

        tokio::time::advance(Duration::from_millis(200)).await;
        assert!(connection.should_auto_connect());
    }

    #[tokio::test]
    async fn test_connect_hook_request_rejected_on_termination() {
        let (transport, mut outbound) = harness();
        let connection = ConnectionToCore::builder(transport.clone())
            .after_connect(|connection, _action| async move {
                connection.send_request(Command::new("Core.connect"), None).await?;
                Ok(())
            })
            .build();

        let connecting = connection.clone();
        let connect = tokio::spawn(async move { connecting.connect(ConnectOptions::new()).await });

        let request = next_request(&mut outbound).await;
        let action = connection.connect_action().expect("connect action");
        assert_eq!(action.hook_message_id(), Some(request.message_id));

        transport.disconnect(None).await;

        let err = connect.await.unwrap().unwrap_err();
        assert!(matches!(err, Error::Disconnected { .. }));
        assert!(matches!(action.error(), Some(Error::Disconnected { .. })));
        assert!(connection.connect_action().is_none());
    }

    #[tokio::test]
    async fn test_after_disconnect_hook_runs_once() {
        let (transport, _outbound) = harness();
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);

        let connection = ConnectionToCore::builder(transport)
            .after_disconnect(move |_connection| {
                let counter = Arc::clone(&counter);
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    Ok(())
                }
            })
            .build();

        connection.connect(ConnectOptions::new()).await.unwrap();
        connection.disconnect(None).await;
        tokio::task::yield_now().await;

        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_explicit_disconnect_reports_fatal_error() {
        let (transport, _outbound) = harness();
        let finished = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&finished);

        let connection = ConnectionToCore::builder(transport)
            .after_disconnect(move |_connection| {
                let counter = Arc::clone(&counter);
                async move {
                    tokio::task::yield_now().await;
                    counter.fetch_add(1, Ordering::SeqCst);
                    Ok(())
                }
            })
            .build();
        let mut events = connection.events();

        connection.connect(ConnectOptions::new()).await.unwrap();
        connection.disconnect(Some(Error::protocol("fatal"))).await;
        assert_eq!(finished.load(Ordering::SeqCst), 1);

        assert!(matches!(events.recv().await, Some(ConnectionEvent::Connected)));
        match events.recv().await {
            Some(ConnectionEvent::Disconnected(Some(error))) => {
                assert!(error.to_string().contains("fatal"));
            }
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_failing_before_disconnect_hook_is_swallowed() {
        let (transport, _outbound) = harness();
        let connection = ConnectionToCore::builder(transport.clone())
            .before_disconnect(|_connection, action| async move {
                assert!(action.is_calling_hook());
                Err(Error::protocol("hook failed"))
            })
            .build();

        connection.connect(ConnectOptions::new()).await.unwrap();
        connection.disconnect(None).await;

        let action = connection.disconnect_action().expect("disconnect action");
        assert!(action.is_resolved());
        assert!(!action.is_calling_hook());
        assert!(!transport.is_connected());
    }

    #[tokio::test]
    async fn test_should_auto_reconnect_overrides_flag() {
        let (transport, _outbound) = harness();
        let connection = ConnectionToCore::new(transport);

        connection
            .connect(ConnectOptions::new().with_should_auto_reconnect(false))
            .await
            .unwrap();
        assert!(!connection.auto_reconnect());
    }
}
