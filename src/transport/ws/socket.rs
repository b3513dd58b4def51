//! WebSocket event loop shared by both socket transports.
//!
//! The loop owns the stream. It decodes inbound frames into
//! [`TransportEvent::Message`], writes outbound frames on command, pings on a
//! fixed interval and drops the socket once nothing has been heard from the
//! peer within the inactivity window.

// ============================================================================
// Imports
// ============================================================================

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use futures_util::{SinkExt, StreamExt};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::{mpsc, oneshot};
use tokio::time::{Instant, MissedTickBehavior, interval_at};
use tokio_tungstenite::WebSocketStream;
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tracing::{debug, error, trace, warn};

use crate::error::{Error, Result};
use crate::events::Emitter;
use crate::options::KeepaliveOptions;
use crate::protocol::{Message, MessageCodec};
use crate::resolvable::Resolvable;
use crate::transport::TransportEvent;

// ============================================================================
// Constants
// ============================================================================

/// Longest close reason a control frame can carry.
const MAX_CLOSE_REASON_BYTES: usize = 123;

// ============================================================================
// SocketState
// ============================================================================

/// State shared between a socket transport and its event loop.
pub(crate) struct SocketState {
    pub(crate) host: String,
    pub(crate) connected: AtomicBool,
    pub(crate) events: Emitter<TransportEvent>,
}

impl SocketState {
    pub(crate) fn new(host: impl Into<String>, connected: bool) -> Self {
        Self {
            host: host.into(),
            connected: AtomicBool::new(connected),
            events: Emitter::buffered(),
        }
    }

    #[inline]
    pub(crate) fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Acquire)
    }
}

// ============================================================================
// SocketCommand
// ============================================================================

/// Internal commands for the event loop.
enum SocketCommand {
    /// Write a text frame.
    Send {
        text: String,
        ack: oneshot::Sender<Result<()>>,
    },
    /// Send a close frame and stop.
    Close { frame: Option<CloseFrame> },
}

// ============================================================================
// SocketHandle
// ============================================================================

/// Control handle of a running event loop.
#[derive(Clone)]
pub(crate) struct SocketHandle {
    command_tx: mpsc::UnboundedSender<SocketCommand>,
    closed: Arc<Resolvable<()>>,
}

impl SocketHandle {
    /// Spawns the event loop for an open stream.
    ///
    /// The caller marks `state` connected before spawning.
    pub(crate) fn spawn<S>(
        stream: WebSocketStream<S>,
        state: Arc<SocketState>,
        codec: Arc<dyn MessageCodec>,
        keepalive: KeepaliveOptions,
    ) -> Self
    where
        S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    {
        let (command_tx, command_rx) = mpsc::unbounded_channel();
        let closed = Arc::new(Resolvable::new());

        tokio::spawn(run_event_loop(
            stream,
            command_rx,
            state,
            codec,
            keepalive,
            Arc::clone(&closed),
        ));

        Self { command_tx, closed }
    }

    /// Encodes and writes a message.
    ///
    /// A failure other than a cancellation also closes the socket with an
    /// "unexpected error" frame carrying the failure message.
    pub(crate) async fn send_message(
        &self,
        codec: &dyn MessageCodec,
        message: &Message,
        host: &str,
    ) -> Result<()> {
        let result = match codec.encode(message) {
            Ok(text) => self.send_text(text, host).await,
            Err(e) => Err(e),
        };

        if let Err(error) = &result
            && !error.is_canceled()
        {
            error!(host, error = %error, "Send failed, closing socket");
            self.close(Some(error_close_frame(error)));
        }

        result
    }

    async fn send_text(&self, text: String, host: &str) -> Result<()> {
        let (ack, ack_rx) = oneshot::channel();
        self.command_tx
            .send(SocketCommand::Send { text, ack })
            .map_err(|_| Error::disconnected(host))?;

        ack_rx.await.map_err(|_| Error::disconnected(host))?
    }

    /// Asks the loop to send a close frame and stop.
    pub(crate) fn close(&self, frame: Option<CloseFrame>) {
        let _ = self.command_tx.send(SocketCommand::Close { frame });
    }

    /// Waits until the loop has stopped.
    pub(crate) async fn closed(&self) {
        self.closed.promise().await;
    }
}

// ============================================================================
// Close Frames
// ============================================================================

/// Normal closure frame.
pub(crate) fn normal_close_frame() -> CloseFrame {
    CloseFrame {
        code: CloseCode::Normal,
        reason: "".into(),
    }
}

/// "Unexpected error" closure frame with a JSON `{message}` reason.
pub(crate) fn error_close_frame(error: &Error) -> CloseFrame {
    let mut message = error.to_string();
    let reason = loop {
        let reason = serde_json::json!({ "message": message }).to_string();
        if reason.len() <= MAX_CLOSE_REASON_BYTES || message.is_empty() {
            break reason;
        }
        message.pop();
    };

    CloseFrame {
        code: CloseCode::Error,
        reason: reason.into(),
    }
}

// ============================================================================
// Event Loop
// ============================================================================

async fn run_event_loop<S>(
    stream: WebSocketStream<S>,
    mut command_rx: mpsc::UnboundedReceiver<SocketCommand>,
    state: Arc<SocketState>,
    codec: Arc<dyn MessageCodec>,
    keepalive: KeepaliveOptions,
    closed: Arc<Resolvable<()>>,
) where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    let (mut ws_write, mut ws_read) = stream.split();

    let mut ping = interval_at(
        Instant::now() + keepalive.ping_interval,
        keepalive.ping_interval,
    );
    ping.set_missed_tick_behavior(MissedTickBehavior::Delay);

    let mut last_activity = Instant::now();
    let mut fatal: Option<Error> = None;

    loop {
        tokio::select! {
            // Incoming frames from the peer
            frame = ws_read.next() => {
                match frame {
                    Some(Ok(WsMessage::Text(text))) => {
                        last_activity = Instant::now();
                        dispatch_frame(&text, &state, codec.as_ref());
                    }

                    Some(Ok(WsMessage::Binary(bytes))) => {
                        last_activity = Instant::now();
                        match std::str::from_utf8(&bytes) {
                            Ok(text) => dispatch_frame(text, &state, codec.as_ref()),
                            Err(e) => warn!(host = %state.host, error = %e, "Dropping non-UTF-8 frame"),
                        }
                    }

                    Some(Ok(WsMessage::Ping(_) | WsMessage::Pong(_))) => {
                        last_activity = Instant::now();
                    }

                    Some(Ok(WsMessage::Close(frame))) => {
                        debug!(host = %state.host, ?frame, "WebSocket closed by remote");
                        break;
                    }

                    Some(Ok(WsMessage::Frame(_))) => {}

                    Some(Err(e)) => {
                        error!(host = %state.host, error = %e, "WebSocket error");
                        fatal = Some(Error::from(e));
                        break;
                    }

                    None => {
                        debug!(host = %state.host, "WebSocket stream ended");
                        break;
                    }
                }
            }

            // Commands from the transport
            command = command_rx.recv() => {
                match command {
                    Some(SocketCommand::Send { text, ack }) => {
                        let result = ws_write
                            .send(WsMessage::Text(text.into()))
                            .await
                            .map_err(Error::from);
                        trace!(host = %state.host, ok = result.is_ok(), "Frame sent");
                        let _ = ack.send(result);
                    }

                    Some(SocketCommand::Close { frame }) => {
                        debug!(host = %state.host, ?frame, "Closing WebSocket");
                        let _ = ws_write.send(WsMessage::Close(frame)).await;
                        let _ = ws_write.close().await;
                        break;
                    }

                    None => {
                        debug!(host = %state.host, "Socket handle dropped");
                        let _ = ws_write.close().await;
                        break;
                    }
                }
            }

            // Keepalive
            _ = ping.tick() => {
                let idle = last_activity.elapsed();
                if idle >= keepalive.inactivity_timeout {
                    warn!(
                        host = %state.host,
                        idle_ms = idle.as_millis() as u64,
                        "No activity within keepalive window, dropping socket"
                    );
                    fatal = Some(Error::connection(format!(
                        "no activity for {}ms",
                        idle.as_millis()
                    )));
                    let _ = ws_write.close().await;
                    break;
                }

                if let Err(e) = ws_write.send(WsMessage::Ping(Vec::new().into())).await {
                    warn!(host = %state.host, error = %e, "Keepalive ping failed");
                    fatal = Some(Error::from(e));
                    break;
                }
            }
        }
    }

    state.connected.store(false, Ordering::Release);

    // Fail sends queued behind the close.
    command_rx.close();
    while let Ok(command) = command_rx.try_recv() {
        if let SocketCommand::Send { ack, .. } = command {
            let _ = ack.send(Err(Error::disconnected(&state.host)));
        }
    }

    debug!(host = %state.host, "Socket event loop terminated");
    state.events.emit(TransportEvent::Disconnected(fatal));
    closed.resolve(());
}

fn dispatch_frame(text: &str, state: &SocketState, codec: &dyn MessageCodec) {
    match codec.decode(text) {
        Ok(message) => {
            trace!(host = %state.host, kind = message.kind(), "Frame received");
            state.events.emit(TransportEvent::Message(message));
        }
        Err(e) => {
            warn!(host = %state.host, error = %e, "Dropping undecodable frame");
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
