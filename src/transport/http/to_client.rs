//! One-shot HTTP transport.
//!
//! One HTTP request carries one command. The body is parsed up front, the
//! request is handed to the registry, exactly one response is written and
//! the transport reports itself disconnected.

// ============================================================================
// Imports
// ============================================================================

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use chrono::Utc;
use parking_lot::Mutex;
use serde_json::{Map as JsonMap, Value as Json};
use tokio::sync::oneshot;
use tracing::{debug, trace};
use url::form_urlencoded;

use crate::error::{Error, Result};
use crate::events::Emitter;
use crate::identifiers::MessageId;
use crate::options::HttpOptions;
use crate::protocol::{Message, MessageCodec, RequestPayload, TypedJsonCodec};
use crate::transport::{Transport, TransportEvent};
use crate::value::Value;

// ============================================================================
// Constants
// ============================================================================

/// Host reported when the peer address is unknown.
const UNKNOWN_HOST: &str = "http";

/// Content type of form-encoded bodies.
const FORM_CONTENT_TYPE: &str = "application/x-www-form-urlencoded";

// ============================================================================
// HttpRequestParts
// ============================================================================

/// The pieces of an HTTP request the transport needs.
#[derive(Debug, Clone, Copy)]
pub struct HttpRequestParts<'a> {
    /// URL path, still percent-encoded.
    pub path: &'a str,
    /// Raw query string without the `?`.
    pub query: Option<&'a str>,
    /// `Content-Type` header value.
    pub content_type: Option<&'a str>,
    /// Full request body.
    pub body: &'a [u8],
}

// ============================================================================
// HttpTransportToClient
// ============================================================================

/// Executor side of a single HTTP exchange.
pub struct HttpTransportToClient {
    host: String,
    remote_id: Option<String>,
    request: Mutex<Option<RequestPayload>>,
    response_tx: Mutex<Option<oneshot::Sender<String>>>,
    connected: AtomicBool,
    codec: Arc<dyn MessageCodec>,
    events: Emitter<TransportEvent>,
}

impl HttpTransportToClient {
    /// Parses a request and returns the transport together with the
    /// receiver of the encoded response body.
    ///
    /// # Errors
    ///
    /// - [`Error::PayloadTooLarge`] if the body exceeds the limit
    /// - [`Error::Json`] if a JSON body does not parse
    /// - [`Error::Protocol`] if no command can be found
    pub fn from_request(
        parts: HttpRequestParts<'_>,
        remote_id: Option<String>,
        options: HttpOptions,
    ) -> Result<(Self, oneshot::Receiver<String>)> {
        let request = parse_request(parts, options)?;
        let (response_tx, response_rx) = oneshot::channel();

        debug!(
            command = %request.command,
            message_id = %request.message_id,
            remote_id = ?remote_id,
            "HTTP request parsed"
        );

        let transport = Self {
            host: remote_id.clone().unwrap_or_else(|| UNKNOWN_HOST.to_string()),
            remote_id,
            request: Mutex::new(Some(request)),
            response_tx: Mutex::new(Some(response_tx)),
            connected: AtomicBool::new(true),
            codec: Arc::new(TypedJsonCodec),
            events: Emitter::new(),
        };

        Ok((transport, response_rx))
    }

    /// Replaces the codec used to encode the response.
    #[must_use]
    pub fn with_codec(mut self, codec: Arc<dyn MessageCodec>) -> Self {
        self.codec = codec;
        self
    }

    /// Takes the parsed request. Only the first call succeeds.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Protocol`] if the request was already taken.
    pub fn read_request(&self) -> Result<RequestPayload> {
        self.request
            .lock()
            .take()
            .ok_or_else(|| Error::protocol("HTTP request was already read"))
    }

    fn close(&self, error: Option<Error>) {
        self.response_tx.lock().take();
        if self.connected.swap(false, Ordering::AcqRel) {
            self.events.emit(TransportEvent::Disconnected(error));
        }
    }
}

#[async_trait]
impl Transport for HttpTransportToClient {
    async fn send(&self, message: Message) -> Result<()> {
        let Some(response_tx) = self.response_tx.lock().take() else {
            return Err(Error::disconnected(&self.host));
        };

        let result = self.codec.encode(&message).and_then(|text| {
            trace!(host = %self.host, bytes = text.len(), "Writing HTTP response");
            response_tx
                .send(text)
                .map_err(|_| Error::disconnected(&self.host))
        });

        self.close(None);
        result
    }

    async fn disconnect(&self, error: Option<Error>) {
        self.close(error);
    }

    #[inline]
    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Acquire)
    }

    fn host(&self) -> &str {
        &self.host
    }

    fn remote_id(&self) -> Option<&str> {
        self.remote_id.as_deref()
    }

    fn events(&self) -> &Emitter<TransportEvent> {
        &self.events
    }
}

// ============================================================================
// Request Parsing
// ============================================================================

/// Builds a request payload from body, query string and path.
///
/// Query parameters override body fields. Without a `command` field the
/// command is the decoded path with `/` replaced by `.`. Without `args`, any
/// remaining fields become the single argument.
fn parse_request(parts: HttpRequestParts<'_>, options: HttpOptions) -> Result<RequestPayload> {
    if parts.body.len() > options.max_payload_bytes {
        return Err(Error::payload_too_large(options.max_payload_bytes));
    }

    let mut fields = parse_body(parts.content_type, parts.body)?;

    if let Some(query) = parts.query {
        for (key, value) in form_urlencoded::parse(query.as_bytes()) {
            fields.insert(key.into_owned(), Json::String(value.into_owned()));
        }
    }

    let command = match fields.remove("command") {
        Some(Json::String(command)) if !command.is_empty() => command,
        _ => command_from_path(parts.path)?,
    };

    let message_id = match fields.remove("messageId") {
        Some(Json::String(id)) if !id.is_empty() => MessageId::from(id),
        Some(Json::Number(id)) => MessageId::from(id.to_string()),
        _ => MessageId::random(),
    };

    let command_id = match fields.remove("commandId") {
        Some(Json::Number(id)) => id.as_u64(),
        Some(Json::String(id)) => id.parse().ok(),
        _ => None,
    };

    let send_time = fields
        .remove("sendTime")
        .and_then(|json| Value::from_json(json).ok())
        .and_then(|value| value.as_date().copied())
        .unwrap_or_else(Utc::now);

    let args = match fields.remove("args") {
        Some(Json::Array(items)) => revive_all(items)?,
        Some(other) => vec![revive(other)?],
        None if fields.is_empty() => Vec::new(),
        None => vec![revive(Json::Object(fields))?],
    };

    Ok(RequestPayload {
        command,
        command_id,
        message_id,
        send_time,
        args,
    })
}

fn parse_body(content_type: Option<&str>, body: &[u8]) -> Result<JsonMap<String, Json>> {
    let is_form = content_type.is_some_and(|value| value.starts_with(FORM_CONTENT_TYPE));

    if is_form {
        return Ok(form_urlencoded::parse(body)
            .map(|(key, value)| (key.into_owned(), Json::String(value.into_owned())))
            .collect());
    }

    if body.iter().all(u8::is_ascii_whitespace) {
        return Ok(JsonMap::new());
    }

    match serde_json::from_slice::<Json>(body)? {
        Json::Object(map) => Ok(map),
        _ => Err(Error::protocol("HTTP body must be a JSON object")),
    }
}

fn command_from_path(path: &str) -> Result<String> {
    let decoded = urlencoding::decode(path)
        .map_err(|e| Error::protocol(format!("invalid URL path: {e}")))?;
    let command = decoded.trim_matches('/').replace('/', ".");

    if command.is_empty() {
        return Err(Error::protocol("no command in body or URL path"));
    }
    Ok(command)
}

fn revive(json: Json) -> Result<Value> {
    Value::from_json(json).map_err(Error::protocol)
}

fn revive_all(items: Vec<Json>) -> Result<Vec<Value>> {
    items.into_iter().map(revive).collect()
}

// ============================================================================
// Tests
// ============================================================================
