//! Streamable HTTP transport.
//!
//! A single URL serves POST (outbound messages), GET (an optional standalone
//! SSE stream for server-initiated traffic), and DELETE (session
//! termination). The server may answer a POST inline with JSON, or defer the
//! response onto an SSE stream; both paths land in the same pending table.
//! Session identity rides the `mcp-session-id` header, and the last observed
//! SSE event id is echoed back as `Last-Event-ID` so the server can replay
//! missed events after a reconnect.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use futures_util::StreamExt;
use reqwest::Url;
use reqwest::header::{ACCEPT, CONTENT_TYPE, HeaderMap, HeaderValue};
use tandem_types::{
    Error, JsonRpcNotification, JsonRpcRequest, JsonRpcResponse, Message, PROTOCOL_VERSION,
};
use tokio::sync::{Mutex, RwLock, mpsc};
use tokio::task::JoinHandle;
use uuid::Uuid;

use crate::event::SseParser;
use crate::http::{HttpOptions, build_client, header_map};
use crate::pending::{IdAllocator, PendingTable};
use crate::reconnect::ReconnectOptions;
use crate::route_message;

#[derive(Debug)]
pub struct StreamableTransport {
    inner: Arc<Inner>,
}

#[derive(Debug)]
struct Inner {
    http: reqwest::Client,
    url: Url,
    user_headers: HeaderMap,
    client_id: String,
    timeout_ms: u64,
    reconnect: ReconnectOptions,
    ids: IdAllocator,
    pending: PendingTable,
    incoming: mpsc::Sender<Message>,
    session_id: RwLock<Option<String>>,
    protocol_version: RwLock<String>,
    last_event_id: RwLock<Option<String>>,
    running: AtomicBool,
    abort: AtomicBool,
    /// Guards the standalone GET stream so only one is open at a time.
    stream_active: AtomicBool,
    /// Reader tasks spawned during the session; aborted on close.
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl StreamableTransport {
    pub fn connect(
        options: HttpOptions,
        reconnect: ReconnectOptions,
        incoming: mpsc::Sender<Message>,
    ) -> Result<Self, Error> {
        let url = Url::parse(&options.url)
            .map_err(|e| Error::transport(format!("invalid URL '{}': {e}", options.url)))?;
        let user_headers = header_map(&options.headers)?;
        let http = build_client(options.http_version)?;

        Ok(Self {
            inner: Arc::new(Inner {
                http,
                url,
                user_headers,
                client_id: Uuid::new_v4().to_string(),
                timeout_ms: options.timeout_ms,
                reconnect,
                ids: IdAllocator::new(),
                pending: PendingTable::new(),
                incoming,
                session_id: RwLock::new(None),
                protocol_version: RwLock::new(PROTOCOL_VERSION.to_string()),
                last_event_id: RwLock::new(None),
                running: AtomicBool::new(true),
                abort: AtomicBool::new(false),
                stream_active: AtomicBool::new(false),
                tasks: Mutex::new(Vec::new()),
            }),
        })
    }

    pub async fn request(
        &self,
        method: &str,
        params: Option<serde_json::Value>,
    ) -> Result<Message, Error> {
        let inner = &self.inner;
        let id = inner.ids.allocate();
        let key = id.to_string();
        let envelope = JsonRpcRequest::new(id, method, params);
        let body = serde_json::to_string(&envelope)?;

        let rx = inner.pending.register(&key).await;
        match post_message(inner, body, method == "initialize").await {
            // Inline JSON response from the POST itself.
            Ok(Some(message)) => {
                inner.pending.remove(&key).await;
                Ok(message)
            }
            // Response will arrive over an SSE stream.
            Ok(None) => inner.pending.wait(&key, rx, inner.timeout_ms).await,
            Err(e) => {
                inner.pending.remove(&key).await;
                Err(e)
            }
        }
    }

    pub async fn notify(
        &self,
        method: &str,
        params: Option<serde_json::Value>,
    ) -> Result<(), Error> {
        let envelope = JsonRpcNotification::new(method, params);
        let body = serde_json::to_string(&envelope)?;
        post_message(&self.inner, body, false).await.map(|_| ())
    }

    pub async fn respond(&self, response: JsonRpcResponse) -> Result<(), Error> {
        let body = serde_json::to_string(&response)?;
        post_message(&self.inner, body, false).await.map(|_| ())
    }

    pub fn is_alive(&self) -> bool {
        self.inner.running.load(Ordering::Acquire)
    }

    pub async fn set_protocol_version(&self, version: &str) {
        *self.inner.protocol_version.write().await = version.to_string();
    }

    pub async fn session_id(&self) -> Option<String> {
        self.inner.session_id.read().await.clone()
    }

    /// Terminate the session (DELETE) and tear down every reader task. The
    /// stored session id is cleared whether or not the DELETE succeeds.
    pub async fn close(&self) -> Result<(), Error> {
        let inner = &self.inner;
        inner.running.store(false, Ordering::Release);
        inner.abort.store(true, Ordering::Release);
        inner.pending.fail_all().await;
        for handle in inner.tasks.lock().await.drain(..) {
            handle.abort();
        }

        let result = inner.terminate_session().await;
        *inner.session_id.write().await = None;
        result
    }
}

impl Inner {
    fn is_live(&self) -> bool {
        self.running.load(Ordering::Acquire) && !self.abort.load(Ordering::Acquire)
    }

    async fn request_headers(&self, accept: &'static str) -> HeaderMap {
        let mut headers = self.user_headers.clone();
        headers.insert(ACCEPT, HeaderValue::from_static(accept));
        if let Ok(value) = HeaderValue::from_str(&self.protocol_version.read().await) {
            headers.insert("MCP-Protocol-Version", value);
        }
        if let Ok(value) = HeaderValue::from_str(&self.client_id) {
            headers.insert("X-CLIENT-ID", value);
        }
        if let Some(session) = self.session_id.read().await.as_deref()
            && let Ok(value) = HeaderValue::from_str(session)
        {
            headers.insert("mcp-session-id", value);
        }
        headers
    }

    /// Record the `mcp-session-id` response header, if present.
    async fn capture_session(&self, response: &reqwest::Response) -> Option<String> {
        let session = response
            .headers()
            .get("mcp-session-id")
            .and_then(|v| v.to_str().ok())
            .map(str::to_string)?;
        *self.session_id.write().await = Some(session.clone());
        Some(session)
    }

    async fn send_get(&self) -> Result<reqwest::Response, Error> {
        let mut request = self
            .http
            .get(self.url.clone())
            .headers(self.request_headers("text/event-stream").await);
        if let Some(replay) = self.last_event_id.read().await.as_deref() {
            request = request.header("Last-Event-ID", replay);
        }
        request
            .send()
            .await
            .map_err(|e| Error::transport(format!("Failed to open SSE stream: {e}")))
    }

    /// Consume one SSE response body, routing every decoded message.
    /// Returns `true` if at least one message was delivered.
    async fn read_stream(&self, response: reqwest::Response) -> bool {
        let mut delivered = false;
        let mut stream = response.bytes_stream();
        let mut parser = SseParser::new();

        while let Some(chunk) = stream.next().await {
            if !self.is_live() {
                break;
            }
            match chunk {
                Ok(bytes) => {
                    let text = String::from_utf8_lossy(&bytes);
                    for frame in parser.feed(&text) {
                        if let Some(id) = &frame.id {
                            *self.last_event_id.write().await = Some(id.clone());
                        }
                        let Some(data) = frame.data.as_deref() else {
                            continue;
                        };
                        match Message::from_str(data) {
                            Ok(message) => {
                                delivered = true;
                                let message = match self.session_id.read().await.clone() {
                                    Some(session) => message.with_session_id(session),
                                    None => message,
                                };
                                route_message(&self.pending, &self.incoming, message).await;
                            }
                            Err(e) => tracing::debug!("dropping unparseable event frame: {e}"),
                        }
                    }
                }
                Err(e) => {
                    tracing::warn!("event stream read failed: {e}");
                    break;
                }
            }
        }
        delivered
    }

    async fn terminate_session(&self) -> Result<(), Error> {
        if self.session_id.read().await.is_none() {
            return Ok(());
        }

        let response = self
            .http
            .delete(self.url.clone())
            .headers(self.request_headers("application/json").await)
            .send()
            .await;

        match response {
            Ok(r) => match r.status().as_u16() {
                200 | 405 => Ok(()),
                s => Err(Error::transport(format!(
                    "Failed to terminate session: {s}"
                ))),
            },
            Err(e) => {
                tracing::debug!("session DELETE failed: {e}");
                Err(Error::transport("Failed to terminate session"))
            }
        }
    }
}

/// POST one envelope and classify the response per the status and
/// content-type rules. `Ok(Some)` is an inline JSON-RPC message; `Ok(None)`
/// means the reply (if any) arrives via an SSE stream.
async fn post_message(
    inner: &Arc<Inner>,
    body: String,
    is_initialize: bool,
) -> Result<Option<Message>, Error> {
    let response = inner
        .http
        .post(inner.url.clone())
        .headers(
            inner
                .request_headers("application/json, text/event-stream")
                .await,
        )
        .header(CONTENT_TYPE, "application/json")
        .body(body)
        .send()
        .await
        .map_err(|e| Error::transport(format!("HTTP request failed: {e}")))?;

    let status = response.status().as_u16();
    match status {
        200 => {
            let content_type = response
                .headers()
                .get(CONTENT_TYPE)
                .and_then(|v| v.to_str().ok())
                .unwrap_or("")
                .to_string();

            if content_type.starts_with("application/json") {
                let session = inner.capture_session(&response).await;
                let value: serde_json::Value = response
                    .json()
                    .await
                    .map_err(|e| Error::transport(format!("invalid JSON response: {e}")))?;
                let mut message = Message::from_value(value)?;
                if let Some(session) = session {
                    message = message.with_session_id(session);
                }
                Ok(Some(message))
            } else if content_type.starts_with("text/event-stream") {
                inner.capture_session(&response).await;
                join_event_stream(inner, response).await;
                Ok(None)
            } else {
                Err(Error::transport("Unexpected content type"))
            }
        }
        202 => {
            inner.capture_session(&response).await;
            if is_initialize {
                open_event_stream(inner).await?;
            }
            Ok(None)
        }
        401 => {
            tracing::warn!("server returned 401; authentication policy is left to the caller");
            Ok(None)
        }
        404 => Err(Error::SessionExpired {
            message: "server returned 404 for the current session".to_string(),
        }),
        405 => Ok(None),
        400 => {
            let body_text = response.text().await.unwrap_or_default();
            if body_text.contains("Session") {
                let session = inner.session_id.read().await.clone().unwrap_or_default();
                Err(Error::Transport {
                    message: format!("HTTP client error: 400 (session {session})"),
                    code: Some(400),
                })
            } else {
                Err(Error::Transport {
                    message: "HTTP client error: 400".to_string(),
                    code: Some(400),
                })
            }
        }
        s => Err(Error::Transport {
            message: format!("HTTP request failed: {s}"),
            code: Some(s as i64),
        }),
    }
}

/// Open the standalone GET stream for server-initiated messages. A 405 means
/// the server does not offer one; that is not an error.
async fn open_event_stream(inner: &Arc<Inner>) -> Result<(), Error> {
    if inner.stream_active.swap(true, Ordering::SeqCst) {
        return Ok(());
    }

    let response = match inner.send_get().await {
        Ok(response) => response,
        Err(e) => {
            inner.stream_active.store(false, Ordering::Release);
            return Err(e);
        }
    };

    match response.status().as_u16() {
        200 => {
            let handle = tokio::spawn(event_stream_loop(Arc::clone(inner), response));
            inner.tasks.lock().await.push(handle);
            Ok(())
        }
        405 => {
            inner.stream_active.store(false, Ordering::Release);
            tracing::debug!("server does not offer a standalone event stream");
            Ok(())
        }
        s => {
            inner.stream_active.store(false, Ordering::Release);
            Err(Error::transport(format!("Failed to open SSE stream: {s}")))
        }
    }
}

/// Start (or join) the persistent event stream with a `text/event-stream`
/// POST reply as its feed.
///
/// When no supervisor is running, this body seeds [`event_stream_loop`], so
/// a drop mid-stream recovers through the same backoff + `Last-Event-ID`
/// reconnect as the GET-opened stream. When a supervisor is already active
/// it keeps ownership of reconnection; this body is read alongside it, and
/// replay on the supervised stream covers anything the body misses.
async fn join_event_stream(inner: &Arc<Inner>, response: reqwest::Response) {
    let handle = if inner.stream_active.swap(true, Ordering::SeqCst) {
        let reader = Arc::clone(inner);
        tokio::spawn(async move {
            reader.read_stream(response).await;
        })
    } else {
        tokio::spawn(event_stream_loop(Arc::clone(inner), response))
    };
    inner.tasks.lock().await.push(handle);
}

/// Persistent event stream supervisor. `first` is whichever feed opened the
/// stream (the standalone GET body or an event-stream POST reply); when a
/// feed ends or fails, the supervisor reconnects via GET with exponential
/// backoff and `Last-Event-ID` replay until retries are exhausted or the
/// transport stops.
async fn event_stream_loop(inner: Arc<Inner>, first: reqwest::Response) {
    let mut attempt: u32 = 0;
    let mut response = Some(first);

    loop {
        if !inner.is_live() {
            break;
        }

        let current = match response.take() {
            Some(r) => r,
            None => {
                if attempt >= inner.reconnect.max_retries {
                    tracing::warn!("giving up on event stream after {attempt} attempts");
                    break;
                }
                let delay = inner.reconnect.delay(attempt);
                attempt += 1;
                tokio::time::sleep(Duration::from_millis(delay)).await;
                if !inner.is_live() {
                    break;
                }
                match inner.send_get().await {
                    Ok(r) if r.status().as_u16() == 200 => r,
                    Ok(r) if r.status().as_u16() == 405 => {
                        tracing::debug!("server stopped offering the event stream");
                        break;
                    }
                    Ok(r) => {
                        tracing::warn!("Failed to open SSE stream: {}", r.status().as_u16());
                        continue;
                    }
                    Err(e) => {
                        tracing::warn!("event stream reconnect failed: {e}");
                        continue;
                    }
                }
            }
        };

        if inner.read_stream(current).await {
            attempt = 0;
        }
    }

    inner.stream_active.store(false, Ordering::Release);
}
