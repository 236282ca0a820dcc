//! Legacy HTTP+SSE transport.
//!
//! Two endpoints: a streaming GET (the event URL) that carries every
//! server-to-client message, and a messages URL that requests are POSTed
//! to. The server announces the messages URL in the first
//! `event: endpoint` frame; responses to POSTs arrive back over the event
//! stream.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use futures_util::StreamExt;
use reqwest::Url;
use reqwest::header::{ACCEPT, CONTENT_TYPE, HeaderMap};
use tandem_types::{Error, JsonRpcNotification, JsonRpcRequest, JsonRpcResponse, Message};
use tokio::sync::{RwLock, mpsc};
use tokio::task::JoinHandle;

use crate::event::SseParser;
use crate::http::{HttpOptions, build_client, header_map};
use crate::pending::{IdAllocator, PendingTable};
use crate::route_message;

/// Pending-table key for the endpoint-discovery handshake.
const ENDPOINT_KEY: &str = "endpoint";

/// Delay before re-entering the listen loop after a stream error.
const RECONNECT_DELAY: Duration = Duration::from_secs(1);

#[derive(Debug)]
pub struct SseTransport {
    ids: IdAllocator,
    pending: Arc<PendingTable>,
    http: reqwest::Client,
    headers: HeaderMap,
    messages_url: Arc<RwLock<Option<Url>>>,
    running: Arc<AtomicBool>,
    listener: JoinHandle<()>,
    timeout_ms: u64,
}

impl SseTransport {
    /// Open the event stream and wait for the server to announce its
    /// messages URL. Blocks up to the configured request timeout.
    pub async fn connect(
        options: HttpOptions,
        incoming: mpsc::Sender<Message>,
    ) -> Result<Self, Error> {
        let event_url = Url::parse(&options.url)
            .map_err(|e| Error::transport(format!("invalid event URL '{}': {e}", options.url)))?;
        let headers = header_map(&options.headers)?;
        let http = build_client(options.http_version)?;

        let pending = Arc::new(PendingTable::new());
        let messages_url = Arc::new(RwLock::new(None));
        let running = Arc::new(AtomicBool::new(true));

        let rx = pending.register(ENDPOINT_KEY).await;

        let listener = tokio::spawn(listen_loop(
            http.clone(),
            event_url.clone(),
            headers.clone(),
            Arc::clone(&pending),
            incoming,
            Arc::clone(&messages_url),
            Arc::clone(&running),
        ));

        let transport = Self {
            ids: IdAllocator::new(),
            pending,
            http,
            headers,
            messages_url,
            running,
            listener,
            timeout_ms: options.timeout_ms,
        };

        if let Err(e) = transport
            .pending
            .wait(ENDPOINT_KEY, rx, transport.timeout_ms)
            .await
        {
            transport.running.store(false, Ordering::Release);
            transport.listener.abort();
            return Err(e);
        }

        Ok(transport)
    }

    pub async fn request(
        &self,
        method: &str,
        params: Option<serde_json::Value>,
    ) -> Result<Message, Error> {
        let id = self.ids.allocate();
        let key = id.to_string();
        let envelope = JsonRpcRequest::new(id, method, params);
        let body = serde_json::to_string(&envelope)?;

        let rx = self.pending.register(&key).await;
        if let Err(e) = self.post(body).await {
            self.pending.remove(&key).await;
            return Err(e);
        }

        self.pending.wait(&key, rx, self.timeout_ms).await
    }

    pub async fn notify(
        &self,
        method: &str,
        params: Option<serde_json::Value>,
    ) -> Result<(), Error> {
        let envelope = JsonRpcNotification::new(method, params);
        self.post(serde_json::to_string(&envelope)?).await
    }

    pub async fn respond(&self, response: JsonRpcResponse) -> Result<(), Error> {
        self.post(serde_json::to_string(&response)?).await
    }

    pub fn is_alive(&self) -> bool {
        self.running.load(Ordering::Acquire) && !self.listener.is_finished()
    }

    /// The messages URL announced by the server's `endpoint` event.
    pub async fn messages_url(&self) -> Option<String> {
        self.messages_url
            .read()
            .await
            .as_ref()
            .map(|u| u.as_str().to_string())
    }

    /// The legacy transport carries no version header; nothing to attach.
    pub fn set_protocol_version(&self, _version: &str) {}

    pub async fn close(&self) -> Result<(), Error> {
        self.running.store(false, Ordering::Release);
        self.listener.abort();
        self.pending.fail_all().await;
        Ok(())
    }

    async fn post(&self, body: String) -> Result<(), Error> {
        let url = self
            .messages_url
            .read()
            .await
            .clone()
            .ok_or_else(|| Error::transport("messages endpoint not yet announced"))?;

        let response = self
            .http
            .post(url)
            .headers(self.headers.clone())
            .header(CONTENT_TYPE, "application/json")
            .body(body)
            .send()
            .await
            .map_err(|e| Error::transport(format!("HTTP request failed: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            return Err(Error::Transport {
                message: format!("HTTP request failed: {}", status.as_u16()),
                code: Some(status.as_u16() as i64),
            });
        }
        Ok(())
    }
}

async fn listen_loop(
    http: reqwest::Client,
    event_url: Url,
    headers: HeaderMap,
    pending: Arc<PendingTable>,
    incoming: mpsc::Sender<Message>,
    messages_url: Arc<RwLock<Option<Url>>>,
    running: Arc<AtomicBool>,
) {
    while running.load(Ordering::Acquire) {
        let request = http
            .get(event_url.clone())
            .headers(headers.clone())
            .header(ACCEPT, "text/event-stream");

        match request.send().await {
            Ok(response) if response.status().is_success() => {
                let mut stream = response.bytes_stream();
                let mut parser = SseParser::new();

                while let Some(chunk) = stream.next().await {
                    if !running.load(Ordering::Acquire) {
                        return;
                    }
                    match chunk {
                        Ok(bytes) => {
                            let text = String::from_utf8_lossy(&bytes);
                            for frame in parser.feed(&text) {
                                handle_frame(
                                    frame,
                                    &event_url,
                                    &pending,
                                    &incoming,
                                    &messages_url,
                                )
                                .await;
                            }
                        }
                        Err(e) => {
                            tracing::warn!("event stream read failed: {e}");
                            break;
                        }
                    }
                }
            }
            Ok(response) => {
                tracing::warn!("event stream request failed: {}", response.status());
            }
            Err(e) => {
                tracing::warn!("event stream connection failed: {e}");
            }
        }

        if !running.load(Ordering::Acquire) {
            return;
        }
        tokio::time::sleep(RECONNECT_DELAY).await;
    }
}

async fn handle_frame(
    frame: crate::event::SseFrame,
    event_url: &Url,
    pending: &PendingTable,
    incoming: &mpsc::Sender<Message>,
    messages_url: &RwLock<Option<Url>>,
) {
    if frame.event.as_deref() == Some("endpoint") {
        let Some(data) = frame.data.as_deref() else {
            tracing::warn!("endpoint frame carried no data");
            return;
        };
        match event_url.join(data) {
            Ok(url) => {
                tracing::debug!("messages endpoint announced: {url}");
                *messages_url.write().await = Some(url);
                pending.complete(ENDPOINT_KEY, Message::default()).await;
            }
            Err(e) => tracing::warn!("invalid messages endpoint '{data}': {e}"),
        }
        return;
    }

    let Some(data) = frame.data.as_deref() else {
        return;
    };
    match Message::from_str(data) {
        Ok(message) => route_message(pending, incoming, message).await,
        // Commonly a partial write from the server; drop the frame.
        Err(e) => tracing::debug!("dropping unparseable event frame: {e}"),
    }
}
