//! Wire transports for tandem.
//!
//! Three substrates carry the same JSON-RPC traffic: a child process speaking
//! newline-delimited JSON over stdio, the legacy HTTP+SSE pair, and
//! Streamable HTTP. [`Transport`] is a tagged variant over the three; every
//! operation dispatches by tag.

pub mod event;
pub mod http;
pub mod pending;
pub mod reconnect;
pub mod sse;
pub mod stdio;
pub mod streamable;

pub use event::{SseFrame, SseParser};
pub use http::{HttpOptions, HttpVersion};
pub use pending::{IdAllocator, PendingTable};
pub use reconnect::ReconnectOptions;
pub use sse::SseTransport;
pub use stdio::StdioTransport;
pub use streamable::StreamableTransport;

use tandem_types::{Error, JsonRpcResponse, Message};
use tokio::sync::mpsc;

/// One connected transport.
#[derive(Debug)]
pub enum Transport {
    Stdio(StdioTransport),
    Sse(SseTransport),
    Streamable(StreamableTransport),
}

impl Transport {
    /// Send a request and wait for its correlated response.
    pub async fn request(
        &self,
        method: &str,
        params: Option<serde_json::Value>,
    ) -> Result<Message, Error> {
        match self {
            Transport::Stdio(t) => t.request(method, params).await,
            Transport::Sse(t) => t.request(method, params).await,
            Transport::Streamable(t) => t.request(method, params).await,
        }
    }

    /// Send a notification (no id, no response).
    pub async fn notify(
        &self,
        method: &str,
        params: Option<serde_json::Value>,
    ) -> Result<(), Error> {
        match self {
            Transport::Stdio(t) => t.notify(method, params).await,
            Transport::Sse(t) => t.notify(method, params).await,
            Transport::Streamable(t) => t.notify(method, params).await,
        }
    }

    /// Answer a server-initiated request; bypasses the pending table.
    pub async fn respond(&self, response: JsonRpcResponse) -> Result<(), Error> {
        match self {
            Transport::Stdio(t) => t.respond(response).await,
            Transport::Sse(t) => t.respond(response).await,
            Transport::Streamable(t) => t.respond(response).await,
        }
    }

    pub fn is_alive(&self) -> bool {
        match self {
            Transport::Stdio(t) => t.is_alive(),
            Transport::Sse(t) => t.is_alive(),
            Transport::Streamable(t) => t.is_alive(),
        }
    }

    /// Record the negotiated protocol version. Only Streamable HTTP attaches
    /// it to the wire.
    pub async fn set_protocol_version(&self, version: &str) {
        match self {
            Transport::Stdio(t) => t.set_protocol_version(version),
            Transport::Sse(t) => t.set_protocol_version(version),
            Transport::Streamable(t) => t.set_protocol_version(version).await,
        }
    }

    pub async fn close(&self) -> Result<(), Error> {
        match self {
            Transport::Stdio(t) => t.close().await,
            Transport::Sse(t) => t.close().await,
            Transport::Streamable(t) => t.close().await,
        }
    }
}

/// Route one incoming message: responses complete their pending rendezvous;
/// notifications and server-initiated requests go to the coordinator's
/// incoming channel; anything else is dropped with a log line.
pub(crate) async fn route_message(
    pending: &PendingTable,
    incoming: &mpsc::Sender<Message>,
    message: Message,
) {
    if message.is_response() {
        if let Some(id) = &message.id {
            let key = id.canonical();
            if !pending.complete(&key, message).await {
                tracing::debug!("response for unknown request id {key}, dropped");
            }
        }
    } else if message.is_notification() || message.is_request() {
        if incoming.send(message).await.is_err() {
            tracing::debug!("incoming channel closed; dropping message");
        }
    } else {
        tracing::debug!("unclassifiable message dropped");
    }
}
