//! Dispatch of server-initiated traffic.
//!
//! The transports forward every notification and server request onto one
//! channel; a single task drains it, so handlers observe messages in wire
//! order. Handlers must stay fast; a slow handler serializes everything
//! behind it.

use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;

use tandem_transport::Transport;
use tandem_types::{Error, JsonRpcResponse, Message, RpcError};
use tokio::sync::{RwLock, mpsc};
use tokio::task::JoinHandle;

/// Callback for a server notification. Receives the notification params.
pub type NotificationHandler = Box<dyn Fn(serde_json::Value) + Send + Sync>;

/// Callback for a server-initiated request. The returned value becomes the
/// JSON-RPC result; an error becomes an error envelope.
pub type RequestHandler =
    Box<dyn Fn(serde_json::Value) -> Result<serde_json::Value, Error> + Send + Sync>;

/// Registered callbacks for everything a server can initiate.
#[derive(Default)]
pub struct HandlerSet {
    pub tools_list_changed: Option<NotificationHandler>,
    pub resources_list_changed: Option<NotificationHandler>,
    pub resources_updated: Option<NotificationHandler>,
    pub prompts_list_changed: Option<NotificationHandler>,
    pub log_message: Option<NotificationHandler>,
    pub progress: Option<NotificationHandler>,
    pub cancelled: Option<NotificationHandler>,
    pub sampling: Option<RequestHandler>,
    pub roots: Option<RequestHandler>,
}

impl std::fmt::Debug for HandlerSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HandlerSet")
            .field("tools_list_changed", &self.tools_list_changed.is_some())
            .field(
                "resources_list_changed",
                &self.resources_list_changed.is_some(),
            )
            .field("resources_updated", &self.resources_updated.is_some())
            .field(
                "prompts_list_changed",
                &self.prompts_list_changed.is_some(),
            )
            .field("log_message", &self.log_message.is_some())
            .field("progress", &self.progress.is_some())
            .field("cancelled", &self.cancelled.is_some())
            .field("sampling", &self.sampling.is_some())
            .field("roots", &self.roots.is_some())
            .finish()
    }
}

pub(crate) fn spawn_dispatcher(
    transport: Arc<Transport>,
    handlers: Arc<RwLock<HandlerSet>>,
    mut incoming: mpsc::Receiver<Message>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(message) = incoming.recv().await {
            if message.is_request() {
                handle_request(&transport, &handlers, message).await;
            } else if message.is_notification() {
                handle_notification(&handlers, message).await;
            }
        }
    })
}

async fn handle_notification(handlers: &RwLock<HandlerSet>, message: Message) {
    let method = message.method.unwrap_or_default();
    let params = message.params.unwrap_or(serde_json::Value::Null);

    let set = handlers.read().await;
    let handler = match method.as_str() {
        "notifications/tools/list_changed" => set.tools_list_changed.as_ref(),
        "notifications/resources/list_changed" => set.resources_list_changed.as_ref(),
        "notifications/resources/updated" => set.resources_updated.as_ref(),
        "notifications/prompts/list_changed" => set.prompts_list_changed.as_ref(),
        "notifications/message" => set.log_message.as_ref(),
        "notifications/progress" => set.progress.as_ref(),
        "notifications/cancelled" => set.cancelled.as_ref(),
        other => {
            tracing::debug!("unhandled notification '{other}'");
            return;
        }
    };

    match handler {
        Some(callback) => {
            // One bad notification never stops the next.
            if catch_unwind(AssertUnwindSafe(|| callback(params))).is_err() {
                tracing::error!("handler for '{method}' panicked");
            }
        }
        None => tracing::debug!("no handler registered for '{method}'"),
    }
}

async fn handle_request(
    transport: &Transport,
    handlers: &RwLock<HandlerSet>,
    message: Message,
) {
    let Some(id) = message.id else { return };
    let method = message.method.unwrap_or_default();

    if method == "ping" {
        let reply = JsonRpcResponse::success(id, serde_json::json!({}));
        if let Err(e) = transport.respond(reply).await {
            tracing::warn!("failed to answer ping: {e}");
        }
        return;
    }

    let params = message.params.unwrap_or(serde_json::Value::Null);
    let response = {
        let set = handlers.read().await;
        let handler = match method.as_str() {
            "sampling/createMessage" => set.sampling.as_ref(),
            "roots/list" => set.roots.as_ref(),
            other => {
                let err = Error::UnknownRequest {
                    method: other.to_string(),
                };
                tracing::warn!("{err}");
                None
            }
        };

        match handler {
            Some(callback) => match catch_unwind(AssertUnwindSafe(|| callback(params))) {
                Ok(Ok(result)) => JsonRpcResponse::success(id, result),
                Ok(Err(e)) => JsonRpcResponse::failure(
                    id,
                    RpcError {
                        code: -32603,
                        message: e.to_string(),
                        data: None,
                    },
                ),
                Err(_) => {
                    tracing::error!("handler for '{method}' panicked");
                    JsonRpcResponse::failure(
                        id,
                        RpcError {
                            code: -32603,
                            message: "internal handler failure".to_string(),
                            data: None,
                        },
                    )
                }
            },
            None => JsonRpcResponse::failure(id, RpcError::method_not_found(&method)),
        }
    };

    if let Err(e) = transport.respond(response).await {
        tracing::warn!("failed to answer server request '{method}': {e}");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tandem_transport::StdioTransport;

    async fn cat_transport(incoming: mpsc::Sender<Message>) -> Arc<Transport> {
        Arc::new(Transport::Stdio(
            StdioTransport::spawn("cat", &[], &HashMap::new(), 5_000, incoming).unwrap(),
        ))
    }

    #[tokio::test]
    async fn notification_reaches_its_handler() {
        let (tx, rx) = mpsc::channel(16);
        let transport = cat_transport(tx.clone()).await;

        let count = Arc::new(AtomicUsize::new(0));
        let mut set = HandlerSet::default();
        let seen = Arc::clone(&count);
        set.tools_list_changed = Some(Box::new(move |_| {
            seen.fetch_add(1, Ordering::SeqCst);
        }));
        let handlers = Arc::new(RwLock::new(set));

        let dispatcher = spawn_dispatcher(Arc::clone(&transport), handlers, rx);

        let msg =
            Message::from_str(r#"{"jsonrpc":"2.0","method":"notifications/tools/list_changed"}"#)
                .unwrap();
        tx.send(msg).await.unwrap();
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        assert_eq!(count.load(Ordering::SeqCst), 1);

        dispatcher.abort();
        transport.close().await.unwrap();
    }

    #[tokio::test]
    async fn panicking_handler_does_not_kill_the_dispatcher() {
        let (tx, rx) = mpsc::channel(16);
        let transport = cat_transport(tx.clone()).await;

        let count = Arc::new(AtomicUsize::new(0));
        let mut set = HandlerSet::default();
        set.progress = Some(Box::new(|_| panic!("boom")));
        let seen = Arc::clone(&count);
        set.cancelled = Some(Box::new(move |_| {
            seen.fetch_add(1, Ordering::SeqCst);
        }));
        let handlers = Arc::new(RwLock::new(set));

        let dispatcher = spawn_dispatcher(Arc::clone(&transport), handlers, rx);

        for method in ["notifications/progress", "notifications/cancelled"] {
            let msg = Message::from_str(&format!(
                r#"{{"jsonrpc":"2.0","method":"{method}","params":{{}}}}"#
            ))
            .unwrap();
            tx.send(msg).await.unwrap();
        }
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        assert_eq!(count.load(Ordering::SeqCst), 1);

        dispatcher.abort();
        transport.close().await.unwrap();
    }

    #[tokio::test]
    async fn unregistered_notification_is_ignored() {
        let (tx, rx) = mpsc::channel(16);
        let transport = cat_transport(tx.clone()).await;
        let handlers = Arc::new(RwLock::new(HandlerSet::default()));
        let dispatcher = spawn_dispatcher(Arc::clone(&transport), handlers, rx);

        let msg = Message::from_str(r#"{"jsonrpc":"2.0","method":"notifications/message"}"#)
            .unwrap();
        tx.send(msg).await.unwrap();
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;

        dispatcher.abort();
        transport.close().await.unwrap();
    }
}
