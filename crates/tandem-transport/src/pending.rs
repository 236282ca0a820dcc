//! Request-id allocation and the pending-request table.
//!
//! Every in-flight request parks on a one-shot rendezvous keyed by the
//! canonical string form of its id. The entry is inserted before the
//! outbound write and removed by exactly one of: response arrival, timeout,
//! or transport teardown.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use tandem_types::{Error, Message};
use tokio::sync::{Mutex, oneshot};

/// Monotonic request-id allocator. Ids are never reused within a session.
#[derive(Debug, Default)]
pub struct IdAllocator {
    next: AtomicU64,
}

impl IdAllocator {
    pub fn new() -> Self {
        Self {
            next: AtomicU64::new(1),
        }
    }

    pub fn allocate(&self) -> u64 {
        self.next.fetch_add(1, Ordering::SeqCst)
    }
}

/// Mapping from request-id string to the rendezvous its caller parks on.
#[derive(Debug, Default)]
pub struct PendingTable {
    entries: Mutex<HashMap<String, oneshot::Sender<Message>>>,
}

impl PendingTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a rendezvous for `key` and return the receiving half.
    ///
    /// At most one entry per id exists at any time; registering an id twice
    /// replaces the earlier entry (its caller observes a closed channel).
    pub async fn register(&self, key: &str) -> oneshot::Receiver<Message> {
        let (tx, rx) = oneshot::channel();
        self.entries.lock().await.insert(key.to_string(), tx);
        rx
    }

    /// Hand `message` to the caller parked under `key`. When no entry
    /// exists (timed out or never registered) nothing happens and this
    /// returns `false`.
    pub async fn complete(&self, key: &str, message: Message) -> bool {
        match self.entries.lock().await.remove(key) {
            Some(tx) => tx.send(message).is_ok(),
            None => false,
        }
    }

    /// Drop the entry for `key`, if any.
    pub async fn remove(&self, key: &str) {
        self.entries.lock().await.remove(key);
    }

    /// Drop every entry. Parked callers observe a closed channel and error
    /// out instead of waiting for their full timeout.
    pub async fn fail_all(&self) {
        self.entries.lock().await.clear();
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.lock().await.is_empty()
    }

    pub async fn contains(&self, key: &str) -> bool {
        self.entries.lock().await.contains_key(key)
    }

    /// Park on `rx` for up to `timeout_ms`. On expiry the entry is removed
    /// and the caller gets [`Error::Timeout`]; a dropped sender (transport
    /// teardown or child restart) surfaces as a transport error.
    pub async fn wait(
        &self,
        key: &str,
        rx: oneshot::Receiver<Message>,
        timeout_ms: u64,
    ) -> Result<Message, Error> {
        match tokio::time::timeout(Duration::from_millis(timeout_ms), rx).await {
            Ok(Ok(message)) => Ok(message),
            Ok(Err(_)) => {
                self.remove(key).await;
                Err(Error::transport("transport closed while awaiting response"))
            }
            Err(_) => {
                self.remove(key).await;
                Err(Error::Timeout {
                    request_id: Some(key.to_string()),
                    timeout_ms,
                })
            }
        }
    }
}
