//! Stdio transport integration tests against bash-scripted servers.
//!
//! Each test spawns a one-liner that speaks newline-delimited JSON-RPC on
//! stdout. Tests return early when bash is unavailable on the host.

use std::collections::HashMap;
use std::sync::Arc;

use tandem_transport::StdioTransport;
use tandem_types::Message;
use tokio::sync::mpsc;

fn spawn_bash(script: &str, timeout_ms: u64) -> Option<(StdioTransport, mpsc::Receiver<Message>)> {
    let (tx, rx) = mpsc::channel(16);
    StdioTransport::spawn(
        "bash",
        &["-c".to_string(), script.to_string()],
        &HashMap::new(),
        timeout_ms,
        tx,
    )
    .ok()
    .map(|t| (t, rx))
}

/// Echo server: answers every request with `{"echo": <id>}` as the result.
const ECHO_SERVER: &str = r#"
while IFS= read -r line; do
  id=$(printf '%s' "$line" | sed -n 's/.*"id":\([0-9]*\).*/\1/p')
  [ -n "$id" ] && printf '{"jsonrpc":"2.0","id":%s,"result":{"echo":%s}}\n' "$id" "$id"
done
"#;

/// Buffers three requests, then answers them out of order (3rd, 1st, 2nd).
const OUT_OF_ORDER_SERVER: &str = r#"
IFS= read -r l1; IFS= read -r l2; IFS= read -r l3
id1=$(printf '%s' "$l1" | sed -n 's/.*"id":\([0-9]*\).*/\1/p')
id2=$(printf '%s' "$l2" | sed -n 's/.*"id":\([0-9]*\).*/\1/p')
id3=$(printf '%s' "$l3" | sed -n 's/.*"id":\([0-9]*\).*/\1/p')
for id in "$id3" "$id1" "$id2"; do
  printf '{"jsonrpc":"2.0","id":%s,"result":{"echo":%s}}\n' "$id" "$id"
done
sleep 2
"#;

#[tokio::test]
async fn sequential_requests_correlate() {
    let Some((transport, _rx)) = spawn_bash(ECHO_SERVER, 5_000) else {
        return;
    };

    for _ in 0..3 {
        let msg = transport.request("tools/list", None).await.unwrap();
        let id = msg.id.as_ref().unwrap().canonical();
        assert!(msg.matches_id(&id));
        assert_eq!(msg.result.unwrap()["echo"].to_string(), id);
    }

    transport.close().await.unwrap();
}

#[tokio::test]
async fn concurrent_requests_with_interleaved_responses() {
    let Some((transport, _rx)) = spawn_bash(OUT_OF_ORDER_SERVER, 5_000) else {
        return;
    };
    let transport = Arc::new(transport);

    let mut tasks = Vec::new();
    for _ in 0..3 {
        let transport = Arc::clone(&transport);
        tasks.push(tokio::spawn(async move {
            transport
                .request("tools/call", Some(serde_json::json!({"name": "add"})))
                .await
        }));
    }

    for task in tasks {
        let msg = task.await.unwrap().unwrap();
        // Every caller got the response carrying its own id.
        let id = msg.id.as_ref().unwrap().canonical();
        assert_eq!(msg.result.unwrap()["echo"].to_string(), id);
    }

    transport.close().await.unwrap();
}

#[tokio::test]
async fn ids_are_strictly_increasing_across_requests() {
    let Some((transport, _rx)) = spawn_bash(ECHO_SERVER, 5_000) else {
        return;
    };

    let mut previous = 0i64;
    for _ in 0..5 {
        let msg = transport.request("ping", None).await.unwrap();
        let id: i64 = msg.id.as_ref().unwrap().canonical().parse().unwrap();
        assert!(id > previous, "id {id} not greater than {previous}");
        previous = id;
    }

    transport.close().await.unwrap();
}

#[tokio::test]
async fn server_request_is_forwarded_not_parked() {
    // The server initiates a ping request of its own; it must surface on the
    // incoming channel rather than complete any pending entry.
    let script = r#"printf '{"jsonrpc":"2.0","id":"srv-1","method":"ping"}\n'; sleep 2"#;
    let Some((transport, mut rx)) = spawn_bash(script, 5_000) else {
        return;
    };

    let msg = tokio::time::timeout(std::time::Duration::from_secs(2), rx.recv())
        .await
        .expect("server ping should arrive")
        .expect("channel open");
    assert!(msg.is_request());
    assert!(msg.is_ping());
    assert!(msg.matches_id("srv-1"));

    transport.close().await.unwrap();
}
