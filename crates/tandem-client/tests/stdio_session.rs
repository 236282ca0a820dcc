//! Full-session integration tests over stdio against bash-scripted servers.
//!
//! Tests return early when bash is unavailable on the host.

use std::collections::HashMap;

use tandem_client::{Client, ServerConfig, ToolContent};
use tandem_types::Error;

fn bash_config(script: &str, timeout_ms: u64) -> ServerConfig {
    ServerConfig {
        command: Some("bash".to_string()),
        args: vec!["-c".to_string(), script.to_string()],
        env: HashMap::new(),
        timeout_ms,
        ..ServerConfig::default()
    }
}

/// A minimal adding server: initialize, tools/list, tools/call.
const ADD_SERVER: &str = r#"
while IFS= read -r line; do
  id=$(printf '%s' "$line" | sed -n 's/.*"id":\([0-9]*\).*/\1/p')
  case "$line" in
    *'"method":"initialize"'*)
      printf '{"jsonrpc":"2.0","id":%s,"result":{"protocolVersion":"2025-03-26","capabilities":{"tools":{}},"serverInfo":{"name":"adder","version":"0.1.0"}}}\n' "$id"
      ;;
    *'"method":"tools/list"'*)
      printf '{"jsonrpc":"2.0","id":%s,"result":{"tools":[{"name":"add","description":"Add two numbers","inputSchema":{"type":"object","properties":{"a":{"type":"number"},"b":{"type":"number"}}}}]}}\n' "$id"
      ;;
    *'"method":"tools/call"'*)
      printf '{"jsonrpc":"2.0","id":%s,"result":{"content":[{"type":"text","text":"8"}],"isError":false}}\n' "$id"
      ;;
    *) ;;
  esac
done
"#;

/// Answers initialize with a version this client does not speak.
const WRONG_VERSION_SERVER: &str = r#"
while IFS= read -r line; do
  id=$(printf '%s' "$line" | sed -n 's/.*"id":\([0-9]*\).*/\1/p')
  [ -n "$id" ] && printf '{"jsonrpc":"2.0","id":%s,"result":{"protocolVersion":"1999-01-01","capabilities":{}}}\n' "$id"
done
"#;

#[tokio::test]
async fn initialize_then_call_add_tool() {
    let config = bash_config(ADD_SERVER, 5_000);
    let client = match Client::connect("adder", &config).await {
        Ok(client) => client,
        Err(Error::Spawn { .. }) => return,
        Err(other) => panic!("connect failed: {other}"),
    };

    assert_eq!(client.protocol_version(), "2025-03-26");
    assert!(client.capabilities().supports_tools());
    assert!(!client.capabilities().supports_completions());
    assert_eq!(client.server_info().unwrap().name, "adder");

    let tools = client.list_tools().await.unwrap();
    assert_eq!(tools.len(), 1);
    assert_eq!(tools[0].name, "add");

    let result = client
        .call_tool("add", serde_json::json!({"a": 5, "b": 3}))
        .await
        .unwrap();
    assert!(!result.is_error);
    match &result.content[0] {
        ToolContent::Text { text } => assert_eq!(text, "8"),
        other => panic!("expected text content, got {other:?}"),
    }

    client.close().await.unwrap();
}

#[tokio::test]
async fn unsupported_protocol_version_fails_connect() {
    let config = bash_config(WRONG_VERSION_SERVER, 5_000);
    match Client::connect("wrong", &config).await {
        Err(Error::InvalidProtocolVersion { version }) => {
            assert_eq!(version, "1999-01-01");
        }
        Err(Error::Spawn { .. }) => {}
        other => panic!("expected InvalidProtocolVersion, got {other:?}"),
    }
}

#[tokio::test]
async fn capability_gated_methods_fail_locally() {
    // The add server advertises tools only; completion and subscribe must
    // fail before any bytes hit the wire.
    let config = bash_config(ADD_SERVER, 5_000);
    let client = match Client::connect("adder", &config).await {
        Ok(client) => client,
        Err(Error::Spawn { .. }) => return,
        Err(other) => panic!("connect failed: {other}"),
    };

    let err = client
        .complete(
            serde_json::json!({"type": "ref/prompt", "name": "p"}),
            "arg",
            "val",
        )
        .await
        .unwrap_err();
    assert!(matches!(err, Error::CompletionNotAvailable));

    let err = client.subscribe_resource("file:///x").await.unwrap_err();
    assert!(matches!(err, Error::CapabilityNotSupported { .. }));

    client.close().await.unwrap();
}

#[tokio::test]
async fn missing_command_is_a_config_error() {
    let config = ServerConfig::default();
    let err = Client::connect("nameless", &config).await.unwrap_err();
    assert!(matches!(err, Error::Transport { .. }));
}

#[tokio::test]
async fn unknown_transport_is_rejected_at_construction() {
    let config = ServerConfig {
        transport: "websocket".to_string(),
        ..ServerConfig::default()
    };
    let err = Client::connect("ws", &config).await.unwrap_err();
    match err {
        Error::InvalidTransportType { value } => assert_eq!(value, "websocket"),
        other => panic!("expected InvalidTransportType, got {other:?}"),
    }
}
