//! JSON-RPC 2.0 envelope types and the parsed message view.
//!
//! Outgoing traffic is built from [`JsonRpcRequest`], [`JsonRpcNotification`],
//! and [`JsonRpcResponse`]. Everything read off the wire is decoded into a
//! [`Message`], which classifies itself as a response, server request,
//! notification, or ping.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::Error;

/// A JSON-RPC request id: the protocol allows both numbers and strings.
///
/// Ids are compared by canonical string form and never rewritten on the wire.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RequestId {
    Number(i64),
    String(String),
}

impl RequestId {
    /// Canonical string form used as the pending-table key.
    pub fn canonical(&self) -> String {
        match self {
            RequestId::Number(n) => n.to_string(),
            RequestId::String(s) => s.clone(),
        }
    }

    /// String-coerced equality: `7` matches `"7"`.
    pub fn matches(&self, other: &RequestId) -> bool {
        self.canonical() == other.canonical()
    }
}

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RequestId::Number(n) => write!(f, "{n}"),
            RequestId::String(s) => f.write_str(s),
        }
    }
}

impl From<u64> for RequestId {
    fn from(n: u64) -> Self {
        RequestId::Number(n as i64)
    }
}

impl From<&str> for RequestId {
    fn from(s: &str) -> Self {
        RequestId::String(s.to_string())
    }
}

/// A JSON-RPC 2.0 request.
#[derive(Debug, Clone, Serialize)]
pub struct JsonRpcRequest {
    pub jsonrpc: &'static str,
    pub id: RequestId,
    pub method: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub params: Option<serde_json::Value>,
}

impl JsonRpcRequest {
    pub fn new(
        id: impl Into<RequestId>,
        method: impl Into<String>,
        params: Option<serde_json::Value>,
    ) -> Self {
        Self {
            jsonrpc: "2.0",
            id: id.into(),
            method: method.into(),
            params,
        }
    }
}

/// A JSON-RPC 2.0 notification (no id, no response expected).
#[derive(Debug, Clone, Serialize)]
pub struct JsonRpcNotification {
    pub jsonrpc: &'static str,
    pub method: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub params: Option<serde_json::Value>,
}

impl JsonRpcNotification {
    pub fn new(method: impl Into<String>, params: Option<serde_json::Value>) -> Self {
        Self {
            jsonrpc: "2.0",
            method: method.into(),
            params,
        }
    }
}

/// An outgoing JSON-RPC 2.0 response, used to answer server-initiated
/// requests (`ping`, `sampling/createMessage`, `roots/list`).
#[derive(Debug, Clone, Serialize)]
pub struct JsonRpcResponse {
    pub jsonrpc: &'static str,
    pub id: RequestId,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<RpcError>,
}

impl JsonRpcResponse {
    pub fn success(id: RequestId, result: serde_json::Value) -> Self {
        Self {
            jsonrpc: "2.0",
            id,
            result: Some(result),
            error: None,
        }
    }

    pub fn failure(id: RequestId, error: RpcError) -> Self {
        Self {
            jsonrpc: "2.0",
            id,
            result: None,
            error: Some(error),
        }
    }
}

/// A JSON-RPC 2.0 error object.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RpcError {
    pub code: i64,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
}

impl RpcError {
    /// The standard `Method not found` error.
    pub fn method_not_found(method: &str) -> Self {
        Self {
            code: -32601,
            message: format!("Method not found: {method}"),
            data: None,
        }
    }
}

/// An immutable parsed view over one decoded JSON-RPC envelope.
///
/// Exactly one of response / request / notification holds after
/// construction (a malformed envelope matches none of them and is dropped
/// by the reader that produced it).
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Message {
    #[serde(default)]
    pub id: Option<RequestId>,
    #[serde(default)]
    pub method: Option<String>,
    #[serde(default)]
    pub params: Option<serde_json::Value>,
    /// `None` when the wire envelope had no `result` key. A key that is
    /// present but `null` (a valid success with no payload) decodes to
    /// `Some(Value::Null)`, so classification tracks key presence.
    #[serde(default, deserialize_with = "value_if_present")]
    pub result: Option<serde_json::Value>,
    #[serde(default)]
    pub error: Option<RpcError>,
    /// Session id observed by the transport that produced this message
    /// (Streamable HTTP only). Never present on the wire envelope itself.
    #[serde(skip)]
    pub session_id: Option<String>,
}

/// Keep a present-but-`null` key distinguishable from an absent one.
fn value_if_present<'de, D>(deserializer: D) -> Result<Option<serde_json::Value>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    serde_json::Value::deserialize(deserializer).map(Some)
}

impl Message {
    /// Decode a message from a JSON value.
    pub fn from_value(value: serde_json::Value) -> Result<Self, Error> {
        Ok(serde_json::from_value(value)?)
    }

    /// Decode a message from raw JSON text (one stdio line or one SSE frame).
    pub fn from_str(raw: &str) -> Result<Self, Error> {
        Ok(serde_json::from_str(raw)?)
    }

    /// Attach the session id observed alongside this message.
    pub fn with_session_id(mut self, session_id: impl Into<String>) -> Self {
        self.session_id = Some(session_id.into());
        self
    }

    /// Server-initiated notification: a method and no id.
    pub fn is_notification(&self) -> bool {
        self.id.is_none() && self.method.is_some()
    }

    /// Server-initiated request: both an id and a method.
    pub fn is_request(&self) -> bool {
        self.id.is_some() && self.method.is_some()
    }

    /// Response to one of our requests: an id, a result or error, no method.
    pub fn is_response(&self) -> bool {
        self.id.is_some() && self.method.is_none() && (self.result.is_some() || self.error.is_some())
    }

    /// Server ping (arrives as a request and is answered out-of-band).
    pub fn is_ping(&self) -> bool {
        self.method.as_deref() == Some("ping")
    }

    /// String-coerced id comparison against a pending-table key.
    pub fn matches_id(&self, key: &str) -> bool {
        self.id.as_ref().is_some_and(|id| id.canonical() == key)
    }

    /// Unwrap the response payload, mapping a JSON-RPC error envelope to
    /// [`Error::Rpc`].
    pub fn into_result(self) -> Result<serde_json::Value, Error> {
        if let Some(err) = self.error {
            return Err(Error::Rpc {
                code: err.code,
                message: err.message,
                data: err.data,
            });
        }
        Ok(self.result.unwrap_or(serde_json::Value::Null))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn serialize_request_with_params() {
        let req = JsonRpcRequest::new(
            1u64,
            "tools/call",
            Some(serde_json::json!({"name": "add", "arguments": {"a": 5, "b": 3}})),
        );
        let json = serde_json::to_value(&req).unwrap();
        assert_eq!(json["jsonrpc"], "2.0");
        assert_eq!(json["id"], 1);
        assert_eq!(json["method"], "tools/call");
        assert!(json["params"].is_object());
    }

    #[test]
    fn serialize_request_without_params() {
        let req = JsonRpcRequest::new(2u64, "tools/list", None);
        let json = serde_json::to_value(&req).unwrap();
        assert!(json.get("params").is_none());
    }

    #[test]
    fn serialize_notification_has_no_id() {
        let notif = JsonRpcNotification::new("notifications/initialized", None);
        let json = serde_json::to_value(&notif).unwrap();
        assert_eq!(json["jsonrpc"], "2.0");
        assert!(json.get("id").is_none());
        assert!(json.get("params").is_none());
    }

    #[test]
    fn serialize_response_success_omits_error() {
        let resp = JsonRpcResponse::success(RequestId::Number(7), serde_json::json!({}));
        let json = serde_json::to_value(&resp).unwrap();
        assert_eq!(json["id"], 7);
        assert!(json.get("error").is_none());
        assert!(json["result"].is_object());
    }

    #[test]
    fn serialize_response_failure_omits_result() {
        let resp = JsonRpcResponse::failure(
            RequestId::String("abc".into()),
            RpcError::method_not_found("sampling/createMessage"),
        );
        let json = serde_json::to_value(&resp).unwrap();
        assert_eq!(json["id"], "abc");
        assert_eq!(json["error"]["code"], -32601);
        assert!(json.get("result").is_none());
    }

    #[test]
    fn classify_response() {
        let msg = Message::from_str(r#"{"jsonrpc":"2.0","id":1,"result":{"tools":[]}}"#).unwrap();
        assert!(msg.is_response());
        assert!(!msg.is_request());
        assert!(!msg.is_notification());
        assert!(!msg.is_ping());
    }

    #[test]
    fn classify_error_response() {
        let msg =
            Message::from_str(r#"{"jsonrpc":"2.0","id":1,"error":{"code":-32601,"message":"nope"}}"#)
                .unwrap();
        assert!(msg.is_response());
        match msg.into_result() {
            Err(Error::Rpc { code, message, .. }) => {
                assert_eq!(code, -32601);
                assert_eq!(message, "nope");
            }
            other => panic!("expected Rpc error, got {other:?}"),
        }
    }

    #[test]
    fn classify_response_with_null_result() {
        let msg = Message::from_str(r#"{"jsonrpc":"2.0","id":1,"result":null}"#).unwrap();
        assert!(msg.is_response());
        assert!(!msg.is_request());
        assert!(!msg.is_notification());
        assert_eq!(msg.into_result().unwrap(), serde_json::Value::Null);
    }

    #[test]
    fn null_error_key_does_not_mask_a_result() {
        let msg =
            Message::from_str(r#"{"jsonrpc":"2.0","id":2,"result":{"ok":true},"error":null}"#)
                .unwrap();
        assert!(msg.is_response());
        assert_eq!(msg.into_result().unwrap()["ok"], true);
    }

    #[test]
    fn classify_notification() {
        let msg = Message::from_str(
            r#"{"jsonrpc":"2.0","method":"notifications/tools/list_changed"}"#,
        )
        .unwrap();
        assert!(msg.is_notification());
        assert!(!msg.is_request());
        assert!(!msg.is_response());
    }

    #[test]
    fn classify_server_request_and_ping() {
        let msg = Message::from_str(r#"{"jsonrpc":"2.0","id":"srv-1","method":"ping"}"#).unwrap();
        assert!(msg.is_request());
        assert!(msg.is_ping());
        assert!(!msg.is_response());
    }

    #[test]
    fn matches_id_coerces_numbers_to_strings() {
        let msg = Message::from_str(r#"{"jsonrpc":"2.0","id":7,"result":{}}"#).unwrap();
        assert!(msg.matches_id("7"));
        assert!(!msg.matches_id("8"));

        let msg = Message::from_str(r#"{"jsonrpc":"2.0","id":"7","result":{}}"#).unwrap();
        assert!(msg.matches_id("7"));
    }

    #[test]
    fn predicates_are_stable_across_queries() {
        let msg = Message::from_str(r#"{"jsonrpc":"2.0","id":3,"result":{"ok":true}}"#).unwrap();
        for _ in 0..2 {
            assert!(msg.is_response());
            assert!(!msg.is_notification());
            assert!(!msg.is_request());
            assert!(msg.matches_id("3"));
        }
    }

    #[test]
    fn session_id_attaches_without_touching_the_envelope() {
        let msg = Message::from_str(r#"{"jsonrpc":"2.0","id":1,"result":{}}"#)
            .unwrap()
            .with_session_id("s-123");
        assert_eq!(msg.session_id.as_deref(), Some("s-123"));
        assert!(msg.matches_id("1"));
    }

    #[test]
    fn request_id_matching() {
        assert!(RequestId::Number(7).matches(&RequestId::String("7".into())));
        assert!(!RequestId::Number(7).matches(&RequestId::Number(8)));
    }
}
