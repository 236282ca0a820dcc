//! Shared wire types and error taxonomy for tandem.

/// Protocol version proposed on `initialize`.
pub const PROTOCOL_VERSION: &str = "2025-03-26";

/// Every protocol version this client can speak.
pub const SUPPORTED_PROTOCOL_VERSIONS: &[&str] = &["2024-11-05", "2025-03-26"];

pub mod capabilities;
pub mod error;
pub mod jsonrpc;

pub use capabilities::{
    ClientCapabilities, PromptsCapability, ResourcesCapability, RootsCapability,
    ServerCapabilities, ToolsCapability,
};
pub use error::Error;
pub use jsonrpc::{
    JsonRpcNotification, JsonRpcRequest, JsonRpcResponse, Message, RequestId, RpcError,
};
