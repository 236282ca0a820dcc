//! Configuration types for MCP server connections.

use std::collections::HashMap;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use tandem_transport::{HttpVersion, ReconnectOptions};
use tandem_types::Error;

fn default_transport() -> String {
    "stdio".to_string()
}

fn default_timeout() -> u64 {
    30_000
}

/// Top-level configuration: a set of named servers.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub servers: HashMap<String, ServerConfig>,
}

/// Configuration for one server connection.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// One of `stdio`, `sse`, `streamable` (default: `stdio`).
    #[serde(default = "default_transport")]
    pub transport: String,

    /// Command to run (stdio).
    #[serde(default)]
    pub command: Option<String>,
    /// Arguments passed to the command (stdio).
    #[serde(default)]
    pub args: Vec<String>,
    /// Environment variables for the server process (stdio).
    #[serde(default)]
    pub env: HashMap<String, String>,

    /// Server URL (sse: the event URL; streamable: the single endpoint).
    #[serde(default)]
    pub url: Option<String>,
    /// Extra headers sent with every HTTP request.
    #[serde(default)]
    pub headers: HashMap<String, String>,
    /// Forced HTTP version: `"1.1"` or `"2"`.
    #[serde(default)]
    pub http_version: Option<HttpVersion>,

    /// Request timeout in milliseconds (default: 30000).
    #[serde(default = "default_timeout")]
    pub timeout_ms: u64,

    /// Backoff for the streamable event stream.
    #[serde(default)]
    pub reconnect: Option<ReconnectOptions>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            transport: default_transport(),
            command: None,
            args: Vec::new(),
            env: HashMap::new(),
            url: None,
            headers: HashMap::new(),
            http_version: None,
            timeout_ms: default_timeout(),
            reconnect: None,
        }
    }
}

/// The three wire transports.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportKind {
    Stdio,
    Sse,
    Streamable,
}

impl FromStr for TransportKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Error> {
        match s {
            "stdio" => Ok(TransportKind::Stdio),
            "sse" => Ok(TransportKind::Sse),
            "streamable" => Ok(TransportKind::Streamable),
            other => Err(Error::InvalidTransportType {
                value: other.to_string(),
            }),
        }
    }
}

impl ServerConfig {
    pub fn kind(&self) -> Result<TransportKind, Error> {
        self.transport.parse()
    }
}
