//! Error taxonomy for tandem.

use thiserror::Error;

/// Every error a tandem client can surface.
#[derive(Debug, Error)]
pub enum Error {
    /// I/O, framing, HTTP status, and content-type violations.
    #[error("transport error: {message}")]
    Transport {
        message: String,
        code: Option<i64>,
    },

    /// A request exceeded its `request_timeout`.
    #[error("request timed out after {timeout_ms}ms")]
    Timeout {
        request_id: Option<String>,
        timeout_ms: u64,
    },

    /// Streamable HTTP returned 404 on an established session.
    #[error("session expired: {message}")]
    SessionExpired { message: String },

    /// The server negotiated a protocol version we do not support.
    #[error("unsupported protocol version '{version}'")]
    InvalidProtocolVersion { version: String },

    /// The server sent a request method we do not implement. Logged and
    /// answered with a JSON-RPC error; never returned from `request`.
    #[error("unknown server request '{method}'")]
    UnknownRequest { method: String },

    /// `completion/complete` called against a server that does not
    /// advertise the completions capability.
    #[error("server does not advertise the completions capability")]
    CompletionNotAvailable,

    /// A capability-gated method other than completion was called without
    /// the server advertising support for it.
    #[error("server does not support {method}: missing {capability} capability")]
    CapabilityNotSupported {
        method: &'static str,
        capability: &'static str,
    },

    /// A required prompt argument was missing locally.
    #[error("prompt '{prompt}' requires argument '{argument}'")]
    PromptArgument { prompt: String, argument: String },

    /// Unrecognized transport tag in configuration.
    #[error("invalid transport type '{value}'")]
    InvalidTransportType { value: String },

    /// A JSON-RPC error envelope returned by the server.
    #[error("server error {code}: {message}")]
    Rpc {
        code: i64,
        message: String,
        data: Option<serde_json::Value>,
    },

    /// The stdio child process could not be launched.
    #[error("failed to spawn '{command}': {source}")]
    Spawn {
        command: String,
        #[source]
        source: std::io::Error,
    },

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl Error {
    /// Shorthand for a transport error with no status code.
    pub fn transport(message: impl Into<String>) -> Self {
        Error::Transport {
            message: message.into(),
            code: None,
        }
    }
}
