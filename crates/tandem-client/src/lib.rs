//! MCP session coordinator for tandem.
//!
//! A [`Client`] owns one transport (stdio child process, legacy HTTP+SSE, or
//! Streamable HTTP), negotiates the protocol version and capabilities on
//! connect, and exposes typed helpers for every MCP request. Server-initiated
//! notifications and requests are routed to registered handlers by a
//! background dispatch task; a [`Manager`] aggregates several servers.

pub mod client;
pub mod config;
pub mod dispatch;
pub mod manager;
pub mod types;

pub use client::Client;
pub use config::{Config, ServerConfig, TransportKind};
pub use dispatch::{HandlerSet, NotificationHandler, RequestHandler};
pub use manager::Manager;
pub use types::{
    CallToolResult, CompletionResult, GetPromptResult, Implementation, LogLevel, PromptArgument,
    PromptInfo, PromptMessage, ReadResourceResult, ResourceContents, ResourceInfo, Root, ToolContent,
    ToolInfo,
};
