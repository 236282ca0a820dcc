//! The session coordinator: one client, one server, one transport.
//!
//! `Client::connect` opens the transport, performs the `initialize`
//! handshake, verifies the negotiated protocol version, stores the server's
//! capabilities, and sends `notifications/initialized`, in that order.
//! After that, the typed helpers compose params, send through the transport,
//! and unwrap results; server-initiated traffic is drained by the dispatch
//! task.

use std::collections::HashMap;
use std::sync::{Arc, OnceLock};

use serde::Deserialize;
use tandem_transport::{
    HttpOptions, SseTransport, StdioTransport, StreamableTransport, Transport,
};
use tandem_types::{
    ClientCapabilities, Error, Message, PROTOCOL_VERSION, RootsCapability, ServerCapabilities,
    SUPPORTED_PROTOCOL_VERSIONS,
};
use tokio::sync::{RwLock, mpsc};
use tokio::task::JoinHandle;

use crate::config::{ServerConfig, TransportKind};
use crate::dispatch::{HandlerSet, spawn_dispatcher};
use crate::types::{
    CallToolResult, CompletionResult, GetPromptResult, Implementation, LogLevel, PromptInfo,
    ReadResourceResult, ResourceInfo, ToolInfo,
};

/// Capacity of the incoming (server-to-client) channel.
const INCOMING_BUFFER: usize = 64;

#[derive(Deserialize)]
struct InitializeResult {
    #[serde(rename = "protocolVersion")]
    protocol_version: String,
    #[serde(default)]
    capabilities: ServerCapabilities,
    #[serde(default, rename = "serverInfo")]
    server_info: Option<Implementation>,
}

#[derive(Deserialize)]
struct ToolsListResult {
    tools: Vec<ToolInfo>,
}

#[derive(Deserialize)]
struct ResourcesListResult {
    resources: Vec<ResourceInfo>,
}

#[derive(Deserialize)]
struct PromptsListResult {
    prompts: Vec<PromptInfo>,
}

#[derive(Deserialize)]
struct CompleteResult {
    completion: CompletionResult,
}

/// Client for a single MCP server.
#[derive(Debug)]
pub struct Client {
    name: String,
    transport: Arc<Transport>,
    handlers: Arc<RwLock<HandlerSet>>,
    dispatcher: JoinHandle<()>,
    capabilities: OnceLock<ServerCapabilities>,
    protocol_version: OnceLock<String>,
    server_info: OnceLock<Implementation>,
    /// Prompt definitions from the most recent `prompts/list`, used to
    /// validate required arguments locally before `prompts/get`.
    prompts: RwLock<HashMap<String, PromptInfo>>,
}

impl Client {
    /// Connect and run the initialize handshake.
    pub async fn connect(name: impl Into<String>, config: &ServerConfig) -> Result<Self, Error> {
        Self::connect_with(name, config, HandlerSet::default()).await
    }

    /// Connect with pre-registered handlers. Registering a `roots` or
    /// `sampling` handler here advertises the matching client capability on
    /// `initialize`.
    pub async fn connect_with(
        name: impl Into<String>,
        config: &ServerConfig,
        handlers: HandlerSet,
    ) -> Result<Self, Error> {
        let name = name.into();
        let (incoming_tx, incoming_rx) = mpsc::channel(INCOMING_BUFFER);
        let transport = Arc::new(build_transport(config, incoming_tx).await?);
        let handlers = Arc::new(RwLock::new(handlers));
        let dispatcher = spawn_dispatcher(Arc::clone(&transport), Arc::clone(&handlers), incoming_rx);

        let client = Self {
            name,
            transport,
            handlers,
            dispatcher,
            capabilities: OnceLock::new(),
            protocol_version: OnceLock::new(),
            server_info: OnceLock::new(),
            prompts: RwLock::new(HashMap::new()),
        };

        if let Err(e) = client.initialize().await {
            let _ = client.transport.close().await;
            client.dispatcher.abort();
            return Err(e);
        }

        Ok(client)
    }

    async fn initialize(&self) -> Result<(), Error> {
        let params = serde_json::json!({
            "protocolVersion": PROTOCOL_VERSION,
            "capabilities": self.client_capabilities().await,
            "clientInfo": {
                "name": self.name,
                "version": env!("CARGO_PKG_VERSION"),
            }
        });

        let message = self.transport.request("initialize", Some(params)).await?;
        let init: InitializeResult = serde_json::from_value(message.into_result()?)?;

        if !SUPPORTED_PROTOCOL_VERSIONS.contains(&init.protocol_version.as_str()) {
            return Err(Error::InvalidProtocolVersion {
                version: init.protocol_version,
            });
        }

        self.transport
            .set_protocol_version(&init.protocol_version)
            .await;
        let _ = self.protocol_version.set(init.protocol_version);
        let _ = self.capabilities.set(init.capabilities);
        if let Some(info) = init.server_info {
            let _ = self.server_info.set(info);
        }

        self.transport
            .notify("notifications/initialized", None)
            .await?;

        tracing::info!(server = %self.name, "session initialized");
        Ok(())
    }

    async fn client_capabilities(&self) -> ClientCapabilities {
        let set = self.handlers.read().await;
        ClientCapabilities {
            roots: set.roots.is_some().then(|| RootsCapability {
                list_changed: Some(false),
            }),
            sampling: set.sampling.is_some().then(|| serde_json::json!({})),
        }
    }

    /// Send an arbitrary request and unwrap its result. The typed helpers
    /// below all route through here.
    pub async fn request(
        &self,
        method: &str,
        params: Option<serde_json::Value>,
    ) -> Result<serde_json::Value, Error> {
        self.transport.request(method, params).await?.into_result()
    }

    /// Send an arbitrary notification.
    pub async fn notify(
        &self,
        method: &str,
        params: Option<serde_json::Value>,
    ) -> Result<(), Error> {
        self.transport.notify(method, params).await
    }

    pub async fn ping(&self) -> Result<(), Error> {
        self.request("ping", None).await.map(|_| ())
    }

    pub async fn list_tools(&self) -> Result<Vec<ToolInfo>, Error> {
        let result = self.request("tools/list", None).await?;
        let list: ToolsListResult = serde_json::from_value(result)?;
        Ok(list.tools)
    }

    pub async fn call_tool(
        &self,
        name: &str,
        arguments: serde_json::Value,
    ) -> Result<CallToolResult, Error> {
        let params = serde_json::json!({"name": name, "arguments": arguments});
        let result = self.request("tools/call", Some(params)).await?;
        Ok(serde_json::from_value(result)?)
    }

    pub async fn list_resources(&self) -> Result<Vec<ResourceInfo>, Error> {
        let result = self.request("resources/list", None).await?;
        let list: ResourcesListResult = serde_json::from_value(result)?;
        Ok(list.resources)
    }

    pub async fn read_resource(&self, uri: &str) -> Result<ReadResourceResult, Error> {
        let params = serde_json::json!({"uri": uri});
        let result = self.request("resources/read", Some(params)).await?;
        Ok(serde_json::from_value(result)?)
    }

    pub async fn subscribe_resource(&self, uri: &str) -> Result<(), Error> {
        if !self.capabilities().supports_resource_subscribe() {
            return Err(Error::CapabilityNotSupported {
                method: "resources/subscribe",
                capability: "resources.subscribe",
            });
        }
        let params = serde_json::json!({"uri": uri});
        self.request("resources/subscribe", Some(params))
            .await
            .map(|_| ())
    }

    pub async fn unsubscribe_resource(&self, uri: &str) -> Result<(), Error> {
        if !self.capabilities().supports_resource_subscribe() {
            return Err(Error::CapabilityNotSupported {
                method: "resources/unsubscribe",
                capability: "resources.subscribe",
            });
        }
        let params = serde_json::json!({"uri": uri});
        self.request("resources/unsubscribe", Some(params))
            .await
            .map(|_| ())
    }

    pub async fn list_prompts(&self) -> Result<Vec<PromptInfo>, Error> {
        let result = self.request("prompts/list", None).await?;
        let list: PromptsListResult = serde_json::from_value(result)?;

        let mut cache = self.prompts.write().await;
        cache.clear();
        for prompt in &list.prompts {
            cache.insert(prompt.name.clone(), prompt.clone());
        }

        Ok(list.prompts)
    }

    /// Fetch a prompt. Required arguments are validated against the prompt
    /// list cached by the most recent [`list_prompts`](Self::list_prompts);
    /// prompts the cache has never seen skip local validation.
    pub async fn get_prompt(
        &self,
        name: &str,
        arguments: Option<serde_json::Value>,
    ) -> Result<GetPromptResult, Error> {
        if let Some(info) = self.prompts.read().await.get(name) {
            for arg in &info.arguments {
                let provided = arguments
                    .as_ref()
                    .and_then(|a| a.get(&arg.name))
                    .is_some();
                if arg.required && !provided {
                    return Err(Error::PromptArgument {
                        prompt: name.to_string(),
                        argument: arg.name.clone(),
                    });
                }
            }
        }

        let mut params = serde_json::json!({"name": name});
        if let Some(arguments) = arguments {
            params["arguments"] = arguments;
        }
        let result = self.request("prompts/get", Some(params)).await?;
        Ok(serde_json::from_value(result)?)
    }

    /// Ask the server to complete a partially typed argument value.
    /// `reference` is the `ref` object (`ref/prompt` or `ref/resource`).
    pub async fn complete(
        &self,
        reference: serde_json::Value,
        argument_name: &str,
        argument_value: &str,
    ) -> Result<CompletionResult, Error> {
        if !self.capabilities().supports_completions() {
            return Err(Error::CompletionNotAvailable);
        }
        let params = serde_json::json!({
            "ref": reference,
            "argument": {"name": argument_name, "value": argument_value},
        });
        let result = self.request("completion/complete", Some(params)).await?;
        let complete: CompleteResult = serde_json::from_value(result)?;
        Ok(complete.completion)
    }

    pub async fn set_log_level(&self, level: LogLevel) -> Result<(), Error> {
        if !self.capabilities().supports_logging() {
            return Err(Error::CapabilityNotSupported {
                method: "logging/setLevel",
                capability: "logging",
            });
        }
        let params = serde_json::json!({"level": level});
        self.request("logging/setLevel", Some(params))
            .await
            .map(|_| ())
    }

    /// Capabilities the server advertised on initialize.
    pub fn capabilities(&self) -> ServerCapabilities {
        self.capabilities.get().cloned().unwrap_or_default()
    }

    /// The negotiated protocol version.
    pub fn protocol_version(&self) -> &str {
        self.protocol_version
            .get()
            .map(String::as_str)
            .unwrap_or(PROTOCOL_VERSION)
    }

    pub fn server_info(&self) -> Option<&Implementation> {
        self.server_info.get()
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_alive(&self) -> bool {
        self.transport.is_alive()
    }

    /// Close the transport and stop the dispatch task. In-flight requests
    /// fail with a transport error.
    pub async fn close(&self) -> Result<(), Error> {
        let result = self.transport.close().await;
        self.dispatcher.abort();
        result
    }

    /// Register a handler for `notifications/tools/list_changed`.
    pub async fn on_tools_list_changed(
        &self,
        handler: impl Fn(serde_json::Value) + Send + Sync + 'static,
    ) {
        self.handlers.write().await.tools_list_changed = Some(Box::new(handler));
    }

    /// Register a handler for `notifications/resources/list_changed`.
    pub async fn on_resources_list_changed(
        &self,
        handler: impl Fn(serde_json::Value) + Send + Sync + 'static,
    ) {
        self.handlers.write().await.resources_list_changed = Some(Box::new(handler));
    }

    /// Register a handler for `notifications/resources/updated`
    /// (subscription updates).
    pub async fn on_resource_updated(
        &self,
        handler: impl Fn(serde_json::Value) + Send + Sync + 'static,
    ) {
        self.handlers.write().await.resources_updated = Some(Box::new(handler));
    }

    /// Register a handler for `notifications/prompts/list_changed`.
    pub async fn on_prompts_list_changed(
        &self,
        handler: impl Fn(serde_json::Value) + Send + Sync + 'static,
    ) {
        self.handlers.write().await.prompts_list_changed = Some(Box::new(handler));
    }

    /// Register a handler for `notifications/message` (server log records).
    pub async fn on_log_message(
        &self,
        handler: impl Fn(serde_json::Value) + Send + Sync + 'static,
    ) {
        self.handlers.write().await.log_message = Some(Box::new(handler));
    }

    /// Register a handler for `notifications/progress`.
    pub async fn on_progress(&self, handler: impl Fn(serde_json::Value) + Send + Sync + 'static) {
        self.handlers.write().await.progress = Some(Box::new(handler));
    }

    /// Register a handler for `notifications/cancelled`.
    pub async fn on_cancelled(&self, handler: impl Fn(serde_json::Value) + Send + Sync + 'static) {
        self.handlers.write().await.cancelled = Some(Box::new(handler));
    }
}

async fn build_transport(
    config: &ServerConfig,
    incoming: mpsc::Sender<Message>,
) -> Result<Transport, Error> {
    match config.kind()? {
        TransportKind::Stdio => {
            let command = config
                .command
                .as_deref()
                .ok_or_else(|| Error::transport("stdio transport requires 'command'"))?;
            Ok(Transport::Stdio(StdioTransport::spawn(
                command,
                &config.args,
                &config.env,
                config.timeout_ms,
                incoming,
            )?))
        }
        TransportKind::Sse => {
            let options = http_options(config)?;
            Ok(Transport::Sse(SseTransport::connect(options, incoming).await?))
        }
        TransportKind::Streamable => {
            let options = http_options(config)?;
            let reconnect = config.reconnect.clone().unwrap_or_default();
            Ok(Transport::Streamable(StreamableTransport::connect(
                options, reconnect, incoming,
            )?))
        }
    }
}

fn http_options(config: &ServerConfig) -> Result<HttpOptions, Error> {
    let url = config
        .url
        .as_deref()
        .ok_or_else(|| Error::transport(format!("{} transport requires 'url'", config.transport)))?;
    let mut options = HttpOptions::new(url);
    options.headers = config.headers.clone();
    options.http_version = config.http_version;
    options.timeout_ms = config.timeout_ms;
    Ok(options)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::PromptArgument;

    /// Build an un-initialized client over a `cat` child for gating tests.
    async fn stub_client(capabilities: ServerCapabilities) -> Client {
        let (tx, rx) = mpsc::channel(16);
        let transport = Arc::new(Transport::Stdio(
            StdioTransport::spawn("cat", &[], &HashMap::new(), 2_000, tx).unwrap(),
        ));
        let handlers = Arc::new(RwLock::new(HandlerSet::default()));
        let dispatcher = spawn_dispatcher(Arc::clone(&transport), Arc::clone(&handlers), rx);
        let client = Client {
            name: "stub".to_string(),
            transport,
            handlers,
            dispatcher,
            capabilities: OnceLock::new(),
            protocol_version: OnceLock::new(),
            server_info: OnceLock::new(),
            prompts: RwLock::new(HashMap::new()),
        };
        let _ = client.capabilities.set(capabilities);
        client
    }

    #[tokio::test]
    async fn complete_requires_the_completions_capability() {
        let client = stub_client(ServerCapabilities::default()).await;
        let err = client
            .complete(serde_json::json!({"type": "ref/prompt", "name": "p"}), "a", "v")
            .await
            .unwrap_err();
        assert!(matches!(err, Error::CompletionNotAvailable));
        client.close().await.unwrap();
    }

    #[tokio::test]
    async fn subscribe_requires_the_subscribe_flag() {
        let caps: ServerCapabilities =
            serde_json::from_str(r#"{"resources":{"listChanged":true}}"#).unwrap();
        let client = stub_client(caps).await;
        let err = client.subscribe_resource("file:///x").await.unwrap_err();
        assert!(matches!(err, Error::CapabilityNotSupported { .. }));
        client.close().await.unwrap();
    }

    #[tokio::test]
    async fn set_log_level_requires_logging() {
        let client = stub_client(ServerCapabilities::default()).await;
        let err = client.set_log_level(LogLevel::Info).await.unwrap_err();
        assert!(matches!(
            err,
            Error::CapabilityNotSupported {
                capability: "logging",
                ..
            }
        ));
        client.close().await.unwrap();
    }

    #[tokio::test]
    async fn get_prompt_validates_required_arguments_from_cache() {
        let client = stub_client(ServerCapabilities::default()).await;
        client.prompts.write().await.insert(
            "greet".to_string(),
            PromptInfo {
                name: "greet".to_string(),
                description: None,
                arguments: vec![PromptArgument {
                    name: "who".to_string(),
                    description: None,
                    required: true,
                }],
            },
        );

        let err = client.get_prompt("greet", None).await.unwrap_err();
        match err {
            Error::PromptArgument { prompt, argument } => {
                assert_eq!(prompt, "greet");
                assert_eq!(argument, "who");
            }
            other => panic!("expected PromptArgument, got {other:?}"),
        }
        client.close().await.unwrap();
    }

    #[tokio::test]
    async fn unknown_prompt_skips_local_validation() {
        // `cat` echoes our request back as a server request; the dispatcher
        // answers it method-not-found, and that echo completes our pending
        // entry as an error envelope. The point: no PromptArgument error.
        let client = stub_client(ServerCapabilities::default()).await;
        let err = client.get_prompt("unseen", None).await.unwrap_err();
        assert!(matches!(err, Error::Rpc { code: -32601, .. }));
        client.close().await.unwrap();
    }
}
