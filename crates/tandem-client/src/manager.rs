//! Multi-server registry.
//!
//! Starts every configured server, skipping the ones that fail so a session
//! can proceed with whatever is reachable.

use std::sync::Arc;

use crate::client::Client;
use crate::config::Config;
use crate::types::ToolInfo;

pub struct Manager {
    clients: Vec<Arc<Client>>,
}

impl Manager {
    /// Connect to every configured server. Failures are logged and skipped.
    pub async fn start(config: &Config) -> Self {
        let mut clients = Vec::new();

        for (name, server_config) in &config.servers {
            match Client::connect(name.clone(), server_config).await {
                Ok(client) => {
                    tracing::info!(server = %name, "connected");
                    clients.push(Arc::new(client));
                }
                Err(e) => {
                    tracing::warn!(server = %name, "failed to connect: {e}");
                }
            }
        }

        Self { clients }
    }

    pub fn clients(&self) -> &[Arc<Client>] {
        &self.clients
    }

    pub fn get(&self, name: &str) -> Option<Arc<Client>> {
        self.clients
            .iter()
            .find(|c| c.name() == name)
            .map(Arc::clone)
    }

    pub fn client_count(&self) -> usize {
        self.clients.len()
    }

    /// All tools across all connected servers, paired with their client.
    /// Servers whose `tools/list` fails contribute nothing.
    pub async fn tools(&self) -> Vec<(Arc<Client>, ToolInfo)> {
        let mut all = Vec::new();
        for client in &self.clients {
            match client.list_tools().await {
                Ok(tools) => {
                    for tool in tools {
                        all.push((Arc::clone(client), tool));
                    }
                }
                Err(e) => {
                    tracing::warn!(server = %client.name(), "tools/list failed: {e}");
                }
            }
        }
        all
    }

    /// Close every connection.
    pub async fn shutdown(self) {
        for client in self.clients {
            if let Err(e) = client.close().await {
                tracing::debug!(server = %client.name(), "close failed: {e}");
            }
        }
    }
}
