//! Registry of launched node plugins.

use serde_json::Value;
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;

use crate::config::{PluginNodeConfig, PluginSettings};
use crate::errors::PluginError;
use crate::plugins::{ConfigSchema, HandshakeConfig, NodeMetadata, PluginClient};
use crate::runtimes::Inputs;

struct RegisteredPlugin {
    client: PluginClient,
    metadata: NodeMetadata,
    schema: ConfigSchema,
}

/// Launches plugins, caches their metadata and schema, and routes calls by id.
pub struct PluginManager {
    handshake: HandshakeConfig,
    handshake_timeout: Duration,
    call_timeout: Duration,
    plugins: RwLock<HashMap<String, Arc<RegisteredPlugin>>>,
}

impl PluginManager {
    pub fn new() -> Self {
        Self::with_settings(&PluginSettings::default())
    }

    pub fn with_settings(settings: &PluginSettings) -> Self {
        Self {
            handshake: HandshakeConfig::default(),
            handshake_timeout: settings.handshake_timeout(),
            call_timeout: settings.call_timeout(),
            plugins: RwLock::new(HashMap::new()),
        }
    }

    /// Use a different handshake, e.g. for a host speaking another cookie.
    pub fn with_handshake(mut self, handshake: HandshakeConfig) -> Self {
        self.handshake = handshake;
        self
    }

    /// Launch the plugin at `path` under `id`, replacing any plugin already
    /// registered with that id.
    pub async fn register_plugin_at_path(&self, id: &str, path: &Path) -> Result<NodeMetadata, PluginError> {
        if let Some(previous) = self.plugins.write().await.remove(id) {
            log::info!("replacing plugin {}", id);
            previous.client.shutdown().await;
        }

        let client = PluginClient::launch(path, &self.handshake, self.handshake_timeout, self.call_timeout).await?;
        let registered = match Self::describe(id, &client).await {
            Ok((metadata, schema)) => RegisteredPlugin {
                client,
                metadata,
                schema,
            },
            Err(e) => {
                client.shutdown().await;
                return Err(e);
            }
        };

        if registered.metadata.id != id {
            log::debug!(
                "plugin registered as {} reports id {}",
                id,
                registered.metadata.id
            );
        }
        log::info!(
            "registered plugin {} ({} {})",
            id,
            registered.metadata.name,
            registered.metadata.version
        );

        let metadata = registered.metadata.clone();
        self.plugins
            .write()
            .await
            .insert(id.to_string(), Arc::new(registered));
        Ok(metadata)
    }

    async fn describe(id: &str, client: &PluginClient) -> Result<(NodeMetadata, ConfigSchema), PluginError> {
        let metadata = client.metadata().await?;
        let raw = client.config_schema().await?;
        let schema = ConfigSchema::compile(raw).map_err(|message| PluginError::InvalidConfig {
            plugin: id.to_string(),
            message,
        })?;
        Ok((metadata, schema))
    }

    /// Register every configured plugin, stopping at the first failure.
    pub async fn register_all(&self, nodes: &[PluginNodeConfig]) -> Result<(), PluginError> {
        for node in nodes {
            self.register_plugin_at_path(&node.id, &node.path).await?;
        }
        Ok(())
    }

    async fn get(&self, id: &str) -> Result<Arc<RegisteredPlugin>, PluginError> {
        self.plugins
            .read()
            .await
            .get(id)
            .cloned()
            .ok_or_else(|| PluginError::NotFound(id.to_string()))
    }

    pub async fn execute_node(
        &self,
        cancel: &CancellationToken,
        id: &str,
        inputs: Inputs,
    ) -> Result<Inputs, PluginError> {
        let plugin = self.get(id).await?;
        plugin.client.execute(cancel, inputs).await
    }

    pub async fn node_metadata(&self, id: &str) -> Result<NodeMetadata, PluginError> {
        Ok(self.get(id).await?.metadata.clone())
    }

    pub async fn node_config_schema(&self, id: &str) -> Result<Value, PluginError> {
        Ok(self.get(id).await?.schema.raw().clone())
    }

    /// Check `config` against the schema cached at registration. The plugin
    /// process is not contacted.
    pub async fn validate_node_config(&self, id: &str, config: &Value) -> Result<(), PluginError> {
        let plugin = self.get(id).await?;
        plugin
            .schema
            .validate(config)
            .map_err(|errors| PluginError::InvalidConfig {
                plugin: id.to_string(),
                message: errors.join("; "),
            })
    }

    pub async fn list_available_plugins(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.plugins.read().await.keys().cloned().collect();
        ids.sort();
        ids
    }

    pub async fn is_alive(&self, id: &str) -> Result<bool, PluginError> {
        Ok(self.get(id).await?.client.is_alive())
    }

    pub async fn unregister_plugin(&self, id: &str) -> Result<(), PluginError> {
        let plugin = self
            .plugins
            .write()
            .await
            .remove(id)
            .ok_or_else(|| PluginError::NotFound(id.to_string()))?;
        plugin.client.shutdown().await;
        log::info!("unregistered plugin {}", id);
        Ok(())
    }

    pub async fn close_all(&self) {
        let plugins: Vec<_> = self.plugins.write().await.drain().collect();
        for (id, plugin) in plugins {
            log::debug!("closing plugin {}", id);
            plugin.client.shutdown().await;
        }
    }
}

impl Default for PluginManager {
    fn default() -> Self {
        Self::new()
    }
}
