//! Out-of-process node plugins.
//!
//! A plugin is a separate executable. The host launches it with the magic
//! cookie and protocol version in its environment; the plugin answers with a
//! single `core|app|stdio` line on stdout and then serves newline-delimited
//! JSON requests on stdin. A crashing or misbehaving plugin surfaces as a
//! [`PluginError`](crate::errors::PluginError) on the host and never takes the
//! host down with it.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::runtimes::Inputs;

pub mod client;
pub mod manager;
pub mod protocol;
pub mod schema;
pub mod server;

pub use client::PluginClient;
pub use manager::PluginManager;
pub use schema::ConfigSchema;
pub use server::{serve, serve_io};

/// Version of the line protocol itself.
pub const CORE_PROTOCOL_VERSION: u32 = 1;
/// Version of the node plugin interface.
pub const PROTOCOL_VERSION: u32 = 1;
pub const MAGIC_COOKIE_KEY: &str = "CITADEL_PLUGIN";
pub const MAGIC_COOKIE_VALUE: &str = "citadel_agent";
pub const PROTOCOL_VERSION_ENV: &str = "CITADEL_PLUGIN_PROTOCOL_VERSION";

pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Values both sides must agree on before any RPC is exchanged.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HandshakeConfig {
    pub protocol_version: u32,
    pub magic_cookie_key: String,
    pub magic_cookie_value: String,
}

impl Default for HandshakeConfig {
    fn default() -> Self {
        Self {
            protocol_version: PROTOCOL_VERSION,
            magic_cookie_key: MAGIC_COOKIE_KEY.to_string(),
            magic_cookie_value: MAGIC_COOKIE_VALUE.to_string(),
        }
    }
}

impl HandshakeConfig {
    /// First stdout line of a plugin that accepted the handshake.
    pub fn announcement(&self) -> String {
        format!("{}|{}|stdio", CORE_PROTOCOL_VERSION, self.protocol_version)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeMetadata {
    pub id: String,
    pub name: String,
    pub description: String,
    pub version: String,
    pub author: String,
    pub category: String,
}

/// Implemented by plugin executables and served with [`serve`].
#[async_trait]
pub trait NodePlugin: Send + Sync {
    async fn execute(&self, inputs: Inputs) -> Result<Inputs, BoxError>;

    fn config_schema(&self) -> Value;

    fn metadata(&self) -> NodeMetadata;
}
