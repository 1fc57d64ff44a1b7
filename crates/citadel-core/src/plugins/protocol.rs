//! Wire format shared by plugin hosts and plugin executables.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::errors::PluginError;
use crate::plugins::{HandshakeConfig, CORE_PROTOCOL_VERSION};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Method {
    Execute,
    GetConfigSchema,
    GetMetadata,
    Shutdown,
}

impl Method {
    pub fn as_str(&self) -> &'static str {
        match self {
            Method::Execute => "execute",
            Method::GetConfigSchema => "get_config_schema",
            Method::GetMetadata => "get_metadata",
            Method::Shutdown => "shutdown",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Request {
    pub id: u64,
    pub method: Method,
    #[serde(default)]
    pub params: Value,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Response {
    pub id: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl Response {
    pub fn ok(id: u64, result: Value) -> Self {
        Self {
            id,
            result: Some(result),
            error: None,
        }
    }

    pub fn err(id: u64, error: impl Into<String>) -> Self {
        Self {
            id,
            result: None,
            error: Some(error.into()),
        }
    }
}

/// Check a plugin's announcement line against what the host expects.
pub fn check_announcement(line: &str, expected: &HandshakeConfig) -> Result<(), PluginError> {
    let mut parts = line.trim().split('|');
    let (Some(core), Some(app), Some(transport), None) =
        (parts.next(), parts.next(), parts.next(), parts.next())
    else {
        return Err(PluginError::Handshake(format!(
            "unrecognized handshake line '{}'",
            line.trim()
        )));
    };

    let core: u32 = core
        .parse()
        .map_err(|_| PluginError::Handshake(format!("invalid core protocol version '{}'", core)))?;
    if core != CORE_PROTOCOL_VERSION {
        return Err(PluginError::Handshake(format!(
            "core protocol version {} does not match host version {}",
            core, CORE_PROTOCOL_VERSION
        )));
    }

    let app: u32 = app
        .parse()
        .map_err(|_| PluginError::Handshake(format!("invalid protocol version '{}'", app)))?;
    if app != expected.protocol_version {
        return Err(PluginError::Handshake(format!(
            "plugin protocol version {} does not match host version {}",
            app, expected.protocol_version
        )));
    }

    if transport != "stdio" {
        return Err(PluginError::Handshake(format!(
            "unsupported transport '{}'",
            transport
        )));
    }
    Ok(())
}
