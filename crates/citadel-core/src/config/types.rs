//! Configuration type definitions for the execution core
//!
//! Every field carries a serde default so an empty document is a valid
//! configuration. Durations are expressed in whole seconds in YAML and exposed
//! as [`Duration`] through accessor methods.

use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::path::PathBuf;
use std::time::Duration;

use crate::errors::ConfigError;
use crate::runtimes::RuntimeType;

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct CitadelConfig {
    #[serde(default)]
    pub runtimes: RuntimeSettings,
    #[serde(default)]
    pub plugins: PluginSettings,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuntimeSettings {
    /// Used when a caller does not supply a timeout.
    #[serde(default = "default_timeout_secs")]
    pub default_timeout_secs: u64,
    /// Share of the timeout given to the compile phase of compiled languages.
    #[serde(default = "default_compile_timeout_ratio")]
    pub compile_timeout_ratio: f64,
    /// Parent directory for per-call workspaces; the OS temp dir when unset.
    #[serde(default)]
    pub temp_root: Option<PathBuf>,
    #[serde(default)]
    pub toolchains: HashMap<RuntimeType, ToolchainOverride>,
}

/// Replaces the executables a runtime launches.
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct ToolchainOverride {
    /// Interpreter for interpreted languages, compiler for compiled ones.
    #[serde(default)]
    pub program: Option<String>,
    /// Launcher for compiled artifacts that need one (`java`, `mono`).
    #[serde(default)]
    pub runner: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PluginSettings {
    #[serde(default = "default_handshake_timeout_secs")]
    pub handshake_timeout_secs: u64,
    #[serde(default = "default_call_timeout_secs")]
    pub call_timeout_secs: u64,
    /// Plugins registered at startup.
    #[serde(default)]
    pub nodes: Vec<PluginNodeConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PluginNodeConfig {
    pub id: String,
    pub path: PathBuf,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl RuntimeSettings {
    pub fn default_timeout(&self) -> Duration {
        Duration::from_secs(self.default_timeout_secs)
    }

    pub fn toolchain(&self, runtime: RuntimeType) -> Option<&ToolchainOverride> {
        self.toolchains.get(&runtime)
    }
}

impl PluginSettings {
    pub fn handshake_timeout(&self) -> Duration {
        Duration::from_secs(self.handshake_timeout_secs)
    }

    pub fn call_timeout(&self) -> Duration {
        Duration::from_secs(self.call_timeout_secs)
    }
}

impl CitadelConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        check_timeout("runtimes.default_timeout_secs", self.runtimes.default_timeout_secs)?;

        let ratio = self.runtimes.compile_timeout_ratio;
        if !(ratio > 0.0 && ratio < 1.0) {
            return Err(ConfigError::InvalidValue {
                key: "runtimes.compile_timeout_ratio".to_string(),
                message: format!("{} is outside the open interval (0, 1)", ratio),
            });
        }

        for (runtime, toolchain) in &self.runtimes.toolchains {
            let blank = |v: &Option<String>| v.as_deref().is_some_and(|s| s.trim().is_empty());
            if blank(&toolchain.program) || blank(&toolchain.runner) {
                return Err(ConfigError::InvalidValue {
                    key: format!("runtimes.toolchains.{}", runtime),
                    message: "executable names must not be empty".to_string(),
                });
            }
        }

        check_timeout("plugins.handshake_timeout_secs", self.plugins.handshake_timeout_secs)?;
        check_timeout("plugins.call_timeout_secs", self.plugins.call_timeout_secs)?;

        let mut seen = HashSet::new();
        for node in &self.plugins.nodes {
            if node.id.trim().is_empty() {
                return Err(ConfigError::InvalidValue {
                    key: "plugins.nodes.id".to_string(),
                    message: "plugin id must not be empty".to_string(),
                });
            }
            if !seen.insert(node.id.as_str()) {
                return Err(ConfigError::InvalidValue {
                    key: "plugins.nodes.id".to_string(),
                    message: format!("duplicate plugin id '{}'", node.id),
                });
            }
        }

        Ok(())
    }
}

/// Upper bound for every configured timeout: one day.
pub const MAX_TIMEOUT_SECS: u64 = 86_400;

fn check_timeout(key: &str, secs: u64) -> Result<(), ConfigError> {
    let message = if secs == 0 {
        "must be greater than zero".to_string()
    } else if secs > MAX_TIMEOUT_SECS {
        format!("{} exceeds the maximum of {} seconds", secs, MAX_TIMEOUT_SECS)
    } else {
        return Ok(());
    };
    Err(ConfigError::InvalidValue {
        key: key.to_string(),
        message,
    })
}

impl Default for RuntimeSettings {
    fn default() -> Self {
        Self {
            default_timeout_secs: default_timeout_secs(),
            compile_timeout_ratio: default_compile_timeout_ratio(),
            temp_root: None,
            toolchains: HashMap::new(),
        }
    }
}

impl Default for PluginSettings {
    fn default() -> Self {
        Self {
            handshake_timeout_secs: default_handshake_timeout_secs(),
            call_timeout_secs: default_call_timeout_secs(),
            nodes: Vec::new(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

fn default_timeout_secs() -> u64 { 30 }
fn default_compile_timeout_ratio() -> f64 { 0.5 }
fn default_handshake_timeout_secs() -> u64 { 10 }
fn default_call_timeout_secs() -> u64 { 60 }
fn default_log_level() -> String { "info".to_string() }
