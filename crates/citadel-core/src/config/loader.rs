//! Configuration loader for YAML files and environment overrides

use std::env;
use std::path::{Path, PathBuf};
use tokio::fs;

use crate::config::types::CitadelConfig;
use crate::errors::ConfigError;

pub const ENV_DEFAULT_TIMEOUT: &str = "CITADEL_DEFAULT_TIMEOUT_SECS";
pub const ENV_TEMP_ROOT: &str = "CITADEL_TEMP_ROOT";
pub const ENV_COMPILE_RATIO: &str = "CITADEL_COMPILE_TIMEOUT_RATIO";
pub const ENV_LOG_LEVEL: &str = "CITADEL_LOG_LEVEL";

/// Configuration loader with environment resolution
pub struct ConfigLoader;

impl ConfigLoader {
    /// Load configuration from a YAML file
    pub async fn from_file<P: AsRef<Path>>(path: P) -> Result<CitadelConfig, ConfigError> {
        let path = path.as_ref();
        let content = fs::read_to_string(path)
            .await
            .map_err(|e| ConfigError::Read {
                path: path.display().to_string(),
                source: e,
            })?;

        let mut config = Self::from_str(&content).await?;

        // Relative plugin paths are resolved against the config file location
        if let Some(base_dir) = path.parent() {
            for node in &mut config.plugins.nodes {
                if node.path.is_relative() {
                    node.path = base_dir.join(&node.path);
                }
            }
        }

        Ok(config)
    }

    /// Load configuration from a YAML string
    pub async fn from_str(content: &str) -> Result<CitadelConfig, ConfigError> {
        let mut config: CitadelConfig = if content.trim().is_empty() {
            CitadelConfig::default()
        } else {
            serde_yaml::from_str(content)?
        };

        Self::apply_env_overrides(&mut config)?;
        config.validate()?;
        Ok(config)
    }

    /// Defaults plus environment overrides, for callers without a config file
    pub async fn from_env_overrides() -> Result<CitadelConfig, ConfigError> {
        Self::from_str("").await
    }

    fn apply_env_overrides(config: &mut CitadelConfig) -> Result<(), ConfigError> {
        if let Ok(value) = env::var(ENV_DEFAULT_TIMEOUT) {
            config.runtimes.default_timeout_secs =
                value.trim().parse().map_err(|e| ConfigError::InvalidValue {
                    key: ENV_DEFAULT_TIMEOUT.to_string(),
                    message: format!("'{}': {}", value, e),
                })?;
        }

        if let Ok(value) = env::var(ENV_COMPILE_RATIO) {
            config.runtimes.compile_timeout_ratio =
                value.trim().parse().map_err(|e| ConfigError::InvalidValue {
                    key: ENV_COMPILE_RATIO.to_string(),
                    message: format!("'{}': {}", value, e),
                })?;
        }

        if let Ok(value) = env::var(ENV_TEMP_ROOT) {
            if !value.trim().is_empty() {
                config.runtimes.temp_root = Some(PathBuf::from(value));
            }
        }

        if let Ok(value) = env::var(ENV_LOG_LEVEL) {
            if !value.trim().is_empty() {
                config.logging.level = value;
            }
        }

        Ok(())
    }
}
