//! Configuration module for the execution core
//!
//! Supports YAML configuration files with environment variable overrides.
//! Runtime, plugin and logging settings live in separate sections so each
//! subsystem only sees the part it consumes.

pub mod loader;
pub mod types;

pub use loader::*;
pub use types::*;


use crate::errors::ConfigError;
use std::path::Path;

/// Load a configuration from a YAML file
pub async fn load_config<P: AsRef<Path>>(path: P) -> Result<CitadelConfig, ConfigError> {
    ConfigLoader::from_file(path).await
}
