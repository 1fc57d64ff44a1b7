//! Error types for every failure mode of the execution core
//!
//! Errors are grouped by the layer that raises them. A [`RuntimeError`] comes
//! from a single language runtime, a [`ManagerError`] is the envelope the
//! [`RuntimeManager`](crate::runtimes::RuntimeManager) hands back to callers,
//! [`PluginError`] covers the out-of-process plugin boundary and [`NodeError`]
//! is what workflow node adapters surface. Captured process output travels
//! with every error that comes from a finished or killed subprocess so callers
//! can diagnose failures without re-running anything.

use std::time::Duration;
use thiserror::Error;

use crate::runtimes::RuntimeType;

/// Which half of a call was running when it stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Compile,
    Execute,
}

impl std::fmt::Display for Phase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Phase::Compile => write!(f, "compilation"),
            Phase::Execute => write!(f, "execution"),
        }
    }
}

#[derive(Error, Debug)]
pub enum RuntimeError {
    #[error("unsafe pattern '{pattern}' detected in {runtime} code")]
    UnsafePattern {
        runtime: RuntimeType,
        pattern: &'static str,
    },
    #[error("invalid {runtime} code: {message}")]
    InvalidCode {
        runtime: RuntimeType,
        message: String,
    },
    #[error("{runtime} runtime not available: {message}")]
    ToolchainUnavailable {
        runtime: RuntimeType,
        message: String,
    },
    #[error("{runtime} runtime is not initialized")]
    NotReady { runtime: RuntimeType },
    #[error("{runtime} compilation failed:\n{output}")]
    Compile { runtime: RuntimeType, output: String },
    #[error("{runtime} {phase} timed out after {timeout:?}")]
    Timeout {
        runtime: RuntimeType,
        phase: Phase,
        timeout: Duration,
        stdout: String,
        stderr: String,
    },
    #[error("{runtime} {phase} was cancelled")]
    Cancelled {
        runtime: RuntimeType,
        phase: Phase,
        stdout: String,
        stderr: String,
    },
    #[error("{runtime} execution failed with exit code {exit_code:?}, stderr: {stderr}")]
    Execution {
        runtime: RuntimeType,
        exit_code: Option<i32>,
        stdout: String,
        stderr: String,
    },
    #[error("failed to stage {runtime} code: {source}")]
    Staging {
        runtime: RuntimeType,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to launch {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to serialize inputs: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl RuntimeError {
    /// True for denylist hits and structural rejections.
    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            RuntimeError::UnsafePattern { .. } | RuntimeError::InvalidCode { .. }
        )
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, RuntimeError::Timeout { .. })
    }

    /// Captured `(stdout, stderr)` of the subprocess, when one ran.
    pub fn captured_output(&self) -> Option<(&str, &str)> {
        match self {
            RuntimeError::Timeout { stdout, stderr, .. }
            | RuntimeError::Cancelled { stdout, stderr, .. }
            | RuntimeError::Execution { stdout, stderr, .. } => Some((stdout, stderr)),
            RuntimeError::Compile { output, .. } => Some(("", output)),
            _ => None,
        }
    }
}

#[derive(Error, Debug)]
pub enum ManagerError {
    #[error("runtime type {0} not supported")]
    UnsupportedRuntime(RuntimeType),
    #[error("unsupported language: {0}")]
    UnsupportedLanguage(String),
    #[error("code validation failed: {source}")]
    Validation {
        runtime: RuntimeType,
        #[source]
        source: RuntimeError,
    },
    #[error("execution failed: {source}")]
    Execution {
        runtime: RuntimeType,
        #[source]
        source: RuntimeError,
    },
    #[error("failed to initialize {runtime} runtime: {source}")]
    Initialization {
        runtime: RuntimeType,
        #[source]
        source: RuntimeError,
    },
}

impl ManagerError {
    /// The runtime-level cause wrapped by this envelope, if any.
    pub fn runtime_error(&self) -> Option<&RuntimeError> {
        match self {
            ManagerError::Validation { source, .. }
            | ManagerError::Execution { source, .. }
            | ManagerError::Initialization { source, .. } => Some(source),
            _ => None,
        }
    }
}

#[derive(Error, Debug)]
pub enum PluginError {
    #[error("plugin handshake failed: {0}")]
    Handshake(String),
    #[error("plugin transport failure: {0}")]
    Transport(String),
    #[error("plugin call '{method}' timed out after {timeout:?}")]
    Timeout { method: String, timeout: Duration },
    #[error("plugin call '{0}' was cancelled")]
    Cancelled(String),
    #[error("plugin returned an error: {0}")]
    Remote(String),
    #[error("failed to launch plugin {path}: {source}")]
    Spawn {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("node plugin with ID {0} not found")]
    NotFound(String),
    #[error("invalid configuration for plugin {plugin}: {message}")]
    InvalidConfig { plugin: String, message: String },
}

impl PluginError {
    /// Handshake mismatches and broken or stalled transports.
    pub fn is_protocol_error(&self) -> bool {
        matches!(
            self,
            PluginError::Handshake(_) | PluginError::Transport(_) | PluginError::Timeout { .. }
        )
    }
}

#[derive(Error, Debug)]
pub enum NodeError {
    #[error("{0} is required")]
    MissingInput(&'static str),
    #[error("invalid node input: {0}")]
    InvalidInput(String),
    #[error("invalid node configuration: {0}")]
    InvalidNode(String),
    #[error(transparent)]
    Runtime(#[from] ManagerError),
    #[error(transparent)]
    Plugin(#[from] PluginError),
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse YAML config: {0}")]
    Parse(#[from] serde_yaml::Error),
    #[error("invalid value for {key}: {message}")]
    InvalidValue { key: String, message: String },
}
