//! Language runtimes for running user-authored snippets in OS subprocesses.
//!
//! Each [`Runtime`] owns a single language. Nine languages share one execution
//! skeleton ([`LanguageRuntime`]) parameterized by a static [`LanguageSpec`]:
//! the denylist, the wrapper generator, the command lines and whether the
//! language is interpreted or compiled. The [`RuntimeManager`] routes calls to
//! the right runtime and validates code before anything is spawned.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

use crate::errors::{ManagerError, RuntimeError};

pub mod language_runtime;
pub mod languages;
pub mod manager;
pub mod process;
pub mod stats;
pub mod wrappers;


pub use language_runtime::LanguageRuntime;
pub use languages::{LanguageSpec, Strategy};
pub use manager::RuntimeManager;
pub use stats::RuntimeStats;

/// Timeout applied when a caller does not supply one.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// Name of the environment variable every snippet receives its inputs in.
pub const INPUTS_ENV_VAR: &str = "CITADEL_INPUTS";

/// Key/value payload handed to a snippet as `inputs`.
pub type Inputs = Map<String, Value>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RuntimeType {
    Go,
    JavaScript,
    Python,
    Java,
    Ruby,
    Php,
    Rust,
    CSharp,
    Shell,
}

impl RuntimeType {
    /// Every runtime in initialization order.
    pub const ALL: [RuntimeType; 9] = [
        RuntimeType::Go,
        RuntimeType::JavaScript,
        RuntimeType::Python,
        RuntimeType::Java,
        RuntimeType::Ruby,
        RuntimeType::Php,
        RuntimeType::Rust,
        RuntimeType::CSharp,
        RuntimeType::Shell,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            RuntimeType::Go => "go",
            RuntimeType::JavaScript => "javascript",
            RuntimeType::Python => "python",
            RuntimeType::Java => "java",
            RuntimeType::Ruby => "ruby",
            RuntimeType::Php => "php",
            RuntimeType::Rust => "rust",
            RuntimeType::CSharp => "csharp",
            RuntimeType::Shell => "shell",
        }
    }

    /// Resolve a user-facing language name. Matching ignores case and
    /// surrounding whitespace.
    pub fn from_alias(alias: &str) -> Option<RuntimeType> {
        match alias.trim().to_ascii_lowercase().as_str() {
            "go" | "golang" => Some(RuntimeType::Go),
            "javascript" | "js" | "node" => Some(RuntimeType::JavaScript),
            "python" | "py" => Some(RuntimeType::Python),
            "java" => Some(RuntimeType::Java),
            "ruby" | "rb" => Some(RuntimeType::Ruby),
            "php" => Some(RuntimeType::Php),
            "rust" | "rs" => Some(RuntimeType::Rust),
            "csharp" | "c#" | "cs" => Some(RuntimeType::CSharp),
            "shell" | "bash" | "sh" => Some(RuntimeType::Shell),
            _ => None,
        }
    }
}

impl fmt::Display for RuntimeType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RuntimeType {
    type Err = ManagerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        RuntimeType::from_alias(s).ok_or_else(|| ManagerError::UnsupportedLanguage(s.to_string()))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RuntimeStatus {
    Uninitialized,
    Ready,
}

impl fmt::Display for RuntimeStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RuntimeStatus::Uninitialized => f.write_str("uninitialized"),
            RuntimeStatus::Ready => f.write_str("ready"),
        }
    }
}

/// Read-only snapshot of a runtime.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuntimeInfo {
    pub runtime: RuntimeType,
    pub name: String,
    /// Toolchain version reported by the last successful probe.
    pub version: Option<String>,
    pub status: RuntimeStatus,
    pub stats: RuntimeStats,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionResult {
    pub runtime: RuntimeType,
    pub stdout: String,
    pub stderr: String,
    pub inputs: Inputs,
    /// Value the snippet assigned to `result`. Only interpreted languages
    /// other than shell report one; `null` is folded into `None`.
    pub result: Option<Value>,
    pub duration: Duration,
}

#[async_trait]
pub trait Runtime: Send + Sync {
    fn runtime_type(&self) -> RuntimeType;

    /// Denylist and structural checks. Never spawns anything.
    fn validate_code(&self, code: &str) -> Result<(), RuntimeError>;

    async fn execute_code(
        &self,
        cancel: &CancellationToken,
        code: &str,
        inputs: &Inputs,
        timeout: Duration,
    ) -> Result<ExecutionResult, RuntimeError>;

    /// Probe the toolchain and mark the runtime ready.
    async fn initialize(&self) -> Result<(), RuntimeError>;

    /// Clear readiness. Calling it twice is harmless.
    async fn dispose(&self) -> Result<(), RuntimeError>;

    fn info(&self) -> RuntimeInfo;
}
