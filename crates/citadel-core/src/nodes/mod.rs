//! Workflow node adapters over the runtime and plugin managers
//!
//! A node receives the generic input map of a workflow step and produces an
//! output map. Code nodes turn that into a [`RuntimeManager`] call, plugin
//! nodes forward it to an out-of-process plugin. Managers are shared between
//! nodes through `Arc`.

use async_trait::async_trait;
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

use crate::errors::{ManagerError, NodeError};
use crate::plugins::PluginManager;
use crate::runtimes::{languages, ExecutionResult, Inputs, RuntimeManager, RuntimeType};

// Core Node trait that all workflow nodes implement
#[async_trait]
pub trait Node: Send + Sync {
    fn kind(&self) -> &str;
    fn validate(&self) -> Result<(), NodeError>;
    async fn execute(&self, cancel: &CancellationToken, input: Inputs) -> Result<Inputs, NodeError>;
}

/// Shortest snippet a node accepts for `runtime`, in bytes.
pub fn min_code_length(runtime: RuntimeType) -> usize {
    match runtime {
        RuntimeType::JavaScript | RuntimeType::Python | RuntimeType::Ruby => 5,
        RuntimeType::Go | RuntimeType::Php => 10,
        RuntimeType::Java | RuntimeType::Rust | RuntimeType::CSharp => 20,
        RuntimeType::Shell => 2,
    }
}

fn node_denylist(runtime: RuntimeType) -> &'static [&'static str] {
    match runtime {
        RuntimeType::JavaScript => &[
            "eval(", "Function(", "setTimeout(", "setInterval(", "import(", "require(", "__proto__",
            "constructor",
        ],
        RuntimeType::Python => &[
            "eval(", "exec(", "compile(", "__import__", "open(", "os.", "subprocess.", "sys.",
            "importlib.",
        ],
        RuntimeType::Ruby => &[
            "eval(", "exec(", "system(", "open(", "syscall(", "require(", "load(", "binding.",
            "TOPLEVEL_BINDING",
        ],
        RuntimeType::Php => &[
            "eval(", "exec(", "system(", "shell_exec(", "passthru(", "popen(", "proc_open(",
            "include(", "require(",
        ],
        RuntimeType::Shell => languages::SHELL.denylist,
        RuntimeType::Go | RuntimeType::Java | RuntimeType::Rust | RuntimeType::CSharp => &[],
    }
}

/// Node-level lint: presence, minimum length and a case-insensitive scan.
pub fn check_code(runtime: RuntimeType, code: &str) -> Result<(), NodeError> {
    if code.trim().is_empty() {
        return Err(NodeError::InvalidNode(format!("{} code cannot be empty", runtime)));
    }
    let min = min_code_length(runtime);
    if code.len() < min {
        return Err(NodeError::InvalidNode(format!(
            "{} code appears too short to be valid (minimum {} characters)",
            runtime, min
        )));
    }
    let lowered = code.to_ascii_lowercase();
    if let Some(pattern) = node_denylist(runtime)
        .iter()
        .find(|p| lowered.contains(&p.to_ascii_lowercase()))
    {
        return Err(NodeError::InvalidNode(format!(
            "{} code contains unsafe pattern '{}'",
            runtime, pattern
        )));
    }
    Ok(())
}

fn code_key(runtime: RuntimeType) -> &'static str {
    match runtime {
        RuntimeType::Shell => "commands",
        _ => "code",
    }
}

fn take_string(input: &mut Inputs, key: &'static str) -> Result<Option<String>, NodeError> {
    match input.remove(key) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::String(s)) => Ok(Some(s)),
        Some(other) => Err(NodeError::InvalidInput(format!(
            "{} must be a string, got {}",
            key, other
        ))),
    }
}

/// Remove `timeout` (seconds) from `input`.
fn take_timeout(input: &mut Inputs) -> Result<Option<Duration>, NodeError> {
    match input.remove("timeout") {
        None | Some(Value::Null) => Ok(None),
        Some(Value::Number(n)) => match n.as_f64() {
            Some(secs) if secs > 0.0 => Duration::try_from_secs_f64(secs).map(Some).map_err(|e| {
                NodeError::InvalidInput(format!("timeout {} is out of range: {}", n, e))
            }),
            _ => Err(NodeError::InvalidInput(format!(
                "timeout must be a positive number of seconds, got {}",
                n
            ))),
        },
        Some(other) => Err(NodeError::InvalidInput(format!(
            "timeout must be a number of seconds, got {}",
            other
        ))),
    }
}

/// Output map shared by every code-running node.
pub fn result_to_output(result: ExecutionResult) -> Inputs {
    let mut output = Inputs::new();
    output.insert("output".to_string(), Value::String(result.stdout));
    output.insert("error_output".to_string(), Value::String(result.stderr));
    output.insert("inputs".to_string(), Value::Object(result.inputs));
    if let Some(value) = result.result {
        output.insert("result".to_string(), value);
    }
    output.insert("runtime".to_string(), json!(result.runtime));
    output.insert(
        "execution_time_ms".to_string(),
        json!(u64::try_from(result.duration.as_millis()).unwrap_or(u64::MAX)),
    );
    output
}

/// Runs a snippet in one fixed language.
pub struct CodeNode {
    runtime: RuntimeType,
    code: Option<String>,
    manager: Arc<RuntimeManager>,
}

impl CodeNode {
    pub fn new(manager: Arc<RuntimeManager>, runtime: RuntimeType, code: impl Into<String>) -> Self {
        Self {
            runtime,
            code: Some(code.into()),
            manager,
        }
    }

    /// A node that reads its snippet from `code` (`commands` for shell) in
    /// the input map.
    pub fn from_input(manager: Arc<RuntimeManager>, runtime: RuntimeType) -> Self {
        Self {
            runtime,
            code: None,
            manager,
        }
    }

    pub fn runtime(&self) -> RuntimeType {
        self.runtime
    }
}

#[async_trait]
impl Node for CodeNode {
    fn kind(&self) -> &str {
        self.runtime.as_str()
    }

    fn validate(&self) -> Result<(), NodeError> {
        match &self.code {
            Some(code) => check_code(self.runtime, code),
            None => Ok(()),
        }
    }

    async fn execute(&self, cancel: &CancellationToken, mut input: Inputs) -> Result<Inputs, NodeError> {
        let key = code_key(self.runtime);
        let from_input = take_string(&mut input, key)?;
        let code = match (&self.code, from_input) {
            (Some(code), _) => code.clone(),
            (None, Some(code)) => code,
            (None, None) => return Err(NodeError::MissingInput(key)),
        };
        check_code(self.runtime, &code)?;
        let timeout = take_timeout(&mut input)?;

        let result = self
            .manager
            .execute(cancel, self.runtime, &code, &input, timeout)
            .await?;
        Ok(result_to_output(result))
    }
}

/// Runs a snippet in the language named by `input["runtime_type"]`.
pub struct MultiRuntimeNode {
    manager: Arc<RuntimeManager>,
}

impl MultiRuntimeNode {
    pub fn new(manager: Arc<RuntimeManager>) -> Self {
        Self { manager }
    }
}

#[async_trait]
impl Node for MultiRuntimeNode {
    fn kind(&self) -> &str {
        "multi_runtime"
    }

    fn validate(&self) -> Result<(), NodeError> {
        Ok(())
    }

    async fn execute(&self, cancel: &CancellationToken, mut input: Inputs) -> Result<Inputs, NodeError> {
        let language = take_string(&mut input, "runtime_type")?.ok_or(NodeError::MissingInput("runtime_type"))?;
        let runtime = RuntimeType::from_alias(&language)
            .ok_or_else(|| ManagerError::UnsupportedLanguage(language.clone()))?;
        let code = take_string(&mut input, "code")?.ok_or(NodeError::MissingInput("code"))?;
        check_code(runtime, &code)?;
        let timeout = take_timeout(&mut input)?;

        let result = self
            .manager
            .execute(cancel, runtime, &code, &input, timeout)
            .await?;
        Ok(result_to_output(result))
    }
}

/// Forwards execution to a registered plugin.
pub struct PluginNode {
    plugin_id: String,
    manager: Arc<PluginManager>,
}

impl PluginNode {
    pub fn new(manager: Arc<PluginManager>, plugin_id: impl Into<String>) -> Self {
        Self {
            plugin_id: plugin_id.into(),
            manager,
        }
    }

    /// Check a node configuration against the plugin's schema.
    pub async fn validate_config(&self, config: &Value) -> Result<(), NodeError> {
        Ok(self.manager.validate_node_config(&self.plugin_id, config).await?)
    }
}

#[async_trait]
impl Node for PluginNode {
    fn kind(&self) -> &str {
        &self.plugin_id
    }

    fn validate(&self) -> Result<(), NodeError> {
        if self.plugin_id.trim().is_empty() {
            return Err(NodeError::InvalidNode("plugin id cannot be empty".to_string()));
        }
        Ok(())
    }

    async fn execute(&self, cancel: &CancellationToken, input: Inputs) -> Result<Inputs, NodeError> {
        Ok(self.manager.execute_node(cancel, &self.plugin_id, input).await?)
    }
}

#[cfg(test)]
mod tests;
