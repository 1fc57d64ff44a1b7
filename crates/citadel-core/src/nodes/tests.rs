use super::*;
use crate::errors::{PluginError, RuntimeError};
use crate::runtimes::{Runtime, RuntimeInfo, RuntimeStats, RuntimeStatus};
use serde_json::json;
use std::sync::Mutex;

/// Records the last call and answers with a fixed result.
struct RecordingRuntime {
    runtime: RuntimeType,
    calls: Mutex<Vec<(String, Inputs, Duration)>>,
}

impl RecordingRuntime {
    fn new(runtime: RuntimeType) -> Arc<Self> {
        Arc::new(Self {
            runtime,
            calls: Mutex::new(Vec::new()),
        })
    }

    fn calls(&self) -> Vec<(String, Inputs, Duration)> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl Runtime for RecordingRuntime {
    fn runtime_type(&self) -> RuntimeType {
        self.runtime
    }

    fn validate_code(&self, _code: &str) -> Result<(), RuntimeError> {
        Ok(())
    }

    async fn execute_code(
        &self,
        _cancel: &CancellationToken,
        code: &str,
        inputs: &Inputs,
        timeout: Duration,
    ) -> Result<ExecutionResult, RuntimeError> {
        self.calls
            .lock()
            .unwrap()
            .push((code.to_string(), inputs.clone(), timeout));
        Ok(ExecutionResult {
            runtime: self.runtime,
            stdout: "out\n".to_string(),
            stderr: String::new(),
            inputs: inputs.clone(),
            result: Some(json!(42)),
            duration: Duration::from_millis(15),
        })
    }

    async fn initialize(&self) -> Result<(), RuntimeError> {
        Ok(())
    }

    async fn dispose(&self) -> Result<(), RuntimeError> {
        Ok(())
    }

    fn info(&self) -> RuntimeInfo {
        RuntimeInfo {
            runtime: self.runtime,
            name: "recording".to_string(),
            version: None,
            status: RuntimeStatus::Ready,
            stats: RuntimeStats::default(),
        }
    }
}

fn manager_with(runtimes: &[Arc<RecordingRuntime>]) -> Arc<RuntimeManager> {
    let mut manager = RuntimeManager::empty().with_default_timeout(Duration::from_secs(7));
    for runtime in runtimes {
        manager.register(runtime.clone());
    }
    Arc::new(manager)
}

fn input(value: Value) -> Inputs {
    match value {
        Value::Object(map) => map,
        other => panic!("input must be an object, got {}", other),
    }
}

#[test]
fn test_min_lengths() {
    assert!(check_code(RuntimeType::Shell, "ls").is_ok());
    assert!(check_code(RuntimeType::Shell, "l").is_err());
    assert!(check_code(RuntimeType::Python, "x = 1").is_ok());
    assert!(check_code(RuntimeType::Python, "x=1").is_err());
    assert!(check_code(RuntimeType::Go, "package m").is_err());
    assert!(check_code(RuntimeType::Java, "class A {}").is_err());
    assert!(check_code(RuntimeType::Rust, "fn main() { let x = 1; }").is_ok());
}

#[test]
fn test_empty_code_is_rejected() {
    let err = check_code(RuntimeType::Ruby, "   \n").unwrap_err();
    assert_eq!(err.to_string(), "invalid node configuration: ruby code cannot be empty");
}

#[test]
fn test_node_scan_ignores_case() {
    // The runtime denylist is case-sensitive, the node scan is not.
    let err = check_code(RuntimeType::Python, "x = EVAL(\"1\")").unwrap_err();
    assert!(err.to_string().contains("eval("));
    assert!(check_code(RuntimeType::JavaScript, "setTimeout(() => 1, 10)").is_err());
    assert!(check_code(RuntimeType::JavaScript, "const fs = REQUIRE('fs')").is_err());
    assert!(check_code(RuntimeType::Ruby, "puts Binding.local").is_err());
    assert!(check_code(RuntimeType::Php, "echo Shell_Exec('id');").is_err());
    assert!(check_code(RuntimeType::Shell, "SUDO ls").is_err());
    assert!(check_code(RuntimeType::Go, "package main\nfunc main() { eval() }").is_ok());
}

#[tokio::test]
async fn test_code_node_reads_code_and_timeout() {
    let python = RecordingRuntime::new(RuntimeType::Python);
    let node = CodeNode::from_input(manager_with(&[python.clone()]), RuntimeType::Python);

    let output = node
        .execute(
            &CancellationToken::new(),
            input(json!({"code": "result = 42", "timeout": 3, "x": 1})),
        )
        .await
        .unwrap();

    let calls = python.calls();
    assert_eq!(calls.len(), 1);
    assert_eq!(calls[0].0, "result = 42");
    assert_eq!(calls[0].1, input(json!({"x": 1})));
    assert_eq!(calls[0].2, Duration::from_secs(3));

    assert_eq!(output["output"], json!("out\n"));
    assert_eq!(output["error_output"], json!(""));
    assert_eq!(output["inputs"], json!({"x": 1}));
    assert_eq!(output["result"], json!(42));
    assert_eq!(output["runtime"], json!("python"));
    assert_eq!(output["execution_time_ms"], json!(15));
}

#[tokio::test]
async fn test_code_node_defaults_to_manager_timeout() {
    let ruby = RecordingRuntime::new(RuntimeType::Ruby);
    let node = CodeNode::new(manager_with(&[ruby.clone()]), RuntimeType::Ruby, "puts 1 + 1");
    assert!(node.validate().is_ok());

    node.execute(&CancellationToken::new(), Inputs::new())
        .await
        .unwrap();
    assert_eq!(ruby.calls()[0].2, Duration::from_secs(7));
}

#[tokio::test]
async fn test_shell_node_uses_commands_key() {
    let shell = RecordingRuntime::new(RuntimeType::Shell);
    let node = CodeNode::from_input(manager_with(&[shell.clone()]), RuntimeType::Shell);
    assert_eq!(node.kind(), "shell");

    let err = node
        .execute(&CancellationToken::new(), input(json!({"code": "echo hi"})))
        .await
        .unwrap_err();
    assert_eq!(err.to_string(), "commands is required");

    node.execute(&CancellationToken::new(), input(json!({"commands": "echo hi"})))
        .await
        .unwrap();
    assert_eq!(shell.calls()[0].0, "echo hi");
}

#[tokio::test]
async fn test_invalid_timeouts_are_rejected() {
    let js = RecordingRuntime::new(RuntimeType::JavaScript);
    let node = CodeNode::from_input(manager_with(&[js.clone()]), RuntimeType::JavaScript);

    for timeout in [json!(0), json!(-2), json!("10")] {
        let err = node
            .execute(
                &CancellationToken::new(),
                input(json!({"code": "result = 1", "timeout": timeout})),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, NodeError::InvalidInput(_)), "{:?}", err);
    }
    assert!(js.calls().is_empty());
}

#[tokio::test]
async fn test_oversized_timeout_is_rejected() {
    let js = RecordingRuntime::new(RuntimeType::JavaScript);
    let node = CodeNode::from_input(manager_with(&[js.clone()]), RuntimeType::JavaScript);

    let err = node
        .execute(
            &CancellationToken::new(),
            input(json!({"code": "result = 1", "timeout": 1e20})),
        )
        .await
        .unwrap_err();
    match err {
        NodeError::InvalidInput(message) => assert!(message.contains("out of range"), "{}", message),
        other => panic!("expected InvalidInput, got {:?}", other),
    }
    assert!(js.calls().is_empty());
}

#[tokio::test]
async fn test_unsafe_code_never_reaches_the_runtime() {
    let php = RecordingRuntime::new(RuntimeType::Php);
    let node = CodeNode::new(manager_with(&[php.clone()]), RuntimeType::Php, "<?php system('ls');");
    assert!(matches!(node.validate(), Err(NodeError::InvalidNode(_))));

    let err = node
        .execute(&CancellationToken::new(), Inputs::new())
        .await
        .unwrap_err();
    assert!(matches!(err, NodeError::InvalidNode(_)));
    assert!(php.calls().is_empty());
}

#[tokio::test]
async fn test_multi_runtime_node_resolves_aliases() {
    let js = RecordingRuntime::new(RuntimeType::JavaScript);
    let node = MultiRuntimeNode::new(manager_with(&[js.clone()]));

    let output = node
        .execute(
            &CancellationToken::new(),
            input(json!({"runtime_type": "Node", "code": "result = 1", "n": 2})),
        )
        .await
        .unwrap();
    assert_eq!(output["runtime"], json!("javascript"));
    assert_eq!(js.calls()[0].1, input(json!({"n": 2})));
}

#[tokio::test]
async fn test_multi_runtime_node_errors() {
    let node = MultiRuntimeNode::new(manager_with(&[]));
    let cancel = CancellationToken::new();

    let err = node
        .execute(&cancel, input(json!({"code": "print(1)"})))
        .await
        .unwrap_err();
    assert_eq!(err.to_string(), "runtime_type is required");

    let err = node
        .execute(&cancel, input(json!({"runtime_type": "cobol", "code": "DISPLAY 1"})))
        .await
        .unwrap_err();
    assert_eq!(err.to_string(), "unsupported language: cobol");

    let err = node
        .execute(&cancel, input(json!({"runtime_type": "python"})))
        .await
        .unwrap_err();
    assert_eq!(err.to_string(), "code is required");

    // Known language, no runtime registered for it.
    let err = node
        .execute(&cancel, input(json!({"runtime_type": "py", "code": "print(1)"})))
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        NodeError::Runtime(ManagerError::UnsupportedRuntime(RuntimeType::Python))
    ));
}

#[tokio::test]
async fn test_plugin_node_for_unknown_plugin() {
    let node = PluginNode::new(Arc::new(PluginManager::new()), "missing");
    assert!(node.validate().is_ok());
    assert_eq!(node.kind(), "missing");

    let err = node
        .execute(&CancellationToken::new(), Inputs::new())
        .await
        .unwrap_err();
    assert!(matches!(err, NodeError::Plugin(PluginError::NotFound(_))));
    assert!(node.validate_config(&json!({})).await.is_err());

    let blank = PluginNode::new(Arc::new(PluginManager::new()), " ");
    assert!(blank.validate().is_err());
}
