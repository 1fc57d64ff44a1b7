use citadel_core::config::{ConfigLoader, RuntimeSettings};
use citadel_core::errors::{ManagerError, NodeError, RuntimeError};
use citadel_core::nodes::{CodeNode, MultiRuntimeNode, Node};
use citadel_core::runtimes::{Inputs, RuntimeManager, RuntimeStatus, RuntimeType};
use serde_json::{json, Value};
use std::path::Path;
use std::sync::Arc;
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;

fn inputs(value: Value) -> Inputs {
    match value {
        Value::Object(map) => map,
        other => panic!("inputs must be an object, got {}", other),
    }
}

/// A manager rooted in `root` with every toolchain that could be found.
async fn manager_in(root: &Path) -> Arc<RuntimeManager> {
    let settings = RuntimeSettings {
        temp_root: Some(root.to_path_buf()),
        ..RuntimeSettings::default()
    };
    let manager = RuntimeManager::with_settings(&settings);
    for failure in manager.initialize_available().await {
        eprintln!("unavailable: {}", failure);
    }
    Arc::new(manager)
}

fn is_ready(manager: &RuntimeManager, runtime: RuntimeType) -> bool {
    manager
        .runtime_info(runtime)
        .map(|info| info.status == RuntimeStatus::Ready)
        .unwrap_or(false)
}

fn is_empty_dir(path: &Path) -> bool {
    std::fs::read_dir(path).unwrap().next().is_none()
}

#[tokio::test]
async fn test_config_drives_the_manager() {
    let config = ConfigLoader::from_str("runtimes:\n  default_timeout_secs: 12\n")
        .await
        .unwrap();
    let manager = RuntimeManager::with_settings(&config.runtimes);
    assert_eq!(manager.default_timeout().as_secs(), 12);
    assert_eq!(manager.list_runtimes().len(), 9);
}

#[tokio::test]
async fn test_shell_node_end_to_end() {
    let root = TempDir::new().unwrap();
    let manager = manager_in(root.path()).await;
    if !is_ready(&manager, RuntimeType::Shell) {
        eprintln!("skipping: sh not available");
        return;
    }

    let node = CodeNode::from_input(manager.clone(), RuntimeType::Shell);
    let output = node
        .execute(
            &CancellationToken::new(),
            inputs(json!({"commands": "echo \"hi $input_who\"", "who": "there", "timeout": 5})),
        )
        .await
        .unwrap();

    assert_eq!(output["output"], "hi there\n");
    assert_eq!(output["inputs"], json!({"who": "there"}));
    assert_eq!(output["runtime"], "shell");
    assert!(output.get("result").is_none());
    assert!(is_empty_dir(root.path()));

    let err = node
        .execute(&CancellationToken::new(), inputs(json!({"commands": "exit 3"})))
        .await
        .unwrap_err();
    match err {
        NodeError::Runtime(ManagerError::Execution {
            source: RuntimeError::Execution { exit_code, .. },
            ..
        }) => assert_eq!(exit_code, Some(3)),
        other => panic!("expected an execution error, got {:?}", other),
    }
    assert!(is_empty_dir(root.path()));

    let info = manager.runtime_info(RuntimeType::Shell).unwrap();
    assert_eq!(info.stats.execution_count, 2);
    assert_eq!(info.stats.error_count, 1);
    manager.dispose_all().await;
}

#[tokio::test]
async fn test_node_and_javascript_aliases_agree() {
    let root = TempDir::new().unwrap();
    let manager = manager_in(root.path()).await;
    if !is_ready(&manager, RuntimeType::JavaScript) {
        eprintln!("skipping: node not available");
        return;
    }

    let node = MultiRuntimeNode::new(manager.clone());
    let mut results = Vec::new();
    for alias in ["node", "javascript"] {
        let output = node
            .execute(
                &CancellationToken::new(),
                inputs(json!({"runtime_type": alias, "code": "result = inputs.a + 1", "a": 41})),
            )
            .await
            .unwrap();
        results.push(output["result"].clone());
    }
    assert_eq!(results, vec![json!(42), json!(42)]);
    assert!(is_empty_dir(root.path()));
    manager.dispose_all().await;
}
