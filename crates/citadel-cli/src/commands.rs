use anyhow::{anyhow, bail, Context, Result};
use citadel_core::config::CitadelConfig;
use citadel_core::errors::ManagerError;
use citadel_core::nodes::result_to_output;
use citadel_core::plugins::PluginManager;
use citadel_core::runtimes::{Inputs, RuntimeManager, RuntimeType};
use serde_json::{json, Value};
use std::path::Path;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Parse `--input` as a JSON object. Absent means no inputs.
pub fn parse_inputs(raw: Option<&str>) -> Result<Inputs> {
    let Some(raw) = raw else {
        return Ok(Inputs::new());
    };
    match serde_json::from_str(raw).context("--input is not valid JSON")? {
        Value::Object(map) => Ok(map),
        other => bail!("--input must be a JSON object, got {}", other),
    }
}

fn print_json(value: &Value) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

pub async fn run_snippet(
    config: &CitadelConfig,
    cancel: &CancellationToken,
    language: &str,
    code: &str,
    inputs: Inputs,
    timeout: Option<u64>,
) -> Result<()> {
    let runtime_type = RuntimeType::from_alias(language)
        .ok_or_else(|| ManagerError::UnsupportedLanguage(language.to_string()))?;
    if timeout == Some(0) {
        bail!("--timeout must be greater than zero");
    }

    let manager = RuntimeManager::with_settings(&config.runtimes);
    manager.initialize(runtime_type).await?;

    let outcome = manager
        .execute_with_runtime(cancel, language, code, &inputs, timeout.map(Duration::from_secs))
        .await;
    manager.dispose_all().await;

    match outcome {
        Ok(result) => print_json(&Value::Object(result_to_output(result))),
        Err(e) => {
            if let Some((stdout, stderr)) = e.runtime_error().and_then(|e| e.captured_output()) {
                print!("{}", stdout);
                eprint!("{}", stderr);
            }
            Err(e.into())
        }
    }
}

pub async fn list_runtimes(config: &CitadelConfig) -> Result<()> {
    let manager = RuntimeManager::with_settings(&config.runtimes);
    for failure in manager.initialize_available().await {
        log::warn!("{}", failure);
    }

    println!("{:<12} {:<15} VERSION", "RUNTIME", "STATUS");
    for info in manager.all_info() {
        println!(
            "{:<12} {:<15} {}",
            info.runtime.as_str(),
            info.status.to_string(),
            info.version.as_deref().unwrap_or("-")
        );
    }
    manager.dispose_all().await;
    Ok(())
}

fn plugin_id(path: &Path) -> Result<String> {
    path.file_stem()
        .map(|stem| stem.to_string_lossy().into_owned())
        .ok_or_else(|| anyhow!("cannot derive a plugin id from {}", path.display()))
}

pub async fn plugin_info(config: &CitadelConfig, path: &Path) -> Result<()> {
    let id = plugin_id(path)?;
    let manager = PluginManager::with_settings(&config.plugins);
    let described = async {
        let metadata = manager.register_plugin_at_path(&id, path).await?;
        let schema = manager.node_config_schema(&id).await?;
        Ok::<_, anyhow::Error>(json!({ "metadata": metadata, "config_schema": schema }))
    }
    .await;
    manager.close_all().await;
    print_json(&described?)
}

pub async fn plugin_exec(
    config: &CitadelConfig,
    cancel: &CancellationToken,
    path: &Path,
    inputs: Inputs,
) -> Result<()> {
    let id = plugin_id(path)?;
    let manager = PluginManager::with_settings(&config.plugins);
    let executed = async {
        manager.register_plugin_at_path(&id, path).await?;
        Ok::<_, anyhow::Error>(manager.execute_node(cancel, &id, inputs).await?)
    }
    .await;
    manager.close_all().await;
    print_json(&Value::Object(executed?))
}

pub async fn plugin_list(config: &CitadelConfig) -> Result<()> {
    if config.plugins.nodes.is_empty() {
        println!("No plugins configured.");
        return Ok(());
    }

    let manager = PluginManager::with_settings(&config.plugins);
    let registered = manager.register_all(&config.plugins.nodes).await;
    if registered.is_ok() {
        println!("{:<24} {:<10} {:<12} NAME", "ID", "VERSION", "CATEGORY");
        for id in manager.list_available_plugins().await {
            let Ok(metadata) = manager.node_metadata(&id).await else {
                continue;
            };
            println!(
                "{:<24} {:<10} {:<12} {}",
                id, metadata.version, metadata.category, metadata.name
            );
        }
    }
    manager.close_all().await;
    Ok(registered?)
}
