//! Routing and lifecycle for the language runtimes.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

use crate::config::RuntimeSettings;
use crate::errors::ManagerError;
use crate::runtimes::{
    ExecutionResult, Inputs, LanguageRuntime, Runtime, RuntimeInfo, RuntimeType, DEFAULT_TIMEOUT,
};

/// Owns one runtime per language and validates before executing.
pub struct RuntimeManager {
    runtimes: BTreeMap<RuntimeType, Arc<dyn Runtime>>,
    default_timeout: Duration,
}

impl RuntimeManager {
    /// All nine runtimes with default settings. Nothing is probed yet.
    pub fn new() -> Self {
        Self::with_settings(&RuntimeSettings::default())
    }

    pub fn with_settings(settings: &RuntimeSettings) -> Self {
        let mut manager = Self::empty().with_default_timeout(settings.default_timeout());
        for runtime in RuntimeType::ALL {
            manager.register(Arc::new(LanguageRuntime::with_settings(runtime, settings)));
        }
        manager
    }

    /// A manager without runtimes, to be filled with [`register`](Self::register).
    pub fn empty() -> Self {
        Self {
            runtimes: BTreeMap::new(),
            default_timeout: DEFAULT_TIMEOUT,
        }
    }

    pub fn with_default_timeout(mut self, timeout: Duration) -> Self {
        self.default_timeout = timeout;
        self
    }

    /// Install `runtime`, replacing any runtime of the same type.
    pub fn register(&mut self, runtime: Arc<dyn Runtime>) {
        self.runtimes.insert(runtime.runtime_type(), runtime);
    }

    pub fn default_timeout(&self) -> Duration {
        self.default_timeout
    }

    pub fn runtime(&self, runtime_type: RuntimeType) -> Result<Arc<dyn Runtime>, ManagerError> {
        self.runtimes
            .get(&runtime_type)
            .cloned()
            .ok_or(ManagerError::UnsupportedRuntime(runtime_type))
    }

    pub fn list_runtimes(&self) -> Vec<RuntimeType> {
        self.runtimes.keys().copied().collect()
    }

    pub fn validate_code(&self, runtime_type: RuntimeType, code: &str) -> Result<(), ManagerError> {
        self.runtime(runtime_type)?
            .validate_code(code)
            .map_err(|source| ManagerError::Validation {
                runtime: runtime_type,
                source,
            })
    }

    /// Validate then run `code`. `timeout` falls back to the manager default.
    pub async fn execute(
        &self,
        cancel: &CancellationToken,
        runtime_type: RuntimeType,
        code: &str,
        inputs: &Inputs,
        timeout: Option<Duration>,
    ) -> Result<ExecutionResult, ManagerError> {
        let runtime = self.runtime(runtime_type)?;
        runtime
            .validate_code(code)
            .map_err(|source| ManagerError::Validation {
                runtime: runtime_type,
                source,
            })?;

        let timeout = timeout.unwrap_or(self.default_timeout);
        runtime
            .execute_code(cancel, code, inputs, timeout)
            .await
            .map_err(|source| ManagerError::Execution {
                runtime: runtime_type,
                source,
            })
    }

    /// Like [`execute`](Self::execute), keyed by a language alias.
    pub async fn execute_with_runtime(
        &self,
        cancel: &CancellationToken,
        language: &str,
        code: &str,
        inputs: &Inputs,
        timeout: Option<Duration>,
    ) -> Result<ExecutionResult, ManagerError> {
        let runtime_type = RuntimeType::from_alias(language)
            .ok_or_else(|| ManagerError::UnsupportedLanguage(language.to_string()))?;
        self.execute(cancel, runtime_type, code, inputs, timeout).await
    }

    pub async fn initialize(&self, runtime_type: RuntimeType) -> Result<(), ManagerError> {
        self.runtime(runtime_type)?
            .initialize()
            .await
            .map_err(|source| ManagerError::Initialization {
                runtime: runtime_type,
                source,
            })
    }

    /// Initialize every runtime in [`RuntimeType::ALL`] order, stopping at the
    /// first failure.
    pub async fn initialize_all(&self) -> Result<(), ManagerError> {
        for runtime_type in self.list_runtimes() {
            self.initialize(runtime_type).await?;
        }
        Ok(())
    }

    /// Initialize what the host supports and return the runtimes that failed.
    pub async fn initialize_available(&self) -> Vec<ManagerError> {
        let mut failures = Vec::new();
        for runtime_type in self.list_runtimes() {
            if let Err(e) = self.initialize(runtime_type).await {
                log::warn!("{}", e);
                failures.push(e);
            }
        }
        failures
    }

    pub async fn dispose_all(&self) {
        for (runtime_type, runtime) in &self.runtimes {
            if let Err(e) = runtime.dispose().await {
                log::warn!("failed to dispose {} runtime: {}", runtime_type, e);
            }
        }
    }

    pub fn runtime_info(&self, runtime_type: RuntimeType) -> Result<RuntimeInfo, ManagerError> {
        Ok(self.runtime(runtime_type)?.info())
    }

    pub fn all_info(&self) -> Vec<RuntimeInfo> {
        self.runtimes.values().map(|runtime| runtime.info()).collect()
    }
}

impl Default for RuntimeManager {
    fn default() -> Self {
        Self::new()
    }
}
