use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, PoisonError};
use std::time::{Duration, Instant};
use tempfile::TempDir;
use tokio::process::Command;
use tokio_util::sync::CancellationToken;
use which::which;

use crate::config::{RuntimeSettings, ToolchainOverride};
use crate::errors::{Phase, RuntimeError};
use crate::runtimes::languages::{spec_for, CompilePlan, Compiled, Interpreted, LanguageSpec, Strategy};
use crate::runtimes::process::{self, Captured, Outcome};
use crate::runtimes::stats::StatsRecorder;
use crate::runtimes::wrappers::extract_result;
use crate::runtimes::{
    ExecutionResult, Inputs, Runtime, RuntimeInfo, RuntimeStatus, RuntimeType, INPUTS_ENV_VAR,
};

const PROBE_TIMEOUT: Duration = Duration::from_secs(10);

/// Executables resolved by a successful probe.
#[derive(Debug, Clone)]
struct Toolchain {
    program: PathBuf,
    runner: Option<PathBuf>,
    version: Option<String>,
}

/// Everything one call needs once its workspace exists.
struct Call<'a> {
    toolchain: &'a Toolchain,
    workdir: &'a Path,
    cancel: &'a CancellationToken,
    code: &'a str,
    inputs_json: &'a str,
    timeout: Duration,
}

/// The shared execution skeleton, specialized by a [`LanguageSpec`].
pub struct LanguageRuntime {
    spec: &'static LanguageSpec,
    overrides: ToolchainOverride,
    temp_root: Option<PathBuf>,
    compile_ratio: f64,
    ready: AtomicBool,
    toolchain: Mutex<Option<Toolchain>>,
    stats: StatsRecorder,
}

impl LanguageRuntime {
    pub fn new(runtime: RuntimeType) -> Self {
        Self::with_settings(runtime, &RuntimeSettings::default())
    }

    pub fn with_settings(runtime: RuntimeType, settings: &RuntimeSettings) -> Self {
        Self {
            spec: spec_for(runtime),
            overrides: settings.toolchain(runtime).cloned().unwrap_or_default(),
            temp_root: settings.temp_root.clone(),
            compile_ratio: settings.compile_timeout_ratio,
            ready: AtomicBool::new(false),
            toolchain: Mutex::new(None),
            stats: StatsRecorder::new(),
        }
    }

    pub fn spec(&self) -> &'static LanguageSpec {
        self.spec
    }

    fn program_name(&self) -> &str {
        self.overrides
            .program
            .as_deref()
            .unwrap_or_else(|| self.spec.primary_program())
    }

    fn runner_name(&self) -> Option<&str> {
        self.overrides.runner.as_deref().or_else(|| self.spec.runner())
    }

    fn unavailable(&self, message: String) -> RuntimeError {
        RuntimeError::ToolchainUnavailable {
            runtime: self.spec.runtime,
            message,
        }
    }

    fn resolve(&self, tool: &str) -> Result<PathBuf, RuntimeError> {
        which(tool).map_err(|e| self.unavailable(format!("'{}' not found: {}", tool, e)))
    }

    fn current_toolchain(&self) -> Result<Toolchain, RuntimeError> {
        let not_ready = || RuntimeError::NotReady {
            runtime: self.spec.runtime,
        };
        if !self.ready.load(Ordering::Acquire) {
            return Err(not_ready());
        }
        self.toolchain
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
            .ok_or_else(not_ready)
    }

    fn create_workspace(&self) -> Result<TempDir, RuntimeError> {
        let prefix = format!("citadel-{}-", self.spec.runtime);
        let mut builder = tempfile::Builder::new();
        builder.prefix(&prefix);
        let workspace = match &self.temp_root {
            Some(root) => builder.tempdir_in(root),
            None => builder.tempdir(),
        };
        workspace.map_err(|source| RuntimeError::Staging {
            runtime: self.spec.runtime,
            source,
        })
    }

    fn write_file(&self, dir: &Path, name: &str, contents: &str) -> Result<PathBuf, RuntimeError> {
        let path = dir.join(name);
        std::fs::write(&path, contents).map_err(|source| RuntimeError::Staging {
            runtime: self.spec.runtime,
            source,
        })?;
        Ok(path)
    }

    fn command(&self, program: &Path, workdir: &Path, inputs_json: &str) -> Command {
        let mut command = Command::new(program);
        command.current_dir(workdir).env(INPUTS_ENV_VAR, inputs_json);
        command
    }

    async fn spawn(
        &self,
        command: Command,
        cancel: &CancellationToken,
        budget: Duration,
    ) -> Result<Captured, RuntimeError> {
        let program = command.as_std().get_program().to_string_lossy().into_owned();
        process::run(command, cancel, budget)
            .await
            .map_err(|source| RuntimeError::Spawn { program, source })
    }

    /// Map a non-success outcome of `phase` to its error.
    fn failure(&self, phase: Phase, budget: Duration, captured: Captured) -> RuntimeError {
        let runtime = self.spec.runtime;
        match captured.outcome {
            Outcome::TimedOut => RuntimeError::Timeout {
                runtime,
                phase,
                timeout: budget,
                stdout: captured.stdout,
                stderr: captured.stderr,
            },
            Outcome::Cancelled => RuntimeError::Cancelled {
                runtime,
                phase,
                stdout: captured.stdout,
                stderr: captured.stderr,
            },
            Outcome::Exited { .. } if phase == Phase::Compile => RuntimeError::Compile {
                runtime,
                output: captured.combined(),
            },
            Outcome::Exited { code, .. } => RuntimeError::Execution {
                runtime,
                exit_code: code,
                stdout: captured.stdout,
                stderr: captured.stderr,
            },
        }
    }

    async fn run_interpreted(
        &self,
        interpreted: &Interpreted,
        call: Call<'_>,
    ) -> Result<(String, String, Option<serde_json::Value>), RuntimeError> {
        let script = (interpreted.wrap)(call.code, call.inputs_json);
        let script_path = self.write_file(call.workdir, interpreted.script, &script)?;

        let mut command = self.command(&call.toolchain.program, call.workdir, call.inputs_json);
        command.args(interpreted.args).arg(&script_path);

        let captured = self.spawn(command, call.cancel, call.timeout).await?;
        if !captured.succeeded() {
            return Err(self.failure(Phase::Execute, call.timeout, captured));
        }

        let (stdout, result) = extract_result(&captured.stdout);
        Ok((stdout, captured.stderr, result))
    }

    async fn run_compiled(
        &self,
        compiled: &Compiled,
        call: Call<'_>,
    ) -> Result<(String, String, Option<serde_json::Value>), RuntimeError> {
        let plan: CompilePlan = (compiled.plan)(call.code);
        for file in &plan.files {
            self.write_file(call.workdir, &file.name, &file.contents)?;
        }

        let compile_budget = call.timeout.mul_f64(self.compile_ratio);
        let compile_started = Instant::now();
        let mut compile = self.command(&call.toolchain.program, call.workdir, call.inputs_json);
        compile.args(&plan.compile_args);

        let captured = self.spawn(compile, call.cancel, compile_budget).await?;
        if !captured.succeeded() {
            return Err(self.failure(Phase::Compile, compile_budget, captured));
        }

        let run_budget = call.timeout.saturating_sub(compile_started.elapsed());
        let artifact = call.workdir.join(plan.artifact);
        let program = call.toolchain.runner.as_deref().unwrap_or(&artifact);
        let mut run = self.command(program, call.workdir, call.inputs_json);
        run.args(&plan.run_args);

        let captured = self.spawn(run, call.cancel, run_budget).await?;
        if !captured.succeeded() {
            return Err(self.failure(Phase::Execute, run_budget, captured));
        }
        Ok((captured.stdout, captured.stderr, None))
    }

    async fn execute_staged(
        &self,
        cancel: &CancellationToken,
        code: &str,
        inputs: &Inputs,
        timeout: Duration,
    ) -> Result<ExecutionResult, RuntimeError> {
        let toolchain = self.current_toolchain()?;
        let inputs_json = serde_json::to_string(inputs)?;
        let started = Instant::now();

        // Removed on drop, whichever way this call ends.
        let workspace = self.create_workspace()?;
        log::debug!(
            "running {} snippet in {}",
            self.spec.runtime,
            workspace.path().display()
        );

        let call = Call {
            toolchain: &toolchain,
            workdir: workspace.path(),
            cancel,
            code,
            inputs_json: &inputs_json,
            timeout,
        };
        let outcome = match &self.spec.strategy {
            Strategy::Interpreted(interpreted) => self.run_interpreted(interpreted, call).await,
            Strategy::Compiled(compiled) => self.run_compiled(compiled, call).await,
        };

        if let Err(e) = workspace.close() {
            log::warn!("failed to remove {} workspace: {}", self.spec.runtime, e);
        }

        let (stdout, stderr, result) = outcome?;
        Ok(ExecutionResult {
            runtime: self.spec.runtime,
            stdout,
            stderr,
            inputs: inputs.clone(),
            result,
            duration: started.elapsed(),
        })
    }
}

#[async_trait]
impl Runtime for LanguageRuntime {
    fn runtime_type(&self) -> RuntimeType {
        self.spec.runtime
    }

    fn validate_code(&self, code: &str) -> Result<(), RuntimeError> {
        self.spec.validate(code)
    }

    async fn execute_code(
        &self,
        cancel: &CancellationToken,
        code: &str,
        inputs: &Inputs,
        timeout: Duration,
    ) -> Result<ExecutionResult, RuntimeError> {
        if !self.ready.load(Ordering::Acquire) {
            return Err(RuntimeError::NotReady {
                runtime: self.spec.runtime,
            });
        }

        let started = Instant::now();
        let result = self.execute_staged(cancel, code, inputs, timeout).await;
        self.stats.record(started.elapsed(), result.is_ok());
        result
    }

    async fn initialize(&self) -> Result<(), RuntimeError> {
        let program = self.resolve(self.program_name())?;
        let runner = match self.runner_name() {
            Some(name) => Some(self.resolve(name)?),
            None => None,
        };

        let mut probe = Command::new(&program);
        probe.args(self.spec.probe_args);
        let captured = process::run(probe, &CancellationToken::new(), PROBE_TIMEOUT)
            .await
            .map_err(|e| self.unavailable(format!("failed to run {}: {}", program.display(), e)))?;
        if !captured.succeeded() {
            return Err(self.unavailable(format!(
                "{} probe failed: {}",
                program.display(),
                captured.combined().trim()
            )));
        }

        let version = captured
            .stdout
            .lines()
            .chain(captured.stderr.lines())
            .map(str::trim)
            .find(|line| !line.is_empty())
            .map(str::to_string);

        log::info!(
            "{} runtime ready ({})",
            self.spec.name,
            version.as_deref().unwrap_or("unknown version")
        );
        *self.toolchain.lock().unwrap_or_else(PoisonError::into_inner) = Some(Toolchain {
            program,
            runner,
            version,
        });
        self.ready.store(true, Ordering::Release);
        Ok(())
    }

    async fn dispose(&self) -> Result<(), RuntimeError> {
        if self.ready.swap(false, Ordering::AcqRel) {
            log::info!("{} runtime disposed", self.spec.name);
        }
        Ok(())
    }

    fn info(&self) -> RuntimeInfo {
        let ready = self.ready.load(Ordering::Acquire);
        let version = self
            .toolchain
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .and_then(|t| t.version.clone());
        RuntimeInfo {
            runtime: self.spec.runtime,
            name: self.spec.name.to_string(),
            version,
            status: if ready {
                RuntimeStatus::Ready
            } else {
                RuntimeStatus::Uninitialized
            },
            stats: self.stats.snapshot(),
        }
    }
}
