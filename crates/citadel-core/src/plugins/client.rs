//! Host-side connection to a single plugin process.

use serde_json::Value;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, Lines};
use tokio::process::{Child, ChildStdin, ChildStdout, Command};
use tokio::sync::Mutex;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::errors::PluginError;
use crate::plugins::protocol::{check_announcement, Method, Request, Response};
use crate::plugins::{HandshakeConfig, NodeMetadata, PROTOCOL_VERSION_ENV};
use crate::runtimes::Inputs;

const SHUTDOWN_GRACE: Duration = Duration::from_secs(2);
// Roughly thirty years, the same horizon tokio uses for an unset deadline.
const FAR_FUTURE_SECS: u64 = 86_400 * 365 * 30;

enum Wake {
    Line(std::io::Result<Option<String>>),
    Cancelled,
    TimedOut,
}

struct Connection {
    child: Child,
    stdin: ChildStdin,
    stdout: Lines<BufReader<ChildStdout>>,
}

/// A launched plugin. Calls are serialized; each one waits for its response
/// before the next request is written.
pub struct PluginClient {
    path: PathBuf,
    connection: Mutex<Connection>,
    broken: AtomicBool,
    next_id: AtomicU64,
    call_timeout: Duration,
}

impl PluginClient {
    /// Spawn the plugin at `path` and complete the handshake.
    pub async fn launch(
        path: &Path,
        handshake: &HandshakeConfig,
        handshake_timeout: Duration,
        call_timeout: Duration,
    ) -> Result<Self, PluginError> {
        let mut command = Command::new(path);
        command
            .env(&handshake.magic_cookie_key, &handshake.magic_cookie_value)
            .env(PROTOCOL_VERSION_ENV, handshake.protocol_version.to_string())
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        log::info!("launching plugin {}", path.display());
        let mut child = command.spawn().map_err(|source| PluginError::Spawn {
            path: path.display().to_string(),
            source,
        })?;

        let (Some(stdin), Some(stdout), stderr) = (child.stdin.take(), child.stdout.take(), child.stderr.take())
        else {
            return Err(PluginError::Transport("plugin pipes were not captured".to_string()));
        };
        if let Some(stderr) = stderr {
            forward_stderr(path, stderr);
        }

        let mut stdout = BufReader::new(stdout).lines();
        let announcement = match tokio::time::timeout(handshake_timeout, stdout.next_line()).await {
            Ok(Ok(Some(line))) => line,
            Ok(Ok(None)) => {
                let status = child.wait().await.ok();
                return Err(PluginError::Handshake(format!(
                    "plugin exited before completing the handshake ({})",
                    status.map_or_else(|| "unknown status".to_string(), |s| s.to_string())
                )));
            }
            Ok(Err(e)) => {
                let _ = child.start_kill();
                return Err(PluginError::Handshake(e.to_string()));
            }
            Err(_) => {
                let _ = child.start_kill();
                return Err(PluginError::Handshake(format!(
                    "no handshake within {:?}",
                    handshake_timeout
                )));
            }
        };

        if let Err(e) = check_announcement(&announcement, handshake) {
            let _ = child.start_kill();
            return Err(e);
        }
        log::debug!("plugin {} completed handshake", path.display());

        Ok(Self {
            path: path.to_path_buf(),
            connection: Mutex::new(Connection { child, stdin, stdout }),
            broken: AtomicBool::new(false),
            next_id: AtomicU64::new(1),
            call_timeout,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// False once a transport failure, timeout or shutdown ended the connection.
    pub fn is_alive(&self) -> bool {
        !self.broken.load(Ordering::Acquire)
    }

    pub async fn execute(&self, cancel: &CancellationToken, inputs: Inputs) -> Result<Inputs, PluginError> {
        match self.call(cancel, Method::Execute, Value::Object(inputs)).await? {
            Value::Object(outputs) => Ok(outputs),
            Value::Null => Ok(Inputs::new()),
            other => Err(PluginError::Transport(format!(
                "execute returned a non-object result: {}",
                other
            ))),
        }
    }

    pub async fn config_schema(&self) -> Result<Value, PluginError> {
        self.call(&CancellationToken::new(), Method::GetConfigSchema, Value::Null)
            .await
    }

    pub async fn metadata(&self) -> Result<NodeMetadata, PluginError> {
        let value = self
            .call(&CancellationToken::new(), Method::GetMetadata, Value::Null)
            .await?;
        serde_json::from_value(value).map_err(|e| PluginError::Transport(format!("invalid metadata: {}", e)))
    }

    /// Ask the plugin to exit, killing it if it does not within a short grace.
    pub async fn shutdown(&self) {
        if self.is_alive() {
            let token = CancellationToken::new();
            let request = self.call_with_timeout(&token, Method::Shutdown, Value::Null, SHUTDOWN_GRACE);
            if let Err(e) = request.await {
                log::debug!("plugin {} did not acknowledge shutdown: {}", self.path.display(), e);
            }
        }
        self.broken.store(true, Ordering::Release);

        let mut connection = self.connection.lock().await;
        if tokio::time::timeout(SHUTDOWN_GRACE, connection.child.wait()).await.is_err() {
            log::warn!("plugin {} ignored shutdown, killing it", self.path.display());
            let _ = connection.child.kill().await;
        }
    }

    pub async fn call(&self, cancel: &CancellationToken, method: Method, params: Value) -> Result<Value, PluginError> {
        self.call_with_timeout(cancel, method, params, self.call_timeout).await
    }

    async fn call_with_timeout(
        &self,
        cancel: &CancellationToken,
        method: Method,
        params: Value,
        timeout: Duration,
    ) -> Result<Value, PluginError> {
        let mut connection = self.connection.lock().await;
        if !self.is_alive() {
            return Err(PluginError::Transport(format!(
                "connection to plugin {} is closed",
                self.path.display()
            )));
        }

        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let request = Request { id, method, params };
        let mut line = serde_json::to_string(&request).map_err(|e| PluginError::Transport(e.to_string()))?;
        line.push('\n');

        // The deadline covers the write: a plugin that stops reading fills the pipe.
        let deadline = deadline_after(timeout);
        let failure = tokio::select! {
            biased;
            _ = cancel.cancelled() => Some(PluginError::Cancelled(method.as_str().to_string())),
            _ = tokio::time::sleep_until(deadline) => Some(PluginError::Timeout {
                method: method.as_str().to_string(),
                timeout,
            }),
            result = write_line(&mut connection.stdin, &line) => {
                result.err().map(|e| PluginError::Transport(e.to_string()))
            }
        };
        if let Some(err) = failure {
            return Err(self.break_connection(&mut connection, err));
        }

        loop {
            let wake = tokio::select! {
                biased;
                _ = cancel.cancelled() => Wake::Cancelled,
                _ = tokio::time::sleep_until(deadline) => Wake::TimedOut,
                next = connection.stdout.next_line() => Wake::Line(next),
            };

            let line = match wake {
                Wake::Line(Ok(Some(line))) => line,
                Wake::Line(Ok(None)) => {
                    let err = PluginError::Transport("plugin closed its output".to_string());
                    return Err(self.break_connection(&mut connection, err));
                }
                Wake::Line(Err(e)) => {
                    return Err(self.break_connection(&mut connection, PluginError::Transport(e.to_string())));
                }
                Wake::Cancelled => {
                    let err = PluginError::Cancelled(method.as_str().to_string());
                    return Err(self.break_connection(&mut connection, err));
                }
                Wake::TimedOut => {
                    let err = PluginError::Timeout {
                        method: method.as_str().to_string(),
                        timeout,
                    };
                    return Err(self.break_connection(&mut connection, err));
                }
            };
            if line.trim().is_empty() {
                continue;
            }

            let response: Response = match serde_json::from_str(&line) {
                Ok(response) => response,
                Err(e) => {
                    let err = PluginError::Transport(format!("malformed response: {}", e));
                    return Err(self.break_connection(&mut connection, err));
                }
            };
            if response.id != id {
                log::warn!(
                    "plugin {} answered request {} while {} was pending",
                    self.path.display(),
                    response.id,
                    id
                );
                continue;
            }

            return match response.error {
                Some(message) => Err(PluginError::Remote(message)),
                None => Ok(response.result.unwrap_or(Value::Null)),
            };
        }
    }

    fn break_connection(&self, connection: &mut Connection, err: PluginError) -> PluginError {
        log::warn!("plugin {} connection closed: {}", self.path.display(), err);
        self.broken.store(true, Ordering::Release);
        let _ = connection.child.start_kill();
        err
    }
}

/// `timeout` from now, saturating at a far-off instant instead of overflowing.
fn deadline_after(timeout: Duration) -> Instant {
    let now = Instant::now();
    now.checked_add(timeout)
        .unwrap_or_else(|| now + Duration::from_secs(FAR_FUTURE_SECS))
}

async fn write_line(stdin: &mut ChildStdin, line: &str) -> std::io::Result<()> {
    stdin.write_all(line.as_bytes()).await?;
    stdin.flush().await
}

fn forward_stderr(path: &Path, stderr: tokio::process::ChildStderr) {
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string());
    tokio::spawn(async move {
        let mut lines = BufReader::new(stderr).lines();
        while let Ok(Some(line)) = lines.next_line().await {
            log::info!("[plugin {}] {}", name, line);
        }
    });
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use std::io::Write;
    use std::os::unix::fs::PermissionsExt;
    use tempfile::TempDir;

    /// Write an executable shell script standing in for a plugin binary.
    fn fake_plugin(dir: &TempDir, body: &str) -> PathBuf {
        let path = dir.path().join("fake-plugin");
        let mut file = std::fs::File::create(&path).unwrap();
        writeln!(file, "#!/bin/sh").unwrap();
        writeln!(file, "{}", body).unwrap();
        drop(file);
        let mut perms = std::fs::metadata(&path).unwrap().permissions();
        perms.set_mode(0o755);
        std::fs::set_permissions(&path, perms).unwrap();
        path
    }

    async fn launch(path: &Path, handshake_timeout: Duration) -> Result<PluginClient, PluginError> {
        PluginClient::launch(
            path,
            &HandshakeConfig::default(),
            handshake_timeout,
            Duration::from_secs(2),
        )
        .await
    }

    #[tokio::test]
    async fn test_silent_plugin_times_out_handshake() {
        let dir = TempDir::new().unwrap();
        let path = fake_plugin(&dir, "sleep 30");
        let started = std::time::Instant::now();
        let err = launch(&path, Duration::from_millis(300)).await.err().unwrap();
        assert!(matches!(err, PluginError::Handshake(_)));
        assert!(started.elapsed() < Duration::from_secs(5));
    }

    #[tokio::test]
    async fn test_wrong_version_is_rejected() {
        let dir = TempDir::new().unwrap();
        let path = fake_plugin(&dir, "echo '1|9|stdio'\nsleep 30");
        let err = launch(&path, Duration::from_secs(5)).await.err().unwrap();
        assert!(err.is_protocol_error());
        assert!(err.to_string().contains("protocol version 9"));
    }

    #[tokio::test]
    async fn test_plugin_exiting_early_is_a_handshake_error() {
        let dir = TempDir::new().unwrap();
        let path = fake_plugin(&dir, "echo 'refusing' >&2\nexit 1");
        let err = launch(&path, Duration::from_secs(5)).await.err().unwrap();
        assert!(matches!(err, PluginError::Handshake(ref m) if m.contains("exited")));
    }

    #[tokio::test]
    async fn test_cookie_is_passed_in_the_environment() {
        let dir = TempDir::new().unwrap();
        let path = fake_plugin(
            &dir,
            "[ \"$CITADEL_PLUGIN\" = citadel_agent ] || exit 1\n\
             [ \"$CITADEL_PLUGIN_PROTOCOL_VERSION\" = 1 ] || exit 1\n\
             echo '1|1|stdio'\n\
             read line\n\
             echo '{\"id\":1,\"result\":{\"ok\":true}}'\n\
             sleep 30",
        );
        let client = launch(&path, Duration::from_secs(5)).await.unwrap();
        let outputs = client
            .execute(&CancellationToken::new(), Inputs::new())
            .await
            .unwrap();
        assert_eq!(outputs.get("ok"), Some(&Value::Bool(true)));
        client.shutdown().await;
        assert!(!client.is_alive());
    }

    #[tokio::test]
    async fn test_stalled_call_times_out_and_breaks_the_client() {
        let dir = TempDir::new().unwrap();
        let path = fake_plugin(&dir, "echo '1|1|stdio'\nsleep 30");
        let client = launch(&path, Duration::from_secs(5)).await.unwrap();

        let err = client.metadata().await.unwrap_err();
        assert!(matches!(err, PluginError::Timeout { .. }));
        assert!(!client.is_alive());

        let err = client.config_schema().await.unwrap_err();
        assert!(matches!(err, PluginError::Transport(_)));
    }

    #[tokio::test]
    async fn test_plugin_that_stops_reading_times_out_the_write() {
        let dir = TempDir::new().unwrap();
        let path = fake_plugin(&dir, "echo '1|1|stdio'\nsleep 30");
        let client = launch(&path, Duration::from_secs(5)).await.unwrap();

        let mut inputs = Inputs::new();
        inputs.insert("blob".to_string(), Value::String("x".repeat(8 * 1024 * 1024)));
        let cancel = CancellationToken::new();
        let call = client.execute(&cancel, inputs);
        let err = tokio::time::timeout(Duration::from_secs(10), call)
            .await
            .expect("the call deadline should bound the write")
            .unwrap_err();
        assert!(matches!(err, PluginError::Timeout { .. }), "{:?}", err);
        assert!(!client.is_alive());
    }

    #[tokio::test]
    async fn test_cancel_interrupts_a_blocked_write() {
        let dir = TempDir::new().unwrap();
        let path = fake_plugin(&dir, "echo '1|1|stdio'\nsleep 30");
        let client = PluginClient::launch(
            &path,
            &HandshakeConfig::default(),
            Duration::from_secs(5),
            Duration::from_secs(600),
        )
        .await
        .unwrap();

        let token = CancellationToken::new();
        let canceller = token.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(200)).await;
            canceller.cancel();
        });
        let mut inputs = Inputs::new();
        inputs.insert("blob".to_string(), Value::String("x".repeat(8 * 1024 * 1024)));
        let err = tokio::time::timeout(Duration::from_secs(10), client.execute(&token, inputs))
            .await
            .expect("cancellation should interrupt the write")
            .unwrap_err();
        assert!(matches!(err, PluginError::Cancelled(_)), "{:?}", err);
        assert!(!client.is_alive());
    }

    #[test]
    fn test_huge_timeout_saturates_the_deadline() {
        let now = Instant::now();
        assert!(deadline_after(Duration::MAX) > now + Duration::from_secs(86_400 * 365));
        assert!(deadline_after(Duration::from_secs(1)) <= Instant::now() + Duration::from_secs(1));
    }

    #[tokio::test]
    async fn test_remote_error_keeps_the_client_usable() {
        let dir = TempDir::new().unwrap();
        let path = fake_plugin(
            &dir,
            "echo '1|1|stdio'\n\
             read line\n\
             echo '{\"id\":1,\"error\":\"bad input\"}'\n\
             read line\n\
             echo '{\"id\":2,\"result\":{}}'\n\
             sleep 30",
        );
        let client = launch(&path, Duration::from_secs(5)).await.unwrap();
        let token = CancellationToken::new();

        let err = client.execute(&token, Inputs::new()).await.unwrap_err();
        assert!(matches!(err, PluginError::Remote(ref m) if m == "bad input"));
        assert!(client.is_alive());
        assert!(client.execute(&token, Inputs::new()).await.unwrap().is_empty());
    }
}
