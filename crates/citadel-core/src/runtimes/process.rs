//! Subprocess execution bound to a deadline and a cancellation token.
//!
//! Children run in their own process group. On deadline or cancellation the
//! group is killed before the leader is reaped. After a normal exit the group
//! is only killed when grandchildren still hold the output pipes; a live member
//! keeps the group id from being reused.

use std::process::Stdio;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::Command;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Maximum bytes captured per stream (1 MiB). The rest is read and dropped.
pub const MAX_OUTPUT_BYTES: usize = 1024 * 1024;

/// How long output readers may keep running after the child is gone.
const DRAIN_GRACE: Duration = Duration::from_secs(2);

/// How long the pipes may stay open after a normal exit before the rest of
/// the group is killed.
const EXIT_SETTLE: Duration = Duration::from_millis(100);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Exited { code: Option<i32>, success: bool },
    TimedOut,
    Cancelled,
}

#[derive(Debug, Clone)]
pub struct Captured {
    pub outcome: Outcome,
    pub stdout: String,
    pub stderr: String,
}

impl Captured {
    pub fn succeeded(&self) -> bool {
        matches!(self.outcome, Outcome::Exited { success: true, .. })
    }

    /// Stdout followed by stderr, as compilers are usually read.
    pub fn combined(&self) -> String {
        match (self.stdout.is_empty(), self.stderr.is_empty()) {
            (true, _) => self.stderr.clone(),
            (false, true) => self.stdout.clone(),
            (false, false) => format!("{}\n{}", self.stdout.trim_end(), self.stderr),
        }
    }
}

/// Run `command` to completion, for at most `budget`.
///
/// Only a failure to spawn is an `Err`; deadline and cancellation are
/// reported through [`Outcome`] together with the output captured so far.
pub async fn run(
    mut command: Command,
    cancel: &CancellationToken,
    budget: Duration,
) -> std::io::Result<Captured> {
    command
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);
    #[cfg(unix)]
    command.process_group(0);

    log::debug!("spawning {:?} with budget {:?}", command.as_std(), budget);
    let mut child = command.spawn()?;
    let pid = child.id();

    let stdout_buf = Arc::new(Mutex::new(Vec::new()));
    let stderr_buf = Arc::new(Mutex::new(Vec::new()));
    let stdout_task = spawn_reader(child.stdout.take(), Arc::clone(&stdout_buf));
    let stderr_task = spawn_reader(child.stderr.take(), Arc::clone(&stderr_buf));

    let outcome = tokio::select! {
        biased;
        status = child.wait() => {
            let status = status?;
            Outcome::Exited { code: status.code(), success: status.success() }
        }
        _ = cancel.cancelled() => Outcome::Cancelled,
        _ = tokio::time::sleep(budget) => Outcome::TimedOut,
    };

    let aborts = [stdout_task.abort_handle(), stderr_task.abort_handle()];
    let mut readers = Box::pin(async move {
        let _ = tokio::join!(stdout_task, stderr_task);
    });

    let drained = match outcome {
        Outcome::Exited { .. } => {
            let settled = tokio::time::timeout(EXIT_SETTLE, &mut readers).await.is_ok();
            if !settled {
                kill_group(pid);
            }
            settled
        }
        Outcome::TimedOut | Outcome::Cancelled => {
            kill_group(pid);
            let _ = child.start_kill();
            let _ = child.wait().await;
            false
        }
    };

    if !drained && tokio::time::timeout(DRAIN_GRACE, &mut readers).await.is_err() {
        log::debug!("output readers still open after {:?}, abandoning them", DRAIN_GRACE);
        for abort in aborts {
            abort.abort();
        }
    }

    Ok(Captured {
        outcome,
        stdout: take_string(&stdout_buf),
        stderr: take_string(&stderr_buf),
    })
}

fn spawn_reader<R>(stream: Option<R>, buf: Arc<Mutex<Vec<u8>>>) -> JoinHandle<()>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let Some(mut stream) = stream else {
            return;
        };
        let mut chunk = [0u8; 8192];
        let mut truncated = false;
        loop {
            match stream.read(&mut chunk).await {
                Ok(0) | Err(_) => break,
                Ok(n) => {
                    let mut buf = buf.lock().unwrap_or_else(PoisonError::into_inner);
                    let room = MAX_OUTPUT_BYTES.saturating_sub(buf.len());
                    if n > room && !truncated {
                        truncated = true;
                        log::warn!("subprocess output exceeded {} bytes, truncating", MAX_OUTPUT_BYTES);
                    }
                    buf.extend_from_slice(&chunk[..n.min(room)]);
                }
            }
        }
    })
}

fn take_string(buf: &Arc<Mutex<Vec<u8>>>) -> String {
    let bytes = std::mem::take(&mut *buf.lock().unwrap_or_else(PoisonError::into_inner));
    String::from_utf8_lossy(&bytes).into_owned()
}

#[cfg(unix)]
fn kill_group(pid: Option<u32>) {
    use nix::sys::signal::{killpg, Signal};
    use nix::unistd::Pid;

    let Some(pid) = pid.and_then(|p| i32::try_from(p).ok()) else {
        return;
    };
    match killpg(Pid::from_raw(pid), Signal::SIGKILL) {
        Ok(()) | Err(nix::errno::Errno::ESRCH) => {}
        Err(e) => log::warn!("failed to kill process group {}: {}", pid, e),
    }
}

#[cfg(not(unix))]
fn kill_group(_pid: Option<u32>) {}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use std::time::Instant;

    fn sh(script: &str) -> Command {
        let mut command = Command::new("sh");
        command.arg("-c").arg(script);
        command
    }

    #[tokio::test]
    async fn test_captures_both_streams() {
        let token = CancellationToken::new();
        let captured = run(sh("echo out; echo err >&2"), &token, Duration::from_secs(5))
            .await
            .unwrap();
        assert!(captured.succeeded());
        assert_eq!(captured.stdout, "out\n");
        assert_eq!(captured.stderr, "err\n");
    }

    #[tokio::test]
    async fn test_reports_exit_code() {
        let token = CancellationToken::new();
        let captured = run(sh("exit 3"), &token, Duration::from_secs(5)).await.unwrap();
        assert_eq!(
            captured.outcome,
            Outcome::Exited {
                code: Some(3),
                success: false
            }
        );
    }

    #[tokio::test]
    async fn test_deadline_kills_the_group() {
        let token = CancellationToken::new();
        let started = Instant::now();
        // The background sleep holds the pipes open unless the whole group dies.
        let captured = run(
            sh("echo started; sleep 30 & sleep 30"),
            &token,
            Duration::from_millis(300),
        )
        .await
        .unwrap();
        assert_eq!(captured.outcome, Outcome::TimedOut);
        assert_eq!(captured.stdout, "started\n");
        assert!(started.elapsed() < Duration::from_secs(5));
    }

    #[tokio::test]
    async fn test_background_child_holding_pipes_is_killed_after_exit() {
        let token = CancellationToken::new();
        let started = Instant::now();
        let captured = run(sh("echo done; sleep 30 &"), &token, Duration::from_secs(20))
            .await
            .unwrap();
        assert!(captured.succeeded());
        assert_eq!(captured.stdout, "done\n");
        assert!(started.elapsed() < Duration::from_secs(5));
    }

    #[tokio::test]
    async fn test_cancellation_is_distinct_from_timeout() {
        let token = CancellationToken::new();
        let trigger = token.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(100)).await;
            trigger.cancel();
        });
        let captured = run(sh("sleep 30"), &token, Duration::from_secs(20))
            .await
            .unwrap();
        assert_eq!(captured.outcome, Outcome::Cancelled);
    }

    #[tokio::test]
    async fn test_output_is_capped() {
        let token = CancellationToken::new();
        let captured = run(
            sh("head -c 3000000 /dev/zero | tr '\\0' a"),
            &token,
            Duration::from_secs(10),
        )
        .await
        .unwrap();
        assert!(captured.succeeded());
        assert_eq!(captured.stdout.len(), MAX_OUTPUT_BYTES);
    }

    #[tokio::test]
    async fn test_missing_program_is_a_spawn_error() {
        let token = CancellationToken::new();
        let result = run(
            Command::new("definitely-not-a-real-program-citadel"),
            &token,
            Duration::from_secs(1),
        )
        .await;
        assert!(result.is_err());
    }
}
