//! Worker process handle.
//!
//! Wraps the long-running `hako-stack up` child: spawns it with piped
//! stdio, pumps stdout/stderr into the shared log buffer, and watches
//! for exit so the status cell never claims a dead worker is running.

use std::process::Stdio;
use std::sync::Arc;

use sysinfo::{Pid, System};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::Command;
use tokio::sync::{watch, Mutex, RwLock};
use tracing::{debug, info, warn};

use crate::error::CoreError;

use super::logs::{error_headline, LogBuffer, LogChannel};
use super::state_machine::State;
use super::StatusCell;

/// Directories prepended to PATH for every worker invocation.
/// GUI-launched processes do not inherit the login shell PATH, so the
/// usual Homebrew locations have to be supplied explicitly.
const EXTRA_PATH_ENTRIES: &[&str] = &["/usr/local/bin", "/opt/homebrew/bin"];

// ─────────────────────────────────────────────
// WorkerHandle
// ─────────────────────────────────────────────

/// Handle to a spawned worker. The child itself is owned by the waiter
/// task; the handle only keeps the PID and a liveness flag.
pub struct WorkerHandle {
    pid: u32,
    running: watch::Receiver<bool>,
}

impl WorkerHandle {
    /// Spawns `<command> up` and wires the monitoring tasks.
    ///
    /// Three tasks are started: stdout reader, stderr reader (which also
    /// refreshes the error headline), and a waiter that reaps the child.
    /// On an exit that was not requested through `stop()`, the waiter
    /// demotes the status cell to `Stopped` and clears the PID.
    pub fn spawn(
        command: &str,
        logs: Arc<Mutex<LogBuffer>>,
        status: Arc<RwLock<StatusCell>>,
        last_error: Arc<Mutex<Option<String>>>,
    ) -> Result<WorkerHandle, CoreError> {
        info!("[Worker] Spawning: {} up", command);

        let mut cmd = Command::new(command);
        cmd.arg("up")
            .env("PATH", augmented_path())
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            // The worker must outlive this handle; stop() ends it.
            .kill_on_drop(false);

        let mut child = cmd.spawn().map_err(|e| {
            CoreError::CommandFailed(format!("Failed to spawn `{} up`: {}", command, e))
        })?;

        let pid = child.id().ok_or_else(|| {
            CoreError::CommandFailed("Worker exited before a PID could be read".to_string())
        })?;
        info!("[Worker] Spawned with PID {}", pid);

        let (running_tx, running_rx) = watch::channel(true);

        if let Some(stdout) = child.stdout.take() {
            let logs = Arc::clone(&logs);
            tokio::spawn(async move {
                let mut lines = BufReader::new(stdout).lines();
                while let Ok(Some(line)) = lines.next_line().await {
                    debug!("[Worker stdout] {}", line);
                    logs.lock().await.push(LogChannel::Stdout, line);
                }
            });
        }

        if let Some(stderr) = child.stderr.take() {
            let logs = Arc::clone(&logs);
            let last_error = Arc::clone(&last_error);
            tokio::spawn(async move {
                let mut lines = BufReader::new(stderr).lines();
                while let Ok(Some(line)) = lines.next_line().await {
                    debug!("[Worker stderr] {}", line);
                    *last_error.lock().await = Some(error_headline(&line));
                    logs.lock().await.push(LogChannel::Stderr, line);
                }
            });
        }

        tokio::spawn(async move {
            let message = match child.wait().await {
                Ok(status) => format!("Worker exited with status: {}", status),
                Err(e) => format!("Failed to wait for worker: {}", e),
            };
            info!("[Worker] {}", message);
            logs.lock().await.push(LogChannel::System, message.clone());

            // One write lock for the whole check-and-transition. During
            // Stopping the exit is expected and stop() owns the final
            // transition; any other live state means the worker died on
            // its own.
            let mut cell = status.write().await;
            let unexpected = matches!(cell.machine.state, State::Starting | State::Running);
            if unexpected {
                if let Err(e) = cell.machine.transition(State::Stopped) {
                    warn!("[Worker] Failed to record exit: {}", e);
                }
                cell.pid = None;
            }
            drop(cell);

            if unexpected {
                let mut slot = last_error.lock().await;
                if slot.is_none() {
                    *slot = Some(message);
                }
            }

            let _ = running_tx.send(false);
        });

        Ok(WorkerHandle {
            pid,
            running: running_rx,
        })
    }

    pub fn pid(&self) -> u32 {
        self.pid
    }

    /// True while the waiter task has not reaped the child.
    pub fn is_running(&self) -> bool {
        *self.running.borrow()
    }

    /// Blocks until the waiter task reports the child gone.
    pub async fn wait_stopped(&mut self) {
        while *self.running.borrow() {
            if self.running.changed().await.is_err() {
                break;
            }
        }
    }
}

// ─────────────────────────────────────────────
// One-shot commands
// ─────────────────────────────────────────────

/// Runs `<command> <args..>` to completion, pumping its output into the
/// shared log buffer. Used for the `down` side of the worker contract.
pub async fn run_logged(
    command: &str,
    args: &[&str],
    logs: Arc<Mutex<LogBuffer>>,
) -> Result<std::process::ExitStatus, CoreError> {
    debug!("[Worker] Running: {} {}", command, args.join(" "));

    let mut cmd = Command::new(command);
    cmd.args(args)
        .env("PATH", augmented_path())
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    let mut child = cmd.spawn().map_err(|e| {
        CoreError::CommandFailed(format!(
            "Failed to spawn `{} {}`: {}",
            command,
            args.join(" "),
            e
        ))
    })?;

    if let Some(stdout) = child.stdout.take() {
        let logs = Arc::clone(&logs);
        tokio::spawn(async move {
            let mut lines = BufReader::new(stdout).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                logs.lock().await.push(LogChannel::Stdout, line);
            }
        });
    }

    if let Some(stderr) = child.stderr.take() {
        let logs = Arc::clone(&logs);
        tokio::spawn(async move {
            let mut lines = BufReader::new(stderr).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                logs.lock().await.push(LogChannel::Stderr, line);
            }
        });
    }

    child
        .wait()
        .await
        .map_err(|e| CoreError::CommandFailed(format!("Failed to wait for `{}`: {}", command, e)))
}

/// Prepends the well-known tool directories to the inherited PATH.
pub(crate) fn augmented_path() -> String {
    let extra = EXTRA_PATH_ENTRIES.join(":");
    match std::env::var("PATH") {
        Ok(current) if !current.is_empty() => format!("{}:{}", extra, current),
        _ => extra,
    }
}

// ─────────────────────────────────────────────
// PID helpers
// ─────────────────────────────────────────────

/// Checks whether a PID is still present in the process table.
pub fn is_pid_alive(pid: u32) -> bool {
    let mut sys = System::new();
    sys.refresh_processes();
    sys.process(Pid::from_u32(pid)).is_some()
}

/// 비동기 컨텍스트용 래퍼.
/// sysinfo의 프로세스 테이블 갱신은 블로킹 호출이라 tokio 워커 스레드를
/// 점유하지 않도록 spawn_blocking으로 감싼다.
pub async fn is_pid_alive_async(pid: u32) -> bool {
    tokio::task::spawn_blocking(move || is_pid_alive(pid))
        .await
        .unwrap_or(false)
}

/// Sends SIGKILL to a PID that ignored the graceful stop path.
pub fn force_kill_pid(pid: u32) -> Result<(), CoreError> {
    #[cfg(unix)]
    {
        use nix::sys::signal::{self, Signal};
        use nix::unistd::Pid;

        warn!("[Worker] Force killing PID {}", pid);
        signal::kill(Pid::from_raw(pid as i32), Signal::SIGKILL)
            .map_err(|e| CoreError::CommandFailed(format!("kill({}) failed: {}", pid, e)))
    }

    #[cfg(not(unix))]
    {
        let _ = pid;
        Err(CoreError::Unsupported)
    }
}

// ─────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────
