pub mod logs;
pub mod state_machine;
pub mod worker;

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{Mutex, RwLock};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::config::WorkerConfig;
use crate::error::CoreError;
use crate::health::HealthMonitor;

use logs::{LogBuffer, LogChannel, LogEntry};
use state_machine::{State, StateMachine, TransitionError};
use worker::WorkerHandle;

/// How long a fresh spawn has to survive before it counts as running.
const SPAWN_CONFIRM_DELAY: Duration = Duration::from_millis(500);

/// How long to wait for the waiter task to reap a force-killed worker.
const REAP_GRACE: Duration = Duration::from_secs(2);

/// 상태 머신과 그 상태가 가리키는 PID를 한 덩어리로 묶은 공유 셀.
/// 워커 exit 감시 태스크와 헬스 모니터가 같은 셀을 본다.
pub struct StatusCell {
    pub machine: StateMachine,
    pub pid: Option<u32>,
}

/// Owns the worker lifecycle: spawning `up`, running `down`, health
/// polling, and the shared log buffer the IPC surface reads from.
pub struct Supervisor {
    config: WorkerConfig,
    stack_command: String,
    status: Arc<RwLock<StatusCell>>,
    last_error: Arc<Mutex<Option<String>>>,
    logs: Arc<Mutex<LogBuffer>>,
    handle: Mutex<Option<WorkerHandle>>,
    poll_cancel: Mutex<Option<CancellationToken>>,
    health: HealthMonitor,
}

impl Supervisor {
    pub fn new(config: WorkerConfig) -> Self {
        let stack_command = config.resolve_stack_command();
        info!("[Supervisor] Worker command: {}", stack_command);

        let status = Arc::new(RwLock::new(StatusCell {
            machine: StateMachine::new(),
            pid: None,
        }));
        let logs = Arc::new(Mutex::new(LogBuffer::with_capacity(config.log_buffer_size)));
        let health = HealthMonitor::new(&config, Arc::clone(&status), Arc::clone(&logs));

        Self {
            config,
            stack_command,
            status,
            last_error: Arc::new(Mutex::new(None)),
            logs,
            handle: Mutex::new(None),
            poll_cancel: Mutex::new(None),
            health,
        }
    }

    /// Boot-time adoption. A worker left over from a previous session
    /// keeps serving, so probe once and take it over instead of spawning
    /// a duplicate.
    pub async fn adopt_existing(&self) {
        if !self.health.probe().await {
            return;
        }

        let adopted = {
            let mut cell = self.status.write().await;
            cell.machine.state == State::Stopped
                && cell.machine.transition(State::Running).is_ok()
        };

        if adopted {
            info!("[Supervisor] Adopted a worker that was already running");
            self.append_system("Adopted an already-running worker").await;
            self.begin_polling().await;
        }
    }

    /// Starts the worker. A start while anything other than Stopped is
    /// a logged no-op.
    /// Called by IPC API: POST /api/worker/start
    pub async fn start(&self) -> Result<(), CoreError> {
        {
            let mut cell = self.status.write().await;
            if cell.machine.state != State::Stopped {
                info!(
                    "[Supervisor] Start requested while {:?}; ignoring",
                    cell.machine.state
                );
                return Ok(());
            }
            cell.machine.transition(State::Starting).map_err(internal)?;
        }
        *self.last_error.lock().await = None;
        self.append_system("Starting worker").await;

        let spawned = WorkerHandle::spawn(
            &self.stack_command,
            Arc::clone(&self.logs),
            Arc::clone(&self.status),
            Arc::clone(&self.last_error),
        );
        let handle = match spawned {
            Ok(handle) => handle,
            Err(e) => {
                let mut cell = self.status.write().await;
                if cell.machine.state == State::Starting {
                    let _ = cell.machine.transition(State::Stopped);
                }
                cell.pid = None;
                drop(cell);
                *self.last_error.lock().await = Some(e.to_string());
                self.append_system(&format!("Failed to start worker: {}", e))
                    .await;
                return Err(e);
            }
        };

        {
            let mut cell = self.status.write().await;
            // The waiter may already have demoted an instantly-dead
            // worker; no PID is recorded for a corpse.
            if cell.machine.state == State::Starting {
                cell.pid = Some(handle.pid());
            }
        }
        *self.handle.lock().await = Some(handle);

        // A worker that dies inside this window is a failed start, not
        // a crash of a running worker.
        tokio::time::sleep(SPAWN_CONFIRM_DELAY).await;

        let confirmed = {
            let mut cell = self.status.write().await;
            if cell.machine.state == State::Starting {
                cell.machine.transition(State::Running).map_err(internal)?;
                true
            } else {
                false
            }
        };

        if confirmed {
            self.append_system("Worker is running").await;
            self.begin_polling().await;
            Ok(())
        } else {
            {
                let mut cell = self.status.write().await;
                cell.pid = None;
            }
            *self.handle.lock().await = None;
            let detail = self
                .last_error
                .lock()
                .await
                .clone()
                .unwrap_or_else(|| "Worker exited during startup".to_string());
            Err(CoreError::CommandFailed(detail))
        }
    }

    /// Stops the worker: runs the `down` command, waits out the grace
    /// window, and force kills whatever survived it. A stop while
    /// anything other than Running is a logged no-op.
    /// Called by IPC API: POST /api/worker/stop
    pub async fn stop(&self) -> Result<(), CoreError> {
        {
            let mut cell = self.status.write().await;
            if cell.machine.state != State::Running {
                info!(
                    "[Supervisor] Stop requested while {:?}; ignoring",
                    cell.machine.state
                );
                return Ok(());
            }
            cell.machine.transition(State::Stopping).map_err(internal)?;
        }
        self.end_polling().await;
        self.append_system("Stopping worker").await;

        let mut handle = self.handle.lock().await.take();
        let cell_pid = self.status.read().await.pid;
        let grace = Duration::from_secs(self.config.stop_timeout_secs);

        let graceful = tokio::time::timeout(grace, async {
            let status =
                worker::run_logged(&self.stack_command, &["down"], Arc::clone(&self.logs)).await?;
            if !status.success() {
                warn!(
                    "[Supervisor] `{} down` exited with {}",
                    self.stack_command, status
                );
            }
            match (handle.as_mut(), cell_pid) {
                (Some(h), _) => h.wait_stopped().await,
                // Adopted workers have no handle; watch the process table.
                (None, Some(pid)) => wait_pid_gone(pid).await,
                (None, None) => {}
            }
            Ok::<(), CoreError>(())
        })
        .await;

        match graceful {
            Ok(Ok(())) => info!("[Supervisor] Worker stopped within the grace window"),
            Ok(Err(e)) => warn!("[Supervisor] Down command failed: {}", e),
            Err(_) => warn!("[Supervisor] Graceful stop timed out after {:?}", grace),
        }

        if let Some(pid) = handle.as_ref().map(|h| h.pid()).or(cell_pid) {
            if worker::is_pid_alive_async(pid).await {
                if let Err(e) = worker::force_kill_pid(pid) {
                    warn!("[Supervisor] Force kill failed: {}", e);
                }
                if let Some(h) = handle.as_mut() {
                    let _ = tokio::time::timeout(REAP_GRACE, h.wait_stopped()).await;
                }
            }
        }

        {
            let mut cell = self.status.write().await;
            if cell.machine.state == State::Stopping {
                cell.machine.transition(State::Stopped).map_err(internal)?;
            }
            cell.pid = None;
        }
        self.append_system("Worker stopped").await;
        Ok(())
    }

    /// Called by IPC API: POST /api/worker/restart
    pub async fn restart(&self) -> Result<(), CoreError> {
        info!("[Supervisor] Restarting worker");
        self.stop().await?;
        tokio::time::sleep(Duration::from_secs(self.config.restart_delay_secs)).await;
        self.start().await
    }

    /// Shutdown hook. The worker must not outlive an orderly quit.
    pub async fn dispose(&self) {
        info!("[Supervisor] Disposing");
        if self.state().await == State::Running {
            if let Err(e) = self.stop().await {
                warn!("[Supervisor] Failed to stop worker during dispose: {}", e);
            }
        }
        self.end_polling().await;
    }

    pub async fn state(&self) -> State {
        self.status.read().await.machine.state
    }

    pub async fn pid(&self) -> Option<u32> {
        self.status.read().await.pid
    }

    pub async fn last_error(&self) -> Option<String> {
        self.last_error.lock().await.clone()
    }

    pub async fn logs_since(&self, id: u64) -> Vec<LogEntry> {
        self.logs.lock().await.get_since(id)
    }

    pub async fn recent_logs(&self, count: usize) -> Vec<LogEntry> {
        self.logs.lock().await.get_recent(count)
    }

    pub async fn clear_logs(&self) {
        self.logs.lock().await.clear();
    }

    pub async fn append_system(&self, text: &str) {
        self.logs
            .lock()
            .await
            .push(LogChannel::System, text.to_string());
    }

    async fn begin_polling(&self) {
        let mut slot = self.poll_cancel.lock().await;
        if slot.is_some() {
            return;
        }
        let token = CancellationToken::new();
        self.health.spawn_polling(
            token.clone(),
            Duration::from_secs(self.config.poll_interval_secs),
        );
        *slot = Some(token);
    }

    async fn end_polling(&self) {
        if let Some(token) = self.poll_cancel.lock().await.take() {
            token.cancel();
        }
    }
}

fn internal(e: TransitionError) -> CoreError {
    CoreError::Internal(anyhow::anyhow!(e))
}

async fn wait_pid_gone(pid: u32) {
    while worker::is_pid_alive_async(pid).await {
        tokio::time::sleep(Duration::from_millis(250)).await;
    }
}

// ─────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────
