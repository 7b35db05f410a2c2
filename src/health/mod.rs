//! Health Monitor - worker liveness probing.
//!
//! The worker serves HTTP on a fixed local port while it is up. A HEAD
//! request that answers with 2xx or 3xx counts as alive; anything else,
//! including connection errors, counts as dead. Poll results are folded
//! into the shared status cell through `reconcile`.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{Mutex, RwLock};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::WorkerConfig;
use crate::supervisor::logs::{LogBuffer, LogChannel};
use crate::supervisor::state_machine::State;
use crate::supervisor::StatusCell;

/// 프로브 결과를 상태 머신에 반영할 때 필요한 전이를 계산한다.
///
/// Stopped + healthy  -> Running  (다른 세션이 띄운 워커를 입양)
/// Running + unhealthy -> Stopped (죽은 워커를 강등)
/// Starting / Stopping 은 전이가 진행 중이므로 건드리지 않는다.
pub fn reconcile(current: State, healthy: bool) -> Option<State> {
    match (current, healthy) {
        (State::Stopped, true) => Some(State::Running),
        (State::Running, false) => Some(State::Stopped),
        _ => None,
    }
}

#[derive(Clone)]
pub struct HealthMonitor {
    client: reqwest::Client,
    url: String,
    status: Arc<RwLock<StatusCell>>,
    logs: Arc<Mutex<LogBuffer>>,
}

impl HealthMonitor {
    pub fn new(
        config: &WorkerConfig,
        status: Arc<RwLock<StatusCell>>,
        logs: Arc<Mutex<LogBuffer>>,
    ) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.probe_timeout_secs))
            // 3xx counts as alive, so redirects must surface instead of
            // being followed.
            .redirect(reqwest::redirect::Policy::none())
            .build()
            .expect("Failed to create HTTP client");

        Self {
            client,
            url: config.health_url.clone(),
            status,
            logs,
        }
    }

    /// HEAD 한 번으로 워커 생존 여부를 확인한다.
    pub async fn probe(&self) -> bool {
        match self.client.head(&self.url).send().await {
            Ok(resp) => {
                let status = resp.status();
                let healthy = status.is_success() || status.is_redirection();
                debug!("[Health] {} answered {}", self.url, status);
                healthy
            }
            Err(e) => {
                debug!("[Health] Probe of {} failed: {}", self.url, e);
                false
            }
        }
    }

    /// Probes once and applies the resulting transition, if any.
    ///
    /// The probe runs outside the status lock; the state is re-read and
    /// reconciled under the write lock so a start or stop that landed in
    /// the meantime wins.
    pub async fn poll_once(&self) {
        let healthy = self.probe().await;

        let mut cell = self.status.write().await;
        let Some(next) = reconcile(cell.machine.state, healthy) else {
            return;
        };

        match cell.machine.transition(next) {
            Ok(()) => match next {
                State::Stopped => {
                    cell.pid = None;
                    drop(cell);
                    warn!("[Health] Worker stopped answering; demoting to stopped");
                    self.logs.lock().await.push(
                        LogChannel::System,
                        "Health probe lost the worker; marking it stopped".to_string(),
                    );
                }
                State::Running => {
                    drop(cell);
                    info!("[Health] Found a live worker; adopting it");
                    self.logs.lock().await.push(
                        LogChannel::System,
                        "Health probe found a live worker; adopting it".to_string(),
                    );
                }
                _ => {}
            },
            Err(e) => warn!("[Health] Failed to apply probe result: {}", e),
        }
    }

    /// Runs `poll_once` every `interval` until the token is cancelled.
    pub fn spawn_polling(&self, cancel: CancellationToken, interval: Duration) {
        let monitor = self.clone();
        tokio::spawn(async move {
            info!("[Health] Polling {} every {:?}", monitor.url, interval);
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => {
                        debug!("[Health] Polling stopped");
                        break;
                    }
                    _ = tokio::time::sleep(interval) => {
                        monitor.poll_once().await;
                    }
                }
            }
        });
    }
}

// ─────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────
