use anyhow::Result;
use axum::{
    extract::{Query, State},
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::path::PathBuf;
use std::sync::Arc;
use tower_http::trace::TraceLayer;

use crate::acquire::sequencer::DiscSequencer;
use crate::acquire::ArchiveAcquirer;
use crate::config::GlobalConfig;
use crate::error::CoreError;
use crate::install::PrivilegedInstaller;
use crate::supervisor::Supervisor;
use crate::volume::VolumeScanner;

/// `recent` 파라미터가 없을 때 돌려줄 로그 줄 수
const DEFAULT_RECENT_LOGS: usize = 200;

/// IPC 요청/응답 타입
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckFileRequest {
    pub volume: String,
    pub file: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LogsQuery {
    pub since: Option<u64>,
    pub recent: Option<usize>,
}

/// IPC Server State
#[derive(Clone)]
pub struct IPCServer {
    pub supervisor: Arc<Supervisor>,
    pub scanner: Arc<VolumeScanner>,
    pub acquirer: Arc<ArchiveAcquirer>,
    pub sequencer: Arc<DiscSequencer>,
    pub installer: Arc<PrivilegedInstaller>,
    pub config: Arc<GlobalConfig>,
    pub listen_addr: String,
}

impl IPCServer {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        supervisor: Arc<Supervisor>,
        scanner: Arc<VolumeScanner>,
        acquirer: Arc<ArchiveAcquirer>,
        sequencer: Arc<DiscSequencer>,
        installer: Arc<PrivilegedInstaller>,
        config: Arc<GlobalConfig>,
        listen_addr: &str,
    ) -> Self {
        Self {
            supervisor,
            scanner,
            acquirer,
            sequencer,
            installer,
            config,
            listen_addr: listen_addr.to_string(),
        }
    }

    pub fn router(&self) -> Router {
        Router::new()
            .route("/api/volumes", get(list_volumes))
            .route("/api/volumes/optical", get(detect_optical_volumes))
            .route("/api/volumes/check-file", post(check_file))
            .route("/api/discs/missing", get(missing_discs))
            .route("/api/discs/copy-parts", post(copy_parts))
            .route("/api/launcher/stage", post(stage_launcher))
            .route("/api/launcher/install", post(install_launcher))
            .route("/api/launcher/open", post(open_launcher))
            .route("/api/install/package", post(install_package))
            .route("/api/worker/start", post(start_worker))
            .route("/api/worker/stop", post(stop_worker))
            .route("/api/worker/restart", post(restart_worker))
            .route("/api/worker/state", get(worker_state))
            .route("/api/worker/logs", get(worker_logs))
            .route("/api/worker/logs/clear", post(clear_worker_logs))
            .route("/api/health", get(daemon_health))
            .route("/api/shutdown", post(shutdown_daemon))
            .layer(TraceLayer::new_for_http())
            .with_state(self.clone())
    }

    pub async fn start(self) -> Result<()> {
        tracing::info!("IPC HTTP server starting on {}", self.listen_addr);

        let listener = tokio::net::TcpListener::bind(&self.listen_addr).await?;
        let router = self.router();
        tracing::info!("IPC listening on http://{}", self.listen_addr);

        axum::serve(listener, router).await?;
        Ok(())
    }
}

/// 블로킹 파일시스템/OS 호출을 tokio 워커 스레드 밖으로 뺀다.
async fn blocking<T, F>(f: F) -> Result<T, CoreError>
where
    F: FnOnce() -> Result<T, CoreError> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| CoreError::Internal(anyhow::anyhow!(e)))?
}

/// GET /api/volumes - 마운트된 볼륨 목록
async fn list_volumes(
    State(state): State<IPCServer>,
) -> Result<Json<serde_json::Value>, CoreError> {
    let scanner = Arc::clone(&state.scanner);
    let volumes = blocking(move || scanner.list_volumes()).await?;
    Ok(Json(json!({ "success": true, "volumes": volumes })))
}

/// GET /api/volumes/optical - 광학 드라이브에서 마운트된 볼륨 탐지
async fn detect_optical_volumes(
    State(state): State<IPCServer>,
) -> Result<Json<serde_json::Value>, CoreError> {
    // 광학 분류는 diskutil 기반. 다른 호스트에서는 볼륨 루트를
    // 오버라이드한 경우에만 (마커 폴백으로) 의미가 있다.
    if !cfg!(target_os = "macos") && state.config.acquire.volumes_root == "/Volumes" {
        return Err(CoreError::Unsupported);
    }
    let scanner = Arc::clone(&state.scanner);
    let volumes = blocking(move || scanner.detect_optical_volumes()).await?;
    Ok(Json(json!({ "success": true, "volumes": volumes })))
}

/// POST /api/volumes/check-file - 특정 볼륨 안 파일 존재 확인
async fn check_file(
    State(state): State<IPCServer>,
    Json(req): Json<CheckFileRequest>,
) -> Result<Json<serde_json::Value>, CoreError> {
    let scanner = Arc::clone(&state.scanner);
    let root = PathBuf::from(state.config.acquire.volumes_root.clone());
    let check =
        blocking(move || Ok(scanner.check_file(&root.join(&req.volume), &req.file))).await?;
    Ok(Json(json!({ "success": true, "exists": check.exists, "path": check.path })))
}

/// GET /api/discs/missing - 아직 넣지 않은 디스크 번호
async fn missing_discs(
    State(state): State<IPCServer>,
) -> Result<Json<serde_json::Value>, CoreError> {
    let sequencer = Arc::clone(&state.sequencer);
    let summary = blocking(move || sequencer.compute_missing()).await?;
    Ok(Json(json!({
        "success": true,
        "missing": summary.missing,
        "total": summary.total,
    })))
}

/// POST /api/discs/copy-parts - 지금 마운트된 디스크의 파트를 스테이징으로 복사
async fn copy_parts(State(state): State<IPCServer>) -> Result<Json<serde_json::Value>, CoreError> {
    let acquirer = Arc::clone(&state.acquirer);
    let copied = blocking(move || acquirer.copy_missing_parts()).await?;
    Ok(Json(json!({ "success": true, "copied": copied })))
}

/// POST /api/launcher/stage - 디스크 1의 런처 번들을 임시 위치로 복사
async fn stage_launcher(
    State(state): State<IPCServer>,
) -> Result<Json<serde_json::Value>, CoreError> {
    let installer = Arc::clone(&state.installer);
    let staged = blocking(move || installer.stage_companion_bundle()).await?;
    Ok(Json(json!({ "success": true, "staged": staged })))
}

/// POST /api/launcher/install - 스테이징된 런처 번들을 애플리케이션 디렉터리로 이동
async fn install_launcher(
    State(state): State<IPCServer>,
) -> Result<Json<serde_json::Value>, CoreError> {
    let installer = Arc::clone(&state.installer);
    let installed = blocking(move || installer.install_companion()).await?;
    Ok(Json(json!({ "success": true, "installed": installed })))
}

/// POST /api/launcher/open - 설치된 런처 실행
async fn open_launcher(
    State(state): State<IPCServer>,
) -> Result<Json<serde_json::Value>, CoreError> {
    let installer = Arc::clone(&state.installer);
    blocking(move || installer.launch_installed()).await?;
    Ok(Json(json!({ "success": true })))
}

/// POST /api/install/package - 아카이브를 재조립하고 패키지를 관리자 권한으로 설치
async fn install_package(
    State(state): State<IPCServer>,
) -> Result<Json<serde_json::Value>, CoreError> {
    let acquirer = Arc::clone(&state.acquirer);
    let installer = Arc::clone(&state.installer);
    let artifact = blocking(move || {
        let artifact = acquirer.resolve_install_artifact()?;
        installer.install_package(&artifact)?;
        // 설치가 끝난 스테이징은 바로 치운다. 실패하면 남겨 둬서
        // 디스크를 다시 넣지 않고 재시도할 수 있게 한다.
        acquirer.cleanup_staging();
        Ok(artifact)
    })
    .await?;
    Ok(Json(json!({ "success": true, "artifact": artifact })))
}

/// POST /api/worker/start - 워커 스택 기동
async fn start_worker(
    State(state): State<IPCServer>,
) -> Result<Json<serde_json::Value>, CoreError> {
    state.supervisor.start().await?;
    worker_state_body(&state).await
}

/// POST /api/worker/stop - 워커 스택 정지
async fn stop_worker(State(state): State<IPCServer>) -> Result<Json<serde_json::Value>, CoreError> {
    state.supervisor.stop().await?;
    worker_state_body(&state).await
}

/// POST /api/worker/restart - 워커 스택 재시작
async fn restart_worker(
    State(state): State<IPCServer>,
) -> Result<Json<serde_json::Value>, CoreError> {
    state.supervisor.restart().await?;
    worker_state_body(&state).await
}

/// GET /api/worker/state - 현재 상태/PID/마지막 에러
async fn worker_state(
    State(state): State<IPCServer>,
) -> Result<Json<serde_json::Value>, CoreError> {
    worker_state_body(&state).await
}

async fn worker_state_body(state: &IPCServer) -> Result<Json<serde_json::Value>, CoreError> {
    Ok(Json(json!({
        "success": true,
        "state": state.supervisor.state().await,
        "pid": state.supervisor.pid().await,
        "last_error": state.supervisor.last_error().await,
    })))
}

/// GET /api/worker/logs?since=&recent= - 워커 로그 조회
async fn worker_logs(
    State(state): State<IPCServer>,
    Query(query): Query<LogsQuery>,
) -> Result<Json<serde_json::Value>, CoreError> {
    let entries = match query.since {
        Some(id) => state.supervisor.logs_since(id).await,
        None => {
            state
                .supervisor
                .recent_logs(query.recent.unwrap_or(DEFAULT_RECENT_LOGS))
                .await
        }
    };
    Ok(Json(json!({ "success": true, "entries": entries })))
}

/// POST /api/worker/logs/clear - 로그 버퍼 비우기
async fn clear_worker_logs(
    State(state): State<IPCServer>,
) -> Result<Json<serde_json::Value>, CoreError> {
    state.supervisor.clear_logs().await;
    Ok(Json(json!({ "success": true })))
}

/// GET /api/health - 데몬 자체 생존 확인 (워커 상태와는 무관)
async fn daemon_health() -> impl IntoResponse {
    Json(json!({ "success": true, "status": "ok" }))
}

/// POST /api/shutdown - 워커를 내리고 데몬 종료
async fn shutdown_daemon(State(state): State<IPCServer>) -> impl IntoResponse {
    let supervisor = Arc::clone(&state.supervisor);
    tokio::spawn(async move {
        // 응답이 소켓으로 나갈 시간을 준다
        tokio::time::sleep(std::time::Duration::from_millis(100)).await;
        supervisor.dispose().await;
        tracing::info!("Shutdown requested over IPC, exiting");
        std::process::exit(0);
    });
    Json(json!({ "success": true }))
}

// ─────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────
