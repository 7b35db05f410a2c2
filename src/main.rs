use std::sync::Arc;

use hako_core::acquire::sequencer::DiscSequencer;
use hako_core::acquire::ArchiveAcquirer;
use hako_core::config::GlobalConfig;
use hako_core::install::PrivilegedInstaller;
use hako_core::ipc::IPCServer;
use hako_core::platform::{PlatformCommands, SystemCommands};
use hako_core::supervisor::Supervisor;
use hako_core::volume::VolumeScanner;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt::init();
    tracing::info!("Hako 98 core daemon starting");

    let config = GlobalConfig::load()?;
    let listen_addr = config.listen_addr();

    let platform: Arc<dyn PlatformCommands> = Arc::new(SystemCommands);
    let scanner = Arc::new(VolumeScanner::new(
        Arc::clone(&platform),
        config.acquire.clone(),
    ));
    let acquirer = Arc::new(ArchiveAcquirer::new(
        Arc::clone(&scanner),
        config.acquire.clone(),
    ));
    let installer = Arc::new(PrivilegedInstaller::new(
        Arc::clone(&platform),
        Arc::clone(&scanner),
        config.acquire.clone(),
        config.install.clone(),
    ));
    let sequencer = Arc::new(DiscSequencer::new(
        Arc::clone(&scanner),
        Arc::clone(&acquirer),
        Arc::clone(&installer),
        config.acquire.clone(),
    ));
    let supervisor = Arc::new(Supervisor::new(config.worker.clone()));

    // 이전 세션이 남긴 워커가 살아 있으면 새로 띄우지 않고 입양한다
    supervisor.adopt_existing().await;

    // Graceful shutdown: Ctrl+C / SIGTERM 시 워커부터 내린다
    let supervisor_shutdown = supervisor.clone();
    tokio::spawn(async move {
        tokio::signal::ctrl_c().await.ok();
        tracing::info!("Shutdown signal received, stopping worker...");
        supervisor_shutdown.dispose().await;
        tracing::info!("Cleanup complete, exiting");
        std::process::exit(0);
    });

    let ipc_server = IPCServer::new(
        supervisor,
        scanner,
        acquirer,
        sequencer,
        installer,
        Arc::new(config),
        &listen_addr,
    );
    tracing::info!("Starting IPC server on {}", listen_addr);
    if let Err(e) = ipc_server.start().await {
        tracing::error!("IPC server error: {}", e);
    }

    tracing::info!("Core daemon shutting down");
    Ok(())
}
