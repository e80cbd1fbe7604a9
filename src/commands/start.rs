use anyhow::Result;
use colored::Colorize;
use logkeeper::{config, scheduler::ScheduledTaskCoordinator, server, signals, Logger};
use std::path::Path;
use tracing::{info, warn};

/// Execute the start command
///
/// This will:
/// 1. Load configuration and connect the logging engine
/// 2. Schedule the monitor and purge jobs
/// 3. Start the log viewer, if enabled
/// 4. Wait for SIGTERM/SIGINT or a `shutdown` control message
/// 5. Destroy the scheduled tasks and stop the server
pub async fn execute(config_path: &Path, listen_stdin: bool) -> Result<()> {
    println!("{}", "Starting logkeeper...".green());

    let cfg = config::load_config_from(config_path)?;
    let logger = Logger::init(&cfg, None).await;
    if !logger.is_enabled() {
        warn!("Logging engine unavailable, running without background jobs");
    }

    let (shutdown_tx, signal_handle) = signals::setup_signal_handlers(listen_stdin);
    let mut shutdown_rx = shutdown_tx.subscribe();

    let mut coordinator = ScheduledTaskCoordinator::with_default_jobs(logger.clone());
    for task in coordinator.tasks() {
        info!(task = task.name(), schedule = %task.schedule(), "Job registered");
    }

    let server_handle = if cfg.server.enabled {
        let rx = shutdown_tx.subscribe();
        Some(tokio::spawn(server::start_server(
            cfg.server.clone(),
            logger.clone(),
            rx,
        )))
    } else {
        None
    };

    let _ = shutdown_rx.recv().await;

    coordinator.shutdown().await;

    if let Some(handle) = server_handle {
        handle.await??;
    }
    signal_handle.await?;

    info!("logkeeper stopped");
    Ok(())
}
