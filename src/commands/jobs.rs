use anyhow::{bail, Result};
use colored::Colorize;
use logkeeper::alerts::{AlertDispatcher, AlertOutcome};
use logkeeper::purge::PurgeJob;
use logkeeper::{config, Logger};
use std::path::Path;

async fn connect(config_path: &Path) -> Result<Logger> {
    let cfg = config::load_config_from(config_path)?;
    let logger = Logger::init(&cfg, None).await;
    if !logger.is_enabled() {
        bail!("Could not initialize the logging engine; check the database settings");
    }
    Ok(logger)
}

/// Execute the monitor command: one pass of the alert job
pub async fn monitor(config_path: &Path) -> Result<()> {
    let logger = connect(config_path).await?;
    let Some(engine) = logger.engine().cloned() else {
        bail!("Logging engine unavailable");
    };

    match AlertDispatcher::new(engine).run().await {
        AlertOutcome::Sent(count) => {
            println!("{}", format!("✓ Alert sent for {} recent errors", count).green());
        }
        AlertOutcome::Quiet => println!("{}", "No recent errors to report".green()),
        AlertOutcome::Failed => println!("{}", "✗ Monitor run failed, see logs".red()),
    }
    Ok(())
}

/// Execute the purge command: one pass of the retention job
pub async fn purge(config_path: &Path) -> Result<()> {
    let logger = connect(config_path).await?;
    let Some(engine) = logger.engine().cloned() else {
        bail!("Logging engine unavailable");
    };

    let report = PurgeJob::new(engine).run().await;

    let describe = |deleted: Option<u64>| match deleted {
        Some(count) => format!("{} deleted", count).green(),
        None => "failed".red(),
    };
    println!("{}", "Purge complete:".bold());
    println!("  Log records: {}", describe(report.logs_deleted));
    println!("  Connection protection records: {}", describe(report.protection_deleted));
    Ok(())
}
