use anyhow::Result;
use clap::Parser;

mod cli;
mod commands;

use logkeeper::{config, init_tracing};

#[tokio::main]
async fn main() -> Result<()> {
    // Parse CLI arguments
    let args = cli::Cli::parse();

    // The log format comes from the config file; a broken file is reported
    // by the command itself, with text logging.
    let log_format = config::load_config_from(&args.config)
        .map(|cfg| cfg.server.log_format)
        .unwrap_or_else(|_| "text".to_string());
    init_tracing(&log_format);

    // Dispatch to appropriate command handler
    match args.get_command() {
        cli::Commands::Start { no_stdin } => {
            commands::start::execute(&args.config, !no_stdin).await?;
        }
        cli::Commands::Logs(logs_args) => {
            commands::logs::execute(&args.config, logs_args).await?;
        }
        cli::Commands::Monitor => {
            commands::jobs::monitor(&args.config).await?;
        }
        cli::Commands::Purge => {
            commands::jobs::purge(&args.config).await?;
        }
        cli::Commands::Config { action } => match action {
            cli::ConfigCommands::Show => commands::config::show(&args.config)?,
            cli::ConfigCommands::Validate => commands::config::validate(&args.config)?,
        },
        cli::Commands::Version => {
            println!("logkeeper v{}", env!("CARGO_PKG_VERSION"));
        }
    }

    Ok(())
}
