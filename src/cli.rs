use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "logkeeper", version, about = "Shared logging and alerting service")]
pub struct Cli {
    /// Configuration file path
    #[arg(short, long, default_value = "config.toml", global = true)]
    pub config: PathBuf,

    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand, Debug, Clone)]
pub enum Commands {
    /// Run the monitor and purge jobs (and the log viewer, if enabled)
    /// until SIGTERM/SIGINT or a `shutdown` line on stdin (default)
    Start {
        /// Ignore stdin instead of reading control messages from it
        #[arg(long)]
        no_stdin: bool,
    },

    /// Query stored log records
    Logs(crate::commands::logs::LogsArgs),

    /// Run the monitor job once
    Monitor,

    /// Run the purge job once
    Purge,

    /// Configuration management commands
    Config {
        #[command(subcommand)]
        action: ConfigCommands,
    },

    /// Show version information
    Version,
}

#[derive(Subcommand, Debug, Clone)]
pub enum ConfigCommands {
    /// Display current configuration (with secrets masked)
    Show,

    /// Validate configuration file
    Validate,
}

impl Cli {
    /// Get the command to execute, defaulting to Start if none provided
    pub fn get_command(&self) -> Commands {
        self.command
            .clone()
            .unwrap_or(Commands::Start { no_stdin: false })
    }
}
