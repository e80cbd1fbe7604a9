//! Logs query command
//!
//! Query and display stored log records through the same filter and
//! pagination rules as the viewer API.

use anyhow::{bail, Result};
use clap::Parser;
use colored::Colorize;
use logkeeper::config;
use logkeeper::query::{LogFilter, LogQueryParams, Pagination};
use logkeeper::record::LogRecord;
use logkeeper::Logger;
use std::path::Path;

/// Query and display log records
#[derive(Debug, Clone, Parser)]
pub struct LogsArgs {
    /// Filter by level (DEBUG, INFO, WARN, ERROR)
    #[arg(short, long)]
    pub level: Option<String>,

    /// First day to include (YYYY-MM-DD)
    #[arg(long)]
    pub start_date: Option<String>,

    /// Last day to include (YYYY-MM-DD)
    #[arg(long)]
    pub end_date: Option<String>,

    /// Rows to skip
    #[arg(long)]
    pub offset: Option<u64>,

    /// Maximum number of results
    #[arg(long, default_value = "100")]
    pub limit: u64,

    /// Sort column (timestamp, level, component, context, elapsed_time, id)
    #[arg(long)]
    pub order_by: Option<String>,

    /// Sort direction (asc, desc)
    #[arg(long)]
    pub direction: Option<String>,

    /// Output format (text, json)
    #[arg(short = 'f', long, default_value = "text")]
    pub format: String,
}

impl From<&LogsArgs> for LogQueryParams {
    fn from(args: &LogsArgs) -> Self {
        LogQueryParams {
            level: args.level.clone(),
            start_date: args.start_date.clone(),
            end_date: args.end_date.clone(),
            offset: args.offset,
            limit: Some(args.limit),
            order_by: args.order_by.clone(),
            direction: args.direction.clone(),
        }
    }
}

/// Execute the logs command
pub async fn execute(config_path: &Path, args: LogsArgs) -> Result<()> {
    let params = LogQueryParams::from(&args);
    let (filter, page): (LogFilter, Pagination) = (&params).try_into()?;

    let cfg = config::load_config_from(config_path)?;
    let logger = Logger::init(&cfg, Some("logkeeper-cli")).await;
    if !logger.is_enabled() {
        bail!("Could not initialize the logging engine; check the database settings");
    }

    let Some(result) = logger.query(&filter, &page).await else {
        bail!("Log query failed");
    };

    match args.format.as_str() {
        "json" => {
            println!("{}", serde_json::to_string_pretty(&result)?);
        }
        _ => {
            if result.rows.is_empty() {
                println!("{}", "No logs found matching the criteria".yellow());
                return Ok(());
            }
            println!(
                "{}",
                format!("Showing {} of {} log records", result.rows.len(), result.total).bold()
            );
            println!();
            for record in &result.rows {
                println!("{}", format_record(record));
            }
        }
    }

    Ok(())
}

fn format_record(record: &LogRecord) -> String {
    let level = match record.level.as_str() {
        "ERROR" => record.level.red().bold(),
        "WARN" => record.level.yellow().bold(),
        "INFO" => record.level.green(),
        "DEBUG" => record.level.blue(),
        _ => record.level.normal(),
    };

    let request = match (&record.request_method, &record.request_url) {
        (Some(method), Some(url)) => format!(" {} {}", method, url),
        _ => String::new(),
    };
    let status = record
        .response_code
        .map(|code| format!(" -> {}", code))
        .unwrap_or_default();
    let elapsed = record
        .elapsed_time
        .map(|ms| format!(" ({}ms)", ms))
        .unwrap_or_default();

    format!(
        "{} {} {} {}{}{}{} {}",
        record.timestamp.dimmed(),
        level,
        record.component.cyan(),
        record.context,
        request.dimmed(),
        status.dimmed(),
        elapsed.dimmed(),
        record.message.as_deref().unwrap_or_default()
    )
}
