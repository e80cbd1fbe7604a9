//! Command implementations for the CLI
//!
//! - start: Run the scheduled jobs until shutdown
//! - logs: Query stored log records
//! - jobs: Run the monitor or purge job once
//! - config: Configuration display and validation

pub mod config;
pub mod jobs;
pub mod logs;
pub mod start;
