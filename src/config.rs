use crate::record::Level;
use serde::{Deserialize, Serialize};
use std::path::Path;

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub scheduler: SchedulerConfig,
    #[serde(default)]
    pub email: EmailConfig,
    #[serde(default)]
    pub server: ServerConfig,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LoggingConfig {
    /// Name written into the `component` column of every record
    #[serde(default = "default_component_name")]
    pub component_name: String,

    /// Minimum level; calls below it are dropped
    #[serde(default = "default_level")]
    pub level: String,

    /// Log every API request/response, not only slow ones
    #[serde(default)]
    pub api_requests: bool,

    /// Requests slower than this are always logged
    #[serde(default = "default_api_request_threshold_ms")]
    pub api_request_threshold_ms: u64,

    /// Requests to this route are never logged
    #[serde(default = "default_health_check_path")]
    pub health_check_path: String,

    #[serde(default)]
    pub sql_queries: bool,

    /// IANA timezone used for record timestamps and job schedules
    #[serde(default = "default_timezone")]
    pub timezone: String,

    /// Largest request/response body buffered for API logging
    #[serde(default = "default_max_body_bytes")]
    pub max_body_bytes: usize,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            component_name: default_component_name(),
            level: default_level(),
            api_requests: false,
            api_request_threshold_ms: default_api_request_threshold_ms(),
            health_check_path: default_health_check_path(),
            sql_queries: false,
            timezone: default_timezone(),
            max_body_bytes: default_max_body_bytes(),
        }
    }
}

fn default_component_name() -> String {
    crate::diagnostics::MODULE_NAME.to_string()
}

fn default_level() -> String {
    "INFO".to_string()
}

fn default_api_request_threshold_ms() -> u64 {
    30_000
}

fn default_health_check_path() -> String {
    "/status_auth".to_string()
}

fn default_timezone() -> String {
    "UTC".to_string()
}

fn default_max_body_bytes() -> usize {
    1024 * 1024
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct DatabaseConfig {
    /// SQLite URL (e.g. "sqlite:./data/logkeeper.db" or "sqlite::memory:")
    #[serde(default = "default_database_url")]
    pub url: String,

    #[serde(default = "default_table_name")]
    pub table_name: String,

    #[serde(default = "default_protection_table_name")]
    pub protection_table_name: String,

    #[serde(default = "default_max_connections")]
    pub max_connections: u32,

    /// Create missing tables on connect
    #[serde(default = "default_true")]
    pub create_schema: bool,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: default_database_url(),
            table_name: default_table_name(),
            protection_table_name: default_protection_table_name(),
            max_connections: default_max_connections(),
            create_schema: true,
        }
    }
}

fn default_database_url() -> String {
    "sqlite:./data/logkeeper.db".to_string()
}

fn default_table_name() -> String {
    "logs".to_string()
}

fn default_protection_table_name() -> String {
    "connection_protection_logs".to_string()
}

fn default_max_connections() -> u32 {
    5
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SchedulerConfig {
    #[serde(default = "default_monitor_interval_minutes")]
    pub monitor_interval_minutes: u32,

    #[serde(default = "default_purge_hour")]
    pub purge_hour: u32,

    #[serde(default)]
    pub purge_minute: u32,

    #[serde(default = "default_log_retention_days")]
    pub log_retention_days: u32,

    #[serde(default = "default_protection_retention_days")]
    pub protection_retention_days: u32,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            monitor_interval_minutes: default_monitor_interval_minutes(),
            purge_hour: default_purge_hour(),
            purge_minute: 0,
            log_retention_days: default_log_retention_days(),
            protection_retention_days: default_protection_retention_days(),
        }
    }
}

fn default_monitor_interval_minutes() -> u32 {
    15
}

fn default_purge_hour() -> u32 {
    22
}

fn default_log_retention_days() -> u32 {
    5
}

fn default_protection_retention_days() -> u32 {
    30
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct EmailConfig {
    /// Transactional email provider endpoint; alerting is off when unset
    #[serde(default)]
    pub endpoint: Option<String>,

    #[serde(default)]
    pub api_key: Option<String>,

    #[serde(default)]
    pub from: String,

    #[serde(default)]
    pub health_check_recipients: Vec<String>,

    #[serde(default = "default_environment")]
    pub environment: String,

    #[serde(default = "default_email_timeout")]
    pub timeout_seconds: u64,
}

impl Default for EmailConfig {
    fn default() -> Self {
        Self {
            endpoint: None,
            api_key: None,
            from: String::new(),
            health_check_recipients: Vec::new(),
            environment: default_environment(),
            timeout_seconds: default_email_timeout(),
        }
    }
}

fn default_environment() -> String {
    "development".to_string()
}

fn default_email_timeout() -> u64 {
    30
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ServerConfig {
    /// Serve the log viewer API alongside the scheduler
    #[serde(default)]
    pub enabled: bool,

    #[serde(default = "default_host")]
    pub host: String,

    #[serde(default = "default_port")]
    pub port: u16,

    /// "text" or "json"
    #[serde(default = "default_log_format")]
    pub log_format: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            host: default_host(),
            port: default_port(),
            log_format: default_log_format(),
        }
    }
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    8088
}

fn default_log_format() -> String {
    "text".to_string()
}

impl LoggingConfig {
    pub fn min_level(&self) -> anyhow::Result<Level> {
        Ok(self.level.parse::<Level>()?)
    }

    pub fn tz(&self) -> anyhow::Result<chrono_tz::Tz> {
        self.timezone
            .parse::<chrono_tz::Tz>()
            .map_err(|e| anyhow::anyhow!("Invalid timezone '{}': {}", self.timezone, e))
    }
}

/// Load `config.toml` (or the given file) layered with `LOGKEEPER__*`
/// environment variables.
pub fn load_config() -> anyhow::Result<Config> {
    load_config_from(Path::new("config"))
}

pub fn load_config_from(path: &Path) -> anyhow::Result<Config> {
    let config = config::Config::builder()
        .add_source(config::File::with_name(&path.to_string_lossy()).required(false))
        .add_source(config::Environment::with_prefix("LOGKEEPER").separator("__"))
        .build()?;

    let cfg: Config = config.try_deserialize()?;
    validate_config(&cfg)?;

    Ok(cfg)
}

/// Plain SQL identifier: table names are interpolated into statements.
pub fn is_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

pub fn validate_config(cfg: &Config) -> anyhow::Result<()> {
    if cfg.logging.component_name.trim().is_empty() {
        anyhow::bail!("logging.component_name cannot be empty");
    }

    cfg.logging.min_level()?;
    cfg.logging.tz()?;

    for (key, name) in [
        ("database.table_name", &cfg.database.table_name),
        ("database.protection_table_name", &cfg.database.protection_table_name),
    ] {
        if !is_identifier(name) {
            anyhow::bail!("{} '{}' is not a valid SQL identifier", key, name);
        }
    }

    if cfg.database.max_connections == 0 {
        anyhow::bail!("database.max_connections must be at least 1");
    }

    let scheduler = &cfg.scheduler;
    if scheduler.monitor_interval_minutes == 0 || scheduler.monitor_interval_minutes > 60 {
        anyhow::bail!(
            "scheduler.monitor_interval_minutes must be between 1 and 60, got {}",
            scheduler.monitor_interval_minutes
        );
    }
    if scheduler.purge_hour > 23 || scheduler.purge_minute > 59 {
        anyhow::bail!(
            "scheduler purge time {:02}:{:02} is out of range",
            scheduler.purge_hour,
            scheduler.purge_minute
        );
    }
    if scheduler.log_retention_days == 0 || scheduler.protection_retention_days == 0 {
        anyhow::bail!("retention periods must be at least one day");
    }

    if cfg.email.endpoint.is_some() {
        if cfg.email.health_check_recipients.is_empty() {
            anyhow::bail!("email.health_check_recipients must be set when email.endpoint is configured");
        }
        if cfg.email.from.trim().is_empty() {
            anyhow::bail!("email.from must be set when email.endpoint is configured");
        }
    }

    if !matches!(cfg.server.log_format.as_str(), "text" | "json") {
        anyhow::bail!("server.log_format must be 'text' or 'json'");
    }

    Ok(())
}
