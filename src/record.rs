//! Log record types
//!
//! `LogData` is what callers hand to the engine, `NewLogRecord` is the
//! validated and sanitized row the engine inserts, and `LogRecord` is what
//! storage hands back. Rows are append-only; nothing here is ever updated.

use crate::error::ServiceError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Log level, ordered by priority
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Level {
    Debug,
    Info,
    Warn,
    Error,
}

impl Level {
    pub fn as_str(&self) -> &'static str {
        match self {
            Level::Debug => "DEBUG",
            Level::Info => "INFO",
            Level::Warn => "WARN",
            Level::Error => "ERROR",
        }
    }

    pub fn priority(&self) -> u8 {
        *self as u8
    }
}

impl fmt::Display for Level {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown log level: {0}")]
pub struct ParseLevelError(pub String);

impl FromStr for Level {
    type Err = ParseLevelError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "DEBUG" => Ok(Level::Debug),
            "INFO" => Ok(Level::Info),
            "WARN" | "WARNING" => Ok(Level::Warn),
            "ERROR" => Ok(Level::Error),
            _ => Err(ParseLevelError(s.to_string())),
        }
    }
}

/// Persisted log row
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
pub struct LogRecord {
    pub id: i64,
    pub level: String,
    pub component: String,
    pub context: String,
    pub agency_id: Option<i64>,
    pub agency_program_id: Option<i64>,
    pub error_code: Option<i64>,
    pub message: Option<String>,
    pub sso_id: Option<String>,
    pub request_method: Option<String>,
    pub request_url: Option<String>,
    pub request_body: Option<String>,
    pub response_code: Option<i64>,
    pub response_body: Option<String>,
    pub sql: Option<String>,
    pub data: Option<String>,
    pub stack: Option<String>,
    pub elapsed_time: Option<i64>,
    pub timestamp: String,
}

/// Row built by the engine, ready for insert
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct NewLogRecord {
    pub level: String,
    pub component: String,
    pub context: String,
    pub agency_id: Option<i64>,
    pub agency_program_id: Option<i64>,
    pub error_code: Option<i64>,
    pub message: Option<String>,
    pub sso_id: Option<String>,
    pub request_method: Option<String>,
    pub request_url: Option<String>,
    pub request_body: Option<String>,
    pub response_code: Option<i64>,
    pub response_body: Option<String>,
    pub sql: Option<String>,
    pub data: Option<String>,
    pub stack: Option<String>,
    pub elapsed_time: Option<i64>,
    pub timestamp: String,
}

/// Audit row written on behalf of the connection protection subsystem
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
pub struct ConnectionProtectionLogRecord {
    pub id: i64,
    pub sso_id: String,
    pub booking_id: String,
    pub request_method: String,
    pub request_url: String,
    pub request_body: String,
    pub response_code: Option<i64>,
    pub response_body: Option<String>,
    pub error_message: Option<String>,
    pub timestamp: String,
}

/// Caller input for a connection protection audit row; the timestamp is
/// stamped at write time.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NewConnectionProtectionLog {
    pub sso_id: String,
    pub booking_id: String,
    pub request_method: String,
    pub request_url: String,
    pub request_body: String,
    pub response_code: Option<i64>,
    pub response_body: Option<String>,
    pub error_message: Option<String>,
}

/// Structured input of a single log call
///
/// Every field is optional, but a record is only persisted when it has a
/// source label (`source` or `context`) and at least one of `message`, `err`,
/// `sql` or `request_url`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LogData {
    #[serde(default)]
    pub context: Option<String>,
    #[serde(default)]
    pub source: Option<String>,
    #[serde(default)]
    pub agency_id: Option<i64>,
    #[serde(default)]
    pub agency_program_id: Option<i64>,
    #[serde(default)]
    pub error_code: Option<i64>,
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub err: Option<ServiceError>,
    #[serde(default)]
    pub sso_id: Option<String>,
    #[serde(default)]
    pub request_method: Option<String>,
    #[serde(default)]
    pub request_url: Option<String>,
    #[serde(default)]
    pub request_body: Option<serde_json::Value>,
    #[serde(default)]
    pub response_code: Option<u16>,
    #[serde(default)]
    pub response_body: Option<serde_json::Value>,
    #[serde(default)]
    pub sql: Option<String>,
    #[serde(default)]
    pub data: Option<serde_json::Value>,
    #[serde(default)]
    pub elapsed_time: Option<i64>,
}

fn present(value: &Option<String>) -> Option<&str> {
    value.as_deref().filter(|s| !s.is_empty())
}

impl LogData {
    pub fn new(context: impl Into<String>) -> Self {
        Self {
            context: Some(context.into()),
            ..Self::default()
        }
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }

    pub fn with_err(mut self, err: ServiceError) -> Self {
        self.err = Some(err);
        self
    }

    pub fn with_sql(mut self, sql: impl Into<String>) -> Self {
        self.sql = Some(sql.into());
        self
    }

    pub fn with_sso_id(mut self, sso_id: impl Into<String>) -> Self {
        self.sso_id = Some(sso_id.into());
        self
    }

    pub fn with_agency(mut self, agency_id: Option<i64>, agency_program_id: Option<i64>) -> Self {
        self.agency_id = agency_id;
        self.agency_program_id = agency_program_id;
        self
    }

    pub fn with_error_code(mut self, code: i64) -> Self {
        self.error_code = Some(code);
        self
    }

    pub fn with_request(
        mut self,
        method: impl Into<String>,
        url: impl Into<String>,
        body: Option<serde_json::Value>,
    ) -> Self {
        self.request_method = Some(method.into());
        self.request_url = Some(url.into());
        self.request_body = body;
        self
    }

    pub fn with_response(mut self, code: u16, body: Option<serde_json::Value>) -> Self {
        self.response_code = Some(code);
        self.response_body = body;
        self
    }

    pub fn with_data(mut self, data: serde_json::Value) -> Self {
        self.data = Some(data);
        self
    }

    pub fn with_elapsed_time(mut self, elapsed_ms: i64) -> Self {
        self.elapsed_time = Some(elapsed_ms);
        self
    }

    /// Source label of the record; `source` wins over `context`
    pub fn source_label(&self) -> Option<&str> {
        present(&self.source).or_else(|| present(&self.context))
    }

    pub fn is_valid(&self) -> bool {
        self.source_label().is_some()
            && (present(&self.message).is_some()
                || self.err.is_some()
                || present(&self.sql).is_some()
                || present(&self.request_url).is_some())
    }
}
