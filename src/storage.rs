//! SQLite storage for log and audit records
//!
//! - Connection pooling (single connection for in-memory databases)
//! - WAL mode for file databases
//! - Optional schema bootstrap for configurable table names
//! - Bound parameters for every value; only validated table names and
//!   allow-listed sort columns reach statement text

use crate::config::{is_identifier, DatabaseConfig};
use crate::query::{QueryParam, QueryPlan};
use crate::record::{Level, LogRecord, NewConnectionProtectionLog, NewLogRecord};
use anyhow::{Context, Result};
use async_trait::async_trait;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions};
use std::str::FromStr;
use std::time::Duration;

/// Persistence operations the engine and the background jobs rely on
#[async_trait]
pub trait LogStore: Send + Sync {
    /// Table the query plans are built against
    fn table_name(&self) -> &str;

    fn protection_table_name(&self) -> &str;

    async fn insert_log(&self, record: &NewLogRecord) -> Result<()>;

    async fn insert_protection_log(
        &self,
        log: &NewConnectionProtectionLog,
        timestamp: &str,
    ) -> Result<()>;

    async fn query_logs(&self, plan: &QueryPlan) -> Result<Vec<LogRecord>>;

    async fn count_logs(&self, plan: &QueryPlan) -> Result<u64>;

    /// ERROR rows with a message whose timestamp falls in `[from, to]`
    async fn recent_errors(&self, from: &str, to: &str) -> Result<Vec<LogRecord>>;

    /// Delete log rows with `timestamp < cutoff`
    async fn purge_logs(&self, cutoff: &str) -> Result<u64>;

    /// Delete audit rows with `timestamp < cutoff`
    async fn purge_protection_logs(&self, cutoff: &str) -> Result<u64>;
}

pub struct SqliteLogStore {
    pool: SqlitePool,
    table: String,
    protection_table: String,
}

fn is_memory_url(url: &str) -> bool {
    url.contains(":memory:") || url.contains("mode=memory")
}

impl SqliteLogStore {
    /// Connect to the configured database, creating the tables when
    /// `create_schema` is set.
    ///
    /// ```ignore
    /// let store = SqliteLogStore::connect(&cfg.database).await?;
    /// ```
    pub async fn connect(cfg: &DatabaseConfig) -> Result<Self> {
        for name in [&cfg.table_name, &cfg.protection_table_name] {
            if !is_identifier(name) {
                anyhow::bail!("'{}' is not a valid SQL identifier", name);
            }
        }

        let memory = is_memory_url(&cfg.url);
        let mut options = SqliteConnectOptions::from_str(&cfg.url)
            .with_context(|| format!("Invalid database url '{}'", cfg.url))?
            .create_if_missing(true)
            .busy_timeout(Duration::from_secs(30))
            .pragma("synchronous", "NORMAL");
        if !memory {
            options = options.journal_mode(SqliteJournalMode::Wal);
        }

        // Every connection to ":memory:" is a separate database, so the pool
        // must hold exactly one and never recycle it.
        let pool_options = if memory {
            SqlitePoolOptions::new()
                .max_connections(1)
                .idle_timeout(None)
                .max_lifetime(None)
        } else {
            SqlitePoolOptions::new().max_connections(cfg.max_connections.max(1))
        };

        let pool = pool_options
            .acquire_timeout(Duration::from_secs(30))
            .connect_with(options)
            .await
            .context("Failed to connect to log database")?;

        let store = Self {
            pool,
            table: cfg.table_name.clone(),
            protection_table: cfg.protection_table_name.clone(),
        };

        if cfg.create_schema {
            store.create_schema().await?;
        }

        Ok(store)
    }

    async fn create_schema(&self) -> Result<()> {
        let statements = [
            format!(
                "CREATE TABLE IF NOT EXISTS {} (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    level TEXT NOT NULL,
                    component TEXT NOT NULL,
                    context TEXT NOT NULL,
                    agency_id INTEGER,
                    agency_program_id INTEGER,
                    error_code INTEGER,
                    message TEXT,
                    sso_id TEXT,
                    request_method TEXT,
                    request_url TEXT,
                    request_body TEXT,
                    response_code INTEGER,
                    response_body TEXT,
                    sql TEXT,
                    data TEXT,
                    stack TEXT,
                    elapsed_time INTEGER,
                    timestamp TEXT NOT NULL
                )",
                self.table
            ),
            format!(
                "CREATE INDEX IF NOT EXISTS idx_{0}_timestamp ON {0} (timestamp)",
                self.table
            ),
            format!(
                "CREATE INDEX IF NOT EXISTS idx_{0}_level ON {0} (level, timestamp)",
                self.table
            ),
            format!(
                "CREATE TABLE IF NOT EXISTS {} (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    sso_id TEXT NOT NULL,
                    booking_id TEXT NOT NULL,
                    request_method TEXT NOT NULL,
                    request_url TEXT NOT NULL,
                    request_body TEXT NOT NULL,
                    response_code INTEGER,
                    response_body TEXT,
                    error_message TEXT,
                    timestamp TEXT NOT NULL
                )",
                self.protection_table
            ),
            format!(
                "CREATE INDEX IF NOT EXISTS idx_{0}_timestamp ON {0} (timestamp)",
                self.protection_table
            ),
        ];

        for statement in &statements {
            sqlx::query(statement)
                .execute(&self.pool)
                .await
                .context("Failed to create log schema")?;
        }

        tracing::debug!(
            table = %self.table,
            protection_table = %self.protection_table,
            "Log schema ready"
        );
        Ok(())
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }
}

#[async_trait]
impl LogStore for SqliteLogStore {
    fn table_name(&self) -> &str {
        &self.table
    }

    fn protection_table_name(&self) -> &str {
        &self.protection_table
    }

    async fn insert_log(&self, record: &NewLogRecord) -> Result<()> {
        let statement = format!(
            "INSERT INTO {} (level, component, context, agency_id, agency_program_id, error_code,
                message, sso_id, request_method, request_url, request_body, response_code,
                response_body, sql, data, stack, elapsed_time, timestamp)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
            self.table
        );

        sqlx::query(&statement)
            .bind(&record.level)
            .bind(&record.component)
            .bind(&record.context)
            .bind(record.agency_id)
            .bind(record.agency_program_id)
            .bind(record.error_code)
            .bind(&record.message)
            .bind(&record.sso_id)
            .bind(&record.request_method)
            .bind(&record.request_url)
            .bind(&record.request_body)
            .bind(record.response_code)
            .bind(&record.response_body)
            .bind(&record.sql)
            .bind(&record.data)
            .bind(&record.stack)
            .bind(record.elapsed_time)
            .bind(&record.timestamp)
            .execute(&self.pool)
            .await
            .context("Failed to insert log record")?;

        Ok(())
    }

    async fn insert_protection_log(
        &self,
        log: &NewConnectionProtectionLog,
        timestamp: &str,
    ) -> Result<()> {
        let statement = format!(
            "INSERT INTO {} (sso_id, booking_id, request_method, request_url, request_body,
                response_code, response_body, error_message, timestamp)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)",
            self.protection_table
        );

        sqlx::query(&statement)
            .bind(&log.sso_id)
            .bind(&log.booking_id)
            .bind(&log.request_method)
            .bind(&log.request_url)
            .bind(&log.request_body)
            .bind(log.response_code)
            .bind(&log.response_body)
            .bind(&log.error_message)
            .bind(timestamp)
            .execute(&self.pool)
            .await
            .context("Failed to insert connection protection log")?;

        Ok(())
    }

    async fn query_logs(&self, plan: &QueryPlan) -> Result<Vec<LogRecord>> {
        let mut query = sqlx::query_as::<_, LogRecord>(&plan.select_sql);
        for param in plan.filter_params.iter().chain(&plan.page_params) {
            query = match param {
                QueryParam::Text(s) => query.bind(s.as_str()),
                QueryParam::Int(i) => query.bind(*i),
            };
        }

        query
            .fetch_all(&self.pool)
            .await
            .context("Failed to query logs")
    }

    async fn count_logs(&self, plan: &QueryPlan) -> Result<u64> {
        let mut query = sqlx::query_scalar::<_, i64>(&plan.count_sql);
        for param in &plan.filter_params {
            query = match param {
                QueryParam::Text(s) => query.bind(s.as_str()),
                QueryParam::Int(i) => query.bind(*i),
            };
        }

        let total = query
            .fetch_one(&self.pool)
            .await
            .context("Failed to count logs")?;

        Ok(total.max(0) as u64)
    }

    async fn recent_errors(&self, from: &str, to: &str) -> Result<Vec<LogRecord>> {
        let statement = format!(
            "SELECT * FROM {} WHERE level = ? AND message IS NOT NULL
             AND timestamp BETWEEN ? AND ? ORDER BY timestamp ASC, id ASC",
            self.table
        );

        sqlx::query_as::<_, LogRecord>(&statement)
            .bind(Level::Error.as_str())
            .bind(from)
            .bind(to)
            .fetch_all(&self.pool)
            .await
            .context("Failed to query recent errors")
    }

    async fn purge_logs(&self, cutoff: &str) -> Result<u64> {
        let statement = format!("DELETE FROM {} WHERE timestamp < ?", self.table);
        let result = sqlx::query(&statement)
            .bind(cutoff)
            .execute(&self.pool)
            .await
            .context("Failed to purge logs")?;

        Ok(result.rows_affected())
    }

    async fn purge_protection_logs(&self, cutoff: &str) -> Result<u64> {
        let statement = format!("DELETE FROM {} WHERE timestamp < ?", self.protection_table);
        let result = sqlx::query(&statement)
            .bind(cutoff)
            .execute(&self.pool)
            .await
            .context("Failed to purge connection protection logs")?;

        Ok(result.rows_affected())
    }
}
