//! Purge job: retention deletes for log records and audit records
//!
//! The two deletes are independent. Each has its own cutoff and counter,
//! and a failure of one never stops or alters the other.

use crate::diagnostics::qualified_context;
use crate::engine::{LogEngine, DATE_FORMAT};
use crate::error::ServiceError;
use crate::record::LogData;
use crate::scheduler::TaskHandler;
use async_trait::async_trait;
use chrono::{DateTime, Duration};
use chrono_tz::Tz;
use serde::Serialize;
use std::sync::Arc;

/// Rows deleted per table; `None` when that delete failed
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct PurgeReport {
    pub logs_deleted: Option<u64>,
    pub protection_deleted: Option<u64>,
}

pub struct PurgeJob {
    engine: Arc<LogEngine>,
}

/// Calendar day `retention_days` before `now`. Rows stamped earlier than
/// that day's first instant are expired.
pub fn retention_cutoff(now: &DateTime<Tz>, retention_days: u32) -> String {
    (*now - Duration::days(i64::from(retention_days)))
        .format(DATE_FORMAT)
        .to_string()
}

impl PurgeJob {
    pub fn new(engine: Arc<LogEngine>) -> Self {
        Self { engine }
    }

    pub async fn run(&self) -> PurgeReport {
        let context = qualified_context("purge task");
        let settings = self.engine.settings();
        let store = self.engine.store();
        let now = self.engine.now();

        let cutoff = retention_cutoff(&now, settings.log_retention_days);
        let logs_deleted = match store.purge_logs(&cutoff).await {
            Ok(count) => {
                tracing::info!(count, cutoff = %cutoff, table = store.table_name(), "Purged log records");
                self.engine
                    .info(LogData::new(context.as_str()).with_message(format!(
                        "Purged {} records from {}",
                        count,
                        store.table_name()
                    )))
                    .await;
                Some(count)
            }
            Err(e) => {
                tracing::error!(error = %format!("{:#}", e), "Log purge failed");
                self.engine
                    .error(LogData::new(context.as_str()).with_err(ServiceError::from(e)))
                    .await;
                None
            }
        };

        // Not every deployment has the audit table; failures here are expected.
        let cutoff = retention_cutoff(&now, settings.protection_retention_days);
        let protection_deleted = match store.purge_protection_logs(&cutoff).await {
            Ok(count) => {
                tracing::info!(
                    count,
                    cutoff = %cutoff,
                    table = store.protection_table_name(),
                    "Purged connection protection records"
                );
                self.engine
                    .info(LogData::new(context.as_str()).with_message(format!(
                        "Purged {} records from {}",
                        count,
                        store.protection_table_name()
                    )))
                    .await;
                Some(count)
            }
            Err(e) => {
                tracing::debug!(error = %format!("{:#}", e), "Connection protection purge skipped");
                None
            }
        };

        PurgeReport {
            logs_deleted,
            protection_deleted,
        }
    }
}

#[async_trait]
impl TaskHandler for PurgeJob {
    async fn run(&self) -> anyhow::Result<()> {
        PurgeJob::run(self).await;
        Ok(())
    }
}
