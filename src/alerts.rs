//! Monitor job: email recent ERROR records to the health check recipients

use crate::diagnostics::qualified_context;
use crate::email::EmailMessage;
use crate::engine::{LogEngine, MONITOR_TIMESTAMP_FORMAT};
use crate::error::ServiceError;
use crate::record::{LogData, LogRecord};
use crate::scheduler::TaskHandler;
use async_trait::async_trait;
use chrono::Duration;
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AlertOutcome {
    /// An alert covering this many records was sent
    Sent(usize),
    /// Nothing to report
    Quiet,
    /// Query or send failed; already logged
    Failed,
}

pub struct AlertDispatcher {
    engine: Arc<LogEngine>,
    lookback: Duration,
}

/// Row as JSON without the fields the line already shows
fn row_json(row: &LogRecord) -> String {
    match serde_json::to_value(row) {
        Ok(serde_json::Value::Object(mut map)) => {
            map.remove("id");
            map.remove("timestamp");
            serde_json::Value::Object(map).to_string()
        }
        _ => String::new(),
    }
}

/// One `<li>` per record: timestamp, then the rest of the row as JSON
pub fn build_alert_body(rows: &[LogRecord]) -> String {
    rows.iter()
        .map(|row| format!("<li>{} - {}</li>", row.timestamp, row_json(row)))
        .collect()
}

fn build_alert_text(rows: &[LogRecord]) -> String {
    rows.iter()
        .map(|row| format!("{} - {}", row.timestamp, row_json(row)))
        .collect::<Vec<_>>()
        .join("\n")
}

impl AlertDispatcher {
    /// Look back over one monitor interval
    pub fn new(engine: Arc<LogEngine>) -> Self {
        let minutes = i64::from(engine.settings().monitor_interval_minutes);
        Self {
            engine,
            lookback: Duration::minutes(minutes),
        }
    }

    pub fn with_lookback(mut self, lookback: Duration) -> Self {
        self.lookback = lookback;
        self
    }

    pub fn subject(&self) -> String {
        let settings = self.engine.settings();
        format!("{} health check - {}", settings.component, settings.environment)
    }

    pub async fn run(&self) -> AlertOutcome {
        let context = qualified_context("monitor task");

        let now = self.engine.now();
        let from = (now - self.lookback).format(MONITOR_TIMESTAMP_FORMAT).to_string();
        let to = now.format(MONITOR_TIMESTAMP_FORMAT).to_string();

        let rows = match self.engine.store().recent_errors(&from, &to).await {
            Ok(rows) => rows,
            Err(e) => {
                tracing::error!(error = %format!("{:#}", e), "Monitor query failed");
                self.engine
                    .error(LogData::new(context.as_str()).with_err(ServiceError::from(e)))
                    .await;
                return AlertOutcome::Failed;
            }
        };

        if rows.is_empty() {
            tracing::debug!(from = %from, to = %to, "No recent errors to report");
            self.engine
                .debug(
                    LogData::new(context.as_str())
                        .with_message("Found no recent ERROR records to report"),
                )
                .await;
            return AlertOutcome::Quiet;
        }

        tracing::debug!(count = rows.len(), from = %from, to = %to, "Reporting recent errors");
        self.engine
            .debug(
                LogData::new(context.as_str())
                    .with_message(format!("Found {} recent ERROR records to report", rows.len())),
            )
            .await;

        let message = EmailMessage {
            to: self.engine.settings().health_check_recipients.clone(),
            subject: self.subject(),
            html_body: build_alert_body(&rows),
            text_body: build_alert_text(&rows),
        };

        if self.engine.send_email(&message).await {
            AlertOutcome::Sent(rows.len())
        } else {
            AlertOutcome::Failed
        }
    }
}

#[async_trait]
impl TaskHandler for AlertDispatcher {
    async fn run(&self) -> anyhow::Result<()> {
        AlertDispatcher::run(self).await;
        Ok(())
    }
}
