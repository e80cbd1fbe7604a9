//! Log engine
//!
//! Level gating, validation, sanitization and persistence of log records,
//! plus the API error path (classify, log, respond). Nothing in here ever
//! returns an error or panics into the caller: internal failures go to the
//! `DiagnosticSink`. Logged errors are also reported to an `ErrorTracker`.

use crate::config::Config;
use crate::diagnostics::{
    qualified_context, DiagnosticSink, ErrorTracker, TracingSink, TracingTracker,
};
use crate::email::{EmailError, EmailMessage, EmailSender};
use crate::error::{
    classify, error_response, escape_quotes, parse_error, ErrorKind, ParsedError, ServiceError,
};
use crate::query::{LogFilter, LogPage, Pagination, QueryPlan};
use crate::record::{Level, LogData, NewConnectionProtectionLog, NewLogRecord};
use crate::storage::LogStore;
use arc_swap::ArcSwapOption;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use futures::FutureExt;
use serde_json::Value;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

/// Record timestamps; lexicographic order is chronological order
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.3f";
/// Minute-granular bounds of the monitor window
pub const MONITOR_TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M";
/// Day-granular purge cutoffs
pub const DATE_FORMAT: &str = "%Y-%m-%d";

const SQL_CONTEXT: &str = "SQL";
const SQL_LOG_PREFIX: &str = "Executing (default): ";

/// Resolved engine configuration
#[derive(Debug, Clone)]
pub struct EngineSettings {
    pub component: String,
    pub min_level: Level,
    pub api_requests: bool,
    pub api_request_threshold_ms: u64,
    pub health_check_path: String,
    pub sql_queries: bool,
    pub timezone: Tz,
    pub max_body_bytes: usize,
    pub monitor_interval_minutes: u32,
    pub purge_hour: u32,
    pub purge_minute: u32,
    pub log_retention_days: u32,
    pub protection_retention_days: u32,
    pub health_check_recipients: Vec<String>,
    pub environment: String,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            component: crate::diagnostics::MODULE_NAME.to_string(),
            min_level: Level::Info,
            api_requests: false,
            api_request_threshold_ms: 30_000,
            health_check_path: "/status_auth".to_string(),
            sql_queries: false,
            timezone: Tz::UTC,
            max_body_bytes: 1024 * 1024,
            monitor_interval_minutes: 15,
            purge_hour: 22,
            purge_minute: 0,
            log_retention_days: 5,
            protection_retention_days: 30,
            health_check_recipients: Vec::new(),
            environment: "development".to_string(),
        }
    }
}

impl EngineSettings {
    pub fn from_config(cfg: &Config) -> anyhow::Result<Self> {
        Ok(Self {
            component: cfg.logging.component_name.clone(),
            min_level: cfg.logging.min_level()?,
            api_requests: cfg.logging.api_requests,
            api_request_threshold_ms: cfg.logging.api_request_threshold_ms,
            health_check_path: cfg.logging.health_check_path.clone(),
            sql_queries: cfg.logging.sql_queries,
            timezone: cfg.logging.tz()?,
            max_body_bytes: cfg.logging.max_body_bytes,
            monitor_interval_minutes: cfg.scheduler.monitor_interval_minutes,
            purge_hour: cfg.scheduler.purge_hour,
            purge_minute: cfg.scheduler.purge_minute,
            log_retention_days: cfg.scheduler.log_retention_days,
            protection_retention_days: cfg.scheduler.protection_retention_days,
            health_check_recipients: cfg.email.health_check_recipients.clone(),
            environment: cfg.email.environment.clone(),
        })
    }

    pub fn with_component(mut self, component: impl Into<String>) -> Self {
        self.component = component.into();
        self
    }
}

/// Request facts the API error path records
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RequestContext {
    pub method: String,
    pub url: String,
    pub body: Option<Value>,
    pub sso_id: Option<String>,
    pub agency_id: Option<i64>,
    pub agency_program_id: Option<i64>,
}

/// Replaces the default 500 response of the System error path.
/// Receives the request, the original error and the computed message.
pub type ErrorResponder = dyn Fn(&RequestContext, &ServiceError, &str) -> Response + Send + Sync;

pub struct LogEngine {
    settings: EngineSettings,
    store: Arc<dyn LogStore>,
    sink: Arc<dyn DiagnosticSink>,
    tracker: Arc<dyn ErrorTracker>,
    email: Option<Arc<dyn EmailSender>>,
    custom_responder: ArcSwapOption<Box<ErrorResponder>>,
}

pub fn format_timestamp(at: &DateTime<Tz>) -> String {
    at.format(TIMESTAMP_FORMAT).to_string()
}

/// String bodies are stored escaped, anything else as JSON text
fn body_text(body: &Value) -> String {
    match body {
        Value::String(s) => escape_quotes(s),
        other => other.to_string(),
    }
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|s| !s.is_empty())
}

impl LogEngine {
    pub fn new(settings: EngineSettings, store: Arc<dyn LogStore>) -> Self {
        Self {
            settings,
            store,
            sink: Arc::new(TracingSink),
            tracker: Arc::new(TracingTracker),
            email: None,
            custom_responder: ArcSwapOption::empty(),
        }
    }

    pub fn with_sink(mut self, sink: Arc<dyn DiagnosticSink>) -> Self {
        self.sink = sink;
        self
    }

    pub fn with_error_tracker(mut self, tracker: Arc<dyn ErrorTracker>) -> Self {
        self.tracker = tracker;
        self
    }

    pub fn with_email_sender(mut self, sender: Arc<dyn EmailSender>) -> Self {
        self.email = Some(sender);
        self
    }

    pub fn settings(&self) -> &EngineSettings {
        &self.settings
    }

    pub fn store(&self) -> &Arc<dyn LogStore> {
        &self.store
    }

    pub fn sink(&self) -> &Arc<dyn DiagnosticSink> {
        &self.sink
    }

    pub fn timezone(&self) -> Tz {
        self.settings.timezone
    }

    pub fn now(&self) -> DateTime<Tz> {
        Utc::now().with_timezone(&self.settings.timezone)
    }

    /// Persist one record. Returns whether a row was written.
    pub async fn write(&self, level: Level, data: LogData) -> bool {
        match AssertUnwindSafe(self.write_record(level, data))
            .catch_unwind()
            .await
        {
            Ok(persisted) => persisted,
            Err(_) => {
                self.sink.capture("writeLog", &"panic while writing log record");
                false
            }
        }
    }

    async fn write_record(&self, level: Level, data: LogData) -> bool {
        if level < self.settings.min_level {
            return false;
        }

        if !data.is_valid() {
            tracing::warn!(
                level = %level,
                "Log data is not valid: context and either sql, message, err or request_url are required"
            );
            return false;
        }

        if let (Some(err), Some(context)) = (&data.err, data.source_label()) {
            self.tracker.report(context, err);
        }

        let record = self.build_record(level, data);
        match self.store.insert_log(&record).await {
            Ok(()) => true,
            Err(e) => {
                self.sink.capture("writeLog", &format!("{:#}", e));
                false
            }
        }
    }

    fn build_record(&self, level: Level, data: LogData) -> NewLogRecord {
        let context = data.source_label().unwrap_or_default().to_string();

        let mut message = non_empty(data.message);
        let mut stack = None;
        if let Some(err) = &data.err {
            let parsed = parse_error(err);
            message = Some(match message {
                Some(existing) => format!("{} : {}", existing, parsed.message),
                None => parsed.message,
            });
            stack = parsed.stack;
        }

        NewLogRecord {
            level: level.as_str().to_string(),
            component: self.settings.component.clone(),
            context,
            agency_id: data.agency_id,
            agency_program_id: data.agency_program_id,
            error_code: data.error_code,
            message: message.as_deref().map(escape_quotes),
            sso_id: non_empty(data.sso_id),
            request_method: non_empty(data.request_method),
            request_url: non_empty(data.request_url),
            request_body: data.request_body.as_ref().map(body_text),
            response_code: data.response_code.map(i64::from),
            response_body: data.response_body.as_ref().map(body_text),
            sql: data.sql.as_deref().filter(|s| !s.is_empty()).map(escape_quotes),
            data: data.data.as_ref().map(Value::to_string),
            stack: stack.as_deref().map(escape_quotes),
            elapsed_time: data.elapsed_time,
            timestamp: format_timestamp(&self.now()),
        }
    }

    pub async fn debug(&self, data: LogData) -> bool {
        self.write(Level::Debug, data).await
    }

    pub async fn info(&self, data: LogData) -> bool {
        self.write(Level::Info, data).await
    }

    pub async fn warn(&self, data: LogData) -> bool {
        self.write(Level::Warn, data).await
    }

    pub async fn error(&self, data: LogData) -> bool {
        self.write(Level::Error, data).await
    }

    /// Record an executed statement when SQL logging is enabled
    pub async fn sql_query(&self, raw: &str, bind_params: &[Value]) -> bool {
        if !self.settings.sql_queries {
            return false;
        }

        let mut sql = raw.replacen(SQL_LOG_PREFIX, "", 1);
        if !bind_params.is_empty() {
            let rendered: Vec<String> = bind_params
                .iter()
                .map(|p| match p {
                    Value::String(s) => s.clone(),
                    other => other.to_string(),
                })
                .collect();
            sql.push_str(&format!(", REPLACEMENTS: [{}]", rendered.join(",")));
        }

        self.info(LogData::new(SQL_CONTEXT).with_sql(sql)).await
    }

    pub fn classify(&self, err: &ServiceError) -> ErrorKind {
        classify(err)
    }

    pub fn parse_error(&self, err: &ServiceError) -> ParsedError {
        parse_error(err)
    }

    pub fn set_custom_error_response_handler<F>(&self, handler: F)
    where
        F: Fn(&RequestContext, &ServiceError, &str) -> Response + Send + Sync + 'static,
    {
        self.custom_responder
            .store(Some(Arc::new(Box::new(handler) as Box<ErrorResponder>)));
    }

    /// Answer a failed API request. Client errors are answered with their
    /// status and message; system errors are logged once and answered
    /// with 500 (or the custom responder).
    pub async fn handle_api_exception(&self, ctx: &RequestContext, err: &ServiceError) -> Response {
        self.handle_failure("handleApiException", ctx, err, true).await
    }

    /// Same as `handle_api_exception` for failures reported as a result
    /// value instead of an error; always answers with the default response.
    pub async fn handle_result_failure(&self, ctx: &RequestContext, err: &ServiceError) -> Response {
        self.handle_failure("handleResultFailure", ctx, err, false).await
    }

    async fn handle_failure(
        &self,
        context: &str,
        ctx: &RequestContext,
        err: &ServiceError,
        allow_custom: bool,
    ) -> Response {
        let message = parse_error(err).message;

        let kind = classify(err);
        if kind != ErrorKind::System {
            return error_response(kind, &message);
        }

        self.tracker.report(context, err);

        let outcome = AssertUnwindSafe(async {
            let mut data = LogData::new(qualified_context(context)).with_message(message.clone());
            data.sso_id = ctx.sso_id.clone();
            data.request_method = Some(ctx.method.clone());
            data.request_url = Some(ctx.url.clone());
            data.request_body = ctx.body.clone();
            data.response_code = Some(StatusCode::INTERNAL_SERVER_ERROR.as_u16());
            self.write(Level::Error, data).await;

            match self.custom_responder.load_full() {
                Some(responder) if allow_custom => (**responder)(ctx, err, &message),
                _ => error_response(ErrorKind::System, &message),
            }
        })
        .catch_unwind()
        .await;

        match outcome {
            Ok(response) => response,
            Err(_) => {
                self.sink
                    .capture(context, &"panic while answering a system error");
                error_response(ErrorKind::System, &message)
            }
        }
    }

    /// 400 with the given message, no record
    pub fn validation_error_response(&self, message: &str) -> Response {
        error_response(ErrorKind::Validation, message)
    }

    /// 401 with the given message, no record
    pub fn authentication_error_response(&self, message: &str) -> Response {
        (StatusCode::UNAUTHORIZED, message.to_string()).into_response()
    }

    /// Append a connection protection audit row
    pub async fn log_connection_protection(&self, log: &NewConnectionProtectionLog) -> bool {
        let timestamp = format_timestamp(&self.now());
        match self.store.insert_protection_log(log, &timestamp).await {
            Ok(()) => true,
            Err(e) => {
                self.sink
                    .capture("logConnectionProtectionRequest", &format!("{:#}", e));
                false
            }
        }
    }

    /// Send an email, logging failures instead of returning them
    pub async fn send_email(&self, message: &EmailMessage) -> bool {
        let context = qualified_context("sendEmail");
        let data = serde_json::to_value(message).ok();

        let result = match &self.email {
            Some(sender) => sender.send(message).await,
            None => Err(EmailError::NotConfigured),
        };

        let mut record = LogData::new(context);
        record.data = data;
        match result {
            Ok(()) => return true,
            Err(EmailError::Rejected(reason)) => {
                self.error(record.with_message(reason)).await;
            }
            Err(err) => {
                self.error(record.with_err(ServiceError::from_error(&err))).await;
            }
        }
        false
    }

    /// Filtered, paginated query. Failures are logged and reported as `None`.
    pub async fn query(&self, filter: &LogFilter, page: &Pagination) -> Option<LogPage> {
        let plan = QueryPlan::build(self.store.table_name(), filter, page);

        match tokio::try_join!(self.store.query_logs(&plan), self.store.count_logs(&plan)) {
            Ok((rows, total)) => Some(LogPage { total, rows }),
            Err(e) => {
                self.error(
                    LogData::new(qualified_context("query")).with_err(ServiceError::from(e)),
                )
                .await;
                None
            }
        }
    }
}
