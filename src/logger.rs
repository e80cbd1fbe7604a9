//! Fail-open logger handle
//!
//! Host services hold a `Logger`, never a `LogEngine` directly. When the
//! engine could not be built (bad config, unreachable database) every call
//! becomes a no-op, so logging can never take the host down.

use crate::config::Config;
use crate::diagnostics::{DiagnosticSink, TracingSink};
use crate::email::{EmailMessage, HttpEmailSender};
use crate::engine::{EngineSettings, LogEngine, RequestContext};
use crate::error::{classify, parse_error, ErrorKind, ParsedError, ServiceError};
use crate::query::{LogFilter, LogPage, Pagination};
use crate::record::{Level, LogData, NewConnectionProtectionLog};
use crate::storage::SqliteLogStore;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use dashmap::DashMap;
use serde_json::Value;
use std::sync::Arc;

#[derive(Clone, Default)]
pub struct Logger {
    engine: Option<Arc<LogEngine>>,
}

impl std::fmt::Debug for Logger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Logger")
            .field("component", &self.component())
            .finish()
    }
}

async fn build_engine(
    cfg: &Config,
    component: Option<&str>,
    sink: Arc<dyn DiagnosticSink>,
) -> anyhow::Result<LogEngine> {
    let mut settings = EngineSettings::from_config(cfg)?;
    if let Some(component) = component {
        settings = settings.with_component(component);
    }

    let store = SqliteLogStore::connect(&cfg.database).await?;
    let mut engine = LogEngine::new(settings, Arc::new(store)).with_sink(sink);
    if let Some(sender) = HttpEmailSender::from_config(&cfg.email) {
        engine = engine.with_email_sender(Arc::new(sender));
    }

    Ok(engine)
}

impl Logger {
    pub fn new(engine: Arc<LogEngine>) -> Self {
        Self {
            engine: Some(engine),
        }
    }

    /// Handle whose every operation is a no-op
    pub fn disabled() -> Self {
        Self { engine: None }
    }

    /// Connect storage and build the engine; failures yield a disabled
    /// logger after being reported through `tracing`.
    pub async fn init(cfg: &Config, component: Option<&str>) -> Self {
        Self::init_with_sink(cfg, component, Arc::new(TracingSink)).await
    }

    pub async fn init_with_sink(
        cfg: &Config,
        component: Option<&str>,
        sink: Arc<dyn DiagnosticSink>,
    ) -> Self {
        match build_engine(cfg, component, sink.clone()).await {
            Ok(engine) => {
                tracing::debug!(component = %engine.settings().component, "Logger initialized");
                Self::new(Arc::new(engine))
            }
            Err(e) => {
                sink.capture("constructor", &format!("{:#}", e));
                Self::disabled()
            }
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.engine.is_some()
    }

    pub fn engine(&self) -> Option<&Arc<LogEngine>> {
        self.engine.as_ref()
    }

    pub fn component(&self) -> Option<&str> {
        self.engine.as_deref().map(|e| e.settings().component.as_str())
    }

    pub fn timezone(&self) -> Option<chrono_tz::Tz> {
        self.engine.as_deref().map(LogEngine::timezone)
    }

    pub async fn write(&self, level: Level, data: LogData) -> bool {
        match &self.engine {
            Some(engine) => engine.write(level, data).await,
            None => false,
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

    pub async fn sql_query(&self, raw: &str, bind_params: &[Value]) -> bool {
        match &self.engine {
            Some(engine) => engine.sql_query(raw, bind_params).await,
            None => false,
        }
    }

    pub fn classify(&self, err: &ServiceError) -> ErrorKind {
        classify(err)
    }

    pub fn parse_error(&self, err: &ServiceError) -> ParsedError {
        parse_error(err)
    }

    pub async fn handle_api_exception(&self, ctx: &RequestContext, err: &ServiceError) -> Response {
        match &self.engine {
            Some(engine) => engine.handle_api_exception(ctx, err).await,
            None => classify(err).status().into_response(),
        }
    }

    pub async fn handle_result_failure(&self, ctx: &RequestContext, err: &ServiceError) -> Response {
        match &self.engine {
            Some(engine) => engine.handle_result_failure(ctx, err).await,
            None => classify(err).status().into_response(),
        }
    }

    pub fn set_custom_error_response_handler<F>(&self, handler: F)
    where
        F: Fn(&RequestContext, &ServiceError, &str) -> Response + Send + Sync + 'static,
    {
        if let Some(engine) = &self.engine {
            engine.set_custom_error_response_handler(handler);
        }
    }

    pub fn validation_error_response(&self, message: &str) -> Response {
        match &self.engine {
            Some(engine) => engine.validation_error_response(message),
            None => StatusCode::BAD_REQUEST.into_response(),
        }
    }

    pub fn authentication_error_response(&self, message: &str) -> Response {
        match &self.engine {
            Some(engine) => engine.authentication_error_response(message),
            None => StatusCode::UNAUTHORIZED.into_response(),
        }
    }

    pub async fn log_connection_protection(&self, log: &NewConnectionProtectionLog) -> bool {
        match &self.engine {
            Some(engine) => engine.log_connection_protection(log).await,
            None => false,
        }
    }

    pub async fn send_email(&self, message: &EmailMessage) -> bool {
        match &self.engine {
            Some(engine) => engine.send_email(message).await,
            None => false,
        }
    }

    pub async fn query(&self, filter: &LogFilter, page: &Pagination) -> Option<LogPage> {
        match &self.engine {
            Some(engine) => engine.query(filter, page).await,
            None => None,
        }
    }
}

/// One logger per component name, built on first use
///
/// Registries share nothing with each other; two registries asked for the
/// same component hold two independent engines.
pub struct LoggerRegistry {
    config: Config,
    sink: Arc<dyn DiagnosticSink>,
    loggers: DashMap<String, Logger>,
}

impl LoggerRegistry {
    pub fn new(config: Config) -> Self {
        Self::with_sink(config, Arc::new(TracingSink))
    }

    pub fn with_sink(config: Config, sink: Arc<dyn DiagnosticSink>) -> Self {
        Self {
            config,
            sink,
            loggers: DashMap::new(),
        }
    }

    /// Return the logger for `component`, building it on first request.
    /// Every later call hands out a clone of the same handle.
    pub async fn get_or_init(&self, component: &str) -> Logger {
        if let Some(existing) = self.loggers.get(component) {
            return existing.clone();
        }

        let logger = Logger::init_with_sink(&self.config, Some(component), self.sink.clone()).await;

        // A concurrent first call may have won the race; keep its handle.
        self.loggers
            .entry(component.to_string())
            .or_insert(logger)
            .clone()
    }

    pub fn get(&self, component: &str) -> Option<Logger> {
        self.loggers.get(component).map(|l| l.clone())
    }

    pub fn len(&self) -> usize {
        self.loggers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.loggers.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DatabaseConfig;
    use crate::diagnostics::MemorySink;

    fn memory_config() -> Config {
        Config {
            database: DatabaseConfig {
                url: "sqlite::memory:".to_string(),
                ..DatabaseConfig::default()
            },
            ..Config::default()
        }
    }

    #[tokio::test]
    async fn test_disabled_logger_is_noop() {
        let logger = Logger::disabled();
        assert!(!logger.is_enabled());
        assert!(!logger.error(LogData::new("X").with_message("m")).await);
        assert!(logger
            .query(&LogFilter::default(), &Pagination::default())
            .await
            .is_none());

        let response = logger
            .handle_api_exception(&RequestContext::default(), &ServiceError::not_found("x"))
            .await;
        assert_eq!(response.status(), StatusCode::NOT_FOUND);

        let response = logger
            .handle_api_exception(&RequestContext::default(), &ServiceError::system("x"))
            .await;
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[tokio::test]
    async fn test_init_failure_yields_disabled_logger() {
        let sink = Arc::new(MemorySink::new());
        let mut cfg = memory_config();
        cfg.logging.timezone = "Mars/Olympus_Mons".to_string();

        let logger = Logger::init_with_sink(&cfg, None, sink.clone()).await;
        assert!(!logger.is_enabled());

        let captured = sink.captured();
        assert_eq!(captured.len(), 1);
        assert_eq!(captured[0].0, "logkeeper constructor");
    }

    #[tokio::test]
    async fn test_init_with_component_override() {
        let logger = Logger::init(&memory_config(), Some("payments")).await;
        assert_eq!(logger.component(), Some("payments"));
        assert!(logger.info(LogData::new("X").with_message("m")).await);
    }

    #[tokio::test]
    async fn test_registry_returns_same_handle_per_component() {
        let registry = LoggerRegistry::new(memory_config());

        let first = registry.get_or_init("billing").await;
        first.info(LogData::new("X").with_message("one")).await;

        let second = registry.get_or_init("billing").await;
        let page = second
            .query(&LogFilter::default(), &Pagination::default())
            .await
            .unwrap();
        assert_eq!(page.total, 1);

        let other = registry.get_or_init("users").await;
        assert_eq!(other.component(), Some("users"));
        assert_eq!(registry.len(), 2);
    }

    #[tokio::test]
    async fn test_registries_are_isolated() {
        let a = LoggerRegistry::new(memory_config());
        let b = LoggerRegistry::new(memory_config());

        a.get_or_init("billing")
            .await
            .info(LogData::new("X").with_message("only in a"))
            .await;

        let from_b = b
            .get_or_init("billing")
            .await
            .query(&LogFilter::default(), &Pagination::default())
            .await
            .unwrap();
        assert_eq!(from_b.total, 0);
        assert!(a.get("users").is_none());
    }
}
