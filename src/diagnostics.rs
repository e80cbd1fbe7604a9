//! Process-wide sink for failures inside the logging machinery itself, and
//! the error-tracking channel application errors are reported to
//!
//! Nothing that goes wrong while logging is ever returned to the caller. It
//! ends up in the `DiagnosticSink` instead.

use crate::error::{parse_error, ServiceError};
use std::fmt;
use std::sync::Mutex;

pub const MODULE_NAME: &str = "logkeeper";

pub trait DiagnosticSink: Send + Sync {
    fn capture(&self, context: &str, error: &dyn fmt::Display);
}

/// Prefix a context with the module name unless it already carries it
pub fn qualified_context(context: &str) -> String {
    if context.contains(MODULE_NAME) {
        context.to_string()
    } else {
        format!("{} {}", MODULE_NAME, context)
    }
}

/// Default sink: reports through `tracing` at ERROR
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingSink;

impl DiagnosticSink for TracingSink {
    fn capture(&self, context: &str, error: &dyn fmt::Display) {
        tracing::error!(
            target: "logkeeper::diagnostics",
            context = %qualified_context(context),
            error = %error,
            "Internal logging failure"
        );
    }
}

/// Sink that keeps every capture in memory
#[derive(Debug, Default)]
pub struct MemorySink {
    captured: Mutex<Vec<(String, String)>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn captured(&self) -> Vec<(String, String)> {
        self.captured
            .lock()
            .map(|entries| entries.clone())
            .unwrap_or_default()
    }

    pub fn is_empty(&self) -> bool {
        self.captured().is_empty()
    }
}

impl DiagnosticSink for MemorySink {
    fn capture(&self, context: &str, error: &dyn fmt::Display) {
        if let Ok(mut entries) = self.captured.lock() {
            entries.push((qualified_context(context), error.to_string()));
        }
    }
}

/// External error tracking (exception reporting service)
///
/// Receives every error passed to a log call and every system error
/// answered on the API path.
pub trait ErrorTracker: Send + Sync {
    fn report(&self, context: &str, err: &ServiceError);
}

/// Default tracker: one structured ERROR event per report
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingTracker;

impl ErrorTracker for TracingTracker {
    fn report(&self, context: &str, err: &ServiceError) {
        tracing::error!(
            target: "logkeeper::errors",
            context = %qualified_context(context),
            kind = crate::error::classify(err).as_str(),
            error = %parse_error(err).details,
            "Error reported"
        );
    }
}

/// Tracker that keeps `(context, message)` of every report in memory
#[derive(Debug, Default)]
pub struct MemoryTracker {
    reports: Mutex<Vec<(String, String)>>,
}

impl MemoryTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn reports(&self) -> Vec<(String, String)> {
        self.reports
            .lock()
            .map(|entries| entries.clone())
            .unwrap_or_default()
    }
}

impl ErrorTracker for MemoryTracker {
    fn report(&self, context: &str, err: &ServiceError) {
        if let Ok(mut entries) = self.reports.lock() {
            entries.push((qualified_context(context), parse_error(err).message));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_qualified_context() {
        assert_eq!(qualified_context("writeLog"), "logkeeper writeLog");
        assert_eq!(qualified_context("logkeeper query"), "logkeeper query");
    }

    #[test]
    fn test_memory_sink_records_captures() {
        let sink = MemorySink::new();
        assert!(sink.is_empty());

        sink.capture("write", &"database is locked");

        let captured = sink.captured();
        assert_eq!(captured.len(), 1);
        assert_eq!(captured[0].0, "logkeeper write");
        assert_eq!(captured[0].1, "database is locked");
    }

    #[test]
    fn test_memory_tracker_records_reports() {
        let tracker = MemoryTracker::new();
        tracker.report("charge", &ServiceError::system("card network down"));

        assert_eq!(
            tracker.reports(),
            vec![(
                "logkeeper charge".to_string(),
                "card network down".to_string()
            )]
        );
    }
}
