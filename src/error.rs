use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::backtrace::{Backtrace, BacktraceStatus};

/// Error classification driving HTTP status and logging policy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Requested entity does not exist (client error, not logged)
    NotFound,
    /// Caller supplied bad input (client error, not logged)
    Validation,
    /// Anything else (logged at ERROR)
    System,
}

impl ErrorKind {
    pub fn status(&self) -> StatusCode {
        match self {
            ErrorKind::NotFound => StatusCode::NOT_FOUND,
            ErrorKind::Validation => StatusCode::BAD_REQUEST,
            ErrorKind::System => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::NotFound => "not_found",
            ErrorKind::Validation => "validation_error",
            ErrorKind::System => "system_error",
        }
    }
}

/// Error value that survives module and process boundaries
///
/// The kind travels as data, so a value that was serialized by one service
/// and deserialized by another still classifies the same way. `name` is the
/// structural fallback for producers that only set a declared error name.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, thiserror::Error)]
#[error("{message}")]
pub struct ServiceError {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<ErrorKind>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default)]
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stack: Option<String>,
}

impl ServiceError {
    fn tagged(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind: Some(kind),
            name: None,
            message: message.into(),
            stack: None,
        }
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::tagged(ErrorKind::NotFound, message)
    }

    pub fn validation(message: impl Into<String>) -> Self {
        Self::tagged(ErrorKind::Validation, message)
    }

    pub fn system(message: impl Into<String>) -> Self {
        Self::tagged(ErrorKind::System, message)
    }

    /// Untagged error carrying only a declared name
    pub fn named(name: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            kind: None,
            name: Some(name.into()),
            message: message.into(),
            stack: None,
        }
    }

    pub fn with_stack(mut self, stack: impl Into<String>) -> Self {
        self.stack = Some(stack.into());
        self
    }

    /// Wrap an arbitrary error, flattening its source chain into the message.
    /// A backtrace is attached when backtraces are enabled for the process.
    pub fn from_error(err: &(dyn std::error::Error + 'static)) -> Self {
        let mut message = err.to_string();
        let mut source = err.source();
        while let Some(inner) = source {
            message.push_str(": ");
            message.push_str(&inner.to_string());
            source = inner.source();
        }

        let backtrace = Backtrace::capture();
        Self {
            kind: None,
            name: None,
            message,
            stack: captured(&backtrace),
        }
    }

    pub fn classify(&self) -> ErrorKind {
        classify(self)
    }
}

fn captured(backtrace: &Backtrace) -> Option<String> {
    match backtrace.status() {
        BacktraceStatus::Captured => Some(backtrace.to_string()),
        _ => None,
    }
}

impl From<anyhow::Error> for ServiceError {
    fn from(err: anyhow::Error) -> Self {
        Self {
            kind: None,
            name: None,
            message: format!("{:#}", err),
            stack: captured(err.backtrace()),
        }
    }
}

impl From<sqlx::Error> for ServiceError {
    fn from(err: sqlx::Error) -> Self {
        Self::from_error(&err)
    }
}

/// Classify an error by its tag, falling back to its declared name.
pub fn classify(err: &ServiceError) -> ErrorKind {
    if let Some(kind) = err.kind {
        return kind;
    }

    match err.name.as_deref() {
        Some("NotFoundError") => ErrorKind::NotFound,
        Some("ValidationError") => ErrorKind::Validation,
        _ => ErrorKind::System,
    }
}

/// Message, application stack and diagnostic details of an error
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ParsedError {
    pub message: String,
    pub stack: Option<String>,
    pub details: String,
}

/// Identity of an error without a message. Stack text never appears here
/// because the message may reach a client.
fn fallback_message(err: &ServiceError) -> String {
    let mut identity = serde_json::Map::new();
    identity.insert("kind".to_string(), json!(classify(err)));
    if let Some(name) = &err.name {
        identity.insert("name".to_string(), json!(name));
    }
    serde_json::Value::Object(identity).to_string()
}

pub fn parse_error(err: &ServiceError) -> ParsedError {
    let message = if err.message.is_empty() {
        fallback_message(err)
    } else {
        err.message.clone()
    };
    let stack = err.stack.as_deref().map(app_frames).filter(|s| !s.is_empty());

    // Validation details stay message-only so internals never reach a
    // client that merely sent bad input.
    let details = match (classify(err), &stack) {
        (ErrorKind::Validation, _) | (_, None) => message.clone(),
        (_, Some(stack)) => format!("{} : {}", message, stack),
    };

    ParsedError {
        message,
        stack,
        details,
    }
}

const RUNTIME_FRAME_MARKERS: &[&str] = &[
    "/rustc/",
    "/.cargo/registry/",
    "/.cargo/git/",
    "std::",
    "core::",
    "alloc::",
    "tokio::",
    "futures::",
    "futures_util::",
    "internal/",
    "node_modules",
    "<unknown>",
];

/// Reduce a stack trace to application frames.
pub fn app_frames(stack: &str) -> String {
    stack
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .filter(|line| !RUNTIME_FRAME_MARKERS.iter().any(|m| line.contains(m)))
        .collect::<Vec<_>>()
        .join("\n ")
}

/// Double single quotes in free text before it is stored.
pub fn escape_quotes(text: &str) -> String {
    text.replace('\'', "''")
}

/// JSON error response with the mapped status; never carries stack text
pub fn error_response(kind: ErrorKind, message: &str) -> Response {
    let body = Json(json!({
        "error": {
            "message": message,
            "type": kind.as_str(),
        }
    }));

    (kind.status(), body).into_response()
}

impl IntoResponse for ServiceError {
    fn into_response(self) -> Response {
        let parsed = parse_error(&self);
        error_response(classify(&self), &parsed.message)
    }
}
