use crate::logger::Logger;
use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Json},
};
use serde_json::json;

/// Health check endpoint
/// Returns 200 OK if the service is running; `logging` reports whether the
/// engine is connected or running fail-open.
pub async fn health_check(State(logger): State<Logger>) -> impl IntoResponse {
    (
        StatusCode::OK,
        Json(json!({
            "status": "healthy",
            "service": "logkeeper",
            "version": env!("CARGO_PKG_VERSION"),
            "logging": if logger.is_enabled() { "enabled" } else { "disabled" },
        })),
    )
}
