//! API request/response logging middleware
//!
//! ```ignore
//! let app = Router::new()
//!     .route("/bookings/:agency_id", get(list_bookings))
//!     .route_layer(middleware::from_fn_with_state(logger.clone(), api_logging));
//! ```
//!
//! Handlers answer failures through the `ExceptionHandler` extension the
//! middleware attaches to every request.

use crate::engine::{LogEngine, RequestContext};
use crate::error::ServiceError;
use crate::logger::Logger;
use crate::record::LogData;
use axum::{
    body::{to_bytes, Body, Bytes, HttpBody},
    extract::{FromRequestParts, Query, RawPathParams, Request, State},
    http::{request::Parts, HeaderMap, StatusCode},
    middleware::Next,
    response::Response,
};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

/// Arrival time of the request
#[derive(Debug, Clone, Copy)]
pub struct RequestStart(pub Instant);

/// Authenticated user id, set by the host's auth layer on the request or
/// on the response
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SsoId(pub String);

/// Per-request handle for answering failed requests
#[derive(Clone)]
pub struct ExceptionHandler {
    logger: Logger,
    context: RequestContext,
}

impl ExceptionHandler {
    pub fn new(logger: Logger, context: RequestContext) -> Self {
        Self { logger, context }
    }

    pub fn context(&self) -> &RequestContext {
        &self.context
    }

    pub async fn handle(&self, err: &ServiceError) -> Response {
        self.logger.handle_api_exception(&self.context, err).await
    }

    pub async fn handle_result_failure(&self, err: &ServiceError) -> Response {
        self.logger.handle_result_failure(&self.context, err).await
    }
}

/// Who sent the request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Requester {
    AdminPortal,
    Postman,
    App,
}

impl Requester {
    pub fn as_str(&self) -> &'static str {
        match self {
            Requester::AdminPortal => "admin portal",
            Requester::Postman => "postman",
            Requester::App => "app",
        }
    }

    pub fn classify(query: &HashMap<String, String>, headers: &HeaderMap) -> Self {
        if query.get("is_admin").map(String::as_str) == Some("true") {
            Requester::AdminPortal
        } else if headers.contains_key("postman-token") {
            Requester::Postman
        } else {
            Requester::App
        }
    }
}

/// Thresholds deciding which requests get a record
#[derive(Debug, Clone)]
pub struct ApiLogPolicy {
    pub enabled: bool,
    pub threshold_ms: u64,
    pub health_check_path: String,
}

impl ApiLogPolicy {
    fn from_engine(engine: &LogEngine) -> Self {
        let settings = engine.settings();
        Self {
            enabled: settings.api_requests,
            threshold_ms: settings.api_request_threshold_ms,
            health_check_path: settings.health_check_path.clone(),
        }
    }
}

/// 404s and health checks are never logged; everything else is logged when
/// API logging is on or the request was slower than the threshold.
pub fn should_log(status: StatusCode, path: &str, elapsed_ms: u64, policy: &ApiLogPolicy) -> bool {
    if status == StatusCode::NOT_FOUND {
        return false;
    }
    if !policy.health_check_path.is_empty() && path.ends_with(&policy.health_check_path) {
        return false;
    }
    policy.enabled || elapsed_ms > policy.threshold_ms
}

fn is_bounded(body: &Body, max_body: usize) -> bool {
    body.size_hint()
        .upper()
        .is_some_and(|n| n <= max_body as u64)
}

/// Body as JSON when it parses, text otherwise; empty bodies are absent
fn body_value(bytes: &Bytes) -> Option<Value> {
    if bytes.is_empty() {
        return None;
    }
    let value = serde_json::from_slice::<Value>(bytes)
        .unwrap_or_else(|_| Value::String(String::from_utf8_lossy(bytes).into_owned()));

    match &value {
        Value::Null => None,
        Value::Object(map) if map.is_empty() => None,
        Value::Array(items) if items.is_empty() => None,
        _ => Some(value),
    }
}

async fn agency_params(parts: &mut Parts) -> (Option<i64>, Option<i64>) {
    let Ok(params) = RawPathParams::from_request_parts(parts, &()).await else {
        return (None, None);
    };

    let mut agency_id = None;
    let mut agency_program_id = None;
    for (key, value) in params.iter() {
        match key {
            "agency_id" => agency_id = value.parse().ok(),
            "agency_program_id" => agency_program_id = value.parse().ok(),
            _ => {}
        }
    }
    (agency_id, agency_program_id)
}

pub async fn api_logging(State(logger): State<Logger>, req: Request, next: Next) -> Response {
    let Some(engine) = logger.engine().cloned() else {
        return next.run(req).await;
    };

    let start = Instant::now();
    let max_body = engine.settings().max_body_bytes;

    let (mut parts, body) = req.into_parts();

    // Oversized and unknown-length bodies go to the handler untouched and
    // are logged without a request body.
    let (request_body, body) = if is_bounded(&body, max_body) {
        match to_bytes(body, max_body).await {
            Ok(bytes) => (body_value(&bytes), Body::from(bytes)),
            Err(e) => {
                engine.sink().capture("middleware.attach", &e);
                (None, Body::empty())
            }
        }
    } else {
        (None, body)
    };

    let query = Query::<HashMap<String, String>>::try_from_uri(&parts.uri)
        .map(|q| q.0)
        .unwrap_or_default();
    let requester = Requester::classify(&query, &parts.headers);
    let (agency_id, agency_program_id) = agency_params(&mut parts).await;
    let path = parts.uri.path().to_string();

    let context = RequestContext {
        method: parts.method.to_string(),
        url: parts
            .uri
            .path_and_query()
            .map(|pq| pq.as_str().to_string())
            .unwrap_or_else(|| path.clone()),
        body: request_body,
        sso_id: parts.extensions.get::<SsoId>().map(|s| s.0.clone()),
        agency_id,
        agency_program_id,
    };

    parts.extensions.insert(RequestStart(start));
    parts.extensions.insert(context.clone());
    parts
        .extensions
        .insert(ExceptionHandler::new(logger.clone(), context.clone()));

    let response = next.run(Request::from_parts(parts, body)).await;

    let elapsed_ms = start.elapsed().as_millis() as u64;
    let policy = ApiLogPolicy::from_engine(&engine);
    if !should_log(response.status(), &path, elapsed_ms, &policy) {
        return response;
    }

    log_exchange(&engine, context, requester, response, elapsed_ms).await
}

async fn log_exchange(
    engine: &Arc<LogEngine>,
    context: RequestContext,
    requester: Requester,
    response: Response,
    elapsed_ms: u64,
) -> Response {
    let max_body = engine.settings().max_body_bytes;
    let (parts, body) = response.into_parts();
    let status = parts.status;

    // Only bodies of known, bounded size are buffered; streams pass through.
    let (response_body, body) = if is_bounded(&body, max_body) {
        match to_bytes(body, max_body).await {
            Ok(bytes) => (body_value(&bytes), Body::from(bytes)),
            Err(e) => {
                engine.sink().capture("apiRequestResponseLogger", &e);
                (None, Body::empty())
            }
        }
    } else {
        (None, body)
    };

    let sso_id = parts
        .extensions
        .get::<SsoId>()
        .map(|s| s.0.clone())
        .or(context.sso_id);

    let mut data = LogData::new(format!("API : {}", requester.as_str()))
        .with_request(context.method, context.url, context.body)
        .with_response(status.as_u16(), response_body)
        .with_agency(context.agency_id, context.agency_program_id)
        .with_elapsed_time(elapsed_ms as i64);
    data.sso_id = sso_id;

    engine.info(data).await;

    Response::from_parts(parts, body)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::tests::{all_rows, memory_engine};
    use crate::engine::EngineSettings;
    use axum::{
        http::Request as HttpRequest,
        middleware,
        routing::{get, post},
        Extension, Json, Router,
    };
    use tower::ServiceExt;

    fn policy(enabled: bool) -> ApiLogPolicy {
        ApiLogPolicy {
            enabled,
            threshold_ms: 30_000,
            health_check_path: "/status_auth".to_string(),
        }
    }

    #[test]
    fn test_should_log() {
        // 404 is never logged
        assert!(!should_log(StatusCode::NOT_FOUND, "/a", 60_000, &policy(true)));
        // health check is never logged
        assert!(!should_log(StatusCode::OK, "/v1/status_auth", 60_000, &policy(true)));

        assert!(should_log(StatusCode::OK, "/a", 5, &policy(true)));
        assert!(!should_log(StatusCode::OK, "/a", 5, &policy(false)));
        // slow requests are logged even when API logging is off
        assert!(should_log(StatusCode::OK, "/a", 30_001, &policy(false)));
        assert!(!should_log(StatusCode::OK, "/a", 30_000, &policy(false)));
    }

    #[test]
    fn test_requester_classification() {
        let mut headers = HeaderMap::new();
        let mut query = HashMap::new();
        assert_eq!(Requester::classify(&query, &headers), Requester::App);

        headers.insert("postman-token", "abc".parse().unwrap());
        assert_eq!(Requester::classify(&query, &headers), Requester::Postman);

        query.insert("is_admin".to_string(), "true".to_string());
        assert_eq!(Requester::classify(&query, &headers), Requester::AdminPortal);

        query.insert("is_admin".to_string(), "false".to_string());
        assert_eq!(Requester::classify(&query, &headers), Requester::Postman);
    }

    #[test]
    fn test_body_value() {
        assert_eq!(body_value(&Bytes::new()), None);
        assert_eq!(body_value(&Bytes::from_static(b"{}")), None);
        assert_eq!(
            body_value(&Bytes::from_static(br#"{"a":1}"#)),
            Some(serde_json::json!({"a": 1}))
        );
        assert_eq!(
            body_value(&Bytes::from_static(b"plain")),
            Some(Value::String("plain".to_string()))
        );
    }

    async fn app(settings: EngineSettings) -> (Router, Arc<LogEngine>) {
        let (engine, _) = memory_engine(settings).await;
        let logger = Logger::new(engine.clone());

        let router = Router::new()
            .route(
                "/agencies/:agency_id/programs/:agency_program_id",
                post(|Json(body): Json<Value>| async move { Json(body) }),
            )
            .route("/status_auth", get(|| async { "ok" }))
            .route(
                "/fail",
                get(|Extension(handler): Extension<ExceptionHandler>| async move {
                    handler.handle(&ServiceError::system("boom")).await
                }),
            )
            .route(
                "/missing",
                get(|Extension(handler): Extension<ExceptionHandler>| async move {
                    handler.handle(&ServiceError::not_found("no such booking")).await
                }),
            )
            .route_layer(middleware::from_fn_with_state(logger, api_logging));

        (router, engine)
    }

    fn enabled() -> EngineSettings {
        EngineSettings {
            api_requests: true,
            ..EngineSettings::default()
        }
    }

    #[tokio::test]
    async fn test_logs_request_and_response() {
        let (router, engine) = app(enabled()).await;

        let request = HttpRequest::builder()
            .method("POST")
            .uri("/agencies/11/programs/22?is_admin=true")
            .header("content-type", "application/json")
            .extension(SsoId("user-7".to_string()))
            .body(Body::from(r#"{"name":"x"}"#))
            .unwrap();
        let response = router.oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        // the handler still sees the buffered body
        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        assert_eq!(&body[..], br#"{"name":"x"}"#);

        let rows = all_rows(&engine).await;
        assert_eq!(rows.len(), 1);
        let row = &rows[0];
        assert_eq!(row.level, "INFO");
        assert_eq!(row.context, "API : admin portal");
        assert_eq!(row.sso_id.as_deref(), Some("user-7"));
        assert_eq!(row.agency_id, Some(11));
        assert_eq!(row.agency_program_id, Some(22));
        assert_eq!(row.request_method.as_deref(), Some("POST"));
        assert_eq!(row.request_url.as_deref(), Some("/agencies/11/programs/22?is_admin=true"));
        assert_eq!(row.request_body.as_deref(), Some(r#"{"name":"x"}"#));
        assert_eq!(row.response_code, Some(200));
        assert_eq!(row.response_body.as_deref(), Some(r#"{"name":"x"}"#));
        assert!(row.elapsed_time.is_some());
    }

    #[tokio::test]
    async fn test_health_check_and_fast_requests_are_skipped() {
        let (router, engine) = app(enabled()).await;
        let request = HttpRequest::builder()
            .uri("/status_auth")
            .body(Body::empty())
            .unwrap();
        router.oneshot(request).await.unwrap();
        assert!(all_rows(&engine).await.is_empty());

        let (router, engine) = app(EngineSettings::default()).await;
        let request = HttpRequest::builder()
            .method("POST")
            .uri("/agencies/1/programs/2")
            .header("content-type", "application/json")
            .body(Body::from("{\"a\":1}"))
            .unwrap();
        router.oneshot(request).await.unwrap();
        assert!(all_rows(&engine).await.is_empty());
    }

    #[tokio::test]
    async fn test_exception_handler_logs_system_error_once() {
        let (router, engine) = app(EngineSettings::default()).await;
        let request = HttpRequest::builder()
            .uri("/fail")
            .header("postman-token", "t")
            .body(Body::empty())
            .unwrap();

        let response = router.oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);

        let rows = all_rows(&engine).await;
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].context, "logkeeper handleApiException");
        assert_eq!(rows[0].request_url.as_deref(), Some("/fail"));
    }

    #[tokio::test]
    async fn test_not_found_answer_is_never_logged() {
        let (router, engine) = app(enabled()).await;
        let request = HttpRequest::builder()
            .uri("/missing")
            .body(Body::empty())
            .unwrap();

        let response = router.oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        assert!(all_rows(&engine).await.is_empty());
    }

    #[tokio::test]
    async fn test_oversized_request_body_reaches_handler() {
        let (engine, _) = memory_engine(EngineSettings {
            api_requests: true,
            max_body_bytes: 16,
            ..EngineSettings::default()
        })
        .await;
        let router = Router::new()
            .route(
                "/upload",
                post(|body: Bytes| async move { format!("handled {}", body.len()) }),
            )
            .route_layer(middleware::from_fn_with_state(
                Logger::new(engine.clone()),
                api_logging,
            ));

        let request = HttpRequest::builder()
            .method("POST")
            .uri("/upload")
            .body(Body::from("x".repeat(64)))
            .unwrap();
        let response = router.oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        assert_eq!(&body[..], b"handled 64");

        let rows = all_rows(&engine).await;
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].request_body, None);
        assert_eq!(rows[0].response_body.as_deref(), Some("handled 64"));
    }

    #[tokio::test]
    async fn test_disabled_logger_passes_through() {
        let router = Router::new()
            .route("/a", get(|| async { "ok" }))
            .route_layer(middleware::from_fn_with_state(Logger::disabled(), api_logging));

        let request = HttpRequest::builder().uri("/a").body(Body::empty()).unwrap();
        let response = router.oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }
}
