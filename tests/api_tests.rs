/// Integration tests for the request/response logger and the log viewer API
use axum::{
    body::{to_bytes, Body},
    http::{Request, StatusCode},
    middleware,
    response::Response,
    routing::post,
    Extension, Router,
};
use logkeeper::{
    config::DatabaseConfig,
    middleware::{api_logging, ExceptionHandler},
    query::{LogFilter, Pagination},
    server::create_router,
    storage::SqliteLogStore,
    EngineSettings, Level, LogEngine, Logger, ServiceError,
};
use serde_json::Value;
use std::sync::Arc;
use tower::ServiceExt;

async fn logger(api_requests: bool) -> Logger {
    let cfg = DatabaseConfig {
        url: "sqlite::memory:".to_string(),
        ..Default::default()
    };
    let store = Arc::new(SqliteLogStore::connect(&cfg).await.unwrap());
    let settings = EngineSettings {
        component: "bookings".to_string(),
        api_requests,
        ..Default::default()
    };
    Logger::new(Arc::new(LogEngine::new(settings, store)))
}

async fn json_body(response: Response) -> Value {
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

#[tokio::test]
async fn test_api_request_is_logged_and_visible_in_viewer() {
    let logger = logger(true).await;
    let app = create_router(logger.clone());

    let response = app
        .clone()
        .oneshot(
            Request::builder()
                .uri("/api/v1/logs?level=error")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let page = json_body(response).await;
    assert_eq!(page["total"], 0);

    let response = app
        .oneshot(
            Request::builder()
                .uri("/api/v1/logs?level=info&order_by=id&direction=asc")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    let page = json_body(response).await;
    assert_eq!(page["total"], 1);
    assert_eq!(page["rows"][0]["context"], "API : app");
    assert_eq!(page["rows"][0]["request_method"], "GET");
    assert_eq!(page["rows"][0]["request_url"], "/api/v1/logs?level=error");
    assert_eq!(page["rows"][0]["response_code"], 200);
    assert_eq!(page["rows"][0]["component"], "bookings");
}

#[tokio::test]
async fn test_health_and_fast_requests_are_not_logged_by_default() {
    let logger = logger(false).await;
    let app = create_router(logger.clone());

    let response = app
        .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let page = logger
        .query(&LogFilter::default(), &Pagination::default())
        .await
        .unwrap();
    assert_eq!(page.total, 0);
}

#[tokio::test]
async fn test_viewer_rejects_unknown_sort_column() {
    let app = create_router(logger(false).await);

    let response = app
        .oneshot(
            Request::builder()
                .uri("/api/v1/logs?order_by=password")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

async fn failing_booking(Extension(handler): Extension<ExceptionHandler>) -> Response {
    handler
        .handle(&ServiceError::system("connection pool exhausted"))
        .await
}

#[tokio::test]
async fn test_system_error_from_handler_is_recorded_with_request() {
    let logger = logger(false).await;
    let app = Router::new()
        .route("/agencies/:agency_id/bookings", post(failing_booking))
        .route_layer(middleware::from_fn_with_state(logger.clone(), api_logging))
        .with_state(logger.clone());

    let response = app
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/agencies/7/bookings")
                .header("content-type", "application/json")
                .body(Body::from(r#"{"seats":2}"#))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);

    let filter = LogFilter {
        level: Some(Level::Error),
        ..Default::default()
    };
    let page = logger.query(&filter, &Pagination::default()).await.unwrap();
    assert_eq!(page.total, 1);

    let row = &page.rows[0];
    assert_eq!(row.context, "logkeeper handleApiException");
    assert_eq!(row.message.as_deref(), Some("connection pool exhausted"));
    assert_eq!(row.request_method.as_deref(), Some("POST"));
    assert_eq!(row.request_url.as_deref(), Some("/agencies/7/bookings"));
    assert_eq!(row.request_body.as_deref(), Some(r#"{"seats":2}"#));
    assert_eq!(row.response_code, Some(500));
}
