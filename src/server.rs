use anyhow::Result;
use axum::{extract::DefaultBodyLimit, middleware, routing::get, Router};
use std::net::SocketAddr;
use tokio::sync::broadcast;
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::{
    config::ServerConfig, handlers, logger::Logger, middleware::api_logging,
    signals::ShutdownSignal,
};

/// Serve the log viewer API until a shutdown signal arrives
pub async fn start_server(
    config: ServerConfig,
    logger: Logger,
    mut shutdown_rx: broadcast::Receiver<ShutdownSignal>,
) -> Result<()> {
    let app = create_router(logger);

    let addr = SocketAddr::from((config.host.parse::<std::net::IpAddr>()?, config.port));
    info!("Starting log viewer on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;

    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            let _ = shutdown_rx.recv().await;
            info!("Shutdown signal received, draining connections...");
        })
        .await?;

    info!("Log viewer stopped");
    Ok(())
}

/// Create the Axum router with all routes and middleware
pub fn create_router(logger: Logger) -> Router {
    let max_body = logger
        .engine()
        .map(|e| e.settings().max_body_bytes)
        .unwrap_or(1024 * 1024);

    Router::new()
        .route("/health", get(handlers::health::health_check))
        .route("/api/v1/logs", get(handlers::logs_api::get_logs))
        .route_layer(middleware::from_fn_with_state(logger.clone(), api_logging))
        .with_state(logger)
        .layer(DefaultBodyLimit::max(max_body))
        .layer(TraceLayer::new_for_http())
}
