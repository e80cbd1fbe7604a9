pub mod alerts;
pub mod config;
pub mod diagnostics;
pub mod email;
pub mod engine;
pub mod error;
pub mod handlers;
pub mod logger;
pub mod middleware;
pub mod purge;
pub mod query;
pub mod record;
pub mod scheduler;
pub mod server;
pub mod signals;
pub mod storage;

pub use engine::{EngineSettings, LogEngine, RequestContext};
pub use error::{ErrorKind, ServiceError};
pub use logger::{Logger, LoggerRegistry};
pub use record::{Level, LogData};

use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Initialize tracing/logging
///
/// `log_format` is "json" for one JSON object per line, anything else for
/// human-readable text. `RUST_LOG` overrides the default `info` filter.
///
/// Note: This function can only be called once.
pub fn init_tracing(log_format: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    let registry = tracing_subscriber::registry().with(filter);
    if log_format == "json" {
        registry
            .with(fmt::layer().json().with_target(true))
            .init();
    } else {
        registry.with(fmt::layer().with_target(true)).init();
    }
}
