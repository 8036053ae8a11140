//! scittlog-api - SCITT Transparency Log Service
//!
//! Loads configuration, opens the log (recovering from an interrupted
//! append if needed), and serves the SCRAPI HTTP surface.
//!
//! Usage:
//!   scittlog-api [config.json]
//!
//! The config path defaults to `scittlog.json` and can also be set via
//! `SCITT_CONFIG`. Individual values can be overridden through the
//! `SCITT_*` environment variables documented in `common::config`.

use std::env;
use std::process::ExitCode;

use scittlog::api::{create_router, AppState};
use scittlog::common::config::ServiceConfig;
use scittlog::common::logging::{init_logging, LogLevel};

#[tokio::main]
async fn main() -> ExitCode {
    dotenv::dotenv().ok();

    let config_path = env::args()
        .nth(1)
        .or_else(|| env::var("SCITT_CONFIG").ok())
        .unwrap_or_else(|| "scittlog.json".to_string());

    let config = match ServiceConfig::load(&config_path) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("cannot load configuration from {}: {}", config_path, e);
            return ExitCode::FAILURE;
        }
    };

    if let Err(e) = init_logging(LogLevel::from(config.log_level.as_str()), config.log_json) {
        eprintln!("cannot initialise logging: {}", e);
        return ExitCode::FAILURE;
    }

    let addr = format!("{}:{}", config.server.host, config.server.port);
    let origin = config.origin.clone();

    let state = match AppState::build(config).await {
        Ok(state) => state,
        Err(e) => {
            tracing::error!(error = %e, "startup failed");
            return ExitCode::FAILURE;
        }
    };

    let app = create_router(state);
    let listener = match tokio::net::TcpListener::bind(&addr).await {
        Ok(listener) => listener,
        Err(e) => {
            tracing::error!(%addr, error = %e, "cannot bind listener");
            return ExitCode::FAILURE;
        }
    };

    tracing::info!(%addr, %origin, "scittlog API listening");
    if let Err(e) = axum::serve(listener, app).await {
        tracing::error!(error = %e, "server error");
        return ExitCode::FAILURE;
    }
    ExitCode::SUCCESS
}
