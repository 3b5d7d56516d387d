//! contextline HTTP server binary.
//!
//! # Environment Variables
//!
//! - `BIND_ADDR`     — listen address (default `0.0.0.0:8080`)
//! - `STORE_URL`     — settings/transcript store path
//! - `VECTOR_DIR`    — vector cache directory
//! - `LOG_LEVEL`     — `tracing_subscriber::EnvFilter` directive
//! - `CORS_ORIGINS`  — comma-separated allowed origins (empty = permissive)
//!
//! Exit codes: `0` normal, `1` configuration error, `2` unrecoverable store
//! failure at start.

use std::sync::Arc;

use contextline::config::Config;
use contextline::core::Core;
use contextline::server::{app_router, AppState};

#[tokio::main]
async fn main() {
    let config = match Config::from_env() {
        Ok(c) => c,
        Err(e) => {
            eprintln!("configuration error: {e}");
            std::process::exit(1);
        }
    };

    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::try_new(&config.log_level).unwrap_or_else(|_| "info".into()))
        .init();

    let core = match Core::bootstrap(&config).await {
        Ok(c) => c,
        Err(e) => {
            tracing::error!(error = %e, "failed to bootstrap core state");
            std::process::exit(2);
        }
    };

    let state = AppState::new(Arc::new(core));
    let app = app_router(state, &config.cors_origins);

    tracing::info!(bind_addr = %config.bind_addr, "contextline server starting");

    let listener = match tokio::net::TcpListener::bind(&config.bind_addr).await {
        Ok(l) => l,
        Err(e) => {
            tracing::error!(error = %e, addr = %config.bind_addr, "failed to bind");
            std::process::exit(2);
        }
    };

    if let Err(e) = axum::serve(listener, app).await {
        tracing::error!(error = %e, "server exited with error");
        std::process::exit(2);
    }
}
