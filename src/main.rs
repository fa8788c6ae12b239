//! action-items: one echo service, several HTTP routing layers
//!
//! Every routing layer exposes the same two endpoints:
//! - `GET /ais/{ai}` echoes the path segment
//! - `POST /ais` echoes the `ai` field of a JSON body
//!
//! Features:
//! - axum, hyper and a native tokio HTTP/1.1 layer side by side
//! - One listener per layer, supervised together with fail-fast shutdown
//! - Configuration via CLI arguments or TOML file

mod config;
mod error;
mod routers;
mod service;
mod shutdown;
mod supervisor;

use config::Config;
use std::process::ExitCode;
use supervisor::Supervisor;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

fn main() -> ExitCode {
    // Load configuration
    let config = match Config::load() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("error: {e}");
            return ExitCode::from(2);
        }
    };

    // Initialize logging
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();

    info!(
        services = config.services.len(),
        workers = ?config.workers,
        max_connections = config.options.max_connections,
        max_body_size = config.options.max_body_size,
        fail_fast = config.fail_fast,
        "Starting action-items server"
    );

    let mut builder = tokio::runtime::Builder::new_multi_thread();
    if let Some(workers) = config.workers {
        builder.worker_threads(workers);
    }
    let runtime = match builder.enable_all().build() {
        Ok(runtime) => runtime,
        Err(e) => {
            error!(error = %e, "Failed to start runtime");
            return ExitCode::FAILURE;
        }
    };

    match runtime.block_on(run(config)) {
        Ok(()) => {
            info!("Server stopped");
            ExitCode::SUCCESS
        }
        Err(e) => {
            error!(error = %e, "Server failed");
            ExitCode::FAILURE
        }
    }
}

/// Bind every service, then serve until Ctrl-C or a service failure.
async fn run(config: Config) -> Result<(), error::ServeError> {
    let supervisor = Supervisor::bind(&config.services, config.options, config.fail_fast)?;
    for (router, addr) in supervisor.local_addrs() {
        info!(router = %router, address = %addr, "Server listening");
    }
    supervisor.run(ctrl_c()).await
}

async fn ctrl_c() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!(error = %e, "Cannot listen for Ctrl-C");
        std::future::pending::<()>().await;
    }
}
