//! # Tasker Orchestration Server
//!
//! Standalone server binary: bootstraps the orchestration system, serves the
//! web API, runs the run-queue worker, and shuts down gracefully on Ctrl+C or
//! SIGTERM.
//!
//! ```bash
//! # Run with default configuration
//! cargo run --bin tasker-server
//!
//! # Run with a specific environment
//! TASKER_ENV=production cargo run --bin tasker-server
//! ```

use std::time::Duration;

use tokio::signal;
use tracing::{error, info};

use tasker_orchestration::orchestration::OrchestrationSystem;
use tasker_orchestration::web;
use tasker_shared::logging;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenvy::dotenv().ok();
    logging::init_tracing();

    info!("Starting Tasker Orchestration Server...");
    info!("   Version: {}", env!("CARGO_PKG_VERSION"));

    let system = OrchestrationSystem::bootstrap()
        .await
        .map_err(|e| format!("Failed to bootstrap orchestration: {e}"))?;

    let config = system.context().config().clone();
    let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);

    let worker = tokio::spawn(system.clone().run_queue_worker(
        Duration::from_millis(500),
        10,
        shutdown_rx,
    ));

    let server_handle = if config.web_enabled() {
        let router = web::build_router(system.clone());
        let bind_address = format!("{}:{}", config.web.host, config.web.port);
        let listener = tokio::net::TcpListener::bind(&bind_address).await?;
        info!(address = %bind_address, "   REST API: Running");
        Some(tokio::spawn(async move {
            if let Err(e) = axum::serve(listener, router).await {
                error!(error = %e, "Web server exited with error");
            }
        }))
    } else {
        None
    };

    info!(
        environment = %config.execution.environment,
        "Orchestration Server started successfully; press Ctrl+C to shut down"
    );

    shutdown_signal().await;
    info!("Shutdown signal received, initiating graceful shutdown...");

    let _ = shutdown_tx.send(true);
    let shutdown_timeout = Duration::from_millis(config.execution.shutdown_timeout_ms);
    match tokio::time::timeout(shutdown_timeout, worker).await {
        Ok(_) => info!("Run-queue worker stopped"),
        Err(_) => error!(
            timeout_ms = config.execution.shutdown_timeout_ms,
            "Graceful shutdown timed out, forcing exit"
        ),
    }
    if let Some(server) = server_handle {
        server.abort();
    }

    info!("Orchestration Server shutdown complete");
    Ok(())
}

/// Wait for shutdown signal (Ctrl+C or SIGTERM)
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
