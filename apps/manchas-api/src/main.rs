//! # Manchas y Pecas API Server
//!
//! ## Startup
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  1. tracing (RUST_LOG, default info,manchas=debug,sqlx=warn)           │
//! │  2. ApiConfig (env) + CheckoutConfig (TOML + env)                      │
//! │  3. SQLite pool + migrations                                           │
//! │  4. Engines + Wompi client                                             │
//! │  5. Expiration sweeper (background)                                    │
//! │  6. axum server until Ctrl+C / SIGTERM, then sweeper shutdown          │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use std::sync::Arc;

use anyhow::Context;
use tokio::net::TcpListener;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use manchas_api::{create_router, ApiConfig, AppState};
use manchas_checkout::{CheckoutConfig, CheckoutEngines, WompiClient};
use manchas_db::{Database, DbConfig};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,manchas=debug,sqlx=warn")),
        )
        .with_target(true)
        .init();

    info!("Starting Manchas y Pecas back office API...");

    let config = ApiConfig::load()?;
    let checkout = CheckoutConfig::load(config.checkout_config_path.clone())
        .context("Invalid checkout configuration")?;
    info!(
        addr = %config.bind_addr(),
        database = ?config.database_path,
        margin_mode = ?checkout.pricing.margin_mode,
        "Configuration loaded"
    );
    if checkout.aggregator.private_key.is_empty() {
        warn!("Aggregator private key not set, PSE payments will fail");
    }

    let db = Database::new(
        DbConfig::new(&config.database_path).max_connections(config.max_connections),
    )
    .await
    .context("Failed to open database")?;
    info!("Database ready");

    tokio::fs::create_dir_all(&config.uploads_dir)
        .await
        .context("Failed to create uploads directory")?;

    let aggregator = Arc::new(WompiClient::new(checkout.aggregator.clone())?);
    let engines = CheckoutEngines::new(db.clone(), &checkout, aggregator);

    let (sweeper, sweeper_handle) = engines.sweeper(checkout.cash.sweep_interval());
    let sweeper_task = tokio::spawn(sweeper.run());

    let state = Arc::new(AppState {
        db: db.clone(),
        engines,
        uploads_dir: config.uploads_dir.clone(),
    });
    let app = create_router(state);

    let listener = TcpListener::bind(config.bind_addr())
        .await
        .with_context(|| format!("Failed to bind {}", config.bind_addr()))?;
    info!(addr = %config.bind_addr(), "Listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    if let Err(e) = sweeper_handle.shutdown().await {
        warn!(error = %e, "Sweeper already stopped");
    }
    sweeper_task.await?;
    db.close().await;

    info!("Server shutdown complete");
    Ok(())
}

/// Graceful shutdown signal handler.
async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("Failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    info!("Shutdown signal received, starting graceful shutdown...");
}
