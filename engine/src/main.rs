//! CasaPay Engine Binary
//!
//! Boots the lifecycle engine with structured logging and waits for
//! shutdown. Transport adapters connect through the library crate.

use std::sync::Arc;

use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use casapay_engine::{Engine, EngineConfig};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info".into()),
        ))
        .with(tracing_subscriber::fmt::layer().json())
        .init();

    info!("Starting CasaPay engine");

    // Load configuration
    let config = EngineConfig::from_env();
    if let Err(e) = config.validate() {
        error!(error = %e, "Invalid configuration");
        return Err(anyhow::anyhow!("Configuration error: {}", e));
    }

    let engine = Arc::new(Engine::new(config));

    info!("Engine running, waiting for shutdown signal");

    tokio::signal::ctrl_c().await?;
    info!("Shutdown signal received");

    let metrics = engine.metrics();
    info!(
        invoices_captured = metrics
            .invoices_captured
            .load(std::sync::atomic::Ordering::Relaxed),
        payments_confirmed = metrics
            .payments_confirmed
            .load(std::sync::atomic::Ordering::Relaxed),
        obligations_completed = metrics
            .obligations_completed
            .load(std::sync::atomic::Ordering::Relaxed),
        "Engine shutdown complete"
    );

    Ok(())
}
