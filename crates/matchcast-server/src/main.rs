//! # matchcast server
//!
//! Real-time match-event broadcast server.
//!
//! ## Usage
//!
//! ```bash
//! # Run with default settings
//! matchcast
//!
//! # Run with environment variables
//! MATCHCAST_PORT=8080 MATCHCAST_HOST=0.0.0.0 matchcast
//! ```
//!
//! Configuration is read from `matchcast.toml` when present.

mod config;
mod connection;
mod handlers;
mod metrics;

use anyhow::Result;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "matchcast=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Load configuration
    let config = config::Config::load()?;

    tracing::info!("Starting matchcast server on {}:{}", config.host, config.port);

    // Initialize metrics
    metrics::init_metrics();

    // Start the server
    handlers::run_server(config).await?;

    Ok(())
}
