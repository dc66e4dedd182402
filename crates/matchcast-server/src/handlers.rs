//! HTTP surface of the matchcast server.
//!
//! Routes upgrade requests into hub connections and exposes the read-only
//! operational endpoints.

use crate::config::Config;
use crate::connection;
use crate::metrics;
use anyhow::Result;
use axum::{
    extract::{ws::WebSocketUpgrade, State},
    http::StatusCode,
    response::IntoResponse,
    routing::get,
    Router,
};
use matchcast_core::{Broadcaster, Hub, HubConfig};
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::{error, info, warn};

/// Shared server state.
pub struct AppState {
    /// The broadcast hub.
    pub hub: Arc<Hub>,
    /// Publisher façade over the hub, used by the stats surface and by an
    /// embedded match engine.
    pub broadcaster: Broadcaster,
    /// Server configuration.
    pub config: Config,
}

impl AppState {
    /// Create new app state.
    #[must_use]
    pub fn new(config: Config) -> Self {
        let hub = Arc::new(Hub::with_config(HubConfig {
            outbound_capacity: config.limits.outbound_queue_capacity,
            max_subscriptions_per_connection: config.limits.max_subscriptions_per_connection,
        }));

        Self {
            broadcaster: Broadcaster::new(hub.clone()),
            hub,
            config,
        }
    }
}

/// Run the HTTP/WebSocket server until shutdown.
///
/// # Errors
///
/// Returns an error if the server fails to start.
pub async fn run_server(config: Config) -> Result<()> {
    let state = Arc::new(AppState::new(config.clone()));

    // Start metrics server if enabled
    if config.metrics.enabled {
        if let Err(e) = metrics::start_metrics_server(config.metrics.port) {
            error!("Failed to start metrics server: {}", e);
        }
    }

    // Build router
    let app = Router::new()
        .route(&config.transport.websocket_path, get(ws_handler))
        .route("/health", get(health_handler))
        .route("/stats", get(stats_handler))
        .with_state(state.clone());

    // Bind and serve
    let addr = config.bind_addr()?;
    let listener = TcpListener::bind(addr).await?;

    info!("matchcast server listening on {}", addr);
    info!(
        "WebSocket endpoint: ws://{}{}",
        addr, config.transport.websocket_path
    );

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    // Terminate every registered connection deterministically.
    state.hub.shutdown();

    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!("Failed to listen for shutdown signal: {}", e);
    }
    info!("Shutdown signal received");
}

/// Health check handler.
async fn health_handler() -> impl IntoResponse {
    axum::Json(serde_json::json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION")
    }))
}

/// Operational statistics: connection count plus per-topic subscriber counts.
async fn stats_handler(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let stats = state.broadcaster.stats();
    let topics: serde_json::Map<String, serde_json::Value> = state
        .hub
        .topic_names()
        .into_iter()
        .map(|topic| {
            let count = state.broadcaster.subscriber_count(&topic);
            (topic, serde_json::json!(count))
        })
        .collect();

    axum::Json(serde_json::json!({
        "connections": stats.connections,
        "subscriptions": stats.total_subscriptions,
        "topics": topics,
    }))
}

/// WebSocket upgrade handler.
async fn ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<Arc<AppState>>,
) -> impl IntoResponse {
    if state.hub.connection_count() >= state.config.limits.max_connections {
        warn!("Connection limit reached, rejecting upgrade");
        return StatusCode::SERVICE_UNAVAILABLE.into_response();
    }

    ws.on_upgrade(move |socket| connection::handle_socket(socket, state))
        .into_response()
}
