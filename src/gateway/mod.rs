// ABOUTME: Gateway surface — WebSocket and HTTP routes over the dispatch engine.
// ABOUTME: Builds the axum router and owns the shared per-route state.

pub mod http;
pub mod ws;

use std::future::Future;
use std::sync::Arc;

use anyhow::{Context as _, Result};
use axum::routing::{get, post};
use axum::Router;
use metrics_exporter_prometheus::PrometheusHandle;
use tower_http::trace::TraceLayer;

use confab_core::Dispatcher;

use crate::config::Config;
use crate::connection::ConnectionRegistry;

/// State shared by every gateway route.
#[derive(Clone)]
pub struct GatewayState {
    pub dispatcher: Arc<Dispatcher>,
    pub registry: ConnectionRegistry,
    pub config: Arc<Config>,
}

/// Assemble the gateway router: protocol WebSocket, HTTP event injection,
/// health, and Prometheus metrics.
pub fn router(state: GatewayState, metrics_handle: PrometheusHandle) -> Router {
    let gateway_routes = Router::new()
        .route("/ws", get(ws::ws_handler))
        .route("/event", post(http::event_handler))
        .route("/healthz", get(http::healthz_handler))
        .with_state(state);

    // Metrics endpoint - renders Prometheus text format
    let metrics_routes = Router::new()
        .route("/metrics", get(http::metrics_handler))
        .with_state(Arc::new(metrics_handle));

    Router::new()
        .merge(gateway_routes)
        .merge(metrics_routes)
        .layer(TraceLayer::new_for_http())
}

/// Bind and serve until the shutdown future resolves.
pub async fn serve(
    addr: &str,
    app: Router,
    shutdown: impl Future<Output = ()> + Send + 'static,
) -> Result<()> {
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind {addr}"))?;
    tracing::info!(addr = %addr, "Starting gateway server");
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown)
        .await?;
    Ok(())
}
