// ABOUTME: HTTP routes — event injection, health, and Prometheus metrics.
// ABOUTME: POST /event feeds one JSON frame into the pipeline; the caller gets no body back.

use std::sync::Arc;

use axum::extract::State;
use axum::http::StatusCode;
use axum::Json;
use metrics_exporter_prometheus::PrometheusHandle;
use serde_json::{json, Value};

use confab_core::{ConnectionId, InboundEvent};

use super::GatewayState;

/// Inject one event frame over HTTP. Responds 204 on dispatch, 400 for
/// frames that aren't events.
pub async fn event_handler(
    State(state): State<GatewayState>,
    Json(payload): Json<Value>,
) -> StatusCode {
    match InboundEvent::from_frame(ConnectionId::HTTP, payload) {
        Some(event) => {
            tracing::debug!(event_id = %event.id, class = %event.class, "Event injected over HTTP");
            state.dispatcher.dispatch_detached(event);
            StatusCode::NO_CONTENT
        }
        None => StatusCode::BAD_REQUEST,
    }
}

/// Basic gateway liveness and engine state.
pub async fn healthz_handler(State(state): State<GatewayState>) -> Json<Value> {
    Json(json!({
        "status": "ok",
        "connections": state.registry.count(),
        "pending_waits": state.dispatcher.waits().pending_count(),
        "live_contexts": state.dispatcher.store().live_count(),
    }))
}

/// Render Prometheus text format.
pub async fn metrics_handler(State(handle): State<Arc<PrometheusHandle>>) -> String {
    handle.render()
}
