// ABOUTME: WebSocket endpoint for protocol clients (bots) connecting to the gateway.
// ABOUTME: Registers connections, classifies inbound frames, and feeds the dispatch pipeline.

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use futures_util::{SinkExt, StreamExt};
use serde_json::Value;
use tokio::sync::mpsc;

use confab_core::{ConnectionId, InboundEvent};

use super::GatewayState;

/// WebSocket upgrade handler at /ws.
///
/// Clients identify their bot account with an `X-Self-ID` header and, when
/// the gateway is token-protected, authenticate with `Authorization: Bearer`.
pub async fn ws_handler(
    ws: WebSocketUpgrade,
    headers: HeaderMap,
    State(state): State<GatewayState>,
) -> Response {
    if let Some(expected) = &state.config.server.access_token {
        let presented = headers
            .get("authorization")
            .and_then(|value| value.to_str().ok())
            .and_then(|value| value.strip_prefix("Bearer "));
        if presented != Some(expected.as_str()) {
            tracing::warn!("Rejected WebSocket connection with bad or missing token");
            return StatusCode::UNAUTHORIZED.into_response();
        }
    }

    let self_id = headers
        .get("x-self-id")
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.parse::<i64>().ok());

    ws.on_upgrade(move |socket| handle_socket(socket, state, self_id))
}

/// Handle one protocol connection for its whole lifetime.
async fn handle_socket(socket: WebSocket, state: GatewayState, self_id: Option<i64>) {
    let (frame_tx, mut frame_rx) = mpsc::channel::<String>(64);
    let connection = state.registry.register(self_id, frame_tx);
    tracing::info!(%connection, self_id = ?self_id, "Protocol client connected");
    state
        .dispatcher
        .dispatch_detached(InboundEvent::connected(connection, self_id));

    let (mut ws_sink, mut ws_stream) = socket.split::<Message>();

    // Writer task: drains outbound frames queued by the API caller
    let writer_task = tokio::spawn(async move {
        while let Some(frame) = frame_rx.recv().await {
            if ws_sink.send(Message::Text(frame.into())).await.is_err() {
                break;
            }
        }
    });

    while let Some(Ok(message)) = ws_stream.next().await {
        match message {
            Message::Text(text) => route_frame(&state, connection, text.as_str()),
            Message::Close(_) => break,
            _ => {}
        }
    }

    writer_task.abort();
    state.registry.remove(connection);
    state
        .dispatcher
        .dispatch_detached(InboundEvent::disconnected(connection, self_id));
    tracing::info!(%connection, "Protocol client disconnected");
}

/// Classify one inbound frame: an event goes to the pipeline, an echoed API
/// response resolves its pending call, anything else is dropped with a log.
fn route_frame(state: &GatewayState, connection: ConnectionId, text: &str) {
    let payload: Value = match serde_json::from_str(text) {
        Ok(value) => value,
        Err(err) => {
            tracing::debug!(%connection, error = %err, "Discarding unparseable frame");
            return;
        }
    };

    if payload.get("post_type").is_some() {
        match InboundEvent::from_frame(connection, payload) {
            Some(event) => state.dispatcher.dispatch_detached(event),
            None => tracing::debug!(%connection, "Discarding frame with unknown post_type"),
        }
        return;
    }

    let echo = payload
        .get("echo")
        .and_then(Value::as_str)
        .map(str::to_string);
    match echo {
        Some(echo) => {
            if !state.registry.resolve_call(&echo, payload) {
                tracing::debug!(%connection, %echo, "Response for unknown or expired API call");
            }
        }
        None => tracing::debug!(%connection, "Discarding unrecognized frame"),
    }
}
