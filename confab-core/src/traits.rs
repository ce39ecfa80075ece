// ABOUTME: Collaborator seams consumed by the engine.
// ABOUTME: Outbound API delivery and message codec are implemented by the gateway.

use anyhow::Result;
use async_trait::async_trait;
use serde_json::{Map, Value};

use crate::event::ConnectionId;

/// Delivers outbound API calls for the engine.
///
/// The engine only assembles payloads (`{context, operation}` for quick
/// replies, `{action, params}` for everything else); transport, connection
/// lookup, and response correlation are the implementor's job.
#[async_trait]
pub trait OutboundCaller: Send + Sync {
    /// Invoke a protocol action on the given connection and await its result.
    async fn call_api(
        &self,
        connection: ConnectionId,
        action: &str,
        params: Value,
    ) -> Result<Value>;

    /// Deliver a quick-operation reply: the event's data plus the operation
    /// to apply to it (reply text, at_sender flag, ...).
    async fn quick_operation(
        &self,
        connection: ConnectionId,
        context: &Map<String, Value>,
        operation: Value,
    ) -> Result<Value>;
}

/// Converts the protocol's message field between its canonical segment-array
/// form and a display string.
pub trait MessageCodec: Send + Sync {
    /// Render a message value (string or segment array) as display text.
    fn to_display(&self, message: &Value) -> String;

    /// Parse a message value into its canonical segment-array form.
    fn to_canonical(&self, message: &Value) -> Value;
}
