// ABOUTME: Outbound API caller — assembles action frames and awaits echoed responses.
// ABOUTME: Implements the engine's OutboundCaller seam over the connection registry.

use std::time::Duration;

use anyhow::{Context as _, Result};
use async_trait::async_trait;
use serde_json::{json, Map, Value};
use uuid::Uuid;

use confab_core::{ConnectionId, OutboundCaller};

use crate::connection::ConnectionRegistry;

/// Action name for the protocol's quick-operation reply.
pub const QUICK_OPERATION_ACTION: &str = ".handle_quick_operation";

/// Delivers API calls to protocol clients over their registered connections.
///
/// Each call is a `{action, params, echo}` frame; the response is correlated
/// back by its echo through the registry's pending-call table. Calls that
/// outlive the timeout drop their slot so a late response is discarded.
#[derive(Clone)]
pub struct ApiClient {
    registry: ConnectionRegistry,
    timeout: Duration,
}

impl ApiClient {
    pub fn new(registry: ConnectionRegistry, timeout: Duration) -> Self {
        Self { registry, timeout }
    }
}

#[async_trait]
impl OutboundCaller for ApiClient {
    async fn call_api(
        &self,
        connection: ConnectionId,
        action: &str,
        params: Value,
    ) -> Result<Value> {
        let handle = self
            .registry
            .lookup(connection)
            .with_context(|| format!("{connection} is not registered"))?;

        let echo = Uuid::new_v4().to_string();
        let slot = self.registry.register_call(&echo);
        let frame = json!({
            "action": action,
            "params": params,
            "echo": echo,
        });

        if let Err(err) = handle.send_frame(&frame).await {
            self.registry.forget_call(&echo);
            return Err(err);
        }
        tracing::debug!(%connection, action, %echo, "API call sent");

        match tokio::time::timeout(self.timeout, slot).await {
            Ok(Ok(response)) => Ok(response),
            Ok(Err(_)) => {
                self.registry.forget_call(&echo);
                anyhow::bail!("{connection} dropped before answering {action}")
            }
            Err(_) => {
                self.registry.forget_call(&echo);
                anyhow::bail!(
                    "{action} on {connection} timed out after {}s",
                    self.timeout.as_secs()
                )
            }
        }
    }

    async fn quick_operation(
        &self,
        connection: ConnectionId,
        context: &Map<String, Value>,
        operation: Value,
    ) -> Result<Value> {
        self.call_api(
            connection,
            QUICK_OPERATION_ACTION,
            json!({
                "context": context,
                "operation": operation,
            }),
        )
        .await
    }
}
