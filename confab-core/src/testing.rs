// ABOUTME: Test doubles for the engine's collaborator seams.
// ABOUTME: Recording outbound caller and a pass-through codec used across unit and integration tests.

use std::sync::{Arc, Mutex};

use anyhow::Result;
use async_trait::async_trait;
use serde_json::{json, Map, Value};

use crate::event::ConnectionId;
use crate::traits::{MessageCodec, OutboundCaller};

/// Outbound caller that records every call and answers with a canned value.
#[derive(Clone)]
pub struct RecordingCaller {
    calls: Arc<Mutex<Vec<(ConnectionId, String, Value)>>>,
    quick_ops: Arc<Mutex<Vec<(Map<String, Value>, Value)>>>,
    response: Arc<Mutex<Value>>,
}

impl RecordingCaller {
    pub fn new() -> Self {
        Self {
            calls: Arc::new(Mutex::new(Vec::new())),
            quick_ops: Arc::new(Mutex::new(Vec::new())),
            response: Arc::new(Mutex::new(json!({"status": "ok", "retcode": 0}))),
        }
    }

    /// Replace the canned response returned by every subsequent call.
    pub fn respond_with(&self, value: Value) {
        *self.response.lock().unwrap() = value;
    }

    /// Every `call_api` seen so far, as (connection, action, params).
    pub fn api_calls(&self) -> Vec<(ConnectionId, String, Value)> {
        self.calls.lock().unwrap().clone()
    }

    /// Every quick operation seen so far, as (context data, operation).
    pub fn quick_operations(&self) -> Vec<(Map<String, Value>, Value)> {
        self.quick_ops.lock().unwrap().clone()
    }

    /// Texts replied so far, pulled out of the recorded quick operations.
    pub fn replies(&self) -> Vec<String> {
        self.quick_ops
            .lock()
            .unwrap()
            .iter()
            .filter_map(|(_, op)| op.get("reply").and_then(Value::as_str).map(str::to_string))
            .collect()
    }
}

impl Default for RecordingCaller {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl OutboundCaller for RecordingCaller {
    async fn call_api(
        &self,
        connection: ConnectionId,
        action: &str,
        params: Value,
    ) -> Result<Value> {
        self.calls
            .lock()
            .unwrap()
            .push((connection, action.to_string(), params));
        Ok(self.response.lock().unwrap().clone())
    }

    async fn quick_operation(
        &self,
        _connection: ConnectionId,
        context: &Map<String, Value>,
        operation: Value,
    ) -> Result<Value> {
        self.quick_ops
            .lock()
            .unwrap()
            .push((context.clone(), operation));
        Ok(self.response.lock().unwrap().clone())
    }
}

/// Codec that treats messages as opaque text: strings pass through, segment
/// arrays render their `text` data fields joined in order.
pub struct NullCodec;

impl MessageCodec for NullCodec {
    fn to_display(&self, message: &Value) -> String {
        match message {
            Value::String(text) => text.clone(),
            Value::Array(segments) => segments
                .iter()
                .filter_map(|segment| {
                    segment
                        .get("data")
                        .and_then(|data| data.get("text"))
                        .and_then(Value::as_str)
                })
                .collect::<Vec<_>>()
                .join(""),
            _ => String::new(),
        }
    }

    fn to_canonical(&self, message: &Value) -> Value {
        match message {
            Value::Array(_) => message.clone(),
            Value::String(text) => json!([{ "type": "text", "data": { "text": text } }]),
            other => json!([{ "type": "text", "data": { "text": other.to_string() } }]),
        }
    }
}
