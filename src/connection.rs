// ABOUTME: Registry of live protocol connections and in-flight API calls.
// ABOUTME: Maps connection ids to outbound frame senders; correlates responses by echo.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use anyhow::Result;
use chrono::{DateTime, Utc};
use serde_json::Value;
use tokio::sync::{mpsc, oneshot};

use confab_core::ConnectionId;

/// Handle for one connected protocol client.
///
/// Cheap to clone; sending serializes the frame and queues it on the
/// connection's writer task.
#[derive(Clone)]
pub struct ConnectionHandle {
    pub id: ConnectionId,
    /// The bot account on the far end, from the connect handshake
    pub self_id: Option<i64>,
    pub connected_at: DateTime<Utc>,
    sender: mpsc::Sender<String>,
}

impl ConnectionHandle {
    pub async fn send_frame(&self, frame: &Value) -> Result<()> {
        let serialized = serde_json::to_string(frame)?;
        self.sender
            .send(serialized)
            .await
            .map_err(|_| anyhow::anyhow!("{} writer closed", self.id))
    }
}

/// Registry of live connections plus the echo table for API responses.
///
/// The engine never sees this type; it holds connection ids only and reaches
/// delivery through the outbound caller.
#[derive(Clone)]
pub struct ConnectionRegistry {
    connections: Arc<Mutex<HashMap<ConnectionId, ConnectionHandle>>>,
    pending_calls: Arc<Mutex<HashMap<String, oneshot::Sender<Value>>>>,
    next_id: Arc<AtomicU64>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self {
            connections: Arc::new(Mutex::new(HashMap::new())),
            pending_calls: Arc::new(Mutex::new(HashMap::new())),
            // Id 0 is reserved for HTTP-injected events
            next_id: Arc::new(AtomicU64::new(1)),
        }
    }

    pub fn register(&self, self_id: Option<i64>, sender: mpsc::Sender<String>) -> ConnectionId {
        let id = ConnectionId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let handle = ConnectionHandle {
            id,
            self_id,
            connected_at: Utc::now(),
            sender,
        };
        let mut connections = self
            .connections
            .lock()
            .expect("connection table lock poisoned");
        connections.insert(id, handle);
        metrics::gauge!("confab_connected_clients").set(connections.len() as f64);
        id
    }

    pub fn lookup(&self, id: ConnectionId) -> Option<ConnectionHandle> {
        self.connections
            .lock()
            .expect("connection table lock poisoned")
            .get(&id)
            .cloned()
    }

    pub fn remove(&self, id: ConnectionId) -> Option<ConnectionHandle> {
        let mut connections = self
            .connections
            .lock()
            .expect("connection table lock poisoned");
        let removed = connections.remove(&id);
        metrics::gauge!("confab_connected_clients").set(connections.len() as f64);
        removed
    }

    pub fn count(&self) -> usize {
        self.connections
            .lock()
            .expect("connection table lock poisoned")
            .len()
    }

    /// Register an in-flight API call; the returned slot resolves when a
    /// response frame with this echo arrives.
    pub fn register_call(&self, echo: impl Into<String>) -> oneshot::Receiver<Value> {
        let (tx, rx) = oneshot::channel();
        self.pending_calls
            .lock()
            .expect("pending call table lock poisoned")
            .insert(echo.into(), tx);
        rx
    }

    /// Route a response frame to its caller. Returns false for unknown or
    /// already-expired echoes.
    pub fn resolve_call(&self, echo: &str, response: Value) -> bool {
        let slot = self
            .pending_calls
            .lock()
            .expect("pending call table lock poisoned")
            .remove(echo);
        match slot {
            Some(tx) => tx.send(response).is_ok(),
            None => false,
        }
    }

    /// Drop a call slot that timed out before its response arrived.
    pub fn forget_call(&self, echo: &str) {
        self.pending_calls
            .lock()
            .expect("pending call table lock poisoned")
            .remove(echo);
    }

    pub fn pending_call_count(&self) -> usize {
        self.pending_calls
            .lock()
            .expect("pending call table lock poisoned")
            .len()
    }
}

impl Default for ConnectionRegistry {
    fn default() -> Self {
        Self::new()
    }
}
