// ABOUTME: Arena of per-task context records with explicit create/destroy lifecycle.
// ABOUTME: Records are deep-copied on fork so parent and child never share mutable state.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::EngineError;
use crate::event::{ConnectionId, InboundEvent};
use crate::metrics;

/// Identifier for one schedulable message-handling task.
///
/// Ids come from a monotonic counter and are never reused within a process,
/// so a live id is always unambiguous.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TaskId(pub u64);

impl std::fmt::Display for TaskId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "task-{}", self.0)
    }
}

/// Mutable state bound to one task for the duration of its handler run.
#[derive(Debug, Clone)]
pub struct ContextRecord {
    /// Lookup key into the gateway's connection registry; never owned here
    pub connection: ConnectionId,
    /// The event that created this task; set once, read-only afterward
    inbound: InboundEvent,
    /// Semantic fields extracted from the inbound frame, mutable by handlers
    pub data: Map<String, Value>,
    /// Handler-local scratch space (`match` token buffer, `block_continue`, ...)
    pub cache: HashMap<String, Value>,
    /// Task this record was forked from, as a plain lookup id
    pub parent: Option<TaskId>,
    pub created_at: DateTime<Utc>,
}

impl ContextRecord {
    fn new(event: InboundEvent) -> Self {
        let data = event.extract_data();
        Self {
            connection: event.connection,
            inbound: event,
            data,
            cache: HashMap::new(),
            parent: None,
            created_at: Utc::now(),
        }
    }

    /// The raw inbound event. There is deliberately no setter.
    pub fn inbound(&self) -> &InboundEvent {
        &self.inbound
    }
}

/// Process-local table of live context records, keyed by task id.
///
/// Clone-able handle over shared interior state. All operations are
/// synchronous and lock-scoped; nothing here ever suspends, so mutations
/// are atomic with respect to the cooperative scheduler.
#[derive(Clone)]
pub struct ContextStore {
    records: Arc<Mutex<HashMap<TaskId, ContextRecord>>>,
    next_id: Arc<AtomicU64>,
}

impl ContextStore {
    pub fn new() -> Self {
        Self {
            records: Arc::new(Mutex::new(HashMap::new())),
            next_id: Arc::new(AtomicU64::new(1)),
        }
    }

    /// Reserve a fresh task id. The id has no record until `create` is called.
    pub fn allocate_id(&self) -> TaskId {
        TaskId(self.next_id.fetch_add(1, Ordering::Relaxed))
    }

    /// Allocate a record for `task` from the given inbound event.
    pub fn create(&self, task: TaskId, event: InboundEvent) -> Result<(), EngineError> {
        let mut records = self.records.lock().expect("context store lock poisoned");
        if records.contains_key(&task) {
            return Err(EngineError::DuplicateTask(task));
        }
        records.insert(task, ContextRecord::new(event));
        metrics::set_live_contexts(records.len() as u64);
        Ok(())
    }

    /// Fork a new record from `parent`'s current state under a fresh id.
    ///
    /// The copy is deep: subsequent mutation of either record's `data` or
    /// `cache` is invisible to the other.
    pub fn fork(&self, parent: TaskId) -> Result<TaskId, EngineError> {
        let child = self.allocate_id();
        let mut records = self.records.lock().expect("context store lock poisoned");
        let parent_record = records
            .get(&parent)
            .ok_or(EngineError::TaskNotFound(parent))?;
        let mut record = parent_record.clone();
        record.parent = Some(parent);
        records.insert(child, record);
        metrics::set_live_contexts(records.len() as u64);
        Ok(child)
    }

    /// Release the record for `task`. Idempotent.
    pub fn destroy(&self, task: TaskId) {
        let mut records = self.records.lock().expect("context store lock poisoned");
        if records.remove(&task).is_some() {
            metrics::set_live_contexts(records.len() as u64);
        }
    }

    /// Run `f` against the live record for `task`.
    pub fn with_record<R>(
        &self,
        task: TaskId,
        f: impl FnOnce(&mut ContextRecord) -> R,
    ) -> Result<R, EngineError> {
        let mut records = self.records.lock().expect("context store lock poisoned");
        let record = records.get_mut(&task).ok_or(EngineError::TaskNotFound(task))?;
        Ok(f(record))
    }

    /// Clone the live record for `task`.
    pub fn snapshot(&self, task: TaskId) -> Result<ContextRecord, EngineError> {
        self.with_record(task, |record| record.clone())
    }

    pub fn contains(&self, task: TaskId) -> bool {
        self.records
            .lock()
            .expect("context store lock poisoned")
            .contains_key(&task)
    }

    pub fn live_count(&self) -> usize {
        self.records
            .lock()
            .expect("context store lock poisoned")
            .len()
    }

    /// Drop every live record. Shutdown path only; handlers are not resumed.
    pub fn clear(&self) -> usize {
        let mut records = self.records.lock().expect("context store lock poisoned");
        let dropped = records.len();
        records.clear();
        metrics::set_live_contexts(0);
        dropped
    }
}

impl Default for ContextStore {
    fn default() -> Self {
        Self::new()
    }
}
