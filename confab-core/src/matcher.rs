// ABOUTME: Pending-wait table that parks a task until a correlated event arrives.
// ABOUTME: Resume slots are oneshot channels raced against a timeout; earliest registration wins.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde_json::{Map, Value};
use tokio::sync::oneshot;

use crate::error::EngineError;
use crate::metrics;
use crate::store::TaskId;

/// One parked task waiting for a correlated follow-up event.
struct PendingWait {
    /// Registration sequence; lower means registered earlier
    seq: u64,
    /// Task that will resume when this wait resolves
    task: TaskId,
    /// Field values captured at suspension time; a candidate event must
    /// match every one exactly
    key: Vec<(String, Value)>,
    /// Slot the matching event's data is delivered through
    resume: oneshot::Sender<Map<String, Value>>,
}

struct WaitTable {
    next_seq: u64,
    /// Kept in registration order; matching always scans from the front
    pending: Vec<PendingWait>,
}

/// Table of pending waits, shared between suspending handlers and the
/// dispatch pipeline.
///
/// Registration, matching, and removal are all synchronous and lock-scoped;
/// the only suspension point is the caller of `wait` parking on its own
/// resume slot.
#[derive(Clone)]
pub struct WaitRegistry {
    inner: Arc<Mutex<WaitTable>>,
}

impl WaitRegistry {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(WaitTable {
                next_seq: 1,
                pending: Vec::new(),
            })),
        }
    }

    /// Park the calling task until an event matching `fields` (with their
    /// current values in `data`) arrives, or `timeout` elapses.
    ///
    /// Every correlation field must be present in `data`; a missing field is
    /// a caller contract violation reported immediately, without suspending.
    /// On a match the resolving event's data map is returned; on expiry the
    /// wait is removed and `WaitTimeout` is returned. A matching event that
    /// arrives after expiry finds no entry and resumes nothing.
    pub async fn wait(
        &self,
        task: TaskId,
        data: &Map<String, Value>,
        fields: &[String],
        timeout: Duration,
    ) -> Result<Map<String, Value>, EngineError> {
        let mut key = Vec::with_capacity(fields.len());
        let mut missing = Vec::new();
        for field in fields {
            match data.get(field) {
                Some(value) => key.push((field.clone(), value.clone())),
                None => missing.push(field.clone()),
            }
        }
        if !missing.is_empty() {
            return Err(EngineError::MissingCorrelationFields { missing });
        }

        let (resume, slot) = oneshot::channel();
        let seq = {
            let mut table = self.inner.lock().expect("wait table lock poisoned");
            let seq = table.next_seq;
            table.next_seq += 1;
            table.pending.push(PendingWait {
                seq,
                task,
                key,
                resume,
            });
            metrics::record_wait_registered();
            metrics::set_pending_waits(table.pending.len() as u64);
            seq
        };
        tracing::debug!(%task, seq, timeout_secs = timeout.as_secs(), "Task parked on wait");

        match tokio::time::timeout(timeout, slot).await {
            Ok(Ok(matched)) => {
                tracing::debug!(%task, seq, "Wait resumed by matching event");
                Ok(matched)
            }
            // Sender dropped without a value: the table was drained (shutdown)
            Ok(Err(_)) => {
                self.remove(seq);
                Err(EngineError::WaitTimeout {
                    timeout_prompt: None,
                })
            }
            Err(_) => {
                self.remove(seq);
                metrics::record_wait_timeout();
                tracing::debug!(%task, seq, "Wait expired");
                Err(EngineError::WaitTimeout {
                    timeout_prompt: None,
                })
            }
        }
    }

    /// Offer an inbound event's data to the table.
    ///
    /// The earliest-registered wait whose full key matches resolves and is
    /// removed; at most one wait consumes any given event. Returns the
    /// resumed task, if any. The caller still dispatches the event through
    /// the normal pipeline — a reply that resumes a conversation is
    /// simultaneously a new message in the stream.
    pub fn offer(&self, data: &Map<String, Value>) -> Option<TaskId> {
        let mut table = self.inner.lock().expect("wait table lock poisoned");
        let position = table
            .pending
            .iter()
            .position(|wait| wait.key.iter().all(|(field, value)| data.get(field) == Some(value)))?;
        let wait = table.pending.remove(position);
        metrics::record_wait_matched();
        metrics::set_pending_waits(table.pending.len() as u64);
        tracing::debug!(task = %wait.task, seq = wait.seq, "Matched pending wait");
        // The receiver may have timed out between our lookup and this send;
        // it already removed itself from its own path, so the value is
        // simply dropped.
        let _ = wait.resume.send(data.clone());
        Some(wait.task)
    }

    /// Drop every pending wait without resuming it. Shutdown path only.
    pub fn drain(&self) -> usize {
        let mut table = self.inner.lock().expect("wait table lock poisoned");
        let dropped = table.pending.len();
        table.pending.clear();
        metrics::set_pending_waits(0);
        dropped
    }

    pub fn pending_count(&self) -> usize {
        self.inner
            .lock()
            .expect("wait table lock poisoned")
            .pending
            .len()
    }

    fn remove(&self, seq: u64) {
        let mut table = self.inner.lock().expect("wait table lock poisoned");
        table.pending.retain(|wait| wait.seq != seq);
        metrics::set_pending_waits(table.pending.len() as u64);
    }
}

impl Default for WaitRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn correlation_data(user_id: i64) -> Map<String, Value> {
        json!({
            "user_id": user_id,
            "self_id": 9,
            "message_type": "private",
            "message": "hello"
        })
        .as_object()
        .unwrap()
        .clone()
    }

    fn correlation_fields() -> Vec<String> {
        ["user_id", "self_id", "message_type"]
            .iter()
            .map(|s| s.to_string())
            .collect()
    }

    async fn settle() {
        for _ in 0..10 {
            tokio::task::yield_now().await;
        }
    }

    #[tokio::test]
    async fn test_missing_field_fails_without_suspending() {
        let registry = WaitRegistry::new();
        let mut data = correlation_data(1);
        data.remove("self_id");

        let err = registry
            .wait(
                TaskId(1),
                &data,
                &correlation_fields(),
                Duration::from_secs(5),
            )
            .await
            .unwrap_err();
        assert!(
            matches!(&err, EngineError::MissingCorrelationFields { missing } if missing == &vec!["self_id".to_string()])
        );
        assert_eq!(registry.pending_count(), 0);
    }

    #[tokio::test]
    async fn test_matching_event_resumes_wait() {
        let registry = WaitRegistry::new();
        let waiter = {
            let registry = registry.clone();
            tokio::spawn(async move {
                registry
                    .wait(
                        TaskId(1),
                        &correlation_data(1),
                        &correlation_fields(),
                        Duration::from_secs(60),
                    )
                    .await
            })
        };
        settle().await;
        assert_eq!(registry.pending_count(), 1);

        let mut follow_up = correlation_data(1);
        follow_up.insert("message".to_string(), Value::from("the answer"));
        assert_eq!(registry.offer(&follow_up), Some(TaskId(1)));

        let matched = waiter.await.unwrap().unwrap();
        assert_eq!(matched.get("message"), Some(&Value::from("the answer")));
        assert_eq!(registry.pending_count(), 0);
    }

    #[tokio::test]
    async fn test_non_matching_event_leaves_wait_parked() {
        let registry = WaitRegistry::new();
        let _waiter = {
            let registry = registry.clone();
            tokio::spawn(async move {
                registry
                    .wait(
                        TaskId(1),
                        &correlation_data(1),
                        &correlation_fields(),
                        Duration::from_secs(60),
                    )
                    .await
            })
        };
        settle().await;

        // Different user: every field must match exactly
        assert_eq!(registry.offer(&correlation_data(2)), None);
        assert_eq!(registry.pending_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_fires_no_earlier_than_deadline() {
        let registry = WaitRegistry::new();
        let waiter = {
            let registry = registry.clone();
            tokio::spawn(async move {
                registry
                    .wait(
                        TaskId(1),
                        &correlation_data(1),
                        &correlation_fields(),
                        Duration::from_secs(10),
                    )
                    .await
            })
        };
        settle().await;

        tokio::time::advance(Duration::from_millis(9_999)).await;
        settle().await;
        assert!(!waiter.is_finished());

        tokio::time::advance(Duration::from_millis(2)).await;
        let err = waiter.await.unwrap().unwrap_err();
        assert!(err.is_timeout());
        assert_eq!(registry.pending_count(), 0);

        // A late matching event resumes nothing
        assert_eq!(registry.offer(&correlation_data(1)), None);
    }

    #[tokio::test]
    async fn test_earliest_registered_wait_wins() {
        let registry = WaitRegistry::new();
        let first = {
            let registry = registry.clone();
            tokio::spawn(async move {
                registry
                    .wait(
                        TaskId(1),
                        &correlation_data(1),
                        &correlation_fields(),
                        Duration::from_secs(60),
                    )
                    .await
            })
        };
        settle().await;
        let _second = {
            let registry = registry.clone();
            tokio::spawn(async move {
                registry
                    .wait(
                        TaskId(2),
                        &correlation_data(1),
                        &correlation_fields(),
                        Duration::from_secs(60),
                    )
                    .await
            })
        };
        settle().await;
        assert_eq!(registry.pending_count(), 2);

        assert_eq!(registry.offer(&correlation_data(1)), Some(TaskId(1)));
        assert!(first.await.unwrap().is_ok());
        assert_eq!(registry.pending_count(), 1);
    }

    #[tokio::test]
    async fn test_drain_drops_waits_without_resuming() {
        let registry = WaitRegistry::new();
        let waiter = {
            let registry = registry.clone();
            tokio::spawn(async move {
                registry
                    .wait(
                        TaskId(1),
                        &correlation_data(1),
                        &correlation_fields(),
                        Duration::from_secs(60),
                    )
                    .await
            })
        };
        settle().await;

        assert_eq!(registry.drain(), 1);
        let err = waiter.await.unwrap().unwrap_err();
        assert!(err.is_timeout());
        assert_eq!(registry.pending_count(), 0);
    }
}
