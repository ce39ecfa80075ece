// ABOUTME: Typed error taxonomy for the conversational engine.
// ABOUTME: Separates expected wait timeouts from contract violations and store defects.

use thiserror::Error;

use crate::store::TaskId;

/// Errors surfaced by the engine to handler code and the pipeline.
///
/// `WaitTimeout` is expected and recoverable; the handler decides whether to
/// retry, abandon, or notify the user. `MissingCorrelationFields` and
/// `InvalidMode` are contract violations by handler code. `DuplicateTask`
/// and `TaskNotFound` are store-consistency defects that should never occur
/// under correct pipeline usage.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("wait for a follow-up message timed out")]
    WaitTimeout {
        /// Optional user-facing text the handler wanted sent on expiry
        timeout_prompt: Option<String>,
    },

    #[error("context is missing correlation fields: {}", missing.join(", "))]
    MissingCorrelationFields { missing: Vec<String> },

    #[error("unrecognized argument mode: {0:?}")]
    InvalidMode(String),

    #[error("{0} already has a live context")]
    DuplicateTask(TaskId),

    #[error("no live context for {0}")]
    TaskNotFound(TaskId),
}

impl EngineError {
    /// Store-consistency defects abort the current event's dispatch;
    /// everything else is scoped to the handler that triggered it.
    pub fn is_store_defect(&self) -> bool {
        matches!(self, Self::DuplicateTask(_) | Self::TaskNotFound(_))
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::WaitTimeout { .. })
    }
}
