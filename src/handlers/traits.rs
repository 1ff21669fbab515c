use async_trait::async_trait;
use thiserror::Error;
use tokio_util::sync::CancellationToken;

use crate::collaborators::CollaboratorError;
use crate::tasks::model::{TaskId, TaskKind, TaskOutput, TaskPayload};
use crate::tasks::progress::ProgressReporter;

/// Task-level handler failure; the task ends `failed` with this message
#[derive(Debug, Error)]
pub enum HandlerError {
    #[error("{0}")]
    Validation(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("{0}")]
    Network(String),

    #[error("external tool failed: {0}")]
    ExternalTool(String),

    #[error("task cancelled")]
    Cancelled,

    #[error("handler for {expected} received a {actual} payload")]
    PayloadMismatch { expected: TaskKind, actual: TaskKind },

    #[error("fatal handler error: {0}")]
    Fatal(String),
}

impl From<CollaboratorError> for HandlerError {
    fn from(err: CollaboratorError) -> Self {
        match err {
            CollaboratorError::Io(e) => HandlerError::Io(e),
            other => HandlerError::ExternalTool(other.to_string()),
        }
    }
}

/// Everything a handler gets for one execution
pub struct TaskContext {
    pub id: TaskId,
    pub payload: TaskPayload,
    /// Signalled when the task is cancelled; check between units of work
    pub cancel: CancellationToken,
    pub progress: ProgressReporter,
}

impl TaskContext {
    /// Fail with [`HandlerError::Cancelled`] once cancellation was requested
    pub fn checkpoint(&self) -> Result<(), HandlerError> {
        if self.cancel.is_cancelled() {
            Err(HandlerError::Cancelled)
        } else {
            Ok(())
        }
    }
}

/// Executes one task kind
///
/// Implementations report progress through `ctx.progress`, check
/// `ctx.cancel` between units of work and return an aggregate result.
/// Per-item problems belong in the result; an `Err` fails the whole task.
#[async_trait]
pub trait TaskHandler: Send + Sync {
    fn kind(&self) -> TaskKind;

    async fn execute(&self, ctx: TaskContext) -> Result<TaskOutput, HandlerError>;
}

/// Build the error for a payload routed to the wrong handler
pub(crate) fn mismatch(expected: TaskKind, payload: &TaskPayload) -> HandlerError {
    HandlerError::PayloadMismatch {
        expected,
        actual: payload.kind(),
    }
}
