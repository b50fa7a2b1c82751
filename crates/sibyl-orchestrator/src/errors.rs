//! Orchestrator and tool-dispatcher error kinds (components L, N).

use sibyl_common::CoreError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum OrchestratorError {
    #[error("tenant id missing on an orchestrator operation")]
    TenantMissing,

    #[error("graph backend error: {0}")]
    Graph(String),

    #[error("agent {0} not found")]
    AgentNotFound(String),

    #[error("task {0} not found")]
    TaskNotFound(String),

    #[error("illegal task status transition for {id}: {from} -> {to}")]
    InvalidTransition { id: String, from: String, to: String },

    #[error("no checkpoint found for agent {0}")]
    NoCheckpoint(String),

    #[error("{field} exceeds the allowed length of {max} characters")]
    TooLong { field: &'static str, max: usize },

    #[error("unsupported entity_type for add: {0}")]
    UnsupportedEntityType(String),

    #[error("unknown manage action: {0}")]
    UnknownAction(String),

    #[error(transparent)]
    Agent(#[from] sibyl_agent::AgentError),

    #[error(transparent)]
    Worktree(#[from] sibyl_worktree::WorktreeError),

    #[error(transparent)]
    Retrieval(#[from] sibyl_retrieval::RetrievalError),

    #[error(transparent)]
    Lock(#[from] sibyl_lock::LockError),

    #[error(transparent)]
    Queue(#[from] sibyl_queue::QueueError),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl From<CoreError> for OrchestratorError {
    fn from(err: CoreError) -> Self {
        match err {
            CoreError::TenantMissing => OrchestratorError::TenantMissing,
            CoreError::InvalidTransition { id, from, to, .. } => {
                OrchestratorError::InvalidTransition { id, from, to }
            }
            CoreError::NotFound { kind, id, .. } if kind == "Task" => OrchestratorError::TaskNotFound(id),
            CoreError::NotFound { kind, id, .. } => OrchestratorError::Other(anyhow::anyhow!("{kind} {id} not found")),
            other => OrchestratorError::Other(other.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn task_not_found_round_trips_through_core_error() {
        let core = CoreError::not_found("Task", "task_1", "org_1");
        let err: OrchestratorError = core.into();
        assert!(matches!(err, OrchestratorError::TaskNotFound(id) if id == "task_1"));
    }
}
