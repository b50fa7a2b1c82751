//! Agent runtime error kinds (components K, M).

use sibyl_common::CoreError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum AgentError {
    #[error("tenant id missing on an agent operation")]
    TenantMissing,

    #[error("graph backend error: {0}")]
    Graph(String),

    #[error("agent {0} not found")]
    NotFound(String),

    #[error("illegal agent status transition for {id}: {from} -> {to}")]
    InvalidTransition { id: String, from: String, to: String },

    #[error("approval {0} not found or already resolved")]
    ApprovalNotFound(String),

    #[error("LLM runtime capability error: {0}")]
    Runtime(String),

    #[error(transparent)]
    Worktree(#[from] sibyl_worktree::WorktreeError),

    #[error(transparent)]
    Retrieval(#[from] sibyl_retrieval::RetrievalError),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl From<CoreError> for AgentError {
    fn from(err: CoreError) -> Self {
        match err {
            CoreError::TenantMissing => AgentError::TenantMissing,
            CoreError::InvalidTransition { id, from, to, .. } => {
                AgentError::InvalidTransition { id, from, to }
            }
            CoreError::NotFound { kind, id, .. } => AgentError::NotFound(format!("{kind} {id}")),
            other => AgentError::Other(other.into()),
        }
    }
}

impl From<AgentError> for CoreError {
    fn from(err: AgentError) -> Self {
        match err {
            AgentError::TenantMissing => CoreError::TenantMissing,
            AgentError::Graph(msg) => CoreError::upstream("agent.graph", msg),
            AgentError::NotFound(id) => CoreError::not_found("Agent", id, ""),
            AgentError::InvalidTransition { id, from, to } => {
                CoreError::InvalidTransition { kind: "Agent", id, from, to }
            }
            AgentError::ApprovalNotFound(id) => CoreError::not_found("Approval", id, ""),
            AgentError::Runtime(msg) => CoreError::upstream("agent.runtime", msg),
            AgentError::Worktree(e) => e.into(),
            AgentError::Retrieval(e) => e.into(),
            AgentError::Other(e) => CoreError::Other(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn invalid_transition_round_trips_through_core_error() {
        let core = CoreError::InvalidTransition {
            kind: "Agent",
            id: "agent_1".into(),
            from: "working".into(),
            to: "initializing".into(),
        };
        let agent_err: AgentError = core.into();
        assert!(matches!(agent_err, AgentError::InvalidTransition { .. }));
    }
}
