//! Retrieval/dedup/community-detection error kinds (components H, I).

use sibyl_common::CoreError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum RetrievalError {
    #[error("tenant id missing on a retrieval operation")]
    TenantMissing,

    #[error("graph backend error: {0}")]
    Graph(String),

    #[error("document store error: {0}")]
    Store(String),

    #[error("index error: {0}")]
    Index(String),

    #[error("entity {0} not found")]
    EntityNotFound(String),

    #[error("dependency cycle detected involving {from_id} -> {to_id}")]
    DependencyCycle { from_id: String, to_id: String },

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl From<RetrievalError> for CoreError {
    fn from(err: RetrievalError) -> Self {
        match err {
            RetrievalError::TenantMissing => CoreError::TenantMissing,
            RetrievalError::Graph(msg) => CoreError::upstream("retrieval.graph", msg),
            RetrievalError::Store(msg) => CoreError::upstream("retrieval.store", msg),
            RetrievalError::Index(msg) => CoreError::upstream("retrieval.index", msg),
            RetrievalError::EntityNotFound(id) => CoreError::not_found("Entity", id, ""),
            RetrievalError::DependencyCycle { from_id, to_id } => CoreError::DependencyCycle { from_id, to_id },
            RetrievalError::Other(e) => CoreError::Other(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dependency_cycle_message_names_both_ids() {
        let err = RetrievalError::DependencyCycle {
            from_id: "task_a".into(),
            to_id: "task_b".into(),
        };
        assert!(err.to_string().contains("task_a"));
        assert!(err.to_string().contains("task_b"));
    }
}
