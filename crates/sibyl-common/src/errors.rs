//! Shared error kinds surfaced by the core (§7).
//!
//! Each subsystem crate defines its own thiserror enum for its internal
//! failure modes (mirroring the teacher's `OrchestratorError` /
//! `PhaseError` / `FactoryError` split) and converts into `CoreError` at
//! the boundary a caller actually observes.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum CoreError {
    #[error("tenant id missing on an operation that requires one")]
    TenantMissing,

    #[error("{kind} '{id}' not found in tenant '{tenant_id}'")]
    NotFound {
        kind: &'static str,
        id: String,
        tenant_id: String,
    },

    #[error("cannot transition {kind} '{id}' from {from} to {to}")]
    InvalidTransition {
        kind: &'static str,
        id: String,
        from: String,
        to: String,
    },

    #[error("lock on '{entity_id}' in tenant '{tenant_id}' not acquired within {reason}")]
    LockTimeout {
        tenant_id: String,
        entity_id: String,
        reason: String,
    },

    #[error("operation '{operation}' exceeded its {budget_ms}ms deadline")]
    Timeout { operation: String, budget_ms: u64 },

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("unauthorized: {0}")]
    Unauthorized(String),

    #[error("relationship {from_id} -> {to_id} would create a DEPENDS_ON cycle")]
    DependencyCycle { from_id: String, to_id: String },

    #[error("upstream '{service}' unavailable: {0}", service = .service)]
    UpstreamUnavailable { service: &'static str, source: String },

    #[error("validation failed for field '{field}': {message}")]
    ValidationError { field: &'static str, message: String },

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl CoreError {
    pub fn not_found(kind: &'static str, id: impl Into<String>, tenant_id: impl Into<String>) -> Self {
        Self::NotFound {
            kind,
            id: id.into(),
            tenant_id: tenant_id.into(),
        }
    }

    pub fn validation(field: &'static str, message: impl Into<String>) -> Self {
        Self::ValidationError {
            field,
            message: message.into(),
        }
    }

    pub fn upstream(service: &'static str, source: impl std::fmt::Display) -> Self {
        Self::UpstreamUnavailable {
            service,
            source: source.to_string(),
        }
    }
}

pub type CoreResult<T> = Result<T, CoreError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn not_found_carries_tenant_and_kind() {
        let err = CoreError::not_found("Task", "task_abc", "org_1");
        match &err {
            CoreError::NotFound { kind, id, tenant_id } => {
                assert_eq!(*kind, "Task");
                assert_eq!(id, "task_abc");
                assert_eq!(tenant_id, "org_1");
            }
            _ => panic!("expected NotFound"),
        }
        assert!(err.to_string().contains("task_abc"));
    }

    #[test]
    fn validation_error_message_roundtrips() {
        let err = CoreError::validation("title", "must be <= 200 chars");
        assert!(err.to_string().contains("title"));
        assert!(err.to_string().contains("200"));
    }

    #[test]
    fn implements_std_error() {
        fn assert_std_error<E: std::error::Error>(_: &E) {}
        assert_std_error(&CoreError::TenantMissing);
    }
}
