//! Lock manager error kinds (component C).

use sibyl_common::CoreError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum LockError {
    #[error("tenant id missing on a lock operation")]
    TenantMissing,

    #[error("lock on entity '{entity_id}' in org '{organization_id}' not acquired: {reason}")]
    Acquisition {
        entity_id: String,
        organization_id: String,
        reason: String,
    },

    #[error("redis backend error: {0}")]
    Backend(String),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl From<LockError> for CoreError {
    fn from(err: LockError) -> Self {
        match err {
            LockError::TenantMissing => CoreError::TenantMissing,
            LockError::Acquisition {
                entity_id,
                organization_id,
                reason,
            } => CoreError::LockTimeout {
                tenant_id: organization_id,
                entity_id,
                reason,
            },
            LockError::Backend(msg) => CoreError::upstream("lock", msg),
            LockError::Other(e) => CoreError::Other(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn acquisition_maps_to_lock_timeout() {
        let core: CoreError = LockError::Acquisition {
            entity_id: "task_1".into(),
            organization_id: "org_1".into(),
            reason: "timeout".into(),
        }
        .into();
        assert!(matches!(core, CoreError::LockTimeout { .. }));
    }
}
