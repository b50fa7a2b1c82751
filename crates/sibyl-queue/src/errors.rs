//! Job queue error kinds (component E).

use sibyl_common::CoreError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum QueueError {
    #[error("tenant id missing on a job-queue operation")]
    TenantMissing,

    #[error("job {job_id} exhausted its {max_attempts} retry attempts: {last_error}")]
    Exhausted {
        job_id: String,
        max_attempts: u32,
        last_error: String,
    },

    #[error("redis backend error: {0}")]
    Backend(String),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl From<QueueError> for CoreError {
    fn from(err: QueueError) -> Self {
        match err {
            QueueError::TenantMissing => CoreError::TenantMissing,
            QueueError::Exhausted { last_error, .. } => CoreError::upstream("queue", last_error),
            QueueError::Backend(msg) => CoreError::upstream("queue", msg),
            QueueError::Other(e) => CoreError::Other(e),
        }
    }
}
