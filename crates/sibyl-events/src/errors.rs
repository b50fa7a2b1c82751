//! Event bus error kinds (component F).

use sibyl_common::CoreError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum EventError {
    #[error("tenant id missing on an event-bus operation")]
    TenantMissing,

    #[error("redis backend error: {0}")]
    Backend(String),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl From<EventError> for CoreError {
    fn from(err: EventError) -> Self {
        match err {
            EventError::TenantMissing => CoreError::TenantMissing,
            EventError::Backend(msg) => CoreError::upstream("events", msg),
            EventError::Other(e) => CoreError::Other(e),
        }
    }
}
