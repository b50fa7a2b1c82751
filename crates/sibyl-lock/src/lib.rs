//! Distributed Lock Manager (component C): per-tenant, per-entity locks
//! over Redis, used to serialize concurrent mutations to the same
//! knowledge-graph entity across agents and API requests.

pub mod errors;
pub mod manager;

pub use errors::LockError;
pub use manager::{AcquireOutcome, LockManager, LockToken, LOCK_TTL_SECONDS, LOCK_WAIT_TIMEOUT};
