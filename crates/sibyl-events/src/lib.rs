//! Event Bus (component F): tenant-scoped, best-effort publish/subscribe
//! over Redis, carrying the canonical crawl/entity-mutation event types.

pub mod bus;
pub mod errors;
pub mod event;

pub use bus::EventBus;
pub use errors::EventError;
pub use event::{Event, EventKind};
