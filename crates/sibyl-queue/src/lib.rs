//! Durable at-least-once job queue and crawl-source reconciliation
//! (component E).

pub mod errors;
pub mod job;
pub mod queue;
pub mod reconcile;

pub use errors::QueueError;
pub use job::{CrawlStats, Job, JobType};
pub use queue::{ClaimedJob, JobQueue};
pub use reconcile::{sync_all_sources, sync_source, SyncAllReport};
