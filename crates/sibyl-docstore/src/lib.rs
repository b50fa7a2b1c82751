//! Document Store (component B): Postgres + pgvector backed persistence
//! for crawl sources, crawled documents, and their chunks.

pub mod errors;
pub mod pool;
pub mod schema;
pub mod store;

pub use errors::DocStoreError;
pub use pool::build_pool;
pub use store::{ChunkSimilarityRow, DocStore};
