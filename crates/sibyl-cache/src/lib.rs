//! Cache Layer (component D): in-process LRU+TTL caching for search
//! results, entity lookups, and community summaries, plus a cache-aside
//! `CachedEntityStore` wrapper for mutation-driven invalidation.

pub mod cached_store;
pub mod lru_ttl;
pub mod query_cache;

pub use cached_store::{CachedEntityStore, EntityLookup};
pub use lru_ttl::{CacheStats, TtlCache};
pub use query_cache::{QueryCache, QueryCacheStats};
