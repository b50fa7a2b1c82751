//! `CachedEntityStore`: a cache-aside wrapper around any entity store,
//! the Rust stand-in for the source's `cached_entity`/`invalidate_on_mutation`
//! decorators — Rust has no decorator equivalent, so the behavior is
//! expressed as composition instead (§4 supplement).

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value as JsonValue;
use sibyl_common::CoreResult;

use crate::query_cache::QueryCache;

/// Minimal entity-lookup/mutation surface `CachedEntityStore` wraps.
/// Concrete stores (e.g. a `sibyl-graph`-backed entity repository)
/// implement this so the cache-aside layer stays store-agnostic.
#[async_trait]
pub trait EntityLookup: Send + Sync {
    async fn fetch_entity(&self, organization_id: &str, entity_id: &str) -> CoreResult<Option<JsonValue>>;
    async fn put_entity(&self, organization_id: &str, entity_id: &str, entity: JsonValue) -> CoreResult<()>;
    async fn delete_entity(&self, organization_id: &str, entity_id: &str) -> CoreResult<()>;
}

pub struct CachedEntityStore<S: EntityLookup> {
    inner: S,
    cache: Arc<QueryCache>,
    ttl: Option<Duration>,
}

impl<S: EntityLookup> CachedEntityStore<S> {
    pub fn new(inner: S, cache: Arc<QueryCache>, ttl: Option<Duration>) -> Self {
        Self { inner, cache, ttl }
    }

    pub async fn get(&self, organization_id: &str, entity_id: &str) -> CoreResult<Option<JsonValue>> {
        if let Some(cached) = self.cache.get_entity(entity_id) {
            return Ok(Some(cached));
        }
        let fetched = self.inner.fetch_entity(organization_id, entity_id).await?;
        if let Some(entity) = &fetched {
            self.cache.set_entity(entity_id, entity.clone(), self.ttl);
        }
        Ok(fetched)
    }

    pub async fn put(&self, organization_id: &str, entity_id: &str, entity: JsonValue) -> CoreResult<()> {
        self.inner.put_entity(organization_id, entity_id, entity).await?;
        self.cache.invalidate_entity(entity_id);
        Ok(())
    }

    pub async fn delete(&self, organization_id: &str, entity_id: &str) -> CoreResult<()> {
        self.inner.delete_entity(organization_id, entity_id).await?;
        self.cache.invalidate_entity(entity_id);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    struct FakeStore {
        fetch_calls: AtomicUsize,
        data: Mutex<Option<JsonValue>>,
    }

    #[async_trait]
    impl EntityLookup for FakeStore {
        async fn fetch_entity(&self, _organization_id: &str, _entity_id: &str) -> CoreResult<Option<JsonValue>> {
            self.fetch_calls.fetch_add(1, Ordering::SeqCst);
            Ok(self.data.lock().unwrap().clone())
        }

        async fn put_entity(&self, _organization_id: &str, _entity_id: &str, entity: JsonValue) -> CoreResult<()> {
            *self.data.lock().unwrap() = Some(entity);
            Ok(())
        }

        async fn delete_entity(&self, _organization_id: &str, _entity_id: &str) -> CoreResult<()> {
            *self.data.lock().unwrap() = None;
            Ok(())
        }
    }

    #[tokio::test]
    async fn second_get_hits_cache_not_inner_store() {
        let store = FakeStore {
            fetch_calls: AtomicUsize::new(0),
            data: Mutex::new(Some(json!({"id": "task_1"}))),
        };
        let cached = CachedEntityStore::new(store, Arc::new(QueryCache::default()), None);

        cached.get("org_1", "task_1").await.unwrap();
        cached.get("org_1", "task_1").await.unwrap();

        assert_eq!(cached.inner.fetch_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn put_invalidates_cached_entry() {
        let store = FakeStore {
            fetch_calls: AtomicUsize::new(0),
            data: Mutex::new(Some(json!({"id": "task_1", "title": "old"}))),
        };
        let cached = CachedEntityStore::new(store, Arc::new(QueryCache::default()), None);

        cached.get("org_1", "task_1").await.unwrap();
        cached
            .put("org_1", "task_1", json!({"id": "task_1", "title": "new"}))
            .await
            .unwrap();
        let refetched = cached.get("org_1", "task_1").await.unwrap();

        assert_eq!(cached.inner.fetch_calls.load(Ordering::SeqCst), 2);
        assert_eq!(refetched.unwrap()["title"], "new");
    }
}
