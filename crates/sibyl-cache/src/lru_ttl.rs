//! A thread-safe LRU cache with per-entry TTL, grounded on
//! `sibyl.cache.LRUCache`/`CacheStats` (§4.4).

use std::hash::Hash;
use std::time::{Duration, Instant};

use lru::LruCache;
use parking_lot::Mutex;

#[derive(Debug, Default, Clone, Copy)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub evictions: u64,
    pub expirations: u64,
}

impl CacheStats {
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}

struct Entry<V> {
    value: V,
    expires_at: Instant,
}

struct Inner<K: Hash + Eq, V> {
    cache: LruCache<K, Entry<V>>,
    stats: CacheStats,
}

/// An LRU cache where entries additionally expire after `default_ttl`
/// (or an entry-specific TTL passed to `set`).
pub struct TtlCache<K: Hash + Eq, V: Clone> {
    inner: Mutex<Inner<K, V>>,
    default_ttl: Duration,
}

impl<K: Hash + Eq + Clone, V: Clone> TtlCache<K, V> {
    pub fn new(maxsize: usize, default_ttl: Duration) -> Self {
        let cap = std::num::NonZeroUsize::new(maxsize.max(1)).unwrap();
        Self {
            inner: Mutex::new(Inner {
                cache: LruCache::new(cap),
                stats: CacheStats::default(),
            }),
            default_ttl,
        }
    }

    pub fn get(&self, key: &K) -> Option<V> {
        let mut inner = self.inner.lock();
        let expired = match inner.cache.peek(key) {
            Some(entry) => Instant::now() >= entry.expires_at,
            None => {
                inner.stats.misses += 1;
                return None;
            }
        };
        if expired {
            inner.cache.pop(key);
            inner.stats.expirations += 1;
            return None;
        }
        inner.stats.hits += 1;
        inner.cache.get(key).map(|e| e.value.clone())
    }

    pub fn set(&self, key: K, value: V, ttl: Option<Duration>) {
        let mut inner = self.inner.lock();
        let expires_at = Instant::now() + ttl.unwrap_or(self.default_ttl);
        if let Some((evicted_key, _)) = inner.cache.push(key.clone(), Entry { value, expires_at }) {
            if evicted_key != key {
                inner.stats.evictions += 1;
            }
        }
    }

    pub fn delete(&self, key: &K) -> bool {
        self.inner.lock().cache.pop(key).is_some()
    }

    pub fn clear(&self) {
        self.inner.lock().cache.clear();
    }

    pub fn size(&self) -> usize {
        self.inner.lock().cache.len()
    }

    pub fn stats(&self) -> CacheStats {
        self.inner.lock().stats
    }
}

impl<V: Clone> TtlCache<String, V> {
    /// Invalidate every key containing `pattern` as a substring, matching
    /// `LRUCache.invalidate_pattern`'s simple substring match.
    pub fn invalidate_pattern(&self, pattern: &str) -> usize {
        let mut inner = self.inner.lock();
        let to_remove: Vec<String> = inner
            .cache
            .iter()
            .filter(|(k, _)| k.contains(pattern))
            .map(|(k, _)| k.clone())
            .collect();
        for key in &to_remove {
            inner.cache.pop(key);
        }
        to_remove.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn set_then_get_returns_value() {
        let cache: TtlCache<String, i32> = TtlCache::new(10, Duration::from_secs(60));
        cache.set("a".into(), 1, None);
        assert_eq!(cache.get(&"a".to_string()), Some(1));
        assert_eq!(cache.stats().hits, 1);
    }

    #[test]
    fn miss_increments_miss_counter() {
        let cache: TtlCache<String, i32> = TtlCache::new(10, Duration::from_secs(60));
        assert_eq!(cache.get(&"missing".to_string()), None);
        assert_eq!(cache.stats().misses, 1);
    }

    #[test]
    fn expired_entry_counts_as_expiration_not_hit() {
        let cache: TtlCache<String, i32> = TtlCache::new(10, Duration::from_millis(1));
        cache.set("a".into(), 1, None);
        std::thread::sleep(Duration::from_millis(5));
        assert_eq!(cache.get(&"a".to_string()), None);
        assert_eq!(cache.stats().expirations, 1);
    }

    #[test]
    fn over_capacity_evicts_oldest() {
        let cache: TtlCache<String, i32> = TtlCache::new(2, Duration::from_secs(60));
        cache.set("a".into(), 1, None);
        cache.set("b".into(), 2, None);
        cache.set("c".into(), 3, None);
        assert_eq!(cache.size(), 2);
        assert_eq!(cache.stats().evictions, 1);
        assert_eq!(cache.get(&"a".to_string()), None);
    }

    #[test]
    fn invalidate_pattern_removes_matching_keys() {
        let cache: TtlCache<String, i32> = TtlCache::new(10, Duration::from_secs(60));
        cache.set("task:1".into(), 1, None);
        cache.set("task:2".into(), 2, None);
        cache.set("project:1".into(), 3, None);
        let removed = cache.invalidate_pattern("task:");
        assert_eq!(removed, 2);
        assert_eq!(cache.size(), 1);
    }

    #[test]
    fn hit_rate_is_zero_with_no_requests() {
        let stats = CacheStats::default();
        assert_eq!(stats.hit_rate(), 0.0);
    }
}
