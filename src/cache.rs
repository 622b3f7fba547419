//! Bounded cache of query embeddings.
//!
//! Keys are blake3 hashes of the query text. When the cache is full the least recently
//! used entry is evicted before a new one is inserted.

use log::debug;
use std::collections::HashMap;
use std::sync::{Mutex, PoisonError};

/// Default number of cached query embeddings.
pub const DEFAULT_QUERY_CACHE_SIZE: usize = 256;

struct CacheEntry {
    embedding: Vec<f32>,
    /// Access counter for LRU eviction
    last_access: u64,
}

struct CacheInner {
    entries: HashMap<String, CacheEntry>,
    clock: u64,
    stats: CacheStats,
}

/// Cache statistics.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub evictions: u64,
}

pub struct QueryCache {
    capacity: usize,
    inner: Mutex<CacheInner>,
}

impl QueryCache {
    /// A cache holding at most `capacity` embeddings. A capacity of 0 disables caching.
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            inner: Mutex::new(CacheInner {
                entries: HashMap::new(),
                clock: 0,
                stats: CacheStats::default(),
            }),
        }
    }

    fn key(query: &str) -> String {
        blake3::hash(query.as_bytes()).to_hex().to_string()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, CacheInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn len(&self) -> usize {
        self.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn stats(&self) -> CacheStats {
        self.lock().stats
    }

    pub fn get(&self, query: &str) -> Option<Vec<f32>> {
        let key = Self::key(query);
        let mut guard = self.lock();
        let inner = &mut *guard;
        inner.clock += 1;
        let now = inner.clock;
        match inner.entries.get_mut(&key) {
            Some(entry) => {
                entry.last_access = now;
                let embedding = entry.embedding.clone();
                inner.stats.hits += 1;
                Some(embedding)
            }
            None => {
                inner.stats.misses += 1;
                None
            }
        }
    }

    pub fn insert(&self, query: &str, embedding: Vec<f32>) {
        if self.capacity == 0 {
            return;
        }
        let key = Self::key(query);
        let mut guard = self.lock();
        let inner = &mut *guard;
        inner.clock += 1;
        let now = inner.clock;

        if !inner.entries.contains_key(&key) && inner.entries.len() >= self.capacity {
            let oldest = inner
                .entries
                .iter()
                .min_by_key(|(_, entry)| entry.last_access)
                .map(|(k, _)| k.clone());
            if let Some(oldest) = oldest {
                inner.entries.remove(&oldest);
                inner.stats.evictions += 1;
                debug!("Evicted least recently used query embedding");
            }
        }

        inner.entries.insert(
            key,
            CacheEntry {
                embedding,
                last_access: now,
            },
        );
    }

    /// Returns the cached embedding for `query`, computing and caching it on a miss.
    pub fn get_or_try_insert<E>(
        &self,
        query: &str,
        compute: impl FnOnce() -> Result<Vec<f32>, E>,
    ) -> Result<Vec<f32>, E> {
        if let Some(embedding) = self.get(query) {
            return Ok(embedding);
        }
        let embedding = compute()?;
        self.insert(query, embedding.clone());
        Ok(embedding)
    }

    pub fn clear(&self) {
        self.lock().entries.clear();
    }
}

impl Default for QueryCache {
    fn default() -> Self {
        Self::new(DEFAULT_QUERY_CACHE_SIZE)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hit_and_miss() {
        let cache = QueryCache::new(4);
        assert!(cache.get("loops").is_none());
        cache.insert("loops", vec![1.0, 2.0]);
        assert_eq!(cache.get("loops"), Some(vec![1.0, 2.0]));

        let stats = cache.stats();
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.misses, 1);
    }

    #[test]
    fn test_evicts_least_recently_used() {
        let cache = QueryCache::new(2);
        cache.insert("a", vec![1.0]);
        cache.insert("b", vec![2.0]);
        // touch "a" so "b" becomes the oldest
        assert!(cache.get("a").is_some());
        cache.insert("c", vec![3.0]);

        assert_eq!(cache.len(), 2);
        assert!(cache.get("b").is_none());
        assert!(cache.get("a").is_some());
        assert!(cache.get("c").is_some());
        assert_eq!(cache.stats().evictions, 1);
    }

    #[test]
    fn test_reinserting_existing_key_does_not_evict() {
        let cache = QueryCache::new(2);
        cache.insert("a", vec![1.0]);
        cache.insert("b", vec![2.0]);
        cache.insert("a", vec![1.5]);
        assert_eq!(cache.len(), 2);
        assert_eq!(cache.stats().evictions, 0);
        assert_eq!(cache.get("a"), Some(vec![1.5]));
    }

    #[test]
    fn test_zero_capacity_disables_cache() {
        let cache = QueryCache::new(0);
        cache.insert("a", vec![1.0]);
        assert!(cache.is_empty());
    }

    #[test]
    fn test_get_or_try_insert_computes_once() {
        let cache = QueryCache::new(8);
        let mut calls = 0;
        for _ in 0..3 {
            let embedding = cache
                .get_or_try_insert("arrays", || -> Result<_, String> {
                    calls += 1;
                    Ok(vec![0.5])
                })
                .unwrap();
            assert_eq!(embedding, vec![0.5]);
        }
        assert_eq!(calls, 1);

        let failed = cache.get_or_try_insert("broken", || Err("model offline".to_string()));
        assert!(failed.is_err());
        assert!(cache.get("broken").is_none());
    }
}
