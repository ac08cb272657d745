//! Sharded LRU Cache
//!
//! The cache splits its keyspace over `N` independent [`LruShard`]s, each
//! behind its own `Mutex`. There is no global lock: operations on
//! different shards run fully in parallel, operations on the same shard
//! are serialized.
//!
//! ```text
//! ┌──────────────────────────────────────────────────────┐
//! │                  ShardedLruCache                     │
//! │  ┌─────────┐ ┌─────────┐ ┌─────────┐ ┌─────────┐     │
//! │  │ Shard 0 │ │ Shard 1 │ │ Shard 2 │ │ Shard 3 │     │
//! │  │ Mutex   │ │ Mutex   │ │ Mutex   │ │ Mutex   │     │
//! │  │ LRU+idx │ │ LRU+idx │ │ LRU+idx │ │ LRU+idx │     │
//! │  └─────────┘ └─────────┘ └─────────┘ └─────────┘     │
//! └──────────────────────────────────────────────────────┘
//!        shard = hash(key) % shard_count
//! ```
//!
//! Each shard gets `total_bytes / shard_count` bytes; the remainder is
//! left unused.

use crate::cache::shard::LruShard;
use bytes::Bytes;
use std::hash::{DefaultHasher, Hash, Hasher};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};

/// Default number of shards.
pub const DEFAULT_SHARDS: usize = 4;

/// Hit/miss/eviction counters.
#[derive(Debug, Default)]
pub struct CacheStats {
    pub hits: AtomicU64,
    pub misses: AtomicU64,
    pub inserts: AtomicU64,
    pub evictions: AtomicU64,
}

impl CacheStats {
    /// Fraction of lookups served from the cache, 0.0 when none happened.
    pub fn hit_ratio(&self) -> f64 {
        let hits = self.hits.load(Ordering::Relaxed);
        let total = hits + self.misses.load(Ordering::Relaxed);
        if total == 0 {
            0.0
        } else {
            hits as f64 / total as f64
        }
    }
}

/// A thread-safe, byte-budgeted LRU cache partitioned into shards.
///
/// # Example
///
/// ```
/// use smartkv::cache::ShardedLruCache;
/// use bytes::Bytes;
///
/// let cache = ShardedLruCache::new(4, 1024 * 1024);
/// cache.put(Bytes::from("name"), Bytes::from("Ariz"));
/// assert_eq!(cache.get(b"name"), Some(Bytes::from("Ariz")));
/// assert_eq!(cache.get(b"other"), None);
/// ```
#[derive(Debug)]
pub struct ShardedLruCache {
    shards: Vec<Mutex<LruShard>>,
    per_shard_bytes: usize,
    stats: CacheStats,
}

impl ShardedLruCache {
    /// Creates a cache with `shard_count` shards (at least one) sharing
    /// `total_bytes` evenly.
    pub fn new(shard_count: usize, total_bytes: usize) -> Self {
        let shard_count = shard_count.max(1);
        let per_shard_bytes = total_bytes / shard_count;
        let shards = (0..shard_count)
            .map(|_| Mutex::new(LruShard::new(per_shard_bytes)))
            .collect();

        Self {
            shards,
            per_shard_bytes,
            stats: CacheStats::default(),
        }
    }

    /// Determines which shard a key belongs to.
    #[inline]
    pub fn shard_index(&self, key: &[u8]) -> usize {
        let mut hasher = DefaultHasher::new();
        key.hash(&mut hasher);
        (hasher.finish() as usize) % self.shards.len()
    }

    /// Locks the shard owning `key`.
    #[inline]
    fn lock_shard(&self, key: &[u8]) -> MutexGuard<'_, LruShard> {
        self.lock_index(self.shard_index(key))
    }

    #[inline]
    fn lock_index(&self, idx: usize) -> MutexGuard<'_, LruShard> {
        self.shards[idx]
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Returns the cached value and marks it most-recently-used.
    pub fn get(&self, key: &[u8]) -> Option<Bytes> {
        let value = self.lock_shard(key).get(key);
        let counter = if value.is_some() {
            &self.stats.hits
        } else {
            &self.stats.misses
        };
        counter.fetch_add(1, Ordering::Relaxed);
        value
    }

    /// Inserts or replaces a value, evicting LRU entries of the same
    /// shard until it fits its budget.
    pub fn put(&self, key: Bytes, value: Bytes) {
        let outcome = self.lock_shard(&key).put(key, value);
        self.stats.inserts.fetch_add(1, Ordering::Relaxed);
        if outcome.evicted > 0 {
            self.stats
                .evictions
                .fetch_add(outcome.evicted as u64, Ordering::Relaxed);
        }
    }

    /// Fills `key` unless it is already cached. Returns whether it was
    /// inserted.
    pub fn put_if_absent(&self, key: Bytes, value: Bytes) -> bool {
        let outcome = self.lock_shard(&key).put_if_absent(key, value);
        match outcome {
            Some(outcome) => {
                self.stats.inserts.fetch_add(1, Ordering::Relaxed);
                if outcome.evicted > 0 {
                    self.stats
                        .evictions
                        .fetch_add(outcome.evicted as u64, Ordering::Relaxed);
                }
                true
            }
            None => false,
        }
    }

    pub fn shard_count(&self) -> usize {
        self.shards.len()
    }

    /// Byte budget of every shard.
    pub fn per_shard_bytes(&self) -> usize {
        self.per_shard_bytes
    }

    /// Total resident entries (each shard locked in turn, not atomically).
    pub fn len(&self) -> usize {
        (0..self.shards.len())
            .map(|i| self.lock_index(i).len())
            .sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Resident bytes of one shard.
    pub fn shard_bytes(&self, idx: usize) -> usize {
        self.lock_index(idx).current_bytes()
    }

    pub fn stats(&self) -> &CacheStats {
        &self.stats
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::shard::entry_cost;
    use std::sync::Arc;
    use std::thread;

    fn b(s: &str) -> Bytes {
        Bytes::copy_from_slice(s.as_bytes())
    }

    #[test]
    fn test_budget_split_floors() {
        let cache = ShardedLruCache::new(4, 1003);
        assert_eq!(cache.shard_count(), 4);
        assert_eq!(cache.per_shard_bytes(), 250);
    }

    #[test]
    fn test_zero_shards_becomes_one() {
        let cache = ShardedLruCache::new(0, 100);
        assert_eq!(cache.shard_count(), 1);
    }

    #[test]
    fn test_routing_is_stable() {
        let cache = ShardedLruCache::new(8, 8 * 1024);
        for i in 0..100 {
            let key = format!("key:{}", i);
            let idx = cache.shard_index(key.as_bytes());
            assert!(idx < 8);
            assert_eq!(idx, cache.shard_index(key.as_bytes()));
        }
    }

    #[test]
    fn test_put_then_get_and_stats() {
        let cache = ShardedLruCache::new(4, 64 * 1024);
        cache.put(b("a"), b("1"));
        assert_eq!(cache.get(b"a"), Some(b("1")));
        assert_eq!(cache.get(b"b"), None);

        let stats = cache.stats();
        assert_eq!(stats.hits.load(Ordering::Relaxed), 1);
        assert_eq!(stats.misses.load(Ordering::Relaxed), 1);
        assert_eq!(stats.inserts.load(Ordering::Relaxed), 1);
        assert!((stats.hit_ratio() - 0.5).abs() < f64::EPSILON);
    }

    #[test]
    fn test_lru_order_single_shard() {
        let cost = entry_cost(b"A", b"1");
        let cache = ShardedLruCache::new(1, cost * 3);
        cache.put(b("A"), b("1"));
        cache.put(b("B"), b("2"));
        cache.put(b("C"), b("3"));
        cache.get(b"A");
        cache.put(b("D"), b("4"));

        assert_eq!(cache.get(b"B"), None);
        assert!(cache.get(b"A").is_some());
        assert!(cache.get(b"C").is_some());
        assert!(cache.get(b"D").is_some());
        assert_eq!(cache.stats().evictions.load(Ordering::Relaxed), 1);
    }

    #[test]
    fn test_oversized_entry_leaves_shard_empty() {
        let cache = ShardedLruCache::new(2, 200);
        let key = b("big");
        let idx = cache.shard_index(&key);
        cache.put(key.clone(), Bytes::from(vec![0u8; 500]));
        assert_eq!(cache.get(&key), None);
        assert_eq!(cache.shard_bytes(idx), 0);
    }

    #[test]
    fn test_concurrent_access_respects_budgets() {
        let cache = Arc::new(ShardedLruCache::new(8, 8 * 2048));
        let handles: Vec<_> = (0..8)
            .map(|t| {
                let cache = Arc::clone(&cache);
                thread::spawn(move || {
                    for i in 0..2000 {
                        let key = Bytes::from(format!("k{}", (i * 7 + t) % 300));
                        if i % 2 == 0 {
                            cache.put(key, Bytes::from(format!("v{}-{}", t, i)));
                        } else {
                            let _ = cache.get(&key);
                        }
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }

        for idx in 0..cache.shard_count() {
            assert!(cache.shard_bytes(idx) <= cache.per_shard_bytes());
        }
    }
}
