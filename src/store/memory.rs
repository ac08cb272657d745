//! In-Memory Store
//!
//! A sharded `HashMap` with one `RwLock` per shard. Readers of the same
//! shard proceed concurrently; writers are exclusive.
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                       MemoryStore                           │
//! │  ┌─────────┐ ┌─────────┐ ┌─────────┐ ┌─────────┐            │
//! │  │ Shard 0 │ │ Shard 1 │ │ Shard 2 │ │...64    │            │
//! │  │ RwLock  │ │ RwLock  │ │ RwLock  │ │ shards  │            │
//! │  └─────────┘ └─────────┘ └─────────┘ └─────────┘            │
//! └─────────────────────────────────────────────────────────────┘
//! ```

use crate::store::{Store, StoreResult};
use bytes::Bytes;
use std::collections::HashMap;
use std::hash::{DefaultHasher, Hash, Hasher};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{PoisonError, RwLock};

/// Number of shards for the in-memory store.
const NUM_SHARDS: usize = 64;

/// Thread-safe in-memory key-value store.
pub struct MemoryStore {
    shards: Vec<RwLock<HashMap<Bytes, Bytes>>>,

    /// Statistics: total number of keys
    key_count: AtomicU64,
}

impl std::fmt::Debug for MemoryStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryStore")
            .field("shards", &self.shards.len())
            .field("key_count", &self.key_count.load(Ordering::Relaxed))
            .finish()
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        let shards = (0..NUM_SHARDS)
            .map(|_| RwLock::new(HashMap::new()))
            .collect();

        Self {
            shards,
            key_count: AtomicU64::new(0),
        }
    }

    /// Determines which shard a key belongs to.
    #[inline]
    fn shard_index(&self, key: &[u8]) -> usize {
        let mut hasher = DefaultHasher::new();
        key.hash(&mut hasher);
        (hasher.finish() as usize) % NUM_SHARDS
    }

    /// Reads a value.
    pub fn read(&self, key: &[u8]) -> Option<Bytes> {
        let shard = &self.shards[self.shard_index(key)];
        let data = shard.read().unwrap_or_else(PoisonError::into_inner);
        data.get(key).cloned()
    }

    /// Writes a value.
    ///
    /// Returns `true` if a new key was created, `false` if an existing key was updated.
    pub fn write(&self, key: Bytes, value: Bytes) -> bool {
        let shard = &self.shards[self.shard_index(&key)];
        let mut data = shard.write().unwrap_or_else(PoisonError::into_inner);

        let is_new = data.insert(key, value).is_none();
        if is_new {
            self.key_count.fetch_add(1, Ordering::Relaxed);
        }
        is_new
    }

    /// Number of keys held.
    pub fn len(&self) -> u64 {
        self.key_count.load(Ordering::Relaxed)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Store for MemoryStore {
    fn get(&self, key: &[u8]) -> StoreResult<Option<Bytes>> {
        Ok(self.read(key))
    }

    fn put(&self, key: Bytes, value: Bytes) -> StoreResult<()> {
        self.write(key, value);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn test_put_and_get() {
        let store = MemoryStore::new();
        store.put(Bytes::from("key"), Bytes::from("value")).unwrap();
        assert_eq!(store.get(b"key").unwrap(), Some(Bytes::from("value")));
    }

    #[test]
    fn test_get_nonexistent() {
        let store = MemoryStore::new();
        assert_eq!(store.get(b"nonexistent").unwrap(), None);
        assert!(store.is_empty());
    }

    #[test]
    fn test_overwrite_counts_once() {
        let store = MemoryStore::new();
        assert!(store.write(Bytes::from("k"), Bytes::from("1")));
        assert!(!store.write(Bytes::from("k"), Bytes::from("2")));
        assert_eq!(store.len(), 1);
        assert_eq!(store.read(b"k"), Some(Bytes::from("2")));
    }

    #[test]
    fn test_concurrent_writers() {
        let store = Arc::new(MemoryStore::new());
        let handles: Vec<_> = (0..4)
            .map(|t| {
                let store = Arc::clone(&store);
                thread::spawn(move || {
                    for i in 0..250 {
                        let key = Bytes::from(format!("t{}:{}", t, i));
                        store.put(key, Bytes::from("v")).unwrap();
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }
        assert_eq!(store.len(), 1000);
    }
}
