//! Cache Module
//!
//! A sharded, byte-budgeted LRU cache that sits in front of the backing
//! store. Values enter the cache on a store read or a successful store
//! write (write-through) and leave only through LRU eviction; nothing
//! expires by time.
//!
//! - `shard`: single-threaded LRU list + index + byte accounting
//! - `sharded`: hash router and per-shard locking

pub mod shard;
pub mod sharded;

pub use shard::{entry_cost, LruShard, PutOutcome, ENTRY_OVERHEAD};
pub use sharded::{CacheStats, ShardedLruCache, DEFAULT_SHARDS};
