//! Backing Store Module
//!
//! The worker pool resolves cache misses and writes against a [`Store`]:
//! a synchronous key-value service that may be slow (network or disk
//! latency) and may fail. Errors carry an opaque message that is
//! forwarded verbatim to clients in `ERR` responses.
//!
//! ## Implementations
//!
//! - [`MemoryStore`]: sharded in-memory map, nothing survives a restart
//! - [`LogStore`]: append-only file log replayed on open
//!
//! ## Example
//!
//! ```
//! use smartkv::store::{MemoryStore, Store};
//! use bytes::Bytes;
//!
//! let store = MemoryStore::new();
//! store.put(Bytes::from("k"), Bytes::from("v")).unwrap();
//! assert_eq!(store.get(b"k").unwrap(), Some(Bytes::from("v")));
//! assert_eq!(store.get(b"nope").unwrap(), None);
//! ```

pub mod log;
pub mod memory;

use bytes::Bytes;
use thiserror::Error;

pub use self::log::LogStore;
pub use memory::MemoryStore;

/// Errors reported by a backing store.
#[derive(Debug, Error)]
pub enum StoreError {
    /// I/O failure talking to the backend
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Key or value exceeds what the backend can hold
    #[error("entry too large: {0} bytes")]
    TooLarge(usize),

    /// Backend-specific failure
    #[error("{0}")]
    Backend(String),
}

/// Result type for store operations.
pub type StoreResult<T> = Result<T, StoreError>;

/// A synchronous key-value backend.
///
/// Both calls may block for as long as the backend needs; callers must
/// not hold shared locks across them.
pub trait Store: Send + Sync {
    /// Fetches `key`. `Ok(None)` is a genuine miss.
    fn get(&self, key: &[u8]) -> StoreResult<Option<Bytes>>;

    /// Inserts or overwrites `key`.
    fn put(&self, key: Bytes, value: Bytes) -> StoreResult<()>;
}
