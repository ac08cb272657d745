//! Worker Module
//!
//! Jobs flow from the reactor into a [`JobQueue`]; a [`WorkerPool`] of
//! blocking threads resolves them against the cache and the backing store
//! and hands responses back through the connection table.
//!
//! ```text
//! Reactor ──push──► JobQueue ──pop──► worker-0..N
//!                                        │
//!                          ShardedLruCache + Store
//!                                        │
//!                     ConnectionTable ◄──┘ ──► WriteNotifier (reactor)
//! ```

pub mod job;
pub mod pool;
pub mod queue;

pub use job::{Job, JobKind};
pub use pool::{Resolver, WorkerContext, WorkerPool, WriteNotifier};
pub use queue::{JobQueue, QueueError, QueueFullPolicy};
