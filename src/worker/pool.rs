//! Worker Pool
//!
//! A fixed set of OS threads, each running the same loop:
//!
//! ```text
//! ┌────────────────────────────────────────────────────────┐
//! │  pop_blocking ──► resolve (cache / store) ──► deliver  │
//! │       ▲                                          │     │
//! │       └──────────────────────────────────────────┘     │
//! └────────────────────────────────────────────────────────┘
//! ```
//!
//! Resolution may block on the store; no shared lock is held while it
//! does. Delivery takes the connection-table lock, appends the response
//! and, if the connection had no write interest, asks the reactor to arm
//! it before the lock is released.

use crate::cache::ShardedLruCache;
use crate::connection::{ConnId, ConnectionTable, ServerStats};
use crate::protocol::{Request, Response};
use crate::store::Store;
use crate::worker::job::Job;
use crate::worker::queue::JobQueue;
use std::hash::{DefaultHasher, Hash, Hasher};
use std::io;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle};
use tracing::{debug, info, trace, warn};

/// Lets a worker ask the reactor to watch a connection for writability.
///
/// Called with the connection-table lock held; implementations must not
/// touch the table.
pub trait WriteNotifier: Send + Sync {
    fn request_write(&self, conn: ConnId);
}

/// Number of stripes serializing writes to the same key.
const WRITE_STRIPES: usize = 64;

/// Turns a request into a response using the cache and the store.
///
/// Writes to keys in the same stripe are serialized from the store call
/// through the cache update, so the cache ends up holding whichever value
/// reached the store last. The stripe stays locked during the store write.
/// A read that misses the cache only fills it if no write got there first.
#[derive(Clone)]
pub struct Resolver {
    store: Arc<dyn Store>,
    cache: Option<Arc<ShardedLruCache>>,
    write_stripes: Arc<[Mutex<()>]>,
}

impl Resolver {
    /// `cache` is `None` when caching is disabled.
    pub fn new(store: Arc<dyn Store>, cache: Option<Arc<ShardedLruCache>>) -> Self {
        let write_stripes = (0..WRITE_STRIPES).map(|_| Mutex::new(())).collect();
        Self {
            store,
            cache,
            write_stripes,
        }
    }

    fn write_stripe(&self, key: &[u8]) -> MutexGuard<'_, ()> {
        let mut hasher = DefaultHasher::new();
        key.hash(&mut hasher);
        let idx = (hasher.finish() as usize) % self.write_stripes.len();
        self.write_stripes[idx]
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    pub fn cache(&self) -> Option<&Arc<ShardedLruCache>> {
        self.cache.as_ref()
    }

    pub fn resolve(&self, request: &Request) -> Response {
        match request {
            Request::Get { key } => {
                if let Some(value) = self.cache.as_ref().and_then(|c| c.get(key)) {
                    trace!(key_len = key.len(), "Cache hit");
                    return Response::CacheHit(value);
                }

                match self.store.get(key) {
                    Ok(Some(value)) => {
                        if let Some(cache) = &self.cache {
                            // Stale if a newer write landed and was evicted since the read
                            cache.put_if_absent(key.clone(), value.clone());
                        }
                        Response::Value(value)
                    }
                    Ok(None) => Response::Miss,
                    Err(e) => {
                        // Clients see a plain miss; the cause only reaches the log
                        warn!(error = %e, key_len = key.len(), "Store read failed");
                        Response::Miss
                    }
                }
            }
            Request::Put { key, value } => {
                let _stripe = self.write_stripe(key);
                match self.store.put(key.clone(), value.clone()) {
                    Ok(()) => {
                        if let Some(cache) = &self.cache {
                            cache.put(key.clone(), value.clone());
                        }
                        Response::Stored
                    }
                    Err(e) => {
                        warn!(error = %e, key_len = key.len(), "Store write failed");
                        Response::error(e.to_string())
                    }
                }
            }
        }
    }
}

/// Everything a worker needs besides the queue.
#[derive(Clone)]
pub struct WorkerContext {
    pub resolver: Resolver,
    pub table: Arc<ConnectionTable>,
    pub notifier: Arc<dyn WriteNotifier>,
    pub stats: Arc<ServerStats>,
}

impl WorkerContext {
    /// Resolves one job and delivers its response.
    pub fn process(&self, job: Job) {
        let response = self.resolver.resolve(&job.request);
        trace!(
            conn = %job.conn,
            kind = ?job.kind(),
            queued_for_us = job.age().as_micros() as u64,
            "Job resolved"
        );
        self.deliver(job.conn, &response);
    }

    /// Appends a response to the connection's output queue.
    ///
    /// Returns `false` if the connection is gone and the response was
    /// discarded.
    pub fn deliver(&self, conn: ConnId, response: &Response) -> bool {
        let bytes = response.serialize();
        let delivered = self
            .table
            .with_connection(conn, |c| {
                if c.queue_response(bytes) {
                    self.notifier.request_write(conn);
                }
            })
            .is_some();

        if delivered {
            self.stats.response_delivered();
        } else {
            debug!(conn = %conn, "Client gone, dropping response");
            self.stats.response_dropped();
        }
        delivered
    }
}

/// Fixed-size pool of worker threads.
pub struct WorkerPool {
    queue: Arc<JobQueue>,
    workers: Vec<JoinHandle<()>>,
}

impl WorkerPool {
    /// Spawns `threads` workers (at least one) consuming `queue`.
    pub fn start(threads: usize, queue: Arc<JobQueue>, ctx: WorkerContext) -> io::Result<Self> {
        let threads = threads.max(1);
        let mut workers = Vec::with_capacity(threads);

        for idx in 0..threads {
            let worker_queue = Arc::clone(&queue);
            let ctx = ctx.clone();
            let handle = thread::Builder::new()
                .name(format!("worker-{}", idx))
                .spawn(move || worker_loop(idx, worker_queue, ctx));
            match handle {
                Ok(h) => workers.push(h),
                Err(e) => {
                    // Do not leave the already-running workers behind
                    queue.close();
                    for h in workers {
                        let _ = h.join();
                    }
                    return Err(e);
                }
            }
        }

        info!(threads, "Worker pool started");
        Ok(Self { queue, workers })
    }

    pub fn size(&self) -> usize {
        self.workers.len()
    }

    /// Stops the workers and waits for them.
    ///
    /// Each worker finishes the job it holds; jobs still queued are
    /// abandoned. Returns how many were abandoned.
    pub fn shutdown(mut self) -> usize {
        self.stop()
    }

    fn stop(&mut self) -> usize {
        let abandoned = self.queue.close();
        for handle in self.workers.drain(..) {
            if handle.join().is_err() {
                warn!("Worker thread panicked");
            }
        }
        abandoned
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        if !self.workers.is_empty() {
            self.stop();
        }
    }
}

fn worker_loop(idx: usize, queue: Arc<JobQueue>, ctx: WorkerContext) {
    debug!(worker = idx, "Worker started");
    while let Some(job) = queue.pop_blocking() {
        ctx.process(job);
    }
    debug!(worker = idx, "Worker exiting");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{MemoryStore, StoreError, StoreResult};
    use bytes::Bytes;
    use std::time::{Duration, Instant};

    /// Records every re-arm request.
    #[derive(Default)]
    struct RecordingNotifier {
        calls: Mutex<Vec<ConnId>>,
    }

    impl WriteNotifier for RecordingNotifier {
        fn request_write(&self, conn: ConnId) {
            self.calls.lock().unwrap().push(conn);
        }
    }

    /// A store whose every call fails.
    struct BrokenStore;

    impl Store for BrokenStore {
        fn get(&self, _key: &[u8]) -> StoreResult<Option<Bytes>> {
            Err(StoreError::Backend("connection refused".into()))
        }

        fn put(&self, _key: Bytes, _value: Bytes) -> StoreResult<()> {
            Err(StoreError::Backend("read-only replica".into()))
        }
    }

    fn b(s: &str) -> Bytes {
        Bytes::copy_from_slice(s.as_bytes())
    }

    fn get(key: &str) -> Request {
        Request::Get { key: b(key) }
    }

    fn put(key: &str, value: &str) -> Request {
        Request::Put {
            key: b(key),
            value: b(value),
        }
    }

    fn context(resolver: Resolver) -> (WorkerContext, Arc<RecordingNotifier>) {
        let notifier = Arc::new(RecordingNotifier::default());
        let ctx = WorkerContext {
            resolver,
            table: Arc::new(ConnectionTable::new()),
            notifier: notifier.clone(),
            stats: Arc::new(ServerStats::new()),
        };
        (ctx, notifier)
    }

    #[test]
    fn test_get_from_store_then_cache() {
        let store = Arc::new(MemoryStore::new());
        store.write(b("a"), b("hello"));
        let cache = Arc::new(ShardedLruCache::new(4, 64 * 1024));
        let resolver = Resolver::new(store, Some(cache));

        assert_eq!(resolver.resolve(&get("a")), Response::Value(b("hello")));
        assert_eq!(resolver.resolve(&get("a")), Response::CacheHit(b("hello")));
    }

    #[test]
    fn test_get_miss() {
        let resolver = Resolver::new(Arc::new(MemoryStore::new()), None);
        assert_eq!(resolver.resolve(&get("nope")), Response::Miss);
    }

    #[test]
    fn test_put_writes_through() {
        let store = Arc::new(MemoryStore::new());
        let cache = Arc::new(ShardedLruCache::new(4, 64 * 1024));
        let resolver = Resolver::new(store.clone(), Some(cache.clone()));

        assert_eq!(resolver.resolve(&put("a", "hello world")), Response::Stored);
        assert_eq!(store.read(b"a"), Some(b("hello world")));
        assert_eq!(cache.get(b"a"), Some(b("hello world")));
        assert_eq!(
            resolver.resolve(&get("a")),
            Response::CacheHit(b("hello world"))
        );
    }

    #[test]
    fn test_cache_disabled_always_reads_store() {
        let store = Arc::new(MemoryStore::new());
        let resolver = Resolver::new(store, None);
        resolver.resolve(&put("a", "1"));
        assert_eq!(resolver.resolve(&get("a")), Response::Value(b("1")));
        assert_eq!(resolver.resolve(&get("a")), Response::Value(b("1")));
    }

    #[test]
    fn test_failed_put_reports_error_and_skips_cache() {
        let cache = Arc::new(ShardedLruCache::new(4, 64 * 1024));
        let resolver = Resolver::new(Arc::new(BrokenStore), Some(cache.clone()));

        assert_eq!(
            resolver.resolve(&put("a", "1")),
            Response::error("read-only replica")
        );
        assert!(cache.is_empty());
    }

    #[test]
    fn test_concurrent_puts_same_key_converge() {
        let store = Arc::new(MemoryStore::new());
        let cache = Arc::new(ShardedLruCache::new(4, 64 * 1024));
        let resolver = Resolver::new(store.clone(), Some(cache.clone()));

        let handles: Vec<_> = (0..8)
            .map(|t| {
                let resolver = resolver.clone();
                std::thread::spawn(move || {
                    for i in 0..200 {
                        resolver.resolve(&put("shared", &format!("{}-{}", t, i)));
                        resolver.resolve(&get("shared"));
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }

        assert_eq!(cache.get(b"shared"), store.read(b"shared"));
    }

    #[test]
    fn test_store_read_error_is_a_miss() {
        let resolver = Resolver::new(Arc::new(BrokenStore), None);
        assert_eq!(resolver.resolve(&get("a")), Response::Miss);
    }

    #[test]
    fn test_deliver_arms_write_once() {
        let (ctx, notifier) = context(Resolver::new(Arc::new(MemoryStore::new()), None));
        ctx.table.add(ConnId(1)).unwrap();

        assert!(ctx.deliver(ConnId(1), &Response::Stored));
        assert!(ctx.deliver(ConnId(1), &Response::Miss));
        assert_eq!(*notifier.calls.lock().unwrap(), vec![ConnId(1)]);

        let queued = ctx
            .table
            .with_connection(ConnId(1), |c| c.output.iter().cloned().collect::<Vec<_>>())
            .unwrap();
        assert_eq!(queued, vec![b("OK\n"), b("MISS\n")]);
    }

    #[test]
    fn test_deliver_to_closed_connection_is_dropped() {
        let (ctx, notifier) = context(Resolver::new(Arc::new(MemoryStore::new()), None));
        assert!(!ctx.deliver(ConnId(42), &Response::Stored));
        assert!(notifier.calls.lock().unwrap().is_empty());
        assert_eq!(ctx.stats.snapshot().responses_dropped, 1);
    }

    #[test]
    fn test_pool_processes_jobs_and_survives_closed_clients() {
        let (ctx, notifier) = context(Resolver::new(Arc::new(MemoryStore::new()), None));
        let table = Arc::clone(&ctx.table);
        let stats = Arc::clone(&ctx.stats);
        table.add(ConnId(1)).unwrap();

        let queue = Arc::new(JobQueue::unbounded());
        let pool = WorkerPool::start(3, Arc::clone(&queue), ctx).unwrap();
        assert_eq!(pool.size(), 3);

        for i in 0..50 {
            queue
                .push(Job::new(ConnId(1), put(&format!("k{}", i), "v")))
                .unwrap();
            // Connection 2 never existed: its responses must be dropped
            queue.push(Job::new(ConnId(2), get("k0"))).unwrap();
        }

        let deadline = Instant::now() + Duration::from_secs(5);
        while stats.snapshot().responses_delivered + stats.snapshot().responses_dropped < 100 {
            assert!(Instant::now() < deadline, "workers did not finish");
            std::thread::sleep(Duration::from_millis(5));
        }
        assert_eq!(pool.shutdown(), 0);

        let outputs = table
            .with_connection(ConnId(1), |c| c.output.len())
            .unwrap();
        assert_eq!(outputs, 50);
        assert_eq!(stats.snapshot().responses_dropped, 50);
        assert_eq!(*notifier.calls.lock().unwrap(), vec![ConnId(1)]);
    }

    #[test]
    fn test_shutdown_with_idle_workers() {
        let (ctx, _) = context(Resolver::new(Arc::new(MemoryStore::new()), None));
        let queue = Arc::new(JobQueue::unbounded());
        let pool = WorkerPool::start(4, Arc::clone(&queue), ctx).unwrap();
        pool.shutdown();
        assert!(queue.is_closed());
    }
}
