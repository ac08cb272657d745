//! Server Assembly
//!
//! Wires the listener, the reactor, the job queue, the worker pool, the
//! optional cache and the backing store into one runnable [`Server`].
//!
//! ```text
//! bind ──► Reactor ──► JobQueue ──► WorkerPool ──► ConnectionTable ──► Reactor
//!                                       │
//!                             ShardedLruCache / Store
//! ```

use crate::cache::ShardedLruCache;
use crate::config::ServerConfig;
use crate::connection::{ConnectionTable, ServerStats, StatsSnapshot};
use crate::reactor::{Reactor, ReactorHandle};
use crate::store::Store;
use crate::worker::{JobQueue, Resolver, WorkerContext, WorkerPool};
use socket2::{Domain, Protocol, Socket, Type};
use std::io;
use std::net::{SocketAddr, ToSocketAddrs};
use std::sync::atomic::Ordering;
use std::sync::Arc;
use thiserror::Error;
use tracing::info;

/// Errors raised while starting or running the server.
#[derive(Debug, Error)]
pub enum ServerError {
    #[error("cannot resolve bind address {0}")]
    Resolve(String),

    #[error("failed to bind {addr}: {source}")]
    Bind {
        addr: SocketAddr,
        #[source]
        source: io::Error,
    },

    #[error("failed to start worker pool: {0}")]
    Workers(#[source] io::Error),

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

/// A bound, not yet running server.
pub struct Server {
    reactor: Reactor,
    pool: WorkerPool,
    cache: Option<Arc<ShardedLruCache>>,
    stats: Arc<ServerStats>,
}

impl Server {
    /// Binds the listening socket and starts the worker threads.
    ///
    /// Connections are accepted once [`Server::run`] is called.
    pub fn bind(config: &ServerConfig, store: Arc<dyn Store>) -> Result<Self, ServerError> {
        let listener = bind_listener(config)?;

        let cache = config
            .cache_enabled
            .then(|| Arc::new(ShardedLruCache::new(config.cache_shards, config.cache_bytes())));
        let table = Arc::new(ConnectionTable::new());
        let queue = Arc::new(JobQueue::with_capacity(
            config.job_queue_capacity,
            config.queue_full_policy,
        ));
        let stats = Arc::new(ServerStats::new());

        let reactor = Reactor::new(
            listener,
            Arc::clone(&table),
            Arc::clone(&queue),
            Arc::clone(&stats),
        )?
        .with_max_line_bytes(config.max_line_bytes);

        let ctx = WorkerContext {
            resolver: Resolver::new(store, cache.clone()),
            table,
            notifier: reactor.handle(),
            stats: Arc::clone(&stats),
        };
        let pool = WorkerPool::start(config.worker_threads, queue, ctx)
            .map_err(ServerError::Workers)?;

        info!(
            addr = ?reactor.local_addr().ok(),
            workers = pool.size(),
            cache = cache.is_some(),
            "Server bound"
        );

        Ok(Self {
            reactor,
            pool,
            cache,
            stats,
        })
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.reactor.local_addr()
    }

    /// Handle used to stop the server from another thread.
    pub fn handle(&self) -> Arc<ReactorHandle> {
        self.reactor.handle()
    }

    pub fn stats(&self) -> Arc<ServerStats> {
        Arc::clone(&self.stats)
    }

    pub fn cache(&self) -> Option<Arc<ShardedLruCache>> {
        self.cache.clone()
    }

    /// Runs the reactor until shutdown, then stops the workers.
    pub fn run(mut self) -> Result<StatsSnapshot, ServerError> {
        let result = self.reactor.run();

        let abandoned = self.pool.shutdown();
        let snapshot = self.stats.snapshot();
        info!(
            accepted = snapshot.connections_accepted,
            queued = snapshot.requests_queued,
            rejected = snapshot.requests_rejected,
            malformed = snapshot.requests_malformed,
            delivered = snapshot.responses_delivered,
            dropped = snapshot.responses_dropped,
            bytes_read = snapshot.bytes_read,
            bytes_written = snapshot.bytes_written,
            abandoned,
            "Server stopped"
        );
        if let Some(cache) = &self.cache {
            let stats = cache.stats();
            info!(
                entries = cache.len(),
                hits = stats.hits.load(Ordering::Relaxed),
                misses = stats.misses.load(Ordering::Relaxed),
                evictions = stats.evictions.load(Ordering::Relaxed),
                hit_ratio = stats.hit_ratio(),
                "Cache statistics"
            );
        }
        result?;
        Ok(snapshot)
    }
}

fn bind_listener(config: &ServerConfig) -> Result<std::net::TcpListener, ServerError> {
    let bind_address = config.bind_address();
    let addr = bind_address
        .to_socket_addrs()
        .ok()
        .and_then(|mut addrs| addrs.next())
        .ok_or(ServerError::Resolve(bind_address))?;

    let bind = || -> io::Result<Socket> {
        let socket = Socket::new(Domain::for_address(addr), Type::STREAM, Some(Protocol::TCP))?;
        socket.set_reuse_address(true)?;
        socket.set_nonblocking(true)?;
        socket.bind(&addr.into())?;
        socket.listen(config.backlog)?;
        Ok(socket)
    };
    let socket = bind().map_err(|source| ServerError::Bind { addr, source })?;

    Ok(socket.into())
}
