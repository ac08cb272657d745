//! # SmartKV - A Reactor-Based Key-Value Server
//!
//! SmartKV serves a line-oriented `GET`/`PUT` protocol over TCP. One thread
//! multiplexes every socket with `mio`; a pool of worker threads resolves
//! requests against a sharded, byte-budgeted LRU cache and a pluggable
//! backing store.
//!
//! ## Features
//!
//! - **Readiness Reactor**: A single thread owns all sockets and never blocks on I/O
//! - **Worker Pool**: Slow store lookups never stall other connections
//! - **Sharded LRU Cache**: Byte-budgeted, one lock per shard
//! - **Pluggable Store**: In-memory or append-only log file
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                               SmartKV                                   │
//! │                                                                         │
//! │  ┌─────────────┐  lines   ┌─────────────┐   jobs    ┌──────────────┐    │
//! │  │   Reactor   │─────────>│   Parser    │──────────>│   JobQueue   │    │
//! │  │ (mio Poll)  │          └─────────────┘           └──────┬───────┘    │
//! │  └──────▲──────┘                                           │            │
//! │         │ wake                                             ▼            │
//! │  ┌──────┴──────────────┐    responses    ┌──────────────────────────┐   │
//! │  │  ConnectionTable    │<────────────────│   WorkerPool (N threads) │   │
//! │  │  (input / output)   │                 └────────────┬─────────────┘   │
//! │  └─────────────────────┘                              │                 │
//! │                                       ┌───────────────┴──────────────┐  │
//! │                                       ▼                              ▼  │
//! │                        ┌────────────────────────────┐   ┌────────────┐  │
//! │                        │      ShardedLruCache       │   │   Store    │  │
//! │                        │ ┌──────┐┌──────┐┌──────┐   │   │ (memory /  │  │
//! │                        │ │Shard0││Shard1││...N  │   │   │  log file) │  │
//! │                        │ └──────┘└──────┘└──────┘   │   └────────────┘  │
//! │                        └────────────────────────────┘                   │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```no_run
//! use smartkv::config::ServerConfig;
//! use smartkv::server::Server;
//! use smartkv::store::MemoryStore;
//! use std::sync::Arc;
//!
//! let config = ServerConfig::default();
//! let server = Server::bind(&config, Arc::new(MemoryStore::new())).unwrap();
//! server.run().unwrap();
//! ```
//!
//! ## Protocol
//!
//! | Request              | Response                                      |
//! |----------------------|-----------------------------------------------|
//! | `GET <key>\n`        | `OK cache hit<value>\n`, `OK <value>\n`, `MISS\n` |
//! | `PUT <key> <value>\n`| `OK\n` or `ERR <message>\n`                    |
//!
//! Anything else is ignored without a reply.
//!
//! ## Module Overview
//!
//! - [`protocol`]: Request framing, parsing and response encoding
//! - [`connection`]: Per-connection buffers and the shared connection table
//! - [`reactor`]: The `mio` event loop
//! - [`worker`]: Job queue and worker threads
//! - [`cache`]: Sharded LRU cache
//! - [`store`]: Backing store trait and implementations
//! - [`config`]: Defaults, config file and command line
//! - [`server`]: Puts it all together
//!
//! ## Design Highlights
//!
//! ### Cross-Thread Wakeups
//!
//! Workers never touch sockets. They append a response to the connection's
//! output queue and, if the connection was idle, push its id onto the
//! reactor's pending list and fire a `mio::Waker`. The reactor then adds
//! write interest and flushes on the next writable edge.
//!
//! ### Connection Identity
//!
//! Connections are keyed by a monotonically increasing [`connection::ConnId`],
//! not by socket descriptor, so a response for a closed client is dropped
//! instead of reaching whoever inherits the descriptor.
//!
//! ### Byte-Budgeted Eviction
//!
//! Each cache shard owns `total / shards` bytes. Every entry costs its key
//! plus its value plus a fixed overhead, and inserts evict from the least
//! recently used end until the shard fits again.

pub mod cache;
pub mod config;
pub mod connection;
pub mod protocol;
pub mod reactor;
pub mod server;
pub mod store;
pub mod worker;

// Re-export commonly used types for convenience
pub use cache::ShardedLruCache;
pub use config::ServerConfig;
pub use protocol::{Request, Response};
pub use server::{Server, ServerError};
pub use store::{LogStore, MemoryStore, Store};

/// The default port
pub const DEFAULT_PORT: u16 = 8080;

/// Version of SmartKV
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
