//! Connection Module
//!
//! Per-connection buffers and the table that shares them between the
//! reactor thread and the worker pool.
//!
//! ## Data Flow
//!
//! ```text
//!            reactor                         workers
//!               │                               │
//!   socket ──► input ──► lines ──► jobs ──► resolve
//!                                               │
//!   socket ◄── flush ◄────────── output ◄───────┘
//!               │                   (queue_response)
//!               ▼
//!      write interest off when output empties
//! ```
//!
//! ## Features
//!
//! - **Single lock**: one `Mutex` arbitrates all connection mutation
//! - **Explicit locked access**: `TableGuard` for multi-step work
//! - **Statistics**: shared atomic counters for connections, requests, bytes

pub mod stats;
pub mod table;

// Re-export commonly used types
pub use stats::{ServerStats, StatsSnapshot};
pub use table::{ConnId, Connection, ConnectionTable, TableError, TableGuard};
