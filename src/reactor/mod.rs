//! Reactor Module
//!
//! The single-threaded I/O side of the server.
//!
//! ```text
//! ┌───────────────────────────────────────────────────────────┐
//! │                        Reactor                            │
//! │                                                           │
//! │  listener ──accept──► register READABLE                   │
//! │  readable ──read──► input ──lines──► JobQueue             │
//! │  waker    ──pending writes──► reregister +WRITABLE        │
//! │  writable ──flush output──► reregister READABLE           │
//! └───────────────────────────────────────────────────────────┘
//!          ▲
//!          │ ReactorHandle (WriteNotifier, shutdown)
//!   worker threads / signal handler
//! ```

pub mod event_loop;
pub mod handle;

pub use event_loop::Reactor;
pub use handle::ReactorHandle;
