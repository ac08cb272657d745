use crate::connection::ConnId;
use crate::worker::WriteNotifier;
use mio::Waker;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, PoisonError};
use tracing::{info, warn};

/// Cross-thread handle to a running [`Reactor`](crate::reactor::Reactor).
///
/// Workers use it to request write interest for a connection; the binary
/// uses it to stop the server. Both go through the same `mio::Waker`, so
/// the reactor reacts within one poll cycle.
#[derive(Debug)]
pub struct ReactorHandle {
    waker: Waker,
    pending_writes: Mutex<Vec<ConnId>>,
    running: AtomicBool,
}

impl ReactorHandle {
    pub(crate) fn new(waker: Waker) -> Self {
        Self {
            waker,
            pending_writes: Mutex::new(Vec::new()),
            running: AtomicBool::new(true),
        }
    }

    /// Asks the reactor to stop after the current poll cycle.
    pub fn shutdown(&self) {
        if self.running.swap(false, Ordering::AcqRel) {
            info!("Shutdown requested");
            self.wake();
        }
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    /// Drains the connections waiting for write interest.
    pub(crate) fn take_pending(&self) -> Vec<ConnId> {
        let mut pending = self
            .pending_writes
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        std::mem::take(&mut *pending)
    }

    /// Queues a write request without waking the reactor.
    #[cfg(test)]
    pub(crate) fn defer_write(&self, conn: ConnId) {
        self.pending_writes
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(conn);
    }

    fn wake(&self) {
        if let Err(e) = self.waker.wake() {
            warn!(error = %e, "Failed to wake reactor");
        }
    }
}

impl WriteNotifier for ReactorHandle {
    fn request_write(&self, conn: ConnId) {
        self.pending_writes
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(conn);
        self.wake();
    }
}
