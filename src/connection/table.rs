//! Connection State and the Shared Connection Table
//!
//! The reactor thread and every worker thread mutate per-connection state:
//! the reactor appends to the input accumulator and drains output, workers
//! append responses. All of it lives in one [`ConnectionTable`] guarded by
//! a single `Mutex`.
//!
//! ## Access Rules
//!
//! - [`ConnectionTable::with_connection`] is the one safe accessor. It
//!   takes the lock, runs a closure on the connection, releases the lock.
//! - [`ConnectionTable::lock`] hands out a [`TableGuard`] for callers that
//!   need several steps under one lock. While a guard is alive, use only
//!   the guard's methods; calling any `ConnectionTable` method from the same
//!   thread deadlocks.
//! - A missing connection means it was closed concurrently. Callers drop
//!   whatever they were doing without reporting an error.

use bytes::{Bytes, BytesMut};
use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::sync::{Mutex, MutexGuard, PoisonError};
use thiserror::Error;

/// Initial capacity of a connection's input accumulator
const INITIAL_BUFFER_SIZE: usize = 4096;

/// Opaque identifier of an accepted connection.
///
/// Ids are handed out in increasing order and never reused, so a late
/// response can never reach a newer connection that happens to get the
/// same socket descriptor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnId(pub usize);

impl fmt::Display for ConnId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Per-connection buffers.
#[derive(Debug)]
pub struct Connection {
    /// Bytes read from the socket that do not yet form a complete line
    pub input: BytesMut,
    /// Responses waiting to be written, oldest first
    pub output: VecDeque<Bytes>,
    /// Whether the reactor is watching this socket for writability
    pub write_interest: bool,
}

impl Default for Connection {
    fn default() -> Self {
        Self::new()
    }
}

impl Connection {
    pub fn new() -> Self {
        Self {
            input: BytesMut::with_capacity(INITIAL_BUFFER_SIZE),
            output: VecDeque::new(),
            write_interest: false,
        }
    }

    /// Queues a response.
    ///
    /// Returns `true` when write interest was off and has just been turned
    /// on; the caller must then ask the reactor to watch for writability
    /// before releasing the table lock.
    pub fn queue_response(&mut self, bytes: Bytes) -> bool {
        self.output.push_back(bytes);
        if self.write_interest {
            false
        } else {
            self.write_interest = true;
            true
        }
    }

    pub fn has_pending_output(&self) -> bool {
        !self.output.is_empty()
    }

    /// Bytes waiting in the output queue.
    pub fn pending_output_bytes(&self) -> usize {
        self.output.iter().map(Bytes::len).sum()
    }
}

/// Errors from the connection table.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TableError {
    #[error("connection {0} already registered")]
    Duplicate(ConnId),
}

/// Registry of live connections, shared by the reactor and the workers.
#[derive(Debug, Default)]
pub struct ConnectionTable {
    inner: Mutex<HashMap<ConnId, Connection>>,
}

impl ConnectionTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Takes the table lock.
    ///
    /// Do not call any other `ConnectionTable` method while the returned
    /// guard is alive on this thread.
    pub fn lock(&self) -> TableGuard<'_> {
        TableGuard {
            map: self.inner.lock().unwrap_or_else(PoisonError::into_inner),
        }
    }

    /// Registers a fresh connection.
    pub fn add(&self, id: ConnId) -> Result<(), TableError> {
        self.lock().add(id)
    }

    /// Removes a connection. Removing an absent id is a no-op.
    ///
    /// Returns whether a connection was removed.
    pub fn remove(&self, id: ConnId) -> bool {
        self.lock().remove(id).is_some()
    }

    pub fn contains(&self, id: ConnId) -> bool {
        self.lock().get_mut(id).is_some()
    }

    /// Runs `f` on the connection under the table lock.
    ///
    /// Returns `None` if the connection is gone.
    pub fn with_connection<R>(&self, id: ConnId, f: impl FnOnce(&mut Connection) -> R) -> Option<R> {
        self.lock().get_mut(id).map(f)
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// The connection table with its lock held.
///
/// Every method here is the already-locked counterpart of a
/// [`ConnectionTable`] method.
pub struct TableGuard<'a> {
    map: MutexGuard<'a, HashMap<ConnId, Connection>>,
}

impl TableGuard<'_> {
    pub fn add(&mut self, id: ConnId) -> Result<(), TableError> {
        if self.map.contains_key(&id) {
            return Err(TableError::Duplicate(id));
        }
        self.map.insert(id, Connection::new());
        Ok(())
    }

    pub fn remove(&mut self, id: ConnId) -> Option<Connection> {
        self.map.remove(&id)
    }

    pub fn get_mut(&mut self, id: ConnId) -> Option<&mut Connection> {
        self.map.get_mut(&id)
    }

    pub fn len(&self) -> usize {
        self.map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn test_add_lookup_remove() {
        let table = ConnectionTable::new();
        table.add(ConnId(1)).unwrap();
        assert!(table.contains(ConnId(1)));
        assert_eq!(table.len(), 1);

        assert!(table.remove(ConnId(1)));
        assert!(!table.contains(ConnId(1)));
        assert!(table.with_connection(ConnId(1), |_| ()).is_none());
    }

    #[test]
    fn test_remove_is_idempotent() {
        let table = ConnectionTable::new();
        table.add(ConnId(7)).unwrap();
        assert!(table.remove(ConnId(7)));
        assert!(!table.remove(ConnId(7)));
        assert!(table.is_empty());
    }

    #[test]
    fn test_duplicate_add_fails() {
        let table = ConnectionTable::new();
        table.add(ConnId(3)).unwrap();
        assert_eq!(table.add(ConnId(3)), Err(TableError::Duplicate(ConnId(3))));
    }

    #[test]
    fn test_queue_response_arms_once() {
        let mut conn = Connection::new();
        assert!(conn.queue_response(Bytes::from("OK\n")));
        assert!(!conn.queue_response(Bytes::from("MISS\n")));
        assert!(conn.write_interest);
        assert_eq!(conn.output.len(), 2);
        assert_eq!(conn.pending_output_bytes(), 8);
    }

    #[test]
    fn test_guard_multi_step() {
        let table = ConnectionTable::new();
        {
            let mut guard = table.lock();
            guard.add(ConnId(1)).unwrap();
            guard.add(ConnId(2)).unwrap();
            guard
                .get_mut(ConnId(1))
                .unwrap()
                .input
                .extend_from_slice(b"GET a");
            assert!(guard.remove(ConnId(2)).is_some());
            assert_eq!(guard.len(), 1);
        }
        let input = table.with_connection(ConnId(1), |c| c.input.clone());
        assert_eq!(input.as_deref(), Some(&b"GET a"[..]));
    }

    #[test]
    fn test_concurrent_writers_and_remover() {
        let table = Arc::new(ConnectionTable::new());
        for i in 0..16 {
            table.add(ConnId(i)).unwrap();
        }

        let writers: Vec<_> = (0..4)
            .map(|_| {
                let table = Arc::clone(&table);
                thread::spawn(move || {
                    for round in 0..200 {
                        let id = ConnId(round % 16);
                        table.with_connection(id, |c| c.queue_response(Bytes::from("OK\n")));
                    }
                })
            })
            .collect();
        let remover = {
            let table = Arc::clone(&table);
            thread::spawn(move || {
                for i in 0..8 {
                    table.remove(ConnId(i));
                }
            })
        };

        for h in writers {
            h.join().unwrap();
        }
        remover.join().unwrap();
        assert_eq!(table.len(), 8);
    }
}
