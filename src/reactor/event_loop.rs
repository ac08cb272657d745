//! Readiness-Driven Event Loop
//!
//! One thread owns the listening socket, every client socket and the
//! `mio::Poll` watching them. It never blocks except inside `poll`.
//!
//! ## Connection State Machine
//!
//! ```text
//!  accept ──► [READABLE] ──(worker queues output)──► [READABLE|WRITABLE]
//!                 ▲                                          │
//!                 └──────────(output queue drained)──────────┘
//!
//!  EOF / read error / write error / error-hangup ──► closed
//! ```
//!
//! mio readiness is edge-triggered, so every read, write and accept loop
//! runs until the OS reports would-block.

use crate::connection::{ConnId, Connection, ConnectionTable, ServerStats};
use crate::protocol::{next_line, parse_line, ParseError, Response};
use crate::reactor::handle::ReactorHandle;
use crate::worker::{Job, JobQueue, QueueError, WriteNotifier};
use bytes::{Buf, BytesMut};
use mio::event::Event;
use mio::net::{TcpListener, TcpStream};
use mio::{Events, Interest, Poll, Registry, Token, Waker};
use std::collections::HashMap;
use std::io::{self, Read, Write};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, trace, warn};

const LISTENER: Token = Token(0);
const WAKER: Token = Token(1);

/// First id handed to a client connection; lower tokens are reserved.
const FIRST_CONN_ID: usize = 2;

/// Upper bound on events handled per poll.
const EVENTS_CAPACITY: usize = 256;

/// Bytes read from a socket per `read` call
const READ_CHUNK: usize = 4096;

/// Poll timeout. Pending write requests are drained after every poll, so
/// a missed wakeup delays a response by at most this long.
const POLL_TIMEOUT: Duration = Duration::from_secs(1);

/// Response sent when a bounded job queue refuses a request.
const BUSY_MESSAGE: &str = "server busy";

#[inline]
fn token_of(id: ConnId) -> Token {
    Token(id.0)
}

/// The I/O reactor.
pub struct Reactor {
    poll: Poll,
    listener: TcpListener,
    sockets: HashMap<ConnId, TcpStream>,
    table: Arc<ConnectionTable>,
    queue: Arc<JobQueue>,
    handle: Arc<ReactorHandle>,
    stats: Arc<ServerStats>,
    next_id: usize,
    read_buf: Box<[u8]>,
    max_line_bytes: usize,
}

impl Reactor {
    /// Wraps an already bound and listening socket.
    pub fn new(
        listener: std::net::TcpListener,
        table: Arc<ConnectionTable>,
        queue: Arc<JobQueue>,
        stats: Arc<ServerStats>,
    ) -> io::Result<Self> {
        listener.set_nonblocking(true)?;
        let mut listener = TcpListener::from_std(listener);

        let poll = Poll::new()?;
        poll.registry()
            .register(&mut listener, LISTENER, Interest::READABLE)?;
        let waker = Waker::new(poll.registry(), WAKER)?;

        Ok(Self {
            poll,
            listener,
            sockets: HashMap::new(),
            table,
            queue,
            handle: Arc::new(ReactorHandle::new(waker)),
            stats,
            next_id: FIRST_CONN_ID,
            read_buf: vec![0u8; READ_CHUNK].into_boxed_slice(),
            max_line_bytes: 0,
        })
    }

    /// Closes a connection once its unterminated input exceeds `limit`
    /// bytes. `0` leaves input unbounded.
    pub fn with_max_line_bytes(mut self, limit: usize) -> Self {
        self.max_line_bytes = limit;
        self
    }

    /// Handle for waking or stopping this reactor from other threads.
    pub fn handle(&self) -> Arc<ReactorHandle> {
        Arc::clone(&self.handle)
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Number of open client sockets.
    pub fn connection_count(&self) -> usize {
        self.sockets.len()
    }

    /// Runs until [`ReactorHandle::shutdown`] is called, then closes every
    /// connection.
    pub fn run(&mut self) -> io::Result<()> {
        let mut events = Events::with_capacity(EVENTS_CAPACITY);
        info!(addr = ?self.listener.local_addr().ok(), "Reactor running");

        while self.handle.is_running() {
            if let Err(e) = self.poll.poll(&mut events, Some(POLL_TIMEOUT)) {
                if e.kind() == io::ErrorKind::Interrupted {
                    continue;
                }
                error!(error = %e, "Poll failed");
                self.close_all();
                return Err(e);
            }

            for event in events.iter() {
                match event.token() {
                    LISTENER => self.accept_ready(),
                    WAKER => {}
                    token => self.connection_ready(ConnId(token.0), event),
                }
            }
            self.arm_pending_writes();
        }

        self.close_all();
        info!("Reactor stopped");
        Ok(())
    }

    fn accept_ready(&mut self) {
        loop {
            match self.listener.accept() {
                Ok((mut stream, peer)) => {
                    let id = ConnId(self.next_id);
                    self.next_id += 1;

                    if let Err(e) = self.table.add(id) {
                        error!(conn = %id, error = %e, "Connection table rejected new connection");
                        continue;
                    }
                    if let Err(e) =
                        self.poll
                            .registry()
                            .register(&mut stream, token_of(id), Interest::READABLE)
                    {
                        error!(conn = %id, error = %e, "Failed to register connection");
                        self.table.remove(id);
                        continue;
                    }

                    self.sockets.insert(id, stream);
                    self.stats.connection_opened();
                    debug!(conn = %id, peer = %peer, "Accepted connection");
                }
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => break,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => {
                    error!(error = %e, "Accept failed");
                    break;
                }
            }
        }
    }

    fn connection_ready(&mut self, id: ConnId, event: &Event) {
        if event.is_error() || (event.is_read_closed() && event.is_write_closed()) {
            self.close_connection(id, "error or hangup");
            return;
        }

        if (event.is_readable() || event.is_read_closed()) && !self.read_ready(id) {
            return;
        }

        if event.is_writable() {
            self.write_ready(id);
        }
    }

    /// Reads until would-block, queuing every complete request line.
    ///
    /// Returns `false` if the connection was closed.
    fn read_ready(&mut self, id: ConnId) -> bool {
        let Some(stream) = self.sockets.get_mut(&id) else {
            return false;
        };

        let mut close_reason = None;
        loop {
            match stream.read(&mut self.read_buf) {
                Ok(0) => {
                    close_reason = Some("peer closed");
                    break;
                }
                Ok(n) => {
                    self.stats.bytes_read(n);
                    let data = &self.read_buf[..n];
                    let stats = &self.stats;
                    let limit = self.max_line_bytes;
                    let parsed = self.table.with_connection(id, |conn| {
                        conn.input.extend_from_slice(data);
                        let jobs = extract_jobs(id, &mut conn.input, stats);
                        (jobs, limit > 0 && conn.input.len() > limit)
                    });
                    match parsed {
                        Some((jobs, overflow)) => {
                            dispatch(&self.queue, &self.table, &self.handle, &self.stats, jobs);
                            if overflow {
                                debug!(conn = %id, limit, "Unterminated line over limit");
                                close_reason = Some("line too long");
                                break;
                            }
                        }
                        None => {
                            close_reason = Some("connection state missing");
                            break;
                        }
                    }
                }
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => break,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => {
                    debug!(conn = %id, error = %e, "Read failed");
                    close_reason = Some("read error");
                    break;
                }
            }
        }

        match close_reason {
            Some(reason) => {
                self.close_connection(id, reason);
                false
            }
            None => true,
        }
    }

    fn write_ready(&mut self, id: ConnId) {
        let Some(stream) = self.sockets.get_mut(&id) else {
            return;
        };
        let registry = self.poll.registry();
        let stats = &self.stats;

        let result = self
            .table
            .with_connection(id, |conn| flush(id, conn, stream, registry, stats));

        if let Some(Err(e)) = result {
            debug!(conn = %id, error = %e, "Write failed");
            self.close_connection(id, "write error");
        }
    }

    /// Adds write interest for every connection a worker queued output for.
    fn arm_pending_writes(&mut self) {
        let pending = self.handle.take_pending();
        for id in pending {
            let Some(stream) = self.sockets.get_mut(&id) else {
                continue;
            };
            let registry = self.poll.registry();

            let result = self.table.with_connection(id, |conn| {
                if conn.write_interest {
                    registry.reregister(stream, token_of(id), Interest::READABLE | Interest::WRITABLE)
                } else {
                    Ok(())
                }
            });

            if let Some(Err(e)) = result {
                warn!(conn = %id, error = %e, "Failed to enable write interest");
                self.close_connection(id, "registry error");
            }
        }
    }

    fn close_connection(&mut self, id: ConnId, reason: &str) {
        if let Some(mut stream) = self.sockets.remove(&id) {
            if let Err(e) = self.poll.registry().deregister(&mut stream) {
                trace!(conn = %id, error = %e, "Deregister failed");
            }
            self.table.remove(id);
            self.stats.connection_closed();
            debug!(conn = %id, reason, "Connection closed");
        }
    }

    fn close_all(&mut self) {
        let ids: Vec<ConnId> = self.sockets.keys().copied().collect();
        for id in ids {
            self.close_connection(id, "server shutdown");
        }
    }
}

/// Splits complete lines off `input` and parses them into jobs.
/// Malformed lines are logged and dropped.
fn extract_jobs(id: ConnId, input: &mut BytesMut, stats: &ServerStats) -> Vec<Job> {
    let mut jobs = Vec::new();
    while let Some(line) = next_line(input) {
        match parse_line(&line) {
            Ok(request) => {
                trace!(conn = %id, key_len = request.key().len(), "Parsed request");
                jobs.push(Job::new(id, request));
            }
            Err(ParseError::MissingValue) => {
                debug!(conn = %id, "Dropping PUT without value");
                stats.request_malformed();
            }
            Err(e) => {
                debug!(conn = %id, error = %e, "Ignoring unrecognized line");
                stats.request_malformed();
            }
        }
    }
    jobs
}

/// Pushes jobs to the queue. Must be called without the table lock held:
/// a blocking queue may wait here for workers that need that lock.
fn dispatch(
    queue: &JobQueue,
    table: &ConnectionTable,
    handle: &ReactorHandle,
    stats: &ServerStats,
    jobs: Vec<Job>,
) {
    for job in jobs {
        match queue.push(job) {
            Ok(()) => stats.request_queued(),
            Err(QueueError::Full(job)) => {
                stats.request_rejected();
                warn!(conn = %job.conn, "Job queue full, rejecting request");
                let busy = Response::error(BUSY_MESSAGE).serialize();
                table.with_connection(job.conn, |conn| {
                    if conn.queue_response(busy) {
                        handle.request_write(job.conn);
                    }
                });
            }
            Err(QueueError::Closed(job)) => {
                trace!(conn = %job.conn, "Job queue closed, dropping request");
            }
        }
    }
}

/// Writes queued output until the queue empties or the socket would block.
/// A partially written message is trimmed in place. Once the queue is
/// empty, write interest is dropped.
fn flush(
    id: ConnId,
    conn: &mut Connection,
    stream: &mut TcpStream,
    registry: &Registry,
    stats: &ServerStats,
) -> io::Result<()> {
    while let Some(front) = conn.output.front_mut() {
        match stream.write(&front[..]) {
            Ok(0) => return Err(io::ErrorKind::WriteZero.into()),
            Ok(n) => {
                stats.bytes_written(n);
                if n < front.len() {
                    front.advance(n);
                } else {
                    conn.output.pop_front();
                }
            }
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => return Ok(()),
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }

    if conn.write_interest {
        conn.write_interest = false;
        registry.reregister(stream, token_of(id), Interest::READABLE)?;
        trace!(conn = %id, "Output drained");
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;

    #[test]
    fn test_extract_jobs_skips_malformed_lines() {
        let stats = ServerStats::new();
        let mut input = BytesMut::from(&b"GET a\nPUT b\nHELLO\nPUT c d e\r\nGET par"[..]);

        let jobs = extract_jobs(ConnId(5), &mut input, &stats);
        assert_eq!(jobs.len(), 2);
        assert_eq!(jobs[0].key(), &Bytes::from("a"));
        assert_eq!(jobs[1].key(), &Bytes::from("c"));
        assert!(jobs.iter().all(|j| j.conn == ConnId(5)));
        assert_eq!(&input[..], b"GET par");
        assert_eq!(stats.snapshot().requests_malformed, 2);
    }

    type Running = (
        SocketAddr,
        Arc<ConnectionTable>,
        Arc<ReactorHandle>,
        std::thread::JoinHandle<io::Result<()>>,
    );

    fn start_reactor(max_line_bytes: usize) -> Running {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let table = Arc::new(ConnectionTable::new());
        let mut reactor = Reactor::new(
            listener,
            Arc::clone(&table),
            Arc::new(JobQueue::unbounded()),
            Arc::new(ServerStats::new()),
        )
        .unwrap()
        .with_max_line_bytes(max_line_bytes);
        let addr = reactor.local_addr().unwrap();
        let handle = reactor.handle();
        let thread = std::thread::spawn(move || reactor.run());
        (addr, table, handle, thread)
    }

    fn wait_for(table: &ConnectionTable, id: ConnId) {
        let deadline = std::time::Instant::now() + Duration::from_secs(5);
        while !table.contains(id) {
            assert!(std::time::Instant::now() < deadline, "connection not registered");
            std::thread::sleep(Duration::from_millis(5));
        }
    }

    #[test]
    fn test_write_request_without_wake_is_still_flushed() {
        use std::io::{BufRead, BufReader};

        let (addr, table, handle, thread) = start_reactor(0);
        let client = std::net::TcpStream::connect(addr).unwrap();
        client
            .set_read_timeout(Some(Duration::from_secs(5)))
            .unwrap();
        let id = ConnId(FIRST_CONN_ID);
        wait_for(&table, id);

        table.with_connection(id, |c| c.queue_response(Bytes::from("MISS\n")));
        handle.defer_write(id);

        let mut line = String::new();
        BufReader::new(client).read_line(&mut line).unwrap();
        assert_eq!(line, "MISS\n");

        handle.shutdown();
        thread.join().unwrap().unwrap();
    }

    #[test]
    fn test_overlong_line_closes_connection() {
        let (addr, table, handle, thread) = start_reactor(64);
        let mut client = std::net::TcpStream::connect(addr).unwrap();
        client
            .set_read_timeout(Some(Duration::from_secs(5)))
            .unwrap();
        let id = ConnId(FIRST_CONN_ID);
        wait_for(&table, id);

        client.write_all(&[b'x'; 100]).unwrap();
        let mut buf = [0u8; 16];
        match client.read(&mut buf) {
            Ok(0) => {}
            Err(e) if e.kind() == io::ErrorKind::ConnectionReset => {}
            other => panic!("expected the server to close, got {:?}", other),
        }
        assert!(!table.contains(id));

        handle.shutdown();
        thread.join().unwrap().unwrap();
    }

    #[test]
    fn test_dispatch_rejects_when_full() {
        let poll = Poll::new().unwrap();
        let handle = ReactorHandle::new(Waker::new(poll.registry(), WAKER).unwrap());
        let table = ConnectionTable::new();
        table.add(ConnId(9)).unwrap();
        let stats = ServerStats::new();
        let queue = JobQueue::bounded(1, crate::worker::QueueFullPolicy::Reject);

        let mut input = BytesMut::from(&b"GET a\nGET b\n"[..]);
        let jobs = extract_jobs(ConnId(9), &mut input, &stats);
        dispatch(&queue, &table, &handle, &stats, jobs);

        assert_eq!(queue.len(), 1);
        let snap = stats.snapshot();
        assert_eq!(snap.requests_queued, 1);
        assert_eq!(snap.requests_rejected, 1);
        let out = table
            .with_connection(ConnId(9), |c| c.output.front().cloned())
            .unwrap();
        assert_eq!(out, Some(Bytes::from("ERR server busy\n")));
        assert_eq!(handle.take_pending(), vec![ConnId(9)]);
    }
}
