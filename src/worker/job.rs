use crate::connection::ConnId;
use crate::protocol::Request;
use bytes::Bytes;
use std::time::{Duration, Instant};

/// Request verb of a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobKind {
    Get,
    Put,
}

/// One parsed request bound to the connection that sent it.
///
/// Immutable once built; exactly one worker receives it.
#[derive(Debug, Clone)]
pub struct Job {
    pub conn: ConnId,
    pub request: Request,
    pub enqueued_at: Instant,
}

impl Job {
    pub fn new(conn: ConnId, request: Request) -> Self {
        Self {
            conn,
            request,
            enqueued_at: Instant::now(),
        }
    }

    pub fn kind(&self) -> JobKind {
        match self.request {
            Request::Get { .. } => JobKind::Get,
            Request::Put { .. } => JobKind::Put,
        }
    }

    pub fn key(&self) -> &Bytes {
        self.request.key()
    }

    /// Time spent since the job was created.
    pub fn age(&self) -> Duration {
        self.enqueued_at.elapsed()
    }
}
