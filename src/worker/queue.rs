//! Job Queue
//!
//! A FIFO of [`Job`]s between the reactor (producer) and the worker pool
//! (consumers). `push` wakes at most one waiting worker; `pop_blocking`
//! parks a worker until a job arrives or the queue is closed.
//!
//! ## Capacity
//!
//! By default the queue is unbounded. A bounded queue applies a
//! [`QueueFullPolicy`] when full:
//!
//! - `Reject`: `push` fails immediately and hands the job back
//! - `Block`: `push` waits until a worker frees a slot
//!
//! Closing the queue wakes everyone. Jobs still queued at that point are
//! abandoned; workers finish the job they hold and exit.

use crate::worker::job::Job;
use std::collections::VecDeque;
use std::str::FromStr;
use std::sync::{Condvar, Mutex, MutexGuard, PoisonError};
use thiserror::Error;

/// What `push` does when a bounded queue is full.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum QueueFullPolicy {
    /// Wait for space
    Block,
    /// Fail fast
    #[default]
    Reject,
}

impl FromStr for QueueFullPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "block" => Ok(QueueFullPolicy::Block),
            "reject" => Ok(QueueFullPolicy::Reject),
            other => Err(format!("unknown queue policy '{}'", other)),
        }
    }
}

/// A job that could not be queued, returned to the caller.
#[derive(Debug, Error)]
pub enum QueueError {
    #[error("job queue is full")]
    Full(Job),

    #[error("job queue is closed")]
    Closed(Job),
}

impl QueueError {
    /// Recovers the job that was refused.
    pub fn into_job(self) -> Job {
        match self {
            QueueError::Full(job) | QueueError::Closed(job) => job,
        }
    }
}

#[derive(Debug, Default)]
struct State {
    jobs: VecDeque<Job>,
    closed: bool,
}

/// Thread-safe FIFO with blocking pop.
#[derive(Debug)]
pub struct JobQueue {
    state: Mutex<State>,
    not_empty: Condvar,
    not_full: Condvar,
    capacity: Option<usize>,
    policy: QueueFullPolicy,
}

impl Default for JobQueue {
    fn default() -> Self {
        Self::unbounded()
    }
}

impl JobQueue {
    /// A queue without a size limit.
    pub fn unbounded() -> Self {
        Self {
            state: Mutex::new(State::default()),
            not_empty: Condvar::new(),
            not_full: Condvar::new(),
            capacity: None,
            policy: QueueFullPolicy::default(),
        }
    }

    /// A queue holding at most `capacity` jobs (at least one).
    pub fn bounded(capacity: usize, policy: QueueFullPolicy) -> Self {
        Self {
            capacity: Some(capacity.max(1)),
            policy,
            ..Self::unbounded()
        }
    }

    /// Builds a queue from a configured capacity, `0` meaning unbounded.
    pub fn with_capacity(capacity: usize, policy: QueueFullPolicy) -> Self {
        if capacity == 0 {
            Self::unbounded()
        } else {
            Self::bounded(capacity, policy)
        }
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Appends a job and wakes one waiting worker.
    pub fn push(&self, job: Job) -> Result<(), QueueError> {
        let mut state = self.lock();
        loop {
            if state.closed {
                return Err(QueueError::Closed(job));
            }
            match self.capacity {
                Some(cap) if state.jobs.len() >= cap => match self.policy {
                    QueueFullPolicy::Reject => return Err(QueueError::Full(job)),
                    QueueFullPolicy::Block => {
                        state = self
                            .not_full
                            .wait(state)
                            .unwrap_or_else(PoisonError::into_inner);
                    }
                },
                _ => break,
            }
        }
        state.jobs.push_back(job);
        drop(state);
        self.not_empty.notify_one();
        Ok(())
    }

    /// Waits for the next job. Returns `None` once the queue is closed.
    pub fn pop_blocking(&self) -> Option<Job> {
        let mut state = self.lock();
        loop {
            if state.closed {
                return None;
            }
            if let Some(job) = state.jobs.pop_front() {
                drop(state);
                self.not_full.notify_one();
                return Some(job);
            }
            state = self
                .not_empty
                .wait(state)
                .unwrap_or_else(PoisonError::into_inner);
        }
    }

    /// Closes the queue, waking every blocked producer and consumer.
    ///
    /// Returns the number of jobs abandoned.
    pub fn close(&self) -> usize {
        let abandoned = {
            let mut state = self.lock();
            state.closed = true;
            let n = state.jobs.len();
            state.jobs.clear();
            n
        };
        self.not_empty.notify_all();
        self.not_full.notify_all();
        abandoned
    }

    pub fn is_closed(&self) -> bool {
        self.lock().closed
    }

    pub fn len(&self) -> usize {
        self.lock().jobs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn capacity(&self) -> Option<usize> {
        self.capacity
    }
}
