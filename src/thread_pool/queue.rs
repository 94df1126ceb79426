use std::collections::VecDeque;
use std::sync::{Condvar, Mutex, MutexGuard, PoisonError};

use super::Job;
use crate::{PoolError, Result};

/// A job taken off the queue, with its position in submission and
/// dequeue order.
pub(crate) struct Dequeued {
    pub(crate) job: Job,
    /// Submission sequence number, assigned by `push`.
    pub(crate) seq: u64,
    /// Dequeue ordinal, assigned by `pop`.
    pub(crate) ordinal: u64,
}

struct Queued {
    job: Job,
    seq: u64,
}

struct State {
    jobs: VecDeque<Queued>,
    closed: bool,
    submitted: u64,
    dequeued: u64,
    active: usize,
}

/// FIFO job queue shared by submitters and workers.
///
/// All access goes through one mutex; idle workers park on `available`
/// until a job is pushed or the queue is closed.
pub(crate) struct TaskQueue {
    state: Mutex<State>,
    available: Condvar,
}

impl TaskQueue {
    pub(crate) fn new() -> Self {
        TaskQueue {
            state: Mutex::new(State {
                jobs: VecDeque::new(),
                closed: false,
                submitted: 0,
                dequeued: 0,
                active: 0,
            }),
            available: Condvar::new(),
        }
    }

    // No job ever runs while the lock is held, so a poisoned lock still
    // guards consistent state.
    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Appends a job to the tail and wakes one waiting worker.
    ///
    /// Returns the job's submission sequence number.
    pub(crate) fn push(&self, job: Job) -> Result<u64> {
        let mut state = self.lock();
        if state.closed {
            return Err(PoolError::PoolClosed);
        }
        let seq = state.submitted;
        state.submitted += 1;
        state.jobs.push_back(Queued { job, seq });
        drop(state);

        self.available.notify_one();
        Ok(seq)
    }

    /// Blocks until a job is available and takes it from the head.
    ///
    /// Returns `None` once the queue is closed and empty. A job returned
    /// here counts as active until `finish` is called.
    pub(crate) fn pop(&self) -> Option<Dequeued> {
        let mut state = self.lock();
        loop {
            if let Some(Queued { job, seq }) = state.jobs.pop_front() {
                let ordinal = state.dequeued;
                state.dequeued += 1;
                state.active += 1;
                return Some(Dequeued { job, seq, ordinal });
            }
            if state.closed {
                return None;
            }
            state = self
                .available
                .wait(state)
                .unwrap_or_else(PoisonError::into_inner);
        }
    }

    /// Marks a job obtained from `pop` as no longer in flight.
    pub(crate) fn finish(&self) {
        let mut state = self.lock();
        state.active -= 1;
    }

    /// Rejects further pushes and wakes every waiting worker.
    ///
    /// Returns `true` only for the call that actually closed the queue.
    pub(crate) fn close(&self) -> bool {
        let mut state = self.lock();
        let was_closed = state.closed;
        state.closed = true;
        drop(state);

        self.available.notify_all();
        !was_closed
    }

    pub(crate) fn len(&self) -> usize {
        self.lock().jobs.len()
    }

    pub(crate) fn active(&self) -> usize {
        self.lock().active
    }

    pub(crate) fn submitted(&self) -> u64 {
        self.lock().submitted
    }
}
