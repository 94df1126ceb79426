use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};

use crossbeam::channel::Receiver;
use log::{debug, warn};

use super::{check_threads, ThreadPool};
use crate::failure::{run_guarded, FailureSink, TaskFailure};
use crate::{PoolError, Result};

/// A thread pool backed by the `rayon` library.
///
/// Jobs are injected with `spawn_fifo`. The pool counts jobs that have
/// been accepted but not finished; `shutdown` waits for that count to reach
/// zero.
pub struct RayonThreadPool {
    pool: rayon::ThreadPool,
    drain: Arc<Drain>,
    failures: FailureSink,
    next_task: AtomicU64,
}

struct DrainState {
    closed: bool,
    pending: usize,
}

struct Drain {
    state: Mutex<DrainState>,
    idle: Condvar,
}

impl Drain {
    fn lock(&self) -> MutexGuard<'_, DrainState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn job_done(&self) {
        let mut state = self.lock();
        state.pending -= 1;
        if state.pending == 0 {
            self.idle.notify_all();
        }
    }
}

impl RayonThreadPool {
    /// Returns a receiver for failures of jobs run by this pool.
    pub fn failures(&self) -> Receiver<TaskFailure> {
        self.failures.subscribe()
    }
}

impl ThreadPool for RayonThreadPool {
    fn new(threads: u32) -> Result<Self> {
        // rayon reads zero as "pick for me"
        check_threads(threads)?;
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(threads as usize)
            .thread_name(|i| format!("rayon-worker-{i}"))
            .build()
            .map_err(|e| PoolError::InvalidConfiguration(e.to_string()))?;
        Ok(RayonThreadPool {
            pool,
            drain: Arc::new(Drain {
                state: Mutex::new(DrainState {
                    closed: false,
                    pending: 0,
                }),
                idle: Condvar::new(),
            }),
            failures: FailureSink::new(),
            next_task: AtomicU64::new(0),
        })
    }

    fn spawn<F>(&self, job: F) -> Result<()>
    where
        F: FnOnce() + Send + 'static,
    {
        {
            let mut state = self.drain.lock();
            if state.closed {
                return Err(PoolError::PoolClosed);
            }
            state.pending += 1;
        }
        let seq = self.next_task.fetch_add(1, Ordering::SeqCst);
        let failures = self.failures.clone();
        let drain = Arc::clone(&self.drain);

        self.pool.spawn_fifo(move || {
            run_guarded(job, seq, &failures);
            drain.job_done();
        });
        Ok(())
    }

    /// Every call from outside the pool waits for the drain. A call from
    /// one of the pool's own jobs only closes it, since that job is itself
    /// still pending.
    fn shutdown(&self) {
        let mut state = self.drain.lock();
        state.closed = true;
        if self.pool.current_thread_index().is_some() {
            warn!("Shutdown called from a rayon worker; not waiting for the drain");
            return;
        }
        while state.pending > 0 {
            state = self
                .drain
                .idle
                .wait(state)
                .unwrap_or_else(PoisonError::into_inner);
        }
        debug!("Rayon pool drained");
    }
}

impl Drop for RayonThreadPool {
    fn drop(&mut self) {
        self.shutdown();
    }
}
