use std::mem;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle, ThreadId};

use crossbeam::channel::Receiver;
use log::{debug, error, info, warn};

use super::queue::{Dequeued, TaskQueue};
use super::{check_threads, ThreadPool};
use crate::failure::{run_guarded, FailureSink, TaskFailure};
use crate::Result;

/// Worker count used by `Builder` when none is given.
const DEFAULT_WORKERS: u32 = 8;
const DEFAULT_THREAD_NAME: &str = "pool-worker";

/// A fixed-size thread pool with a shared FIFO job queue.
///
/// Workers are spawned once, at construction, and take jobs from the queue
/// in submission order. Completion order is up to the scheduler when there
/// is more than one worker.
///
/// Dropping the pool shuts it down: the drop blocks until every job that
/// was submitted before it has run.
///
/// ```
/// use std::sync::atomic::{AtomicUsize, Ordering};
/// use std::sync::Arc;
/// use worker_pool::WorkerPool;
///
/// let pool = WorkerPool::new(4)?;
/// let counter = Arc::new(AtomicUsize::new(0));
/// for _ in 0..10 {
///     let counter = Arc::clone(&counter);
///     pool.submit(move || {
///         counter.fetch_add(1, Ordering::SeqCst);
///     })?;
/// }
/// pool.shutdown();
/// assert_eq!(counter.load(Ordering::SeqCst), 10);
/// # Ok::<(), worker_pool::PoolError>(())
/// ```
pub struct WorkerPool {
    shared: Arc<Shared>,
    workers: u32,
    worker_ids: Vec<ThreadId>,
    handles: Mutex<Vec<JoinHandle<()>>>,
}

/// State shared between the pool handle and its workers.
struct Shared {
    queue: TaskQueue,
    failures: FailureSink,
    /// Workers whose run loop has not returned yet.
    live: Mutex<usize>,
    /// Signalled when `live` drops to zero.
    terminated: Condvar,
    completed: AtomicU64,
    failed: AtomicU64,
}

impl Shared {
    fn live(&self) -> MutexGuard<'_, usize> {
        self.live.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn worker_exited(&self) {
        let mut live = self.live();
        *live -= 1;
        if *live == 0 {
            self.terminated.notify_all();
        }
    }

    /// Blocks until every worker has left its run loop.
    fn wait_terminated(&self) {
        let mut live = self.live();
        while *live > 0 {
            live = self
                .terminated
                .wait(live)
                .unwrap_or_else(PoisonError::into_inner);
        }
    }
}

/// A point-in-time view of a pool's counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolStats {
    /// Number of workers the pool was built with.
    pub workers: u32,
    /// Worker threads that have not exited yet.
    pub live_workers: usize,
    /// Jobs waiting in the queue.
    pub queued: usize,
    /// Jobs currently being run by a worker.
    pub active: usize,
    /// Jobs accepted since construction.
    pub submitted: u64,
    /// Jobs that returned normally.
    pub completed: u64,
    /// Jobs that panicked.
    pub failed: u64,
}

/// Configures and builds a `WorkerPool`.
#[derive(Debug, Clone)]
pub struct Builder {
    workers: u32,
    thread_name: String,
    stack_size: Option<usize>,
}

impl Default for Builder {
    fn default() -> Self {
        Builder {
            workers: DEFAULT_WORKERS,
            thread_name: DEFAULT_THREAD_NAME.to_owned(),
            stack_size: None,
        }
    }
}

impl Builder {
    /// Sets the number of worker threads. Must be at least 1.
    pub fn workers(mut self, workers: u32) -> Self {
        self.workers = workers;
        self
    }

    /// Sets the prefix of worker thread names; workers are named
    /// `<prefix>-<id>`.
    pub fn thread_name(mut self, prefix: impl Into<String>) -> Self {
        self.thread_name = prefix.into();
        self
    }

    /// Sets the stack size of each worker thread, in bytes.
    pub fn stack_size(mut self, bytes: usize) -> Self {
        self.stack_size = Some(bytes);
        self
    }

    /// Spawns the workers and returns the running pool.
    ///
    /// # Errors
    ///
    /// `PoolError::InvalidConfiguration` if the worker count is zero, or
    /// `PoolError::Io` if a thread could not be spawned. No worker is left
    /// running when an error is returned.
    pub fn build(self) -> Result<WorkerPool> {
        check_threads(self.workers)?;

        let shared = Arc::new(Shared {
            queue: TaskQueue::new(),
            failures: FailureSink::new(),
            live: Mutex::new(0),
            terminated: Condvar::new(),
            completed: AtomicU64::new(0),
            failed: AtomicU64::new(0),
        });

        let mut handles = Vec::with_capacity(self.workers as usize);
        for id in 0..self.workers {
            match self.spawn_worker(id, Arc::clone(&shared)) {
                Ok(handle) => handles.push(handle),
                Err(e) => {
                    error!("Failed to spawn worker {id}: {e}");
                    shared.queue.close();
                    for handle in handles {
                        let _ = handle.join();
                    }
                    return Err(e.into());
                }
            }
        }

        debug!("Started pool with {} workers", self.workers);
        Ok(WorkerPool {
            shared,
            workers: self.workers,
            worker_ids: handles.iter().map(|h| h.thread().id()).collect(),
            handles: Mutex::new(handles),
        })
    }

    fn spawn_worker(&self, id: u32, shared: Arc<Shared>) -> std::io::Result<JoinHandle<()>> {
        let mut builder = thread::Builder::new().name(format!("{}-{id}", self.thread_name));
        if let Some(size) = self.stack_size {
            builder = builder.stack_size(size);
        }

        *shared.live() += 1;
        let on_error = Arc::clone(&shared);
        builder
            .spawn(move || run_worker(id, shared))
            .inspect_err(|_| on_error.worker_exited())
    }
}

/// The worker run loop: take jobs until the queue is closed and drained.
fn run_worker(id: u32, shared: Arc<Shared>) {
    debug!("Worker {id} started");
    while let Some(Dequeued { job, seq, ordinal }) = shared.queue.pop() {
        debug!("Worker {id} executing task #{seq} (dequeue #{ordinal})");
        if run_guarded(job, seq, &shared.failures) {
            shared.completed.fetch_add(1, Ordering::SeqCst);
        } else {
            shared.failed.fetch_add(1, Ordering::SeqCst);
        }
        shared.queue.finish();
    }
    shared.worker_exited();
    debug!("Worker {id}: queue closed and drained, shutting down");
}

impl WorkerPool {
    /// Creates a pool with `workers` threads and default options.
    ///
    /// # Errors
    ///
    /// Returns `PoolError::InvalidConfiguration` if `workers` is zero.
    pub fn new(workers: u32) -> Result<Self> {
        Builder::default().workers(workers).build()
    }

    /// Returns a `Builder` for a pool with non-default options.
    pub fn builder() -> Builder {
        Builder::default()
    }

    /// Queues `task` to run on one of the workers.
    ///
    /// # Errors
    ///
    /// Returns `PoolError::PoolClosed` once shutdown has started. The task
    /// is dropped without running in that case.
    pub fn submit<F>(&self, task: F) -> Result<()>
    where
        F: FnOnce() + Send + 'static,
    {
        self.shared.queue.push(Box::new(task)).map(|_| ())
    }

    /// Queues `task` to be called with `args`.
    ///
    /// `args` is moved into the pool now, so later changes on the caller's
    /// side are not seen by the task.
    ///
    /// # Errors
    ///
    /// Same as `submit`.
    pub fn submit_with<A, F>(&self, args: A, task: F) -> Result<()>
    where
        A: Send + 'static,
        F: FnOnce(A) + Send + 'static,
    {
        self.submit(move || task(args))
    }

    /// Stops accepting tasks, waits for the queue to drain and joins every
    /// worker.
    ///
    /// Every call from outside the pool blocks until the queue is empty
    /// and all workers have stopped, including calls that race with an
    /// earlier one. When called from one of this pool's own tasks, the
    /// calling worker is neither joined nor waited for; it keeps draining
    /// the queue and a later outside call joins it.
    pub fn shutdown(&self) {
        if self.shared.queue.close() {
            debug!("Shutting down pool of {} workers", self.workers);
        }

        let current = thread::current().id();
        let handles = mem::take(&mut *self.handles());
        let joining = !handles.is_empty();
        for handle in handles {
            if handle.thread().id() == current {
                warn!(
                    "Shutdown called from worker {}; it will exit after the queue drains",
                    handle.thread().name().unwrap_or("<unnamed>")
                );
                self.handles().push(handle);
                continue;
            }
            if handle.join().is_err() {
                error!("Worker thread panicked outside of a task");
            }
        }

        if self.worker_ids.contains(&current) {
            return;
        }
        // Handles may have been taken by a concurrent call or left behind
        // by a call from a worker.
        self.shared.wait_terminated();

        if joining {
            info!(
                "Pool shut down: {} tasks completed, {} failed",
                self.shared.completed.load(Ordering::SeqCst),
                self.shared.failed.load(Ordering::SeqCst)
            );
        }
    }

    fn handles(&self) -> MutexGuard<'_, Vec<JoinHandle<()>>> {
        self.handles.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Number of workers the pool was built with.
    pub fn worker_count(&self) -> u32 {
        self.workers
    }

    /// Returns a snapshot of the pool's counters.
    pub fn stats(&self) -> PoolStats {
        PoolStats {
            workers: self.workers,
            live_workers: *self.shared.live(),
            queued: self.shared.queue.len(),
            active: self.shared.queue.active(),
            submitted: self.shared.queue.submitted(),
            completed: self.shared.completed.load(Ordering::SeqCst),
            failed: self.shared.failed.load(Ordering::SeqCst),
        }
    }

    /// Returns a receiver for failures of tasks run by this pool.
    ///
    /// Every receiver shares one backlog, so each failure is delivered to
    /// exactly one of them. Unread failures beyond the backlog limit are
    /// discarded oldest first.
    pub fn failures(&self) -> Receiver<TaskFailure> {
        self.shared.failures.subscribe()
    }
}

impl ThreadPool for WorkerPool {
    fn new(threads: u32) -> Result<Self> {
        WorkerPool::new(threads)
    }

    fn spawn<F>(&self, job: F) -> Result<()>
    where
        F: FnOnce() + Send + 'static,
    {
        self.submit(job)
    }

    fn shutdown(&self) {
        WorkerPool::shutdown(self)
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        self.shutdown();
    }
}
