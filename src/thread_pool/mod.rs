use crate::Result;

/// A unit of work accepted by the pools.
pub type Job = Box<dyn FnOnce() + Send + 'static>;

/// A thread pool for executing jobs concurrently.
///
/// Implementors manage a fixed set of worker threads and distribute
/// incoming jobs across them. Every implementation:
///
/// * rejects a thread count of zero with `PoolError::InvalidConfiguration`,
/// * rejects jobs spawned after `shutdown` with `PoolError::PoolClosed`,
/// * runs every job accepted before `shutdown` before any call to
///   `shutdown` made from outside the pool returns,
/// * survives panicking jobs.
pub trait ThreadPool {
    /// Creates a new thread pool with the given number of threads.
    ///
    /// # Errors
    ///
    /// Returns an error if the pool cannot be created (e.g., invalid size).
    fn new(threads: u32) -> Result<Self>
    where
        Self: Sized;

    /// Spawns a function into the thread pool.
    ///
    /// The function will be executed by one of the threads in the pool.
    ///
    /// # Errors
    ///
    /// Returns `PoolError::PoolClosed` once shutdown has started.
    fn spawn<F>(&self, job: F) -> Result<()>
    where
        F: FnOnce() + Send + 'static;

    /// Stops accepting jobs and blocks until every accepted job has run.
    ///
    /// Later or concurrent calls block the same way. A call made from one
    /// of the pool's own jobs closes the pool without waiting.
    fn shutdown(&self);
}

mod queue;
mod rayon_pool;
mod worker_pool;

pub use self::rayon_pool::RayonThreadPool;
pub use self::worker_pool::{Builder, PoolStats, WorkerPool};

pub(crate) fn check_threads(threads: u32) -> Result<()> {
    if threads == 0 {
        return Err(crate::PoolError::InvalidConfiguration(
            "worker count must be at least 1".to_owned(),
        ));
    }
    Ok(())
}
