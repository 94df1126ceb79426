#![deny(missing_docs)]

//! A fixed-size worker thread pool.
//!
//! Tasks submitted from any thread go into one FIFO queue and are run by a
//! fixed set of worker threads. Shutting the pool down (explicitly or by
//! dropping it) waits until every queued task has run. Panics inside tasks
//! are caught, logged and published as [`TaskFailure`]s; they never take a
//! worker down.

mod error;
mod failure;
/// Thread pool implementations.
pub mod thread_pool;

pub use error::{PoolError, Result};
pub use failure::TaskFailure;
pub use thread_pool::{Builder, PoolStats, RayonThreadPool, ThreadPool, WorkerPool};
