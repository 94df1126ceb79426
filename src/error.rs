use std::io;
use thiserror::Error;

/// Error type for pool operations.
#[derive(Error, Debug)]
pub enum PoolError {
    /// The pool was configured with an unusable worker count or options.
    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),

    /// A task was submitted after shutdown had started.
    #[error("Pool is closed")]
    PoolClosed,

    /// IO error from spawning worker threads.
    #[error("IO error: {0}")]
    Io(#[from] io::Error),
}

/// Result type alias for pool operations.
pub type Result<T> = std::result::Result<T, PoolError>;
