use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::thread;

use crossbeam::channel::{self, Receiver, Sender, TrySendError};
use log::error;
use thiserror::Error;

/// Maximum number of unread failures kept on the failure channel.
/// Older records are evicted to make room for new ones.
const FAILURE_BACKLOG: usize = 1024;

/// A panic raised by a task body while a worker was running it.
///
/// Task failures happen on worker threads, away from the submitter, so they
/// are never returned from `submit`. They are logged and published on the
/// pool's failure channel instead.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("task #{task} panicked on {worker}: {message}")]
pub struct TaskFailure {
    /// Name of the worker thread that ran the task.
    pub worker: String,
    /// Submission sequence number of the task.
    pub task: u64,
    /// The panic message, if the payload was a string.
    pub message: String,
}

/// Out-of-band channel that collects task failures.
#[derive(Clone)]
pub(crate) struct FailureSink {
    tx: Sender<TaskFailure>,
    rx: Receiver<TaskFailure>,
}

impl FailureSink {
    pub(crate) fn new() -> Self {
        let (tx, rx) = channel::bounded(FAILURE_BACKLOG);
        FailureSink { tx, rx }
    }

    pub(crate) fn subscribe(&self) -> Receiver<TaskFailure> {
        self.rx.clone()
    }

    fn report(&self, mut failure: TaskFailure) {
        error!("{}", failure);
        loop {
            match self.tx.try_send(failure) {
                Ok(()) => return,
                Err(TrySendError::Full(f)) => {
                    let _ = self.rx.try_recv();
                    failure = f;
                }
                // We hold a receiver, so the channel never disconnects.
                Err(TrySendError::Disconnected(_)) => return,
            }
        }
    }
}

/// Runs `job` on the current thread, catching any panic.
///
/// Returns `true` if the job completed normally.
pub(crate) fn run_guarded<F: FnOnce()>(job: F, task: u64, sink: &FailureSink) -> bool {
    match panic::catch_unwind(AssertUnwindSafe(job)) {
        Ok(()) => true,
        Err(payload) => {
            let worker = thread::current()
                .name()
                .unwrap_or("<unnamed>")
                .to_owned();
            sink.report(TaskFailure {
                worker,
                task,
                message: panic_message(payload.as_ref()),
            });
            false
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_owned()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_owned()
    }
}
