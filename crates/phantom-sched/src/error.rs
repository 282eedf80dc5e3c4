//! Error types for the scheduler

use thiserror::Error;

/// Errors that can occur when submitting work to the executor
#[derive(Debug, Error, PartialEq, Eq)]
pub enum SchedulerError {
    /// The executor has shut down; the task was not enqueued.
    ///
    /// Callers must not treat this as "scheduled but delayed": a caller
    /// that believes a task is pending when it is not can mask bugs in the
    /// client under test.
    #[error("scheduler is shut down")]
    ShutDown,
}
