//! Scheduler errors.

use thiserror::Error;

use tickwork_protocols::{JobStatus, StoreError};

/// Errors returned by the scheduler API.
///
/// Not-found is not an error: lookups return `Ok(None)` / `Ok(false)`.
#[derive(Debug, Error)]
pub enum SchedulerError {
    #[error("Invalid schedule expression: {expression}")]
    InvalidSchedule { expression: String },

    #[error("Cannot {operation} job {id} in status {from}")]
    InvalidStateTransition {
        id: String,
        from: JobStatus,
        operation: &'static str,
    },

    #[error("Rate limit exceeded for {operation}")]
    RateLimitExceeded { operation: &'static str },

    #[error("Task payload is {size} bytes, limit is {limit}")]
    PayloadTooLarge { size: usize, limit: usize },

    #[error("Task payload is not serializable: {0}")]
    InvalidPayload(#[from] serde_json::Error),

    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Why an execution attempt failed.
///
/// Never returned to callers; the message ends up in failure notifications
/// and `JobFailed` events.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ExecutionError {
    #[error("no handler registered for task type: {0}")]
    NoHandlerRegistered(String),

    #[error("execution timed out")]
    Timeout,

    #[error("{0}")]
    TaskFailed(String),

    #[error("handler panicked: {0}")]
    HandlerPanicked(String),
}

pub type SchedulerResult<T> = Result<T, SchedulerError>;
