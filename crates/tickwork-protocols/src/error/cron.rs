use thiserror::Error;

/// Errors raised by [`CronService`](crate::CronService) implementations.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum CronError {
    /// The expression could not be parsed.
    #[error("Invalid cron expression '{expression}': {message}")]
    Parse { expression: String, message: String },

    /// The expression parsed but never fires after the requested instant.
    #[error("Cron expression '{expression}' has no upcoming fire time")]
    NoUpcoming { expression: String },
}
