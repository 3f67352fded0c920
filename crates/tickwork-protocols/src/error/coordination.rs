use thiserror::Error;

/// Errors raised when publishing on a coordination channel.
///
/// Publishing is best-effort: the scheduler logs these and carries on.
#[derive(Debug, Error)]
pub enum CoordinationError {
    /// The channel was closed.
    #[error("Coordination channel closed")]
    Closed,

    /// The message could not be handed to the transport.
    #[error("Failed to publish coordination message: {0}")]
    Publish(String),
}
