use thiserror::Error;

/// Errors raised by [`JobStore`](crate::JobStore) implementations.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The backend could not complete the operation.
    #[error("Store backend error: {0}")]
    Backend(String),

    /// A persisted record could not be decoded.
    #[error("Corrupt job record {id}: {message}")]
    Corrupt { id: String, message: String },

    /// Filesystem error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}
