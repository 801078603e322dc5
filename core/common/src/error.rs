//! Common error types for HemoLink.

use thiserror::Error;

/// Top-level error type for HemoLink operations.
#[derive(Debug, Error)]
pub enum Error {
    /// The local database could not be opened or migrated. Fatal for the
    /// session: no queue or cache operation can proceed without the store.
    #[error("Storage initialization error: {0}")]
    StorageInit(String),

    /// Storage operation failed after the store was open.
    #[error("Storage error: {0}")]
    Storage(String),

    /// Serialization or deserialization failed.
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// The remote service rejected an upload, or the transport failed.
    #[error("Upload error: {0}")]
    Upload(String),

    /// A legacy-shaped row could not be rewritten during startup.
    #[error("Normalization error: {0}")]
    Normalization(String),

    /// Resource not found.
    #[error("Not found: {0}")]
    NotFound(String),

    /// Invalid input provided.
    #[error("Invalid input: {0}")]
    InvalidInput(String),
}

/// Result type alias using the common Error.
pub type Result<T> = std::result::Result<T, Error>;
