//! Error types for the aegis-blobstore crate

use thiserror::Error;

/// Result type alias using `BlobStoreError`
pub type Result<T> = std::result::Result<T, BlobStoreError>;

/// Errors that can occur talking to an object store backend
#[derive(Error, Debug)]
pub enum BlobStoreError {
    /// No object under the given key
    #[error("object not found: {0}")]
    NotFound(String),

    /// Backend rejected the request
    #[error("backend error ({status}): {message}")]
    Backend {
        /// HTTP status from the backend
        status: u16,
        /// Sanitized backend message
        message: String,
    },

    /// Transport failure
    #[error("transport error: {0}")]
    Transport(#[from] reqwest::Error),

    /// Object key failed validation
    #[error("invalid object key: {0}")]
    InvalidKey(String),
}
