//! Error taxonomy for the Aegis core
//!
//! Every engine failure maps onto one of these kinds; the HTTP layer
//! translates kinds to status codes without inspecting messages. Driver
//! and crypto details never cross this boundary in client-visible form.

use thiserror::Error;

/// Result type alias using `CoreError`
pub type Result<T> = std::result::Result<T, CoreError>;

/// Errors surfaced by the metadata store and engines
#[derive(Error, Debug)]
pub enum CoreError {
    /// Input rejected before any state change
    #[error("validation failed: {0}")]
    Validation(String),

    /// Missing or unverifiable credentials; also covers wrong share
    /// passwords so crypto failures are indistinguishable from them
    #[error("authentication failed")]
    Authentication,

    /// Authenticated but not allowed
    #[error("permission denied: {0}")]
    Permission(String),

    /// Entity absent, soft-deleted, or expired
    #[error("{0} not found")]
    NotFound(&'static str),

    /// Unique constraint or concurrent-operation conflict
    #[error("conflict: {0}")]
    Conflict(String),

    /// Share unlock throttled
    #[error("rate limited, retry after {retry_after_secs}s")]
    RateLimited {
        /// Seconds until the block lifts
        retry_after_secs: i64,
    },

    /// Share download budget spent
    #[error("share download limit reached")]
    Exhausted,

    /// Upload would exceed the user's storage quota
    #[error("storage quota exceeded")]
    QuotaExceeded,

    /// Cryptographic failure with no client-visible detail
    #[error("crypto operation failed")]
    Crypto(#[from] aegis_crypto::CryptoError),

    /// Object store failure
    #[error("storage backend error")]
    StorageBackend(#[from] aegis_blobstore::BlobStoreError),

    /// Database failure
    #[error("database error")]
    Database(#[from] sqlx::Error),

    /// Anything else; detail stays server-side
    #[error("internal error")]
    Internal(String),
}

impl CoreError {
    /// Wire code for the error envelope
    pub fn code(&self) -> &'static str {
        match self {
            Self::Validation(_) => "validation",
            Self::Authentication => "authentication",
            Self::Permission(_) => "permission",
            Self::NotFound(_) => "not_found",
            Self::Conflict(_) => "conflict",
            Self::RateLimited { .. } => "rate_limited",
            Self::Exhausted => "exhausted",
            Self::QuotaExceeded => "quota_exceeded",
            Self::Crypto(_) => "crypto",
            Self::StorageBackend(_) => "storage_backend",
            Self::Database(_) | Self::Internal(_) => "internal",
        }
    }
}
