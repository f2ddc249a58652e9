//! # Aegis Blobstore
//!
//! Opaque content-addressed byte storage for the Aegis vault.
//!
//! The store never interprets what it holds; keys are caller-chosen
//! opaque strings and values are ciphertext. Two backends are provided:
//!
//! - [`MemoryBlobStore`] for tests and store-less deployments
//! - [`S3BlobStore`] for any S3-compatible object store, signed with
//!   AWS Signature V4
//!
//! Writes are atomic from the caller's perspective: an object is visible
//! only after `put` returns.

pub mod error;
pub mod memory;
pub mod s3;

pub use error::{BlobStoreError, Result};
pub use memory::MemoryBlobStore;
pub use s3::{S3BlobStore, S3Config};

use async_trait::async_trait;
use bytes::Bytes;

/// Storage backend contract
#[async_trait]
pub trait BlobStore: Send + Sync {
    /// Store an object under a key, replacing any existing object
    async fn put(&self, key: &str, data: Bytes) -> Result<()>;

    /// Retrieve an object
    async fn get(&self, key: &str) -> Result<Bytes>;

    /// Delete an object; deleting a missing object is not an error
    async fn delete(&self, key: &str) -> Result<()>;

    /// Size of a stored object in bytes
    async fn stat(&self, key: &str) -> Result<u64>;

    /// Whether an object exists
    async fn exists(&self, key: &str) -> Result<bool>;
}

/// Reject keys that could escape the bucket namespace
pub(crate) fn validate_key(key: &str) -> Result<()> {
    if key.is_empty() || key.len() > 512 {
        return Err(BlobStoreError::InvalidKey(format!(
            "key length {} out of range",
            key.len()
        )));
    }
    if key.contains("..") || key.starts_with('/') {
        return Err(BlobStoreError::InvalidKey(key.to_string()));
    }
    Ok(())
}
