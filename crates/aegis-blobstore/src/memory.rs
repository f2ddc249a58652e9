//! In-memory blob store for testing and store-less deployments

use crate::{validate_key, BlobStore, BlobStoreError, Result};
use async_trait::async_trait;
use bytes::Bytes;
use dashmap::DashMap;
use std::sync::Arc;

/// An in-memory blob store
#[derive(Clone, Default)]
pub struct MemoryBlobStore {
    objects: Arc<DashMap<String, Bytes>>,
}

impl MemoryBlobStore {
    /// Create a new empty store
    pub fn new() -> Self {
        Self {
            objects: Arc::new(DashMap::new()),
        }
    }

    /// Number of objects held
    pub fn len(&self) -> usize {
        self.objects.len()
    }

    /// Whether the store is empty
    pub fn is_empty(&self) -> bool {
        self.objects.is_empty()
    }

    /// Total bytes held across all objects
    pub fn total_size(&self) -> u64 {
        self.objects.iter().map(|e| e.value().len() as u64).sum()
    }
}

#[async_trait]
impl BlobStore for MemoryBlobStore {
    async fn put(&self, key: &str, data: Bytes) -> Result<()> {
        validate_key(key)?;
        self.objects.insert(key.to_string(), data);
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Bytes> {
        self.objects
            .get(key)
            .map(|e| e.value().clone())
            .ok_or_else(|| BlobStoreError::NotFound(key.to_string()))
    }

    async fn delete(&self, key: &str) -> Result<()> {
        self.objects.remove(key);
        Ok(())
    }

    async fn stat(&self, key: &str) -> Result<u64> {
        self.objects
            .get(key)
            .map(|e| e.value().len() as u64)
            .ok_or_else(|| BlobStoreError::NotFound(key.to_string()))
    }

    async fn exists(&self, key: &str) -> Result<bool> {
        Ok(self.objects.contains_key(key))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_put_get_roundtrip() {
        let store = MemoryBlobStore::new();
        store.put("k1", Bytes::from_static(b"ciphertext")).await.unwrap();
        assert_eq!(store.get("k1").await.unwrap(), Bytes::from_static(b"ciphertext"));
        assert_eq!(store.stat("k1").await.unwrap(), 10);
        assert!(store.exists("k1").await.unwrap());
    }

    #[tokio::test]
    async fn test_missing_object() {
        let store = MemoryBlobStore::new();
        assert!(matches!(
            store.get("absent").await,
            Err(BlobStoreError::NotFound(_))
        ));
        assert!(!store.exists("absent").await.unwrap());
    }

    #[tokio::test]
    async fn test_delete_is_idempotent() {
        let store = MemoryBlobStore::new();
        store.put("k", Bytes::from_static(b"x")).await.unwrap();
        store.delete("k").await.unwrap();
        store.delete("k").await.unwrap();
        assert!(!store.exists("k").await.unwrap());
    }

    #[tokio::test]
    async fn test_put_replaces() {
        let store = MemoryBlobStore::new();
        store.put("k", Bytes::from_static(b"old")).await.unwrap();
        store.put("k", Bytes::from_static(b"new")).await.unwrap();
        assert_eq!(store.get("k").await.unwrap(), Bytes::from_static(b"new"));
        assert_eq!(store.len(), 1);
    }

    #[tokio::test]
    async fn test_key_validation() {
        let store = MemoryBlobStore::new();
        assert!(store.put("", Bytes::new()).await.is_err());
        assert!(store.put("../escape", Bytes::new()).await.is_err());
        assert!(store.put("/absolute", Bytes::new()).await.is_err());
    }
}
