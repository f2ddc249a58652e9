//! Application state shared across handlers

use crate::config::ServerConfig;
use aegis_blobstore::{BlobStore, MemoryBlobStore, S3BlobStore, S3Config};
use aegis_core::{FileEngine, KeyRotationEngine, MetaStore, ShareEngine};
use aegis_crypto::EnvelopeKey;
use std::sync::Arc;
use tracing::{info, warn};

/// Everything a request handler can reach
pub struct AppState {
    pub config: ServerConfig,
    pub meta: MetaStore,
    pub files: FileEngine,
    pub shares: ShareEngine,
    pub rotation: KeyRotationEngine,
}

impl AppState {
    /// Wire up the store, engines and crypto configuration
    pub async fn new(config: ServerConfig) -> anyhow::Result<Self> {
        let meta = MetaStore::connect(&config.database_url).await?;

        let blobs: Arc<dyn BlobStore> = match &config.blob {
            Some(settings) => {
                info!(endpoint = %settings.endpoint, bucket = %settings.bucket, "using S3 object store");
                Arc::new(S3BlobStore::new(S3Config::new(
                    settings.endpoint.clone(),
                    settings.access_key.clone(),
                    settings.secret_key.clone(),
                    settings.bucket.clone(),
                ))?)
            }
            None => {
                warn!("no object store configured; ciphertext will NOT persist across restarts");
                Arc::new(MemoryBlobStore::new())
            }
        };

        let display_key = config
            .share_password_key
            .as_deref()
            .map(EnvelopeKey::from_bytes)
            .transpose()?;

        if config.inline_blobs {
            warn!("inline blob storage enabled; ciphertext will live in database rows");
        }
        let files = FileEngine::new(meta.clone(), blobs, config.inline_blobs);
        let shares = ShareEngine::new(
            meta.clone(),
            files.clone(),
            config.file_cipher,
            config.pbkdf2_iterations,
            display_key,
        );
        let rotation = KeyRotationEngine::new(meta.clone(), config.pbkdf2_iterations);

        info!(cipher = config.file_cipher.name(), "vault engines ready");
        Ok(Self {
            config,
            meta,
            files,
            shares,
            rotation,
        })
    }

    /// State for tests: in-memory store, in-memory blobs
    pub async fn for_tests(config: ServerConfig) -> anyhow::Result<Self> {
        let meta = MetaStore::in_memory().await?;
        let blobs: Arc<dyn BlobStore> = Arc::new(MemoryBlobStore::new());
        let display_key = config
            .share_password_key
            .as_deref()
            .map(EnvelopeKey::from_bytes)
            .transpose()?;
        let files = FileEngine::new(meta.clone(), blobs, false);
        let shares = ShareEngine::new(
            meta.clone(),
            files.clone(),
            config.file_cipher,
            config.pbkdf2_iterations,
            display_key,
        );
        let rotation = KeyRotationEngine::new(meta.clone(), config.pbkdf2_iterations);
        Ok(Self {
            config,
            meta,
            files,
            shares,
            rotation,
        })
    }
}
