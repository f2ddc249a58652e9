//! File engine: upload ingest, dedup resolution, quota accounting,
//! download, trash lifecycle, and blob garbage collection
//!
//! The corpus is deduplicated by ciphertext hash. A blob is created once
//! per distinct ciphertext; each user binds to it with an independently
//! wrapped file key, so dedup never grants cross-user access.

use crate::engine::access;
use crate::store::{files, folders, users, MetaStore};
use crate::{CoreError, Result};
use aegis_blobstore::BlobStore;
use aegis_crypto::sha256_hex;
use bytes::Bytes;
use chrono::Utc;
use std::sync::Arc;

/// Upload request carrying client-produced ciphertext and key material
pub struct IngestRequest {
    pub filename: String,
    pub mime_type: String,
    pub folder_id: Option<i64>,
    /// Client-side sealed bytes, `nonce || ciphertext+tag`
    pub ciphertext: Bytes,
    /// File key wrapped under the uploader's envelope key
    pub wrapped_file_key: Vec<u8>,
    pub file_key_iv: Vec<u8>,
}

/// Everything a client needs to decrypt a download locally
pub struct FileDownload {
    pub data: Bytes,
    pub filename: String,
    pub mime_type: String,
    pub size_bytes: i64,
    pub wrapped_file_key: Vec<u8>,
    pub file_key_iv: Vec<u8>,
}

/// Upload, download and lifecycle operations over user files
#[derive(Clone)]
pub struct FileEngine {
    store: MetaStore,
    blobs: Arc<dyn BlobStore>,
    /// Keep ciphertext in the database row instead of the object store
    inline: bool,
}

impl FileEngine {
    pub fn new(store: MetaStore, blobs: Arc<dyn BlobStore>, inline: bool) -> Self {
        Self {
            store,
            blobs,
            inline,
        }
    }

    /// Ingest an upload
    ///
    /// Metadata is committed first in one transaction; blob bytes go to
    /// the object store afterwards and only for newly created blobs. A
    /// failed store write triggers a compensating transaction so the
    /// operation is all-or-nothing from the caller's view.
    pub async fn ingest(&self, user_id: i64, req: IngestRequest) -> Result<files::UserFile> {
        if req.filename.is_empty() {
            return Err(CoreError::Validation("filename must not be empty".into()));
        }
        if req.ciphertext.is_empty() {
            return Err(CoreError::Validation("ciphertext must not be empty".into()));
        }
        if req.file_key_iv.len() != aegis_crypto::WRAP_IV_SIZE {
            return Err(CoreError::Validation("file key IV must be 12 bytes".into()));
        }

        let content_hash = sha256_hex(&req.ciphertext);
        let size = req.ciphertext.len() as i64;

        let mut tx = self.store.begin().await?;

        let user = users::by_id(&mut tx, user_id)
            .await?
            .ok_or(CoreError::NotFound("user"))?;

        if let Some(folder_id) = req.folder_id {
            let folder = folders::by_id(&mut tx, folder_id)
                .await?
                .ok_or(CoreError::NotFound("folder"))?;
            if folder.user_id != user_id {
                return Err(CoreError::Permission("folder belongs to another user".into()));
            }
        }

        let (blob, blob_created) = match files::blob_by_hash(&mut tx, &content_hash).await? {
            Some(blob) => (blob, false),
            None => {
                let object_key = uuid::Uuid::new_v4().to_string();
                let inline_data = self.inline.then_some(req.ciphertext.as_ref());
                match files::insert_blob(&mut tx, &content_hash, size, &object_key, inline_data)
                    .await
                {
                    Ok(blob) => (blob, true),
                    // Lost the race to a concurrent identical upload;
                    // the winner's row is reused without re-uploading.
                    Err(CoreError::Database(e)) if is_unique_violation(&e) => {
                        let blob = files::blob_by_hash(&mut tx, &content_hash)
                            .await?
                            .ok_or(CoreError::Database(e))?;
                        (blob, false)
                    }
                    Err(e) => return Err(e),
                }
            }
        };

        let new_file = files::NewUserFile {
            user_id,
            blob_id: blob.id,
            folder_id: req.folder_id,
            filename: &req.filename,
            mime_type: &req.mime_type,
            wrapped_file_key: &req.wrapped_file_key,
            file_key_iv: &req.file_key_iv,
            key_version: user.envelope_key_version,
        };

        let file = match files::binding_any_state(&mut tx, user_id, blob.id).await? {
            Some(existing) if existing.deleted_at.is_none() => {
                return Err(CoreError::Conflict(
                    "file with identical content already exists".into(),
                ));
            }
            Some(trashed) => {
                check_quota(&user, size)?;
                let file = files::resurrect_user_file(&mut tx, trashed.id, &new_file).await?;
                users::adjust_used_storage(&mut tx, user_id, size).await?;
                file
            }
            None => {
                check_quota(&user, size)?;
                let file = files::insert_user_file(&mut tx, &new_file).await?;
                users::adjust_used_storage(&mut tx, user_id, size).await?;
                file
            }
        };

        tx.commit().await?;

        if blob_created && !self.inline {
            if let Err(err) = self.blobs.put(&blob.object_key, req.ciphertext.clone()).await {
                tracing::error!(
                    object_key = %blob.object_key,
                    error = %err,
                    "object store write failed, reverting upload metadata"
                );
                let mut tx = self.store.begin().await?;
                files::delete_row(&mut tx, file.id).await?;
                files::delete_blob(&mut tx, blob.id).await?;
                users::adjust_used_storage(&mut tx, user_id, -size).await?;
                tx.commit().await?;
                return Err(CoreError::StorageBackend(err));
            }
        }

        tracing::info!(
            user_id,
            file_id = file.id,
            blob_id = blob.id,
            dedup = !blob_created,
            size,
            "file ingested"
        );
        Ok(file)
    }

    /// Fetch a file's ciphertext for its owner or a room member
    pub async fn download(&self, user_id: i64, file_id: i64) -> Result<FileDownload> {
        let mut conn = self.store.pool().acquire().await?;

        let file = files::live_by_id(&mut conn, file_id)
            .await?
            .ok_or(CoreError::NotFound("file"))?;
        access::check_file_access(&mut conn, user_id, &file).await?;

        let blob = files::blob_by_id(&mut conn, file.blob_id)
            .await?
            .ok_or(CoreError::NotFound("file"))?;
        drop(conn);

        let data = self.blob_bytes(&blob).await?;

        // Audit entry must not delay the response
        let store = self.store.clone();
        tokio::spawn(async move {
            if let Ok(mut conn) = store.pool().acquire().await {
                if let Err(err) = files::log_download(&mut conn, file_id, user_id).await {
                    tracing::warn!(file_id, error = %err, "download log write failed");
                }
            }
        });

        Ok(FileDownload {
            data,
            filename: file.filename,
            mime_type: file.mime_type,
            size_bytes: blob.size_bytes,
            wrapped_file_key: file.wrapped_file_key,
            file_key_iv: file.file_key_iv,
        })
    }

    /// Raw blob bytes for a file, used by the share engine
    pub(crate) async fn blob_bytes(&self, blob: &files::Blob) -> Result<Bytes> {
        match &blob.inline_data {
            Some(data) => Ok(Bytes::from(data.clone())),
            None => Ok(self.blobs.get(&blob.object_key).await?),
        }
    }

    pub async fn list(&self, user_id: i64, folder_id: Option<i64>) -> Result<Vec<files::UserFile>> {
        let mut conn = self.store.pool().acquire().await?;
        files::list_live(&mut conn, user_id, folder_id).await
    }

    pub async fn list_trash(&self, user_id: i64) -> Result<Vec<files::UserFile>> {
        let mut conn = self.store.pool().acquire().await?;
        files::list_trashed(&mut conn, user_id).await
    }

    /// Move a file to the trash; storage is freed immediately
    pub async fn soft_delete(&self, user_id: i64, file_id: i64) -> Result<()> {
        let mut tx = self.store.begin().await?;
        let file = files::live_by_id(&mut tx, file_id)
            .await?
            .ok_or(CoreError::NotFound("file"))?;
        if file.user_id != user_id {
            return Err(CoreError::Permission("not the file owner".into()));
        }
        let blob = files::blob_by_id(&mut tx, file.blob_id)
            .await?
            .ok_or(CoreError::NotFound("file"))?;
        files::set_deleted(&mut tx, file_id, Some(Utc::now())).await?;
        users::adjust_used_storage(&mut tx, user_id, -blob.size_bytes).await?;
        tx.commit().await?;
        Ok(())
    }

    /// Bring a trashed file back, re-checking the quota
    pub async fn restore(&self, user_id: i64, file_id: i64) -> Result<()> {
        let mut tx = self.store.begin().await?;
        let file = files::any_by_id(&mut tx, file_id)
            .await?
            .ok_or(CoreError::NotFound("file"))?;
        if file.user_id != user_id {
            return Err(CoreError::Permission("not the file owner".into()));
        }
        if file.deleted_at.is_none() {
            return Err(CoreError::Conflict("file is not in the trash".into()));
        }
        let user = users::by_id(&mut tx, user_id)
            .await?
            .ok_or(CoreError::NotFound("user"))?;
        let blob = files::blob_by_id(&mut tx, file.blob_id)
            .await?
            .ok_or(CoreError::NotFound("file"))?;
        check_quota(&user, blob.size_bytes)?;
        files::set_deleted(&mut tx, file_id, None).await?;
        users::adjust_used_storage(&mut tx, user_id, blob.size_bytes).await?;
        tx.commit().await?;
        Ok(())
    }

    /// Permanently remove a trashed file, collecting the blob when this
    /// was its last reference
    pub async fn purge(&self, user_id: i64, file_id: i64) -> Result<()> {
        let mut tx = self.store.begin().await?;
        let file = files::any_by_id(&mut tx, file_id)
            .await?
            .ok_or(CoreError::NotFound("file"))?;
        if file.user_id != user_id {
            return Err(CoreError::Permission("not the file owner".into()));
        }
        if file.deleted_at.is_none() {
            return Err(CoreError::Conflict(
                "file must be trashed before permanent deletion".into(),
            ));
        }
        files::delete_row(&mut tx, file_id).await?;
        let remaining = files::blob_reference_count(&mut tx, file.blob_id).await?;
        tx.commit().await?;

        if remaining == 0 {
            self.collect_blob(file.blob_id).await;
        }
        Ok(())
    }

    /// Best-effort removal of one orphaned blob. The metadata row is kept
    /// when the object store delete fails so a later sweep retries it.
    async fn collect_blob(&self, blob_id: i64) {
        let result: Result<()> = async {
            let mut conn = self.store.pool().acquire().await?;
            let Some(blob) = files::blob_by_id(&mut conn, blob_id).await? else {
                return Ok(());
            };
            if blob.inline_data.is_none() {
                self.blobs.delete(&blob.object_key).await?;
            }
            files::delete_blob(&mut conn, blob_id).await?;
            Ok(())
        }
        .await;
        if let Err(err) = result {
            tracing::warn!(blob_id, error = %err, "blob GC failed, will retry on next sweep");
        }
    }

    /// Sweep all orphaned blobs; returns how many were collected
    pub async fn sweep_orphan_blobs(&self) -> Result<u64> {
        let mut conn = self.store.pool().acquire().await?;
        let orphans = files::orphan_blobs(&mut conn).await?;
        drop(conn);

        let mut collected = 0;
        for blob in orphans {
            let before = {
                let mut conn = self.store.pool().acquire().await?;
                files::blob_by_id(&mut conn, blob.id).await?
            };
            if before.is_some() {
                self.collect_blob(blob.id).await;
                let mut conn = self.store.pool().acquire().await?;
                if files::blob_by_id(&mut conn, blob.id).await?.is_none() {
                    collected += 1;
                }
            }
        }
        Ok(collected)
    }

    pub async fn rename(&self, user_id: i64, file_id: i64, filename: &str) -> Result<()> {
        if filename.is_empty() {
            return Err(CoreError::Validation("filename must not be empty".into()));
        }
        let mut conn = self.store.pool().acquire().await?;
        self.require_owned_live(&mut conn, user_id, file_id).await?;
        files::rename(&mut conn, file_id, filename).await
    }

    pub async fn set_starred(&self, user_id: i64, file_id: i64, starred: bool) -> Result<()> {
        let mut conn = self.store.pool().acquire().await?;
        self.require_owned_live(&mut conn, user_id, file_id).await?;
        files::set_starred(&mut conn, file_id, starred).await
    }

    /// Move a file into a folder (or to the root with `None`)
    pub async fn move_to_folder(
        &self,
        user_id: i64,
        file_id: i64,
        folder_id: Option<i64>,
    ) -> Result<()> {
        let mut tx = self.store.begin().await?;
        let file = files::live_by_id(&mut tx, file_id)
            .await?
            .ok_or(CoreError::NotFound("file"))?;
        if file.user_id != user_id {
            return Err(CoreError::Permission("not the file owner".into()));
        }
        if let Some(folder_id) = folder_id {
            let folder = folders::by_id(&mut tx, folder_id)
                .await?
                .ok_or(CoreError::NotFound("folder"))?;
            if folder.user_id != user_id {
                return Err(CoreError::Permission("folder belongs to another user".into()));
            }
        }
        files::set_folder(&mut tx, file_id, folder_id).await?;
        tx.commit().await?;
        Ok(())
    }

    async fn require_owned_live(
        &self,
        conn: &mut sqlx::SqliteConnection,
        user_id: i64,
        file_id: i64,
    ) -> Result<files::UserFile> {
        let file = files::live_by_id(conn, file_id)
            .await?
            .ok_or(CoreError::NotFound("file"))?;
        if file.user_id != user_id {
            return Err(CoreError::Permission("not the file owner".into()));
        }
        Ok(file)
    }
}

fn check_quota(user: &users::User, additional: i64) -> Result<()> {
    if user.used_storage + additional > user.storage_quota {
        return Err(CoreError::QuotaExceeded);
    }
    Ok(())
}

/// Whether a database error is a unique-constraint violation
pub fn is_unique_violation(err: &sqlx::Error) -> bool {
    err.as_database_error()
        .is_some_and(|db| db.kind() == sqlx::error::ErrorKind::UniqueViolation)
}
