//! Key-rotation engine: resumable, rollback-capable rewrap of every file
//! key a user owns
//!
//! The rotation record doubles as the per-user lock (a live row blocks a
//! second rotation) and as the resume anchor: the new envelope is wrapped
//! under the new password and persisted up front, so a crashed run can be
//! resumed with the same credentials. Each file is rewrapped in its own
//! transaction; the `key_version` tag on the file detects rows a previous
//! attempt already handled.

use crate::store::{files, rotation, users, MetaStore};
use crate::{CoreError, Result};
use aegis_crypto::{derive_key, envelope, generate_salt, hash_password, EnvelopeKey};
use tracing::{info, warn};

/// Progress of one rotation run
#[derive(Clone, Debug, serde::Serialize)]
pub struct RotationProgress {
    pub rotation_id: String,
    pub status: String,
    pub total_files: i64,
    pub files_processed: i64,
    pub error_message: Option<String>,
}

impl From<&rotation::KeyRotation> for RotationProgress {
    fn from(row: &rotation::KeyRotation) -> Self {
        Self {
            rotation_id: row.rotation_id.clone(),
            status: row.status.clone(),
            total_files: row.total_files,
            files_processed: row.files_processed,
            error_message: row.error_message.clone(),
        }
    }
}

/// Orchestrates envelope-key rotation
#[derive(Clone)]
pub struct KeyRotationEngine {
    store: MetaStore,
    kdf_iterations: u32,
}

impl KeyRotationEngine {
    pub fn new(store: MetaStore, kdf_iterations: u32) -> Self {
        Self {
            store,
            kdf_iterations,
        }
    }

    /// Start a fresh rotation. Fails with a conflict while another
    /// rotation is live; use [`resume`](Self::resume) to pick up a run
    /// that was interrupted.
    pub async fn rotate(
        &self,
        user_id: i64,
        old_password: &str,
        new_password: &str,
    ) -> Result<RotationProgress> {
        if new_password.is_empty() {
            return Err(CoreError::Validation("new password must not be empty".into()));
        }

        let rotation = {
            let mut tx = self.store.begin().await?;

            if rotation::live_for_user(&mut tx, user_id).await?.is_some() {
                return Err(CoreError::Conflict(
                    "a key rotation is already in progress".into(),
                ));
            }

            let user = users::by_id(&mut tx, user_id)
                .await?
                .ok_or(CoreError::NotFound("user"))?;

            // Verify the old password by unwrapping the live envelope
            let old_envelope = self.unwrap_envelope(&user, old_password).await?;

            // The new envelope is generated once and persisted wrapped, so
            // a resumed run recovers the identical key
            let new_envelope = EnvelopeKey::generate();
            let new_salt = generate_salt();
            let iterations = self.kdf_iterations;
            let password = new_password.to_string();
            let salt_vec = new_salt.to_vec();
            let new_outer = tokio::task::spawn_blocking(move || {
                derive_key(&password, &salt_vec, iterations)
            })
            .await
            .map_err(|e| CoreError::Internal(e.to_string()))?;
            let wrapped_new = envelope::wrap_key(new_envelope.as_bytes(), &new_outer)?;

            let total = files::count_for_rotation(&mut tx, user_id).await?;
            let rotation_id = uuid::Uuid::new_v4().to_string();
            let rotation = rotation::insert(
                &mut tx,
                &rotation::NewKeyRotation {
                    rotation_id: &rotation_id,
                    user_id,
                    old_version: user.envelope_key_version,
                    new_version: user.envelope_key_version + 1,
                    total_files: total,
                    new_envelope_wrapped: &wrapped_new.ciphertext,
                    new_envelope_salt: &new_salt,
                    new_envelope_iv: &wrapped_new.iv,
                },
            )
            .await?;
            tx.commit().await?;

            info!(user_id, rotation_id = %rotation.rotation_id, total, "key rotation started");
            drop(old_envelope);
            rotation
        };

        self.run(rotation, old_password, new_password).await
    }

    /// Resume an interrupted rotation with the same credentials
    pub async fn resume(
        &self,
        user_id: i64,
        old_password: &str,
        new_password: &str,
    ) -> Result<RotationProgress> {
        let rotation = {
            let mut conn = self.store.pool().acquire().await?;
            rotation::live_for_user(&mut conn, user_id)
                .await?
                .ok_or(CoreError::NotFound("rotation"))?
        };
        info!(
            user_id,
            rotation_id = %rotation.rotation_id,
            processed = rotation.files_processed,
            "resuming key rotation"
        );
        self.run(rotation, old_password, new_password).await
    }

    /// The per-file rewrap loop shared by fresh and resumed runs
    async fn run(
        &self,
        rotation: rotation::KeyRotation,
        old_password: &str,
        new_password: &str,
    ) -> Result<RotationProgress> {
        let user = {
            let mut conn = self.store.pool().acquire().await?;
            users::by_id(&mut conn, rotation.user_id)
                .await?
                .ok_or(CoreError::NotFound("user"))?
        };

        let old_envelope = self.unwrap_envelope(&user, old_password).await?;

        // Recover the new envelope from the rotation record; failing here
        // means the new password does not match the one the run started with
        let iterations = self.kdf_iterations;
        let password = new_password.to_string();
        let salt = rotation.new_envelope_salt.clone();
        let new_outer =
            tokio::task::spawn_blocking(move || derive_key(&password, &salt, iterations))
                .await
                .map_err(|e| CoreError::Internal(e.to_string()))?;
        let new_envelope = envelope::unwrap_envelope_key(
            &rotation.new_envelope_wrapped,
            &rotation.new_envelope_iv,
            &new_outer,
        )
        .map_err(|_| CoreError::Authentication)?;

        let file_ids: Vec<i64> = {
            let mut conn = self.store.pool().acquire().await?;
            files::list_all_for_rotation(&mut conn, rotation.user_id)
                .await?
                .into_iter()
                .map(|f| f.id)
                .collect()
        };

        for file_id in file_ids {
            if let Err(err) = self
                .rewrap_one(&rotation, file_id, &old_envelope, &new_envelope)
                .await
            {
                warn!(
                    rotation_id = %rotation.rotation_id,
                    file_id,
                    error = %err,
                    "rotation failed on file"
                );
                let mut conn = self.store.pool().acquire().await?;
                rotation::mark_failed(
                    &mut conn,
                    &rotation.rotation_id,
                    &format!("rewrap failed on file {file_id}"),
                )
                .await?;
                return Err(err);
            }
        }

        // Completion: install the new envelope on the user and retire the run
        let new_password_hash = {
            let iterations = self.kdf_iterations;
            let password = new_password.to_string();
            tokio::task::spawn_blocking(move || hash_password(&password, iterations))
                .await
                .map_err(|e| CoreError::Internal(e.to_string()))?
        };

        let mut tx = self.store.begin().await?;
        users::update_envelope(
            &mut tx,
            rotation.user_id,
            &rotation.new_envelope_wrapped,
            &rotation.new_envelope_salt,
            &rotation.new_envelope_iv,
            rotation.new_version,
            &new_password_hash,
        )
        .await?;
        rotation::mark_completed(&mut tx, &rotation.rotation_id).await?;
        rotation::delete_backups(&mut tx, &rotation.rotation_id).await?;
        tx.commit().await?;

        let done = {
            let mut conn = self.store.pool().acquire().await?;
            rotation::by_id(&mut conn, &rotation.rotation_id)
                .await?
                .ok_or(CoreError::NotFound("rotation"))?
        };
        info!(
            rotation_id = %done.rotation_id,
            processed = done.files_processed,
            "key rotation completed"
        );
        Ok(RotationProgress::from(&done))
    }

    /// Rewrap one file inside its own transaction.
    ///
    /// Already-rewrapped rows (version tag at the new version) are
    /// skipped, which is what makes a resumed run idempotent.
    async fn rewrap_one(
        &self,
        rotation: &rotation::KeyRotation,
        file_id: i64,
        old_envelope: &EnvelopeKey,
        new_envelope: &EnvelopeKey,
    ) -> Result<()> {
        let mut tx = self.store.begin().await?;
        let Some(file) = files::any_by_id(&mut tx, file_id).await? else {
            // Purged since the id list was taken
            return Ok(());
        };
        if file.key_version >= rotation.new_version {
            return Ok(());
        }

        let file_key =
            envelope::unwrap_file_key(&file.wrapped_file_key, &file.file_key_iv, old_envelope)?;

        rotation::insert_backup(
            &mut tx,
            &rotation.rotation_id,
            file.id,
            &file.wrapped_file_key,
            &file.file_key_iv,
            file.key_version,
        )
        .await?;

        let rewrapped = envelope::wrap_key(file_key.as_bytes(), new_envelope)?;
        files::set_wrapped_key(
            &mut tx,
            file.id,
            &rewrapped.ciphertext,
            &rewrapped.iv,
            rotation.new_version,
        )
        .await?;
        rotation::increment_processed(&mut tx, &rotation.rotation_id).await?;
        tx.commit().await?;
        Ok(())
    }

    /// Undo a failed or interrupted rotation from its backups
    pub async fn rollback(&self, user_id: i64, rotation_id: &str) -> Result<RotationProgress> {
        let mut tx = self.store.begin().await?;
        let rotation = rotation::by_id(&mut tx, rotation_id)
            .await?
            .ok_or(CoreError::NotFound("rotation"))?;
        if rotation.user_id != user_id {
            return Err(CoreError::Permission("not your rotation".into()));
        }
        match rotation.parsed_status()? {
            rotation::RotationStatus::InProgress
            | rotation::RotationStatus::Pending
            | rotation::RotationStatus::Failed => {}
            other => {
                return Err(CoreError::Conflict(format!(
                    "rotation in state {} cannot be rolled back",
                    other.name()
                )));
            }
        }

        let backups = rotation::backups_for_rotation(&mut tx, rotation_id).await?;
        let restored = backups.len();
        for backup in &backups {
            files::set_wrapped_key(
                &mut tx,
                backup.user_file_id,
                &backup.old_wrapped_file_key,
                &backup.old_iv,
                backup.old_key_version,
            )
            .await?;
        }
        rotation::mark_rolled_back(&mut tx, rotation_id).await?;
        rotation::delete_backups(&mut tx, rotation_id).await?;
        tx.commit().await?;

        info!(rotation_id, restored, "key rotation rolled back");

        let mut conn = self.store.pool().acquire().await?;
        let row = rotation::by_id(&mut conn, rotation_id)
            .await?
            .ok_or(CoreError::NotFound("rotation"))?;
        Ok(RotationProgress::from(&row))
    }

    /// Progress report for a rotation the user owns
    pub async fn status(&self, user_id: i64, rotation_id: &str) -> Result<RotationProgress> {
        let mut conn = self.store.pool().acquire().await?;
        let rotation = rotation::by_id(&mut conn, rotation_id)
            .await?
            .ok_or(CoreError::NotFound("rotation"))?;
        if rotation.user_id != user_id {
            return Err(CoreError::Permission("not your rotation".into()));
        }
        Ok(RotationProgress::from(&rotation))
    }

    async fn unwrap_envelope(&self, user: &users::User, password: &str) -> Result<EnvelopeKey> {
        let iterations = self.kdf_iterations;
        let password = password.to_string();
        let salt = user.envelope_key_salt.clone();
        let outer = tokio::task::spawn_blocking(move || derive_key(&password, &salt, iterations))
            .await
            .map_err(|e| CoreError::Internal(e.to_string()))?;
        envelope::unwrap_envelope_key(&user.envelope_key_wrapped, &user.envelope_key_iv, &outer)
            .map_err(|_| CoreError::Authentication)
    }
}
