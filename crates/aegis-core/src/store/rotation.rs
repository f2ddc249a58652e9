//! Key-rotation bookkeeping records

use crate::{CoreError, Result};
use chrono::{DateTime, Utc};
use sqlx::SqliteConnection;

/// Lifecycle of a rotation run
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RotationStatus {
    Pending,
    InProgress,
    Completed,
    Failed,
    RolledBack,
}

impl RotationStatus {
    pub fn from_name(name: &str) -> Result<Self> {
        match name {
            "PENDING" => Ok(Self::Pending),
            "IN_PROGRESS" => Ok(Self::InProgress),
            "COMPLETED" => Ok(Self::Completed),
            "FAILED" => Ok(Self::Failed),
            "ROLLED_BACK" => Ok(Self::RolledBack),
            other => Err(CoreError::Validation(format!(
                "unknown rotation status: {other}"
            ))),
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::Pending => "PENDING",
            Self::InProgress => "IN_PROGRESS",
            Self::Completed => "COMPLETED",
            Self::Failed => "FAILED",
            Self::RolledBack => "ROLLED_BACK",
        }
    }
}

/// One rotation run over a user's file keys
#[derive(Clone, Debug, sqlx::FromRow)]
pub struct KeyRotation {
    pub rotation_id: String,
    pub user_id: i64,
    pub status: String,
    pub old_version: i64,
    pub new_version: i64,
    pub total_files: i64,
    pub files_processed: i64,
    pub new_envelope_wrapped: Vec<u8>,
    pub new_envelope_salt: Vec<u8>,
    pub new_envelope_iv: Vec<u8>,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub failed_at: Option<DateTime<Utc>>,
    pub error_message: Option<String>,
}

impl KeyRotation {
    /// Parsed status
    pub fn parsed_status(&self) -> Result<RotationStatus> {
        RotationStatus::from_name(&self.status)
    }
}

/// Pre-rotation copy of one file's wrap, for rollback
#[derive(Clone, Debug, sqlx::FromRow)]
pub struct RotationBackup {
    pub rotation_id: String,
    pub user_file_id: i64,
    pub old_wrapped_file_key: Vec<u8>,
    pub old_iv: Vec<u8>,
    pub old_key_version: i64,
}

pub struct NewKeyRotation<'a> {
    pub rotation_id: &'a str,
    pub user_id: i64,
    pub old_version: i64,
    pub new_version: i64,
    pub total_files: i64,
    pub new_envelope_wrapped: &'a [u8],
    pub new_envelope_salt: &'a [u8],
    pub new_envelope_iv: &'a [u8],
}

pub async fn insert(conn: &mut SqliteConnection, new: &NewKeyRotation<'_>) -> Result<KeyRotation> {
    let rotation = sqlx::query_as::<_, KeyRotation>(
        r#"
        INSERT INTO key_rotations (rotation_id, user_id, status, old_version, new_version,
                                   total_files, new_envelope_wrapped, new_envelope_salt,
                                   new_envelope_iv, started_at)
        VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
        RETURNING *
        "#,
    )
    .bind(new.rotation_id)
    .bind(new.user_id)
    .bind(RotationStatus::InProgress.name())
    .bind(new.old_version)
    .bind(new.new_version)
    .bind(new.total_files)
    .bind(new.new_envelope_wrapped)
    .bind(new.new_envelope_salt)
    .bind(new.new_envelope_iv)
    .bind(Utc::now())
    .fetch_one(conn)
    .await?;
    Ok(rotation)
}

pub async fn by_id(conn: &mut SqliteConnection, rotation_id: &str) -> Result<Option<KeyRotation>> {
    let rotation =
        sqlx::query_as::<_, KeyRotation>("SELECT * FROM key_rotations WHERE rotation_id = ?")
            .bind(rotation_id)
            .fetch_optional(conn)
            .await?;
    Ok(rotation)
}

/// The user's live rotation, if one is in progress
pub async fn live_for_user(
    conn: &mut SqliteConnection,
    user_id: i64,
) -> Result<Option<KeyRotation>> {
    let rotation = sqlx::query_as::<_, KeyRotation>(
        "SELECT * FROM key_rotations WHERE user_id = ? AND status IN ('PENDING', 'IN_PROGRESS')",
    )
    .bind(user_id)
    .fetch_optional(conn)
    .await?;
    Ok(rotation)
}

pub async fn increment_processed(conn: &mut SqliteConnection, rotation_id: &str) -> Result<()> {
    sqlx::query("UPDATE key_rotations SET files_processed = files_processed + 1 WHERE rotation_id = ?")
        .bind(rotation_id)
        .execute(conn)
        .await?;
    Ok(())
}

pub async fn mark_completed(conn: &mut SqliteConnection, rotation_id: &str) -> Result<()> {
    sqlx::query(
        "UPDATE key_rotations SET status = ?, completed_at = ? WHERE rotation_id = ?",
    )
    .bind(RotationStatus::Completed.name())
    .bind(Utc::now())
    .bind(rotation_id)
    .execute(conn)
    .await?;
    Ok(())
}

pub async fn mark_failed(
    conn: &mut SqliteConnection,
    rotation_id: &str,
    error: &str,
) -> Result<()> {
    sqlx::query(
        "UPDATE key_rotations SET status = ?, failed_at = ?, error_message = ? WHERE rotation_id = ?",
    )
    .bind(RotationStatus::Failed.name())
    .bind(Utc::now())
    .bind(error)
    .bind(rotation_id)
    .execute(conn)
    .await?;
    Ok(())
}

pub async fn mark_rolled_back(conn: &mut SqliteConnection, rotation_id: &str) -> Result<()> {
    sqlx::query("UPDATE key_rotations SET status = ? WHERE rotation_id = ?")
        .bind(RotationStatus::RolledBack.name())
        .bind(rotation_id)
        .execute(conn)
        .await?;
    Ok(())
}

/// Insert a backup row; idempotent under the composite primary key so a
/// resumed run may retry a file it already backed up
pub async fn insert_backup(
    conn: &mut SqliteConnection,
    rotation_id: &str,
    user_file_id: i64,
    old_wrapped_file_key: &[u8],
    old_iv: &[u8],
    old_key_version: i64,
) -> Result<()> {
    sqlx::query(
        r#"
        INSERT OR IGNORE INTO key_rotation_backups
            (rotation_id, user_file_id, old_wrapped_file_key, old_iv, old_key_version)
        VALUES (?, ?, ?, ?, ?)
        "#,
    )
    .bind(rotation_id)
    .bind(user_file_id)
    .bind(old_wrapped_file_key)
    .bind(old_iv)
    .bind(old_key_version)
    .execute(conn)
    .await?;
    Ok(())
}

pub async fn backups_for_rotation(
    conn: &mut SqliteConnection,
    rotation_id: &str,
) -> Result<Vec<RotationBackup>> {
    let backups = sqlx::query_as::<_, RotationBackup>(
        "SELECT * FROM key_rotation_backups WHERE rotation_id = ? ORDER BY user_file_id",
    )
    .bind(rotation_id)
    .fetch_all(conn)
    .await?;
    Ok(backups)
}

pub async fn delete_backups(conn: &mut SqliteConnection, rotation_id: &str) -> Result<()> {
    sqlx::query("DELETE FROM key_rotation_backups WHERE rotation_id = ?")
        .bind(rotation_id)
        .execute(conn)
        .await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_names_roundtrip() {
        for status in [
            RotationStatus::Pending,
            RotationStatus::InProgress,
            RotationStatus::Completed,
            RotationStatus::Failed,
            RotationStatus::RolledBack,
        ] {
            assert_eq!(RotationStatus::from_name(status.name()).unwrap(), status);
        }
        assert!(RotationStatus::from_name("DONE").is_err());
    }
}
