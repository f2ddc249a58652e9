//! Blob and user-file records and queries
//!
//! A `Blob` is one unique ciphertext byte-string; a `UserFile` is a
//! user's named binding to a blob with its own wrapped file key.
//! `UNIQUE (user_id, blob_id)` spans soft-deleted rows, which is what
//! forces the resurrect-on-reupload path in the file engine.

use crate::Result;
use chrono::{DateTime, Utc};
use sqlx::SqliteConnection;

/// One unique ciphertext byte-string
#[derive(Clone, Debug, sqlx::FromRow)]
pub struct Blob {
    pub id: i64,
    pub content_hash: String,
    pub size_bytes: i64,
    pub object_key: String,
    pub inline_data: Option<Vec<u8>>,
}

/// A user's binding to a blob
#[derive(Clone, Debug, sqlx::FromRow)]
pub struct UserFile {
    pub id: i64,
    pub user_id: i64,
    pub blob_id: i64,
    pub folder_id: Option<i64>,
    pub filename: String,
    pub mime_type: String,
    pub wrapped_file_key: Vec<u8>,
    pub file_key_iv: Vec<u8>,
    pub key_version: i64,
    pub is_shared: bool,
    pub share_count: i64,
    pub is_starred: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub deleted_at: Option<DateTime<Utc>>,
}

pub async fn blob_by_hash(conn: &mut SqliteConnection, hash: &str) -> Result<Option<Blob>> {
    let blob = sqlx::query_as::<_, Blob>("SELECT * FROM blobs WHERE content_hash = ?")
        .bind(hash)
        .fetch_optional(conn)
        .await?;
    Ok(blob)
}

pub async fn blob_by_id(conn: &mut SqliteConnection, id: i64) -> Result<Option<Blob>> {
    let blob = sqlx::query_as::<_, Blob>("SELECT * FROM blobs WHERE id = ?")
        .bind(id)
        .fetch_optional(conn)
        .await?;
    Ok(blob)
}

pub async fn insert_blob(
    conn: &mut SqliteConnection,
    content_hash: &str,
    size_bytes: i64,
    object_key: &str,
    inline_data: Option<&[u8]>,
) -> Result<Blob> {
    let blob = sqlx::query_as::<_, Blob>(
        r#"
        INSERT INTO blobs (content_hash, size_bytes, object_key, inline_data)
        VALUES (?, ?, ?, ?)
        RETURNING *
        "#,
    )
    .bind(content_hash)
    .bind(size_bytes)
    .bind(object_key)
    .bind(inline_data)
    .fetch_one(conn)
    .await?;
    Ok(blob)
}

pub async fn delete_blob(conn: &mut SqliteConnection, id: i64) -> Result<()> {
    sqlx::query("DELETE FROM blobs WHERE id = ?")
        .bind(id)
        .execute(conn)
        .await?;
    Ok(())
}

/// Count user_files rows, live or trashed, still bound to a blob.
/// Trashed rows count: they can be restored, so the blob must stay.
pub async fn blob_reference_count(conn: &mut SqliteConnection, blob_id: i64) -> Result<i64> {
    let (count,): (i64,) =
        sqlx::query_as("SELECT COUNT(*) FROM user_files WHERE blob_id = ?")
            .bind(blob_id)
            .fetch_one(conn)
            .await?;
    Ok(count)
}

/// Blobs no user_files row references any more (GC candidates)
pub async fn orphan_blobs(conn: &mut SqliteConnection) -> Result<Vec<Blob>> {
    let blobs = sqlx::query_as::<_, Blob>(
        r#"
        SELECT b.* FROM blobs b
        WHERE NOT EXISTS (SELECT 1 FROM user_files uf WHERE uf.blob_id = b.id)
        "#,
    )
    .fetch_all(conn)
    .await?;
    Ok(blobs)
}

/// Any binding of this user to this blob, regardless of deletion state
pub async fn binding_any_state(
    conn: &mut SqliteConnection,
    user_id: i64,
    blob_id: i64,
) -> Result<Option<UserFile>> {
    let file = sqlx::query_as::<_, UserFile>(
        "SELECT * FROM user_files WHERE user_id = ? AND blob_id = ?",
    )
    .bind(user_id)
    .bind(blob_id)
    .fetch_optional(conn)
    .await?;
    Ok(file)
}

pub struct NewUserFile<'a> {
    pub user_id: i64,
    pub blob_id: i64,
    pub folder_id: Option<i64>,
    pub filename: &'a str,
    pub mime_type: &'a str,
    pub wrapped_file_key: &'a [u8],
    pub file_key_iv: &'a [u8],
    pub key_version: i64,
}

pub async fn insert_user_file(
    conn: &mut SqliteConnection,
    new: &NewUserFile<'_>,
) -> Result<UserFile> {
    let now = Utc::now();
    let file = sqlx::query_as::<_, UserFile>(
        r#"
        INSERT INTO user_files (user_id, blob_id, folder_id, filename, mime_type,
                                wrapped_file_key, file_key_iv, key_version,
                                created_at, updated_at)
        VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
        RETURNING *
        "#,
    )
    .bind(new.user_id)
    .bind(new.blob_id)
    .bind(new.folder_id)
    .bind(new.filename)
    .bind(new.mime_type)
    .bind(new.wrapped_file_key)
    .bind(new.file_key_iv)
    .bind(new.key_version)
    .bind(now)
    .bind(now)
    .fetch_one(conn)
    .await?;
    Ok(file)
}

/// Bring a trashed binding back with fresh metadata and key material
pub async fn resurrect_user_file(
    conn: &mut SqliteConnection,
    id: i64,
    new: &NewUserFile<'_>,
) -> Result<UserFile> {
    let file = sqlx::query_as::<_, UserFile>(
        r#"
        UPDATE user_files
        SET deleted_at = NULL, folder_id = ?, filename = ?, mime_type = ?,
            wrapped_file_key = ?, file_key_iv = ?, key_version = ?, updated_at = ?
        WHERE id = ?
        RETURNING *
        "#,
    )
    .bind(new.folder_id)
    .bind(new.filename)
    .bind(new.mime_type)
    .bind(new.wrapped_file_key)
    .bind(new.file_key_iv)
    .bind(new.key_version)
    .bind(Utc::now())
    .bind(id)
    .fetch_one(conn)
    .await?;
    Ok(file)
}

/// A live (not trashed) user file by id
pub async fn live_by_id(conn: &mut SqliteConnection, id: i64) -> Result<Option<UserFile>> {
    let file = sqlx::query_as::<_, UserFile>(
        "SELECT * FROM user_files WHERE id = ? AND deleted_at IS NULL",
    )
    .bind(id)
    .fetch_optional(conn)
    .await?;
    Ok(file)
}

/// Any user file by id, trashed included
pub async fn any_by_id(conn: &mut SqliteConnection, id: i64) -> Result<Option<UserFile>> {
    let file = sqlx::query_as::<_, UserFile>("SELECT * FROM user_files WHERE id = ?")
        .bind(id)
        .fetch_optional(conn)
        .await?;
    Ok(file)
}

pub async fn list_live(
    conn: &mut SqliteConnection,
    user_id: i64,
    folder_id: Option<i64>,
) -> Result<Vec<UserFile>> {
    let files = match folder_id {
        Some(folder) => {
            sqlx::query_as::<_, UserFile>(
                "SELECT * FROM user_files WHERE user_id = ? AND folder_id = ? AND deleted_at IS NULL ORDER BY id",
            )
            .bind(user_id)
            .bind(folder)
            .fetch_all(conn)
            .await?
        }
        None => {
            sqlx::query_as::<_, UserFile>(
                "SELECT * FROM user_files WHERE user_id = ? AND deleted_at IS NULL ORDER BY id",
            )
            .bind(user_id)
            .fetch_all(conn)
            .await?
        }
    };
    Ok(files)
}

pub async fn list_trashed(conn: &mut SqliteConnection, user_id: i64) -> Result<Vec<UserFile>> {
    let files = sqlx::query_as::<_, UserFile>(
        "SELECT * FROM user_files WHERE user_id = ? AND deleted_at IS NOT NULL ORDER BY id",
    )
    .bind(user_id)
    .fetch_all(conn)
    .await?;
    Ok(files)
}

/// All of a user's files in ascending id order, trashed included
/// (rotation rewraps everything that can ever be restored)
pub async fn list_all_for_rotation(
    conn: &mut SqliteConnection,
    user_id: i64,
) -> Result<Vec<UserFile>> {
    let files =
        sqlx::query_as::<_, UserFile>("SELECT * FROM user_files WHERE user_id = ? ORDER BY id")
            .bind(user_id)
            .fetch_all(conn)
            .await?;
    Ok(files)
}

pub async fn count_for_rotation(conn: &mut SqliteConnection, user_id: i64) -> Result<i64> {
    let (count,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM user_files WHERE user_id = ?")
        .bind(user_id)
        .fetch_one(conn)
        .await?;
    Ok(count)
}

pub async fn set_deleted(
    conn: &mut SqliteConnection,
    id: i64,
    deleted_at: Option<DateTime<Utc>>,
) -> Result<()> {
    sqlx::query("UPDATE user_files SET deleted_at = ?, updated_at = ? WHERE id = ?")
        .bind(deleted_at)
        .bind(Utc::now())
        .bind(id)
        .execute(conn)
        .await?;
    Ok(())
}

pub async fn delete_row(conn: &mut SqliteConnection, id: i64) -> Result<()> {
    sqlx::query("DELETE FROM user_files WHERE id = ?")
        .bind(id)
        .execute(conn)
        .await?;
    Ok(())
}

pub async fn rename(conn: &mut SqliteConnection, id: i64, filename: &str) -> Result<()> {
    sqlx::query("UPDATE user_files SET filename = ?, updated_at = ? WHERE id = ?")
        .bind(filename)
        .bind(Utc::now())
        .bind(id)
        .execute(conn)
        .await?;
    Ok(())
}

pub async fn set_starred(conn: &mut SqliteConnection, id: i64, starred: bool) -> Result<()> {
    sqlx::query("UPDATE user_files SET is_starred = ?, updated_at = ? WHERE id = ?")
        .bind(starred)
        .bind(Utc::now())
        .bind(id)
        .execute(conn)
        .await?;
    Ok(())
}

pub async fn set_folder(
    conn: &mut SqliteConnection,
    id: i64,
    folder_id: Option<i64>,
) -> Result<()> {
    sqlx::query("UPDATE user_files SET folder_id = ?, updated_at = ? WHERE id = ?")
        .bind(folder_id)
        .bind(Utc::now())
        .bind(id)
        .execute(conn)
        .await?;
    Ok(())
}

/// Replace a file's wrapped key during rotation or rollback
pub async fn set_wrapped_key(
    conn: &mut SqliteConnection,
    id: i64,
    wrapped_file_key: &[u8],
    file_key_iv: &[u8],
    key_version: i64,
) -> Result<()> {
    sqlx::query(
        "UPDATE user_files SET wrapped_file_key = ?, file_key_iv = ?, key_version = ?, updated_at = ? WHERE id = ?",
    )
    .bind(wrapped_file_key)
    .bind(file_key_iv)
    .bind(key_version)
    .bind(Utc::now())
    .bind(id)
    .execute(conn)
    .await?;
    Ok(())
}

/// Adjust share bookkeeping; `is_shared` tracks whether any share remains
pub async fn adjust_share_count(
    conn: &mut SqliteConnection,
    id: i64,
    delta: i64,
) -> Result<()> {
    sqlx::query(
        r#"
        UPDATE user_files
        SET share_count = share_count + ?,
            is_shared = CASE WHEN share_count + ? > 0 THEN 1 ELSE 0 END,
            updated_at = ?
        WHERE id = ?
        "#,
    )
    .bind(delta)
    .bind(delta)
    .bind(Utc::now())
    .bind(id)
    .execute(conn)
    .await?;
    Ok(())
}

pub async fn log_download(
    conn: &mut SqliteConnection,
    user_file_id: i64,
    user_id: i64,
) -> Result<()> {
    sqlx::query("INSERT INTO download_log (user_file_id, user_id, downloaded_at) VALUES (?, ?, ?)")
        .bind(user_file_id)
        .bind(user_id)
        .bind(Utc::now())
        .execute(conn)
        .await?;
    Ok(())
}
