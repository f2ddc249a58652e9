//! Folder records and queries

use crate::{CoreError, Result};
use chrono::{DateTime, Utc};
use sqlx::SqliteConnection;

/// Maximum folder nesting walked during cycle prevention
pub const MAX_FOLDER_DEPTH: usize = 64;

/// A user's folder
#[derive(Clone, Debug, sqlx::FromRow)]
pub struct Folder {
    pub id: i64,
    pub user_id: i64,
    pub name: String,
    pub parent_id: Option<i64>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub deleted_at: Option<DateTime<Utc>>,
}

pub async fn by_id(conn: &mut SqliteConnection, id: i64) -> Result<Option<Folder>> {
    let folder =
        sqlx::query_as::<_, Folder>("SELECT * FROM folders WHERE id = ? AND deleted_at IS NULL")
            .bind(id)
            .fetch_optional(conn)
            .await?;
    Ok(folder)
}

pub async fn insert(
    conn: &mut SqliteConnection,
    user_id: i64,
    name: &str,
    parent_id: Option<i64>,
) -> Result<Folder> {
    let now = Utc::now();
    let folder = sqlx::query_as::<_, Folder>(
        r#"
        INSERT INTO folders (user_id, name, parent_id, created_at, updated_at)
        VALUES (?, ?, ?, ?, ?)
        RETURNING *
        "#,
    )
    .bind(user_id)
    .bind(name)
    .bind(parent_id)
    .bind(now)
    .bind(now)
    .fetch_one(conn)
    .await?;
    Ok(folder)
}

pub async fn list_for_user(conn: &mut SqliteConnection, user_id: i64) -> Result<Vec<Folder>> {
    let folders = sqlx::query_as::<_, Folder>(
        "SELECT * FROM folders WHERE user_id = ? AND deleted_at IS NULL ORDER BY id",
    )
    .bind(user_id)
    .fetch_all(conn)
    .await?;
    Ok(folders)
}

pub async fn set_parent(
    conn: &mut SqliteConnection,
    id: i64,
    parent_id: Option<i64>,
) -> Result<()> {
    sqlx::query("UPDATE folders SET parent_id = ?, updated_at = ? WHERE id = ?")
        .bind(parent_id)
        .bind(Utc::now())
        .bind(id)
        .execute(conn)
        .await?;
    Ok(())
}

pub async fn set_deleted(
    conn: &mut SqliteConnection,
    id: i64,
    deleted_at: Option<DateTime<Utc>>,
) -> Result<()> {
    sqlx::query("UPDATE folders SET deleted_at = ?, updated_at = ? WHERE id = ?")
        .bind(deleted_at)
        .bind(Utc::now())
        .bind(id)
        .execute(conn)
        .await?;
    Ok(())
}

/// Verify that attaching `folder_id` under `candidate_parent` creates no
/// cycle and stays within the same user's tree.
///
/// Walks the parent chain up to [`MAX_FOLDER_DEPTH`]; a chain deeper than
/// that is rejected outright.
pub async fn check_attachment(
    conn: &mut SqliteConnection,
    user_id: i64,
    folder_id: Option<i64>,
    candidate_parent: i64,
) -> Result<()> {
    let mut cursor = Some(candidate_parent);
    for _ in 0..MAX_FOLDER_DEPTH {
        let Some(current) = cursor else {
            return Ok(());
        };
        if Some(current) == folder_id {
            return Err(CoreError::Validation(
                "folder move would create a cycle".to_string(),
            ));
        }
        let parent = by_id(conn, current)
            .await?
            .ok_or(CoreError::NotFound("folder"))?;
        if parent.user_id != user_id {
            return Err(CoreError::Permission(
                "folder belongs to another user".to_string(),
            ));
        }
        cursor = parent.parent_id;
    }
    Err(CoreError::Validation(format!(
        "folder nesting exceeds {MAX_FOLDER_DEPTH} levels"
    )))
}
