//! Rooms: direct sharing between authenticated users

use crate::{CoreError, Result};
use chrono::{DateTime, Utc};
use sqlx::SqliteConnection;

/// Member role inside a room, strongest first
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub enum RoomRole {
    ContentViewer,
    ContentEditor,
    ContentCreator,
    Admin,
}

impl RoomRole {
    /// Parse the stored role name
    pub fn from_name(name: &str) -> Result<Self> {
        match name {
            "ADMIN" => Ok(Self::Admin),
            "CONTENT_CREATOR" => Ok(Self::ContentCreator),
            "CONTENT_EDITOR" => Ok(Self::ContentEditor),
            "CONTENT_VIEWER" => Ok(Self::ContentViewer),
            other => Err(CoreError::Validation(format!("unknown room role: {other}"))),
        }
    }

    /// Stored role name
    pub fn name(&self) -> &'static str {
        match self {
            Self::Admin => "ADMIN",
            Self::ContentCreator => "CONTENT_CREATOR",
            Self::ContentEditor => "CONTENT_EDITOR",
            Self::ContentViewer => "CONTENT_VIEWER",
        }
    }

    /// Whether this role may attach content to the room
    pub fn can_add_content(&self) -> bool {
        *self >= Self::ContentEditor
    }
}

/// A sharing room
#[derive(Clone, Debug, sqlx::FromRow)]
pub struct Room {
    pub id: i64,
    pub name: String,
    pub creator_id: i64,
    pub created_at: DateTime<Utc>,
}

pub async fn insert(conn: &mut SqliteConnection, name: &str, creator_id: i64) -> Result<Room> {
    let room = sqlx::query_as::<_, Room>(
        "INSERT INTO rooms (name, creator_id, created_at) VALUES (?, ?, ?) RETURNING *",
    )
    .bind(name)
    .bind(creator_id)
    .bind(Utc::now())
    .fetch_one(conn)
    .await?;
    Ok(room)
}

pub async fn by_id(conn: &mut SqliteConnection, id: i64) -> Result<Option<Room>> {
    let room = sqlx::query_as::<_, Room>("SELECT * FROM rooms WHERE id = ?")
        .bind(id)
        .fetch_optional(conn)
        .await?;
    Ok(room)
}

pub async fn list_for_user(conn: &mut SqliteConnection, user_id: i64) -> Result<Vec<Room>> {
    let rooms = sqlx::query_as::<_, Room>(
        r#"
        SELECT r.* FROM rooms r
        JOIN room_members m ON m.room_id = r.id
        WHERE m.user_id = ?
        ORDER BY r.id
        "#,
    )
    .bind(user_id)
    .fetch_all(conn)
    .await?;
    Ok(rooms)
}

pub async fn add_member(
    conn: &mut SqliteConnection,
    room_id: i64,
    user_id: i64,
    role: RoomRole,
) -> Result<()> {
    sqlx::query(
        r#"
        INSERT INTO room_members (room_id, user_id, role) VALUES (?, ?, ?)
        ON CONFLICT (room_id, user_id) DO UPDATE SET role = excluded.role
        "#,
    )
    .bind(room_id)
    .bind(user_id)
    .bind(role.name())
    .execute(conn)
    .await?;
    Ok(())
}

pub async fn member_role(
    conn: &mut SqliteConnection,
    room_id: i64,
    user_id: i64,
) -> Result<Option<RoomRole>> {
    let row: Option<(String,)> =
        sqlx::query_as("SELECT role FROM room_members WHERE room_id = ? AND user_id = ?")
            .bind(room_id)
            .bind(user_id)
            .fetch_optional(conn)
            .await?;
    row.map(|(name,)| RoomRole::from_name(&name)).transpose()
}

pub async fn add_file(conn: &mut SqliteConnection, room_id: i64, user_file_id: i64) -> Result<()> {
    let result = sqlx::query(
        "INSERT OR IGNORE INTO room_files (room_id, user_file_id) VALUES (?, ?)",
    )
    .bind(room_id)
    .bind(user_file_id)
    .execute(conn)
    .await?;
    if result.rows_affected() == 0 {
        return Err(CoreError::Conflict(
            "file already attached to room".to_string(),
        ));
    }
    Ok(())
}

pub async fn add_folder(conn: &mut SqliteConnection, room_id: i64, folder_id: i64) -> Result<()> {
    let result =
        sqlx::query("INSERT OR IGNORE INTO room_folders (room_id, folder_id) VALUES (?, ?)")
            .bind(room_id)
            .bind(folder_id)
            .execute(conn)
            .await?;
    if result.rows_affected() == 0 {
        return Err(CoreError::Conflict(
            "folder already attached to room".to_string(),
        ));
    }
    Ok(())
}

/// Whether any room both holds this file and counts the user as a member
pub async fn user_can_reach_file(
    conn: &mut SqliteConnection,
    user_id: i64,
    user_file_id: i64,
) -> Result<bool> {
    let row: Option<(i64,)> = sqlx::query_as(
        r#"
        SELECT 1 FROM room_files rf
        JOIN room_members rm ON rm.room_id = rf.room_id
        WHERE rf.user_file_id = ? AND rm.user_id = ?
        LIMIT 1
        "#,
    )
    .bind(user_file_id)
    .bind(user_id)
    .fetch_optional(conn)
    .await?;
    Ok(row.is_some())
}
