//! User records and queries

use crate::Result;
use chrono::{DateTime, Utc};
use sqlx::SqliteConnection;

/// A vault account
#[derive(Clone, Debug, sqlx::FromRow)]
pub struct User {
    pub id: i64,
    pub username: String,
    pub email: String,
    pub password_hash: String,
    pub storage_quota: i64,
    pub used_storage: i64,
    pub is_admin: bool,
    pub envelope_key_wrapped: Vec<u8>,
    pub envelope_key_salt: Vec<u8>,
    pub envelope_key_iv: Vec<u8>,
    pub envelope_key_version: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub deleted_at: Option<DateTime<Utc>>,
}

/// Fields required to create an account
pub struct NewUser {
    pub username: String,
    pub email: String,
    pub password_hash: String,
    pub storage_quota: i64,
    pub is_admin: bool,
    pub envelope_key_wrapped: Vec<u8>,
    pub envelope_key_salt: Vec<u8>,
    pub envelope_key_iv: Vec<u8>,
}

pub async fn insert(conn: &mut SqliteConnection, new: &NewUser) -> Result<User> {
    let now = Utc::now();
    let user = sqlx::query_as::<_, User>(
        r#"
        INSERT INTO users (username, email, password_hash, storage_quota, is_admin,
                           envelope_key_wrapped, envelope_key_salt, envelope_key_iv,
                           created_at, updated_at)
        VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
        RETURNING *
        "#,
    )
    .bind(&new.username)
    .bind(&new.email)
    .bind(&new.password_hash)
    .bind(new.storage_quota)
    .bind(new.is_admin)
    .bind(&new.envelope_key_wrapped)
    .bind(&new.envelope_key_salt)
    .bind(&new.envelope_key_iv)
    .bind(now)
    .bind(now)
    .fetch_one(conn)
    .await?;
    Ok(user)
}

pub async fn by_id(conn: &mut SqliteConnection, id: i64) -> Result<Option<User>> {
    let user =
        sqlx::query_as::<_, User>("SELECT * FROM users WHERE id = ? AND deleted_at IS NULL")
            .bind(id)
            .fetch_optional(conn)
            .await?;
    Ok(user)
}

pub async fn by_email(conn: &mut SqliteConnection, email: &str) -> Result<Option<User>> {
    let user =
        sqlx::query_as::<_, User>("SELECT * FROM users WHERE email = ? AND deleted_at IS NULL")
            .bind(email)
            .fetch_optional(conn)
            .await?;
    Ok(user)
}

pub async fn by_username(conn: &mut SqliteConnection, username: &str) -> Result<Option<User>> {
    let user = sqlx::query_as::<_, User>(
        "SELECT * FROM users WHERE username = ? AND deleted_at IS NULL",
    )
    .bind(username)
    .fetch_optional(conn)
    .await?;
    Ok(user)
}

pub async fn list_all(conn: &mut SqliteConnection) -> Result<Vec<User>> {
    let users =
        sqlx::query_as::<_, User>("SELECT * FROM users WHERE deleted_at IS NULL ORDER BY id")
            .fetch_all(conn)
            .await?;
    Ok(users)
}

/// Adjust `used_storage` by a signed delta
pub async fn adjust_used_storage(
    conn: &mut SqliteConnection,
    user_id: i64,
    delta: i64,
) -> Result<()> {
    sqlx::query("UPDATE users SET used_storage = used_storage + ?, updated_at = ? WHERE id = ?")
        .bind(delta)
        .bind(Utc::now())
        .bind(user_id)
        .execute(conn)
        .await?;
    Ok(())
}

/// Install a new envelope wrapping after a completed rotation
pub async fn update_envelope(
    conn: &mut SqliteConnection,
    user_id: i64,
    wrapped: &[u8],
    salt: &[u8],
    iv: &[u8],
    version: i64,
    password_hash: &str,
) -> Result<()> {
    sqlx::query(
        r#"
        UPDATE users
        SET envelope_key_wrapped = ?, envelope_key_salt = ?, envelope_key_iv = ?,
            envelope_key_version = ?, password_hash = ?, updated_at = ?
        WHERE id = ?
        "#,
    )
    .bind(wrapped)
    .bind(salt)
    .bind(iv)
    .bind(version)
    .bind(password_hash)
    .bind(Utc::now())
    .bind(user_id)
    .execute(conn)
    .await?;
    Ok(())
}
