//! Share records: tokenised public links, access audit, rate limiting

use crate::Result;
use chrono::{DateTime, Duration, Utc};
use sqlx::SqliteConnection;

/// Failed unlock attempts tolerated before blocking an identifier
pub const RATE_LIMIT_MAX_ATTEMPTS: i64 = 5;

/// Sliding window for counting failed attempts
pub const RATE_LIMIT_WINDOW_SECS: i64 = 15 * 60;

/// First block duration; doubles per further failure
pub const RATE_LIMIT_BASE_BLOCK_SECS: i64 = 60;

/// Longest block the back-off may reach
pub const RATE_LIMIT_MAX_BLOCK_SECS: i64 = 60 * 60;

/// A tokenised public share of one user file
#[derive(Clone, Debug, sqlx::FromRow)]
pub struct FileShare {
    pub id: i64,
    pub user_file_id: i64,
    pub share_token: String,
    /// File key sealed under the share password; NULL for passwordless
    pub encrypted_file_key: Option<Vec<u8>>,
    pub salt: Option<Vec<u8>>,
    pub iv: Option<Vec<u8>>,
    /// Opt-in display copy of the share password under the server key
    pub display_password_ct: Option<Vec<u8>>,
    pub display_password_iv: Option<Vec<u8>>,
    /// −1 means unlimited
    pub max_downloads: i64,
    pub download_count: i64,
    pub expires_at: Option<DateTime<Utc>>,
    /// JSON-encoded list; empty list means public
    pub allowed_emails: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl FileShare {
    /// Whether the share has a password wrap
    pub fn has_password(&self) -> bool {
        self.encrypted_file_key.is_some()
    }

    /// Whether the share is past its expiry
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.is_some_and(|at| at <= now)
    }

    /// Whether the download budget is spent
    pub fn is_exhausted(&self) -> bool {
        self.max_downloads >= 0 && self.download_count >= self.max_downloads
    }

    /// Decode the allowed-emails ACL; empty means public
    pub fn allowed_email_list(&self) -> Vec<String> {
        serde_json::from_str(&self.allowed_emails).unwrap_or_default()
    }
}

pub struct NewFileShare<'a> {
    pub user_file_id: i64,
    pub share_token: &'a str,
    pub encrypted_file_key: Option<&'a [u8]>,
    pub salt: Option<&'a [u8]>,
    pub iv: Option<&'a [u8]>,
    pub display_password_ct: Option<&'a [u8]>,
    pub display_password_iv: Option<&'a [u8]>,
    pub max_downloads: i64,
    pub expires_at: Option<DateTime<Utc>>,
    pub allowed_emails: &'a str,
}

pub async fn insert(conn: &mut SqliteConnection, new: &NewFileShare<'_>) -> Result<FileShare> {
    let now = Utc::now();
    let share = sqlx::query_as::<_, FileShare>(
        r#"
        INSERT INTO file_shares (user_file_id, share_token, encrypted_file_key, salt, iv,
                                 display_password_ct, display_password_iv,
                                 max_downloads, expires_at, allowed_emails,
                                 created_at, updated_at)
        VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
        RETURNING *
        "#,
    )
    .bind(new.user_file_id)
    .bind(new.share_token)
    .bind(new.encrypted_file_key)
    .bind(new.salt)
    .bind(new.iv)
    .bind(new.display_password_ct)
    .bind(new.display_password_iv)
    .bind(new.max_downloads)
    .bind(new.expires_at)
    .bind(new.allowed_emails)
    .bind(now)
    .bind(now)
    .fetch_one(conn)
    .await?;
    Ok(share)
}

pub async fn by_token(conn: &mut SqliteConnection, token: &str) -> Result<Option<FileShare>> {
    let share = sqlx::query_as::<_, FileShare>("SELECT * FROM file_shares WHERE share_token = ?")
        .bind(token)
        .fetch_optional(conn)
        .await?;
    Ok(share)
}

pub async fn by_id(conn: &mut SqliteConnection, id: i64) -> Result<Option<FileShare>> {
    let share = sqlx::query_as::<_, FileShare>("SELECT * FROM file_shares WHERE id = ?")
        .bind(id)
        .fetch_optional(conn)
        .await?;
    Ok(share)
}

pub async fn list_for_user(conn: &mut SqliteConnection, user_id: i64) -> Result<Vec<FileShare>> {
    let shares = sqlx::query_as::<_, FileShare>(
        r#"
        SELECT s.* FROM file_shares s
        JOIN user_files f ON f.id = s.user_file_id
        WHERE f.user_id = ?
        ORDER BY s.id
        "#,
    )
    .bind(user_id)
    .fetch_all(conn)
    .await?;
    Ok(shares)
}

pub async fn delete(conn: &mut SqliteConnection, id: i64) -> Result<()> {
    sqlx::query("DELETE FROM file_shares WHERE id = ?")
        .bind(id)
        .execute(conn)
        .await?;
    Ok(())
}

/// Claim one download. The conditional UPDATE is the sole authority for
/// the counter; zero rows updated means the budget is spent.
pub async fn try_claim_download(conn: &mut SqliteConnection, share_id: i64) -> Result<Option<i64>> {
    let row: Option<(i64,)> = sqlx::query_as(
        r#"
        UPDATE file_shares
        SET download_count = download_count + 1, updated_at = ?
        WHERE id = ? AND (max_downloads < 0 OR download_count < max_downloads)
        RETURNING download_count
        "#,
    )
    .bind(Utc::now())
    .bind(share_id)
    .fetch_optional(conn)
    .await?;
    Ok(row.map(|(count,)| count))
}

pub async fn log_access(
    conn: &mut SqliteConnection,
    share_id: i64,
    ip: &str,
    user_agent: Option<&str>,
    success: bool,
    failure_reason: Option<&str>,
) -> Result<()> {
    sqlx::query(
        r#"
        INSERT INTO share_access_log (share_id, ip, user_agent, attempted_at, success, failure_reason)
        VALUES (?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(share_id)
    .bind(ip)
    .bind(user_agent)
    .bind(Utc::now())
    .bind(success)
    .bind(failure_reason)
    .execute(conn)
    .await?;
    Ok(())
}

/// Record a successful access for the `/shared` listing.
/// NULL user ids compare distinct under SQLite UNIQUE, so the anonymous
/// row is maintained by hand instead of ON CONFLICT.
pub async fn record_shared_access(
    conn: &mut SqliteConnection,
    user_id: Option<i64>,
    share_id: i64,
) -> Result<()> {
    let now = Utc::now();
    match user_id {
        Some(uid) => {
            sqlx::query(
                r#"
                INSERT INTO shared_file_access (user_id, share_id, first_access_at, last_access_at)
                VALUES (?, ?, ?, ?)
                ON CONFLICT (user_id, share_id)
                DO UPDATE SET access_count = access_count + 1, last_access_at = excluded.last_access_at
                "#,
            )
            .bind(uid)
            .bind(share_id)
            .bind(now)
            .bind(now)
            .execute(conn)
            .await?;
        }
        None => {
            let updated = sqlx::query(
                r#"
                UPDATE shared_file_access
                SET access_count = access_count + 1, last_access_at = ?
                WHERE user_id IS NULL AND share_id = ?
                "#,
            )
            .bind(now)
            .bind(share_id)
            .execute(&mut *conn)
            .await?;
            if updated.rows_affected() == 0 {
                sqlx::query(
                    r#"
                    INSERT INTO shared_file_access (user_id, share_id, first_access_at, last_access_at)
                    VALUES (NULL, ?, ?, ?)
                    "#,
                )
                .bind(share_id)
                .bind(now)
                .bind(now)
                .execute(conn)
                .await?;
            }
        }
    }
    Ok(())
}

/// Shares a user has accessed, most recent first
#[derive(Clone, Debug, sqlx::FromRow)]
pub struct AccessedShare {
    pub share_id: i64,
    pub share_token: String,
    pub filename: String,
    pub access_count: i64,
    pub first_access_at: DateTime<Utc>,
    pub last_access_at: DateTime<Utc>,
}

pub async fn list_accessed_by_user(
    conn: &mut SqliteConnection,
    user_id: i64,
) -> Result<Vec<AccessedShare>> {
    let rows = sqlx::query_as::<_, AccessedShare>(
        r#"
        SELECT a.share_id, s.share_token, f.filename,
               a.access_count, a.first_access_at, a.last_access_at
        FROM shared_file_access a
        JOIN file_shares s ON s.id = a.share_id
        JOIN user_files f ON f.id = s.user_file_id
        WHERE a.user_id = ?
        ORDER BY a.last_access_at DESC
        "#,
    )
    .bind(user_id)
    .fetch_all(conn)
    .await?;
    Ok(rows)
}

/// Current rate-limit state of an identifier
#[derive(Clone, Debug, sqlx::FromRow)]
pub struct RateLimitState {
    pub identifier: String,
    pub attempt_count: i64,
    pub first_attempt_at: DateTime<Utc>,
    pub last_attempt_at: DateTime<Utc>,
    pub blocked_until: Option<DateTime<Utc>>,
}

pub async fn rate_limit_state(
    conn: &mut SqliteConnection,
    identifier: &str,
) -> Result<Option<RateLimitState>> {
    let state = sqlx::query_as::<_, RateLimitState>(
        "SELECT * FROM share_rate_limits WHERE identifier = ?",
    )
    .bind(identifier)
    .fetch_optional(conn)
    .await?;
    Ok(state)
}

/// Record one failed attempt and compute any block.
///
/// Returns the updated state. The sliding window restarts when the
/// previous first attempt is older than [`RATE_LIMIT_WINDOW_SECS`]; once
/// [`RATE_LIMIT_MAX_ATTEMPTS`] is reached each further failure doubles
/// the block, capped at [`RATE_LIMIT_MAX_BLOCK_SECS`].
pub async fn rate_limit_record_failure(
    conn: &mut SqliteConnection,
    identifier: &str,
) -> Result<RateLimitState> {
    let now = Utc::now();
    let window_start = now - Duration::seconds(RATE_LIMIT_WINDOW_SECS);

    // Counter loss under concurrency is prevented by the upsert; the
    // window reset rides along in the CASE.
    let state = sqlx::query_as::<_, RateLimitState>(
        r#"
        INSERT INTO share_rate_limits (identifier, attempt_count, first_attempt_at, last_attempt_at)
        VALUES (?, 1, ?, ?)
        ON CONFLICT (identifier) DO UPDATE SET
            attempt_count = CASE
                WHEN share_rate_limits.first_attempt_at < ? THEN 1
                ELSE share_rate_limits.attempt_count + 1
            END,
            first_attempt_at = CASE
                WHEN share_rate_limits.first_attempt_at < ? THEN excluded.first_attempt_at
                ELSE share_rate_limits.first_attempt_at
            END,
            last_attempt_at = excluded.last_attempt_at
        RETURNING *
        "#,
    )
    .bind(identifier)
    .bind(now)
    .bind(now)
    .bind(window_start)
    .bind(window_start)
    .fetch_one(&mut *conn)
    .await?;

    if state.attempt_count >= RATE_LIMIT_MAX_ATTEMPTS {
        let over = (state.attempt_count - RATE_LIMIT_MAX_ATTEMPTS).min(30) as u32;
        let block_secs =
            (RATE_LIMIT_BASE_BLOCK_SECS.saturating_mul(1i64 << over)).min(RATE_LIMIT_MAX_BLOCK_SECS);
        let blocked_until = now + Duration::seconds(block_secs);
        let state = sqlx::query_as::<_, RateLimitState>(
            "UPDATE share_rate_limits SET blocked_until = ? WHERE identifier = ? RETURNING *",
        )
        .bind(blocked_until)
        .bind(identifier)
        .fetch_one(conn)
        .await?;
        return Ok(state);
    }
    Ok(state)
}

/// Clear an identifier after a successful unlock
pub async fn rate_limit_reset(conn: &mut SqliteConnection, identifier: &str) -> Result<()> {
    sqlx::query("DELETE FROM share_rate_limits WHERE identifier = ?")
        .bind(identifier)
        .execute(conn)
        .await?;
    Ok(())
}
