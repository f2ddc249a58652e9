//! Authorisation checks shared by the engines
//!
//! A file is reachable by its owner or by any member of a room the file
//! was attached to. Share-grant access is a separate path gated entirely
//! by the share engine.

use crate::store::{files, rooms};
use crate::{CoreError, Result};
use sqlx::SqliteConnection;

/// Allow the owner or a room member through; everyone else is rejected
pub async fn check_file_access(
    conn: &mut SqliteConnection,
    user_id: i64,
    file: &files::UserFile,
) -> Result<()> {
    if file.user_id == user_id {
        return Ok(());
    }
    if rooms::user_can_reach_file(conn, user_id, file.id).await? {
        return Ok(());
    }
    Err(CoreError::Permission("no access to this file".into()))
}
