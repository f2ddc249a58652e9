//! File upload, listing, download and trash lifecycle
//!
//! Uploads arrive as multipart forms carrying client-produced ciphertext
//! plus the wrapped file key. Downloads return ciphertext with the
//! wrapped key in headers; decryption is the client's job.

use crate::auth::AuthUser;
use crate::{ApiError, AppState};
use aegis_core::store::files::UserFile;
use aegis_core::IngestRequest;
use axum::{
    body::Body,
    extract::{Extension, Multipart, Path, Query, State},
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use base64::{engine::general_purpose::STANDARD, Engine};
use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

#[derive(Debug, Serialize)]
pub struct FileResponse {
    pub id: i64,
    pub filename: String,
    pub mime_type: String,
    pub folder_id: Option<i64>,
    pub is_shared: bool,
    pub share_count: i64,
    pub is_starred: bool,
    pub key_version: i64,
    pub wrapped_file_key: String,
    pub file_key_iv: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub deleted_at: Option<DateTime<Utc>>,
}

impl From<&UserFile> for FileResponse {
    fn from(file: &UserFile) -> Self {
        Self {
            id: file.id,
            filename: file.filename.clone(),
            mime_type: file.mime_type.clone(),
            folder_id: file.folder_id,
            is_shared: file.is_shared,
            share_count: file.share_count,
            is_starred: file.is_starred,
            key_version: file.key_version,
            wrapped_file_key: STANDARD.encode(&file.wrapped_file_key),
            file_key_iv: STANDARD.encode(&file.file_key_iv),
            created_at: file.created_at,
            updated_at: file.updated_at,
            deleted_at: file.deleted_at,
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct ListQuery {
    pub folder_id: Option<i64>,
}

/// GET /api/files
pub async fn list(
    State(state): State<Arc<AppState>>,
    Extension(AuthUser(user)): Extension<AuthUser>,
    Query(query): Query<ListQuery>,
) -> Result<Json<Vec<FileResponse>>, ApiError> {
    let files = state.files.list(user.id, query.folder_id).await?;
    Ok(Json(files.iter().map(FileResponse::from).collect()))
}

/// GET /api/files/trash
pub async fn list_trash(
    State(state): State<Arc<AppState>>,
    Extension(AuthUser(user)): Extension<AuthUser>,
) -> Result<Json<Vec<FileResponse>>, ApiError> {
    let files = state.files.list_trash(user.id).await?;
    Ok(Json(files.iter().map(FileResponse::from).collect()))
}

/// POST /api/files — multipart upload
///
/// Fields: `file` (ciphertext bytes), `wrapped_file_key` (base64),
/// `file_key_iv` (base64); optional `filename`, `mime_type`, `folder_id`.
pub async fn upload(
    State(state): State<Arc<AppState>>,
    Extension(AuthUser(user)): Extension<AuthUser>,
    mut multipart: Multipart,
) -> Result<(StatusCode, Json<FileResponse>), ApiError> {
    let mut ciphertext: Option<Bytes> = None;
    let mut filename: Option<String> = None;
    let mut mime_type: Option<String> = None;
    let mut wrapped_file_key: Option<Vec<u8>> = None;
    let mut file_key_iv: Option<Vec<u8>> = None;
    let mut folder_id: Option<i64> = None;

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| ApiError::Validation(format!("malformed multipart body: {e}")))?
    {
        match field.name().unwrap_or_default() {
            "file" => {
                if filename.is_none() {
                    filename = field.file_name().map(|s| s.to_string());
                }
                if mime_type.is_none() {
                    mime_type = field.content_type().map(|s| s.to_string());
                }
                ciphertext = Some(
                    field
                        .bytes()
                        .await
                        .map_err(|e| ApiError::Validation(format!("upload read failed: {e}")))?,
                );
            }
            "filename" => filename = Some(read_text(field).await?),
            "mime_type" => mime_type = Some(read_text(field).await?),
            "wrapped_file_key" => wrapped_file_key = Some(read_base64(field).await?),
            "file_key_iv" => file_key_iv = Some(read_base64(field).await?),
            "folder_id" => {
                let text = read_text(field).await?;
                folder_id = Some(
                    text.parse()
                        .map_err(|_| ApiError::Validation("folder_id must be an integer".into()))?,
                );
            }
            other => {
                tracing::debug!(field = other, "ignoring unknown upload field");
            }
        }
    }

    let ciphertext = ciphertext.ok_or_else(|| ApiError::Validation("missing file field".into()))?;
    let wrapped_file_key =
        wrapped_file_key.ok_or_else(|| ApiError::Validation("missing wrapped_file_key".into()))?;
    let file_key_iv =
        file_key_iv.ok_or_else(|| ApiError::Validation("missing file_key_iv".into()))?;
    let filename = filename.ok_or_else(|| ApiError::Validation("missing filename".into()))?;

    let file = state
        .files
        .ingest(
            user.id,
            IngestRequest {
                filename,
                mime_type: mime_type.unwrap_or_else(|| "application/octet-stream".to_string()),
                folder_id,
                ciphertext,
                wrapped_file_key,
                file_key_iv,
            },
        )
        .await?;

    Ok((StatusCode::CREATED, Json(FileResponse::from(&file))))
}

async fn read_text(field: axum::extract::multipart::Field<'_>) -> Result<String, ApiError> {
    field
        .text()
        .await
        .map_err(|e| ApiError::Validation(format!("bad multipart field: {e}")))
}

async fn read_base64(field: axum::extract::multipart::Field<'_>) -> Result<Vec<u8>, ApiError> {
    let text = read_text(field).await?;
    STANDARD
        .decode(text.trim())
        .map_err(|_| ApiError::Validation("field is not valid base64".into()))
}

/// GET /api/files/{id}/download
///
/// Streams ciphertext; the wrapped file key rides in response headers so
/// the client can unwrap and decrypt locally.
pub async fn download(
    State(state): State<Arc<AppState>>,
    Extension(AuthUser(user)): Extension<AuthUser>,
    Path(file_id): Path<i64>,
) -> Result<Response, ApiError> {
    let download = state.files.download(user.id, file_id).await?;

    let disposition = format!(
        "attachment; filename=\"{}\"",
        download.filename.replace(['"', '\\'], "_")
    );
    Ok((
        StatusCode::OK,
        [
            (header::CONTENT_TYPE.as_str(), "application/octet-stream".to_string()),
            (header::CONTENT_DISPOSITION.as_str(), disposition),
            (header::CONTENT_LENGTH.as_str(), download.data.len().to_string()),
            ("x-wrapped-file-key", STANDARD.encode(&download.wrapped_file_key)),
            ("x-file-key-iv", STANDARD.encode(&download.file_key_iv)),
            ("x-mime-type", download.mime_type.clone()),
        ],
        Body::from(download.data),
    )
        .into_response())
}

#[derive(Debug, Deserialize)]
pub struct UpdateFileRequest {
    pub filename: Option<String>,
    pub starred: Option<bool>,
    pub folder_id: Option<i64>,
    /// Move back to the root folder
    #[serde(default)]
    pub clear_folder: bool,
}

/// PATCH /api/files/{id}
pub async fn update(
    State(state): State<Arc<AppState>>,
    Extension(AuthUser(user)): Extension<AuthUser>,
    Path(file_id): Path<i64>,
    Json(req): Json<UpdateFileRequest>,
) -> Result<StatusCode, ApiError> {
    if let Some(filename) = &req.filename {
        state.files.rename(user.id, file_id, filename).await?;
    }
    if let Some(starred) = req.starred {
        state.files.set_starred(user.id, file_id, starred).await?;
    }
    if req.clear_folder {
        state.files.move_to_folder(user.id, file_id, None).await?;
    } else if let Some(folder_id) = req.folder_id {
        state
            .files
            .move_to_folder(user.id, file_id, Some(folder_id))
            .await?;
    }
    Ok(StatusCode::NO_CONTENT)
}

/// DELETE /api/files/{id} — move to trash
pub async fn trash(
    State(state): State<Arc<AppState>>,
    Extension(AuthUser(user)): Extension<AuthUser>,
    Path(file_id): Path<i64>,
) -> Result<StatusCode, ApiError> {
    state.files.soft_delete(user.id, file_id).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// POST /api/files/{id}/restore
pub async fn restore(
    State(state): State<Arc<AppState>>,
    Extension(AuthUser(user)): Extension<AuthUser>,
    Path(file_id): Path<i64>,
) -> Result<StatusCode, ApiError> {
    state.files.restore(user.id, file_id).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// DELETE /api/files/{id}/purge — permanent removal
pub async fn purge(
    State(state): State<Arc<AppState>>,
    Extension(AuthUser(user)): Extension<AuthUser>,
    Path(file_id): Path<i64>,
) -> Result<StatusCode, ApiError> {
    state.files.purge(user.id, file_id).await?;
    Ok(StatusCode::NO_CONTENT)
}
