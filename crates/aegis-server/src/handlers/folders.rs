//! Folder CRUD

use crate::auth::AuthUser;
use crate::{engine_failure, ApiError, AppState};
use aegis_core::store::folders;
use aegis_core::CoreError;
use axum::{
    extract::{Extension, Path, State},
    http::StatusCode,
    Json,
};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

#[derive(Debug, Serialize)]
pub struct FolderResponse {
    pub id: i64,
    pub name: String,
    pub parent_id: Option<i64>,
}

impl From<&folders::Folder> for FolderResponse {
    fn from(folder: &folders::Folder) -> Self {
        Self {
            id: folder.id,
            name: folder.name.clone(),
            parent_id: folder.parent_id,
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct CreateFolderRequest {
    pub name: String,
    pub parent_id: Option<i64>,
}

/// POST /api/folders
pub async fn create(
    State(state): State<Arc<AppState>>,
    Extension(AuthUser(user)): Extension<AuthUser>,
    Json(req): Json<CreateFolderRequest>,
) -> Result<(StatusCode, Json<FolderResponse>), ApiError> {
    if req.name.trim().is_empty() {
        return Err(ApiError::Validation("folder name must not be empty".into()));
    }
    let mut conn = state.meta.pool().acquire().await.map_err(engine_failure)?;
    if let Some(parent) = req.parent_id {
        folders::check_attachment(&mut conn, user.id, None, parent)
            .await
            .map_err(ApiError::Core)?;
    }
    let folder = folders::insert(&mut conn, user.id, req.name.trim(), req.parent_id)
        .await
        .map_err(ApiError::Core)?;
    Ok((StatusCode::CREATED, Json(FolderResponse::from(&folder))))
}

/// GET /api/folders
pub async fn list(
    State(state): State<Arc<AppState>>,
    Extension(AuthUser(user)): Extension<AuthUser>,
) -> Result<Json<Vec<FolderResponse>>, ApiError> {
    let mut conn = state.meta.pool().acquire().await.map_err(engine_failure)?;
    let list = folders::list_for_user(&mut conn, user.id)
        .await
        .map_err(ApiError::Core)?;
    Ok(Json(list.iter().map(FolderResponse::from).collect()))
}

#[derive(Debug, Deserialize)]
pub struct MoveFolderRequest {
    pub parent_id: Option<i64>,
}

/// PATCH /api/folders/{id} — re-parent, guarding against cycles
pub async fn update(
    State(state): State<Arc<AppState>>,
    Extension(AuthUser(user)): Extension<AuthUser>,
    Path(folder_id): Path<i64>,
    Json(req): Json<MoveFolderRequest>,
) -> Result<StatusCode, ApiError> {
    let mut conn = state.meta.pool().acquire().await.map_err(engine_failure)?;
    let folder = folders::by_id(&mut conn, folder_id)
        .await
        .map_err(ApiError::Core)?
        .ok_or(ApiError::Core(CoreError::NotFound("folder")))?;
    if folder.user_id != user.id {
        return Err(ApiError::Permission);
    }
    if let Some(parent) = req.parent_id {
        folders::check_attachment(&mut conn, user.id, Some(folder_id), parent)
            .await
            .map_err(ApiError::Core)?;
    }
    folders::set_parent(&mut conn, folder_id, req.parent_id)
        .await
        .map_err(ApiError::Core)?;
    Ok(StatusCode::NO_CONTENT)
}

/// DELETE /api/folders/{id} — soft delete
pub async fn trash(
    State(state): State<Arc<AppState>>,
    Extension(AuthUser(user)): Extension<AuthUser>,
    Path(folder_id): Path<i64>,
) -> Result<StatusCode, ApiError> {
    let mut conn = state.meta.pool().acquire().await.map_err(engine_failure)?;
    let folder = folders::by_id(&mut conn, folder_id)
        .await
        .map_err(ApiError::Core)?
        .ok_or(ApiError::Core(CoreError::NotFound("folder")))?;
    if folder.user_id != user.id {
        return Err(ApiError::Permission);
    }
    folders::set_deleted(&mut conn, folder_id, Some(Utc::now()))
        .await
        .map_err(ApiError::Core)?;
    Ok(StatusCode::NO_CONTENT)
}
