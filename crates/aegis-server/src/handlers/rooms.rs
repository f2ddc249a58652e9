//! Room CRUD: direct sharing between authenticated users

use crate::auth::AuthUser;
use crate::{engine_failure, ApiError, AppState};
use aegis_core::store::{files, rooms};
use aegis_core::CoreError;
use axum::{
    extract::{Extension, Path, State},
    http::StatusCode,
    Json,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

#[derive(Debug, Serialize)]
pub struct RoomResponse {
    pub id: i64,
    pub name: String,
    pub creator_id: i64,
}

impl From<&rooms::Room> for RoomResponse {
    fn from(room: &rooms::Room) -> Self {
        Self {
            id: room.id,
            name: room.name.clone(),
            creator_id: room.creator_id,
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct CreateRoomRequest {
    pub name: String,
}

/// POST /api/rooms — creator becomes the room admin
pub async fn create(
    State(state): State<Arc<AppState>>,
    Extension(AuthUser(user)): Extension<AuthUser>,
    Json(req): Json<CreateRoomRequest>,
) -> Result<(StatusCode, Json<RoomResponse>), ApiError> {
    if req.name.trim().is_empty() {
        return Err(ApiError::Validation("room name must not be empty".into()));
    }
    let mut tx = state.meta.begin().await.map_err(ApiError::Core)?;
    let room = rooms::insert(&mut tx, req.name.trim(), user.id)
        .await
        .map_err(ApiError::Core)?;
    rooms::add_member(&mut tx, room.id, user.id, rooms::RoomRole::Admin)
        .await
        .map_err(ApiError::Core)?;
    tx.commit().await.map_err(engine_failure)?;
    Ok((StatusCode::CREATED, Json(RoomResponse::from(&room))))
}

/// GET /api/rooms — rooms the caller belongs to
pub async fn list(
    State(state): State<Arc<AppState>>,
    Extension(AuthUser(user)): Extension<AuthUser>,
) -> Result<Json<Vec<RoomResponse>>, ApiError> {
    let mut conn = state.meta.pool().acquire().await.map_err(engine_failure)?;
    let list = rooms::list_for_user(&mut conn, user.id)
        .await
        .map_err(ApiError::Core)?;
    Ok(Json(list.iter().map(RoomResponse::from).collect()))
}

#[derive(Debug, Deserialize)]
pub struct AddMemberRequest {
    pub user_id: i64,
    pub role: String,
}

/// POST /api/rooms/{id}/members — room admins only
pub async fn add_member(
    State(state): State<Arc<AppState>>,
    Extension(AuthUser(user)): Extension<AuthUser>,
    Path(room_id): Path<i64>,
    Json(req): Json<AddMemberRequest>,
) -> Result<StatusCode, ApiError> {
    let role = rooms::RoomRole::from_name(&req.role).map_err(ApiError::Core)?;
    let mut conn = state.meta.pool().acquire().await.map_err(engine_failure)?;
    rooms::by_id(&mut conn, room_id)
        .await
        .map_err(ApiError::Core)?
        .ok_or(ApiError::Core(CoreError::NotFound("room")))?;
    let caller_role = rooms::member_role(&mut conn, room_id, user.id)
        .await
        .map_err(ApiError::Core)?;
    if caller_role != Some(rooms::RoomRole::Admin) {
        return Err(ApiError::Permission);
    }
    rooms::add_member(&mut conn, room_id, req.user_id, role)
        .await
        .map_err(ApiError::Core)?;
    Ok(StatusCode::NO_CONTENT)
}

#[derive(Debug, Deserialize)]
pub struct AttachFileRequest {
    pub user_file_id: i64,
}

/// POST /api/rooms/{id}/files
///
/// The caller must own the file and hold a content role in the room.
pub async fn attach_file(
    State(state): State<Arc<AppState>>,
    Extension(AuthUser(user)): Extension<AuthUser>,
    Path(room_id): Path<i64>,
    Json(req): Json<AttachFileRequest>,
) -> Result<StatusCode, ApiError> {
    let mut conn = state.meta.pool().acquire().await.map_err(engine_failure)?;
    rooms::by_id(&mut conn, room_id)
        .await
        .map_err(ApiError::Core)?
        .ok_or(ApiError::Core(CoreError::NotFound("room")))?;
    let role = rooms::member_role(&mut conn, room_id, user.id)
        .await
        .map_err(ApiError::Core)?
        .ok_or(ApiError::Permission)?;
    if !role.can_add_content() {
        return Err(ApiError::Permission);
    }
    let file = files::live_by_id(&mut conn, req.user_file_id)
        .await
        .map_err(ApiError::Core)?
        .ok_or(ApiError::Core(CoreError::NotFound("file")))?;
    if file.user_id != user.id {
        return Err(ApiError::Permission);
    }
    rooms::add_file(&mut conn, room_id, req.user_file_id)
        .await
        .map_err(ApiError::Core)?;
    Ok(StatusCode::NO_CONTENT)
}
