//! Admin-only operations

use crate::auth::AuthUser;
use crate::handlers::auth::AccountResponse;
use crate::{engine_failure, ApiError, AppState};
use aegis_core::store::users;
use axum::{
    extract::{Extension, State},
    Json,
};
use std::sync::Arc;

/// GET /api/admin/users
pub async fn list_users(
    State(state): State<Arc<AppState>>,
    Extension(AuthUser(user)): Extension<AuthUser>,
) -> Result<Json<Vec<AccountResponse>>, ApiError> {
    if !user.is_admin {
        return Err(ApiError::Permission);
    }
    let mut conn = state.meta.pool().acquire().await.map_err(engine_failure)?;
    let list = users::list_all(&mut conn).await.map_err(ApiError::Core)?;
    Ok(Json(list.iter().map(AccountResponse::from).collect()))
}

/// POST /api/admin/gc — sweep orphaned blobs out of the object store
pub async fn collect_garbage(
    State(state): State<Arc<AppState>>,
    Extension(AuthUser(user)): Extension<AuthUser>,
) -> Result<Json<serde_json::Value>, ApiError> {
    if !user.is_admin {
        return Err(ApiError::Permission);
    }
    let collected = state.files.sweep_orphan_blobs().await?;
    Ok(Json(serde_json::json!({ "collected": collected })))
}
