//! Envelope-key rotation endpoints

use crate::auth::AuthUser;
use crate::{ApiError, AppState};
use aegis_core::RotationProgress;
use axum::{
    extract::{Extension, Path, State},
    Json,
};
use serde::Deserialize;
use std::sync::Arc;

#[derive(Debug, Deserialize)]
pub struct RotateRequest {
    pub old_password: String,
    pub new_password: String,
    /// Continue an interrupted rotation instead of starting a new one
    #[serde(default)]
    pub resume: bool,
}

/// POST /api/keys/rotate
pub async fn rotate(
    State(state): State<Arc<AppState>>,
    Extension(AuthUser(user)): Extension<AuthUser>,
    Json(req): Json<RotateRequest>,
) -> Result<Json<RotationProgress>, ApiError> {
    let progress = if req.resume {
        state
            .rotation
            .resume(user.id, &req.old_password, &req.new_password)
            .await?
    } else {
        state
            .rotation
            .rotate(user.id, &req.old_password, &req.new_password)
            .await?
    };
    Ok(Json(progress))
}

/// GET /api/keys/rotate/{rotation_id}
pub async fn status(
    State(state): State<Arc<AppState>>,
    Extension(AuthUser(user)): Extension<AuthUser>,
    Path(rotation_id): Path<String>,
) -> Result<Json<RotationProgress>, ApiError> {
    Ok(Json(state.rotation.status(user.id, &rotation_id).await?))
}

/// POST /api/keys/rotate/{rotation_id}/rollback
pub async fn rollback(
    State(state): State<Arc<AppState>>,
    Extension(AuthUser(user)): Extension<AuthUser>,
    Path(rotation_id): Path<String>,
) -> Result<Json<RotationProgress>, ApiError> {
    Ok(Json(state.rotation.rollback(user.id, &rotation_id).await?))
}
