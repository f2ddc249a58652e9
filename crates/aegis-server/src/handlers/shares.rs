//! Share endpoints: owner-side management plus the public token surface
//!
//! The public endpoints bypass the auth gate; identity, when present, is
//! resolved opportunistically so email-restricted shares can admit
//! logged-in callers. All gating decisions live in the share engine.

use crate::auth::{extract_bearer_token, validate_token, AuthUser};
use crate::middleware::client_ip;
use crate::{ApiError, AppState};
use aegis_core::store::{shares as share_store, users};
use aegis_core::{AccessContext, CreateShareRequest, ShareCredential};
use axum::{
    body::Body,
    extract::{Extension, Path, Query, State},
    http::{header, HeaderMap, Request, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::Arc;

#[derive(Debug, Deserialize)]
pub struct CreateShareBody {
    pub user_file_id: i64,
    /// Owner's account password; needed to unwrap the file key once
    pub account_password: String,
    pub share_password: Option<String>,
    pub expires_at: Option<DateTime<Utc>>,
    #[serde(default = "default_max_downloads")]
    pub max_downloads: i64,
    #[serde(default)]
    pub allowed_emails: Vec<String>,
    #[serde(default)]
    pub store_display_password: bool,
}

fn default_max_downloads() -> i64 {
    -1
}

#[derive(Debug, Serialize)]
pub struct ShareResponse {
    pub id: i64,
    pub token: String,
    pub url: String,
    pub has_password: bool,
    pub max_downloads: i64,
    pub download_count: i64,
    pub expires_at: Option<DateTime<Utc>>,
    pub allowed_emails: Vec<String>,
}

impl ShareResponse {
    fn from_share(share: &share_store::FileShare, base_url: &str) -> Self {
        Self {
            id: share.id,
            token: share.share_token.clone(),
            url: format!("{}/share/{}", base_url.trim_end_matches('/'), share.share_token),
            has_password: share.has_password(),
            max_downloads: share.max_downloads,
            download_count: share.download_count,
            expires_at: share.expires_at,
            allowed_emails: share.allowed_email_list(),
        }
    }
}

/// POST /api/shares
pub async fn create(
    State(state): State<Arc<AppState>>,
    Extension(AuthUser(user)): Extension<AuthUser>,
    Json(body): Json<CreateShareBody>,
) -> Result<(StatusCode, Json<ShareResponse>), ApiError> {
    let share = state
        .shares
        .create_share(
            user.id,
            CreateShareRequest {
                user_file_id: body.user_file_id,
                account_password: body.account_password,
                share_password: body.share_password,
                expires_at: body.expires_at,
                max_downloads: body.max_downloads,
                allowed_emails: body.allowed_emails,
                store_display_password: body.store_display_password,
            },
        )
        .await?;
    Ok((
        StatusCode::CREATED,
        Json(ShareResponse::from_share(&share, &state.config.base_url)),
    ))
}

/// GET /api/shares — the owner's shares
pub async fn list_own(
    State(state): State<Arc<AppState>>,
    Extension(AuthUser(user)): Extension<AuthUser>,
) -> Result<Json<Vec<ShareResponse>>, ApiError> {
    let shares = state.shares.list_for_owner(user.id).await?;
    Ok(Json(
        shares
            .iter()
            .map(|s| ShareResponse::from_share(s, &state.config.base_url))
            .collect(),
    ))
}

/// GET /api/shares/{id}/password — reveal the stored display password
pub async fn reveal_password(
    State(state): State<Arc<AppState>>,
    Extension(AuthUser(user)): Extension<AuthUser>,
    Path(share_id): Path<i64>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let password = state.shares.reveal_display_password(user.id, share_id).await?;
    Ok(Json(json!({ "password": password })))
}

/// DELETE /api/shares/{id}
pub async fn revoke(
    State(state): State<Arc<AppState>>,
    Extension(AuthUser(user)): Extension<AuthUser>,
    Path(share_id): Path<i64>,
) -> Result<StatusCode, ApiError> {
    state.shares.revoke(user.id, share_id).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// GET /shared — shares the caller has accessed
pub async fn list_accessed(
    State(state): State<Arc<AppState>>,
    Extension(AuthUser(user)): Extension<AuthUser>,
) -> Result<Json<Vec<serde_json::Value>>, ApiError> {
    let accessed = state.shares.list_accessed(user.id).await?;
    Ok(Json(
        accessed
            .iter()
            .map(|a| {
                json!({
                    "share_id": a.share_id,
                    "token": a.share_token,
                    "filename": a.filename,
                    "access_count": a.access_count,
                    "first_access_at": a.first_access_at,
                    "last_access_at": a.last_access_at,
                })
            })
            .collect(),
    ))
}

// ---- public token surface ----------------------------------------------

/// GET /share/{token} — public metadata, no key material
pub async fn metadata(
    State(state): State<Arc<AppState>>,
    Path(token): Path<String>,
) -> Result<Json<aegis_core::PublicShareInfo>, ApiError> {
    Ok(Json(state.shares.metadata(&token).await?))
}

#[derive(Debug, Deserialize)]
pub struct AccessBody {
    pub password: String,
}

/// POST /share/{token}/access — validate the password, claim a download,
/// and return a one-shot download URL
pub async fn access(
    State(state): State<Arc<AppState>>,
    Path(token): Path<String>,
    request: Request<Body>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let ip = client_ip(&request);
    let headers = request.headers().clone();
    let ctx = build_context_from_headers(&state, ip, &headers).await;
    let body = axum::body::to_bytes(request.into_body(), 64 * 1024)
        .await
        .map_err(|_| ApiError::Validation("unreadable request body".into()))?;
    let body: AccessBody = serde_json::from_slice(&body)
        .map_err(|_| ApiError::Validation("expected {\"password\": ...}".into()))?;

    let grant = state.shares.access(&token, &body.password, &ctx).await?;
    let download_url = format!(
        "{}/share/{}/download?grant={}",
        state.config.base_url.trim_end_matches('/'),
        token,
        grant.grant_token
    );
    Ok(Json(json!({
        "download_url": download_url,
        "download_count": grant.download_count,
    })))
}

#[derive(Debug, Deserialize)]
pub struct DownloadQuery {
    pub password: Option<String>,
    pub key: Option<String>,
    pub grant: Option<String>,
}

/// GET /share/{token}/download — streams decrypted bytes
pub async fn download(
    State(state): State<Arc<AppState>>,
    Path(token): Path<String>,
    Query(query): Query<DownloadQuery>,
    request: Request<Body>,
) -> Result<Response, ApiError> {
    let ip = client_ip(&request);
    let headers = request.headers().clone();
    let ctx = build_context_from_headers(&state, ip, &headers).await;

    let credential = if let Some(grant) = query.grant {
        ShareCredential::Grant(grant)
    } else if let Some(password) = query.password {
        ShareCredential::Password(password)
    } else if let Some(key) = query.key {
        ShareCredential::RawKey(key)
    } else {
        return Err(ApiError::Validation(
            "provide password=, key= or grant=".into(),
        ));
    };

    let download = state.shares.download(&token, credential, &ctx).await?;
    let disposition = format!(
        "attachment; filename=\"{}\"",
        download.filename.replace(['"', '\\'], "_")
    );
    Ok((
        StatusCode::OK,
        [
            (header::CONTENT_TYPE.as_str(), download.mime_type.clone()),
            (header::CONTENT_DISPOSITION.as_str(), disposition),
            (header::CONTENT_LENGTH.as_str(), download.plaintext.len().to_string()),
        ],
        Body::from(download.plaintext),
    )
        .into_response())
}

/// Resolve the caller's network address and, when a valid bearer token
/// is attached, their identity
async fn build_context_from_headers(
    state: &Arc<AppState>,
    ip: String,
    headers: &HeaderMap,
) -> AccessContext {
    let user_agent = headers
        .get(header::USER_AGENT)
        .and_then(|v| v.to_str().ok())
        .map(|s| s.to_string());
    let (user_id, email) = optional_identity(state, headers).await;
    AccessContext {
        ip,
        user_agent,
        user_id,
        email,
    }
}

async fn optional_identity(
    state: &Arc<AppState>,
    headers: &HeaderMap,
) -> (Option<i64>, Option<String>) {
    let Some(token) = headers
        .get(header::AUTHORIZATION)
        .and_then(|h| h.to_str().ok())
        .and_then(extract_bearer_token)
    else {
        return (None, None);
    };
    let Ok(claims) = validate_token(token, &state.config.jwt_secret) else {
        return (None, None);
    };
    let Ok(mut conn) = state.meta.pool().acquire().await else {
        return (None, None);
    };
    match users::by_id(&mut conn, claims.sub).await {
        Ok(Some(user)) => (Some(user.id), Some(user.email)),
        _ => (None, None),
    }
}
