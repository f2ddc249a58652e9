//! Account registration and login
//!
//! Registration mints the user's envelope key server-side and stores it
//! wrapped under a KDF of the password; the plaintext envelope key is
//! discarded immediately. Login hands the wrapped envelope back so the
//! client can unwrap locally.

use crate::auth::issue_token;
use crate::engine_failure;
use crate::{ApiError, AppState};
use aegis_core::engine::files::is_unique_violation;
use aegis_core::store::users;
use aegis_core::CoreError;
use aegis_crypto::{derive_key, envelope, generate_salt, hash_password, verify_password, EnvelopeKey};
use axum::{extract::State, Json};
use base64::{engine::general_purpose::STANDARD, Engine};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

#[derive(Debug, Deserialize)]
pub struct RegisterRequest {
    pub username: String,
    pub email: String,
    pub password: String,
}

#[derive(Debug, Serialize)]
pub struct AccountResponse {
    pub id: i64,
    pub username: String,
    pub email: String,
    pub storage_quota: i64,
    pub used_storage: i64,
    pub is_admin: bool,
}

impl From<&users::User> for AccountResponse {
    fn from(user: &users::User) -> Self {
        Self {
            id: user.id,
            username: user.username.clone(),
            email: user.email.clone(),
            storage_quota: user.storage_quota,
            used_storage: user.used_storage,
            is_admin: user.is_admin,
        }
    }
}

/// Envelope material the client needs for local unwrapping
#[derive(Debug, Serialize)]
pub struct EnvelopeDescriptor {
    pub wrapped: String,
    pub salt: String,
    pub iv: String,
    pub version: i64,
    pub kdf_iterations: u32,
    pub cipher: &'static str,
}

#[derive(Debug, Serialize)]
pub struct LoginResponse {
    pub token: String,
    pub user: AccountResponse,
    pub envelope: EnvelopeDescriptor,
}

/// POST /api/auth/register
pub async fn register(
    State(state): State<Arc<AppState>>,
    Json(req): Json<RegisterRequest>,
) -> Result<Json<AccountResponse>, ApiError> {
    if req.username.trim().is_empty() {
        return Err(ApiError::Validation("username must not be empty".into()));
    }
    if !req.email.contains('@') {
        return Err(ApiError::Validation("email looks invalid".into()));
    }
    if req.password.len() < 8 {
        return Err(ApiError::Validation(
            "password must be at least 8 characters".into(),
        ));
    }

    // KDF work happens off the reactor
    let iterations = state.config.pbkdf2_iterations;
    let password = req.password.clone();
    let (password_hash, salt, wrapped) = tokio::task::spawn_blocking(move || {
        let password_hash = hash_password(&password, iterations);
        let salt = generate_salt();
        let outer = derive_key(&password, &salt, iterations);
        let envelope_key = EnvelopeKey::generate();
        let wrapped = envelope::wrap_key(envelope_key.as_bytes(), &outer)?;
        Ok::<_, aegis_crypto::CryptoError>((password_hash, salt, wrapped))
    })
    .await
    .map_err(|e| ApiError::Core(CoreError::Internal(e.to_string())))?
    .map_err(|e| ApiError::Core(e.into()))?;

    let mut conn = state.meta.pool().acquire().await.map_err(engine_failure)?;
    let user = users::insert(
        &mut conn,
        &users::NewUser {
            username: req.username.trim().to_string(),
            email: req.email.trim().to_lowercase(),
            password_hash,
            storage_quota: state.config.default_storage_quota,
            is_admin: false,
            envelope_key_wrapped: wrapped.ciphertext,
            envelope_key_salt: salt.to_vec(),
            envelope_key_iv: wrapped.iv.to_vec(),
        },
    )
    .await
    .map_err(|err| match err {
        CoreError::Database(db) if is_unique_violation(&db) => {
            ApiError::Core(CoreError::Conflict("username or email already taken".into()))
        }
        other => ApiError::Core(other),
    })?;

    tracing::info!(user_id = user.id, "account registered");
    Ok(Json(AccountResponse::from(&user)))
}

#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
}

/// POST /api/auth/login
pub async fn login(
    State(state): State<Arc<AppState>>,
    Json(req): Json<LoginRequest>,
) -> Result<Json<LoginResponse>, ApiError> {
    let mut conn = state.meta.pool().acquire().await.map_err(engine_failure)?;
    let user = users::by_email(&mut conn, &req.email.trim().to_lowercase())
        .await
        .map_err(ApiError::Core)?
        .ok_or(ApiError::Authentication)?;
    drop(conn);

    let stored_hash = user.password_hash.clone();
    let password = req.password.clone();
    let valid = tokio::task::spawn_blocking(move || verify_password(&password, &stored_hash))
        .await
        .map_err(|e| ApiError::Core(CoreError::Internal(e.to_string())))?
        .map_err(|e| ApiError::Core(e.into()))?;
    if !valid {
        return Err(ApiError::Authentication);
    }

    let token = issue_token(&user, &state.config.jwt_secret, state.config.token_ttl_hours)?;
    Ok(Json(LoginResponse {
        token,
        user: AccountResponse::from(&user),
        envelope: EnvelopeDescriptor {
            wrapped: STANDARD.encode(&user.envelope_key_wrapped),
            salt: STANDARD.encode(&user.envelope_key_salt),
            iv: STANDARD.encode(&user.envelope_key_iv),
            version: user.envelope_key_version,
            kdf_iterations: state.config.pbkdf2_iterations,
            cipher: state.config.file_cipher.name(),
        },
    }))
}
