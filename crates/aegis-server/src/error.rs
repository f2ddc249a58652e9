//! API error envelope
//!
//! Every failure leaves the server as `{code, message, timestamp,
//! details?}` with the status mapped from the core taxonomy. Internal
//! detail (driver messages, crypto errors) never reaches the client.

use aegis_core::CoreError;
use axum::{
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use chrono::Utc;
use serde_json::json;
use thiserror::Error;

/// Error leaving the HTTP layer
#[derive(Error, Debug)]
pub enum ApiError {
    #[error(transparent)]
    Core(#[from] CoreError),

    /// Request malformed before it reached an engine
    #[error("validation failed: {0}")]
    Validation(String),

    /// Missing or invalid session token
    #[error("authentication required")]
    Authentication,

    /// Authenticated but not allowed here
    #[error("permission denied")]
    Permission,
}

impl ApiError {
    fn code(&self) -> &'static str {
        match self {
            Self::Core(err) => err.code(),
            Self::Validation(_) => "validation",
            Self::Authentication => "authentication",
            Self::Permission => "permission",
        }
    }

    fn status(&self) -> StatusCode {
        match self.code() {
            "validation" => StatusCode::BAD_REQUEST,
            "authentication" => StatusCode::UNAUTHORIZED,
            "permission" => StatusCode::FORBIDDEN,
            "not_found" => StatusCode::NOT_FOUND,
            "conflict" => StatusCode::CONFLICT,
            "rate_limited" => StatusCode::TOO_MANY_REQUESTS,
            "exhausted" => StatusCode::GONE,
            "quota_exceeded" => StatusCode::INSUFFICIENT_STORAGE,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Client-facing message; 5xx classes collapse to a fixed string
    fn message(&self) -> String {
        match self {
            Self::Core(err) => match err {
                CoreError::Crypto(_)
                | CoreError::StorageBackend(_)
                | CoreError::Database(_)
                | CoreError::Internal(_) => "internal error".to_string(),
                other => other.to_string(),
            },
            other => other.to_string(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::error!(error = ?self, "request failed");
        }

        let body = Json(json!({
            "code": self.code(),
            "message": self.message(),
            "timestamp": Utc::now().to_rfc3339(),
        }));

        let mut response = (status, body).into_response();
        if let ApiError::Core(CoreError::RateLimited { retry_after_secs }) = &self {
            if let Ok(value) = retry_after_secs.to_string().parse() {
                response.headers_mut().insert(header::RETRY_AFTER, value);
            }
        }
        response
    }
}
