//! Session tokens and the auth gate
//!
//! Sessions are HS256 bearer tokens over `{user_id, email, admin, exp}`.
//! The gate always reloads the user row, so a token outlives neither the
//! account nor an admin-flag change.

use crate::ApiError;
use aegis_core::store::users::User;
use chrono::{Duration, Utc};
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};

/// JWT claims carried by a session token
#[derive(Debug, Serialize, Deserialize)]
pub struct Claims {
    /// User id
    pub sub: i64,
    /// Email at issue time
    pub email: String,
    /// Admin flag at issue time
    pub admin: bool,
    /// Expiration (unix seconds)
    pub exp: i64,
    /// Issued at (unix seconds)
    pub iat: i64,
}

/// Issue a session token for a user
pub fn issue_token(user: &User, secret: &str, ttl_hours: i64) -> Result<String, ApiError> {
    let now = Utc::now();
    let claims = Claims {
        sub: user.id,
        email: user.email.clone(),
        admin: user.is_admin,
        exp: (now + Duration::hours(ttl_hours)).timestamp(),
        iat: now.timestamp(),
    };
    encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(secret.as_bytes()),
    )
    .map_err(|_| ApiError::Authentication)
}

/// Validate a session token and extract its claims
pub fn validate_token(token: &str, secret: &str) -> Result<Claims, ApiError> {
    let key = DecodingKey::from_secret(secret.as_bytes());
    let mut validation = Validation::new(Algorithm::HS256);
    validation.validate_exp = true;

    decode::<Claims>(token, &key, &validation)
        .map(|data| data.claims)
        .map_err(|e| {
            tracing::debug!("token validation failed: {}", e);
            ApiError::Authentication
        })
}

/// Extract a bearer token from an Authorization header value
pub fn extract_bearer_token(auth_header: &str) -> Option<&str> {
    auth_header
        .strip_prefix("Bearer ")
        .or_else(|| auth_header.strip_prefix("bearer "))
}

/// The authenticated user, injected into request extensions by the gate
#[derive(Clone)]
pub struct AuthUser(pub User);

#[cfg(test)]
mod tests {
    use super::*;

    fn test_user() -> User {
        User {
            id: 42,
            username: "tester".to_string(),
            email: "tester@example.com".to_string(),
            password_hash: String::new(),
            storage_quota: 0,
            used_storage: 0,
            is_admin: false,
            envelope_key_wrapped: vec![],
            envelope_key_salt: vec![],
            envelope_key_iv: vec![],
            envelope_key_version: 1,
            created_at: Utc::now(),
            updated_at: Utc::now(),
            deleted_at: None,
        }
    }

    #[test]
    fn test_issue_and_validate() {
        let secret = "0123456789abcdef0123456789abcdef";
        let token = issue_token(&test_user(), secret, 1).unwrap();
        let claims = validate_token(&token, secret).unwrap();
        assert_eq!(claims.sub, 42);
        assert_eq!(claims.email, "tester@example.com");
        assert!(!claims.admin);
    }

    #[test]
    fn test_wrong_secret_rejected() {
        let token = issue_token(&test_user(), "0123456789abcdef0123456789abcdef", 1).unwrap();
        assert!(validate_token(&token, "another-secret-another-secret-xx").is_err());
    }

    #[test]
    fn test_expired_token_rejected() {
        let secret = "0123456789abcdef0123456789abcdef";
        let token = issue_token(&test_user(), secret, -1).unwrap();
        assert!(validate_token(&token, secret).is_err());
    }

    #[test]
    fn test_extract_bearer_token() {
        assert_eq!(extract_bearer_token("Bearer abc"), Some("abc"));
        assert_eq!(extract_bearer_token("bearer abc"), Some("abc"));
        assert_eq!(extract_bearer_token("Basic xyz"), None);
    }
}
