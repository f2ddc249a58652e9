//! HTTP middleware: auth gate, global rate limiting, security headers

use crate::auth::{extract_bearer_token, validate_token, AuthUser};
use crate::{ApiError, AppState};
use aegis_core::store::users;
use axum::{
    body::Body,
    extract::{ConnectInfo, State},
    http::{header, HeaderValue, Request},
    middleware::Next,
    response::Response,
};
use governor::{clock::DefaultClock, state::keyed::DefaultKeyedStateStore, Quota, RateLimiter};
use std::net::SocketAddr;
use std::num::NonZeroU32;
use std::sync::Arc;

/// Keyed limiter for the global HTTP rate limit
pub type KeyedRateLimiter = RateLimiter<String, DefaultKeyedStateStore<String>, DefaultClock>;

/// Create the global limiter from the configured rate and burst
pub fn create_rate_limiter(rps: u32, burst: u32) -> Arc<KeyedRateLimiter> {
    let quota = Quota::per_second(NonZeroU32::new(rps.max(1)).expect("nonzero"))
        .allow_burst(NonZeroU32::new(burst.max(1)).expect("nonzero"));
    Arc::new(RateLimiter::keyed(quota))
}

/// Best-effort client address: first X-Forwarded-For hop, else the socket
pub fn client_ip(request: &Request<Body>) -> String {
    if let Some(forwarded) = request
        .headers()
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
    {
        if let Some(first) = forwarded.split(',').next() {
            let first = first.trim();
            if !first.is_empty() {
                return first.to_string();
            }
        }
    }
    request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|info| info.0.ip().to_string())
        .unwrap_or_else(|| "unknown".to_string())
}

/// Authentication gate: parse the bearer token and reload the user row,
/// so revoked accounts and stale admin flags are caught immediately
pub async fn auth_middleware(
    State(state): State<Arc<AppState>>,
    mut request: Request<Body>,
    next: Next,
) -> Result<Response, ApiError> {
    let header_value = request
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|h| h.to_str().ok())
        .ok_or(ApiError::Authentication)?;
    let token = extract_bearer_token(header_value).ok_or(ApiError::Authentication)?;
    let claims = validate_token(token, &state.config.jwt_secret)?;

    let mut conn = state
        .meta
        .pool()
        .acquire()
        .await
        .map_err(|e| ApiError::Core(e.into()))?;
    let user = users::by_id(&mut conn, claims.sub)
        .await
        .map_err(ApiError::Core)?
        .ok_or(ApiError::Authentication)?;
    drop(conn);

    request.extensions_mut().insert(AuthUser(user));
    Ok(next.run(request).await)
}

/// Global request throttle keyed by client address
pub async fn rate_limit_middleware(
    State(limiter): State<Arc<KeyedRateLimiter>>,
    request: Request<Body>,
    next: Next,
) -> Result<Response, ApiError> {
    let key = client_ip(&request);
    if limiter.check_key(&key).is_err() {
        return Err(ApiError::Core(aegis_core::CoreError::RateLimited {
            retry_after_secs: 1,
        }));
    }
    Ok(next.run(request).await)
}

/// Security headers applied to every response
pub async fn security_headers(request: Request<Body>, next: Next) -> Response {
    let mut response = next.run(request).await;
    let headers = response.headers_mut();
    headers.insert("x-frame-options", HeaderValue::from_static("DENY"));
    headers.insert("x-content-type-options", HeaderValue::from_static("nosniff"));
    headers.insert(
        "referrer-policy",
        HeaderValue::from_static("strict-origin-when-cross-origin"),
    );
    headers.insert(
        "content-security-policy",
        HeaderValue::from_static(
            "default-src 'self'; frame-ancestors 'none'; base-uri 'self'; form-action 'self'",
        ),
    );
    response
}

/// Extra headers for share endpoints: never cache, never index
pub async fn share_headers(request: Request<Body>, next: Next) -> Response {
    let mut response = next.run(request).await;
    let headers = response.headers_mut();
    headers.insert(header::CACHE_CONTROL, HeaderValue::from_static("no-store"));
    headers.insert("x-robots-tag", HeaderValue::from_static("noindex"));
    response
}

/// Structured request log line per completed request
pub async fn logging_middleware(request: Request<Body>, next: Next) -> Response {
    let method = request.method().clone();
    let uri = request.uri().clone();
    let start = std::time::Instant::now();

    let response = next.run(request).await;

    tracing::info!(
        method = %method,
        uri = %uri,
        status = %response.status().as_u16(),
        duration_ms = %start.elapsed().as_millis(),
        "request completed"
    );
    response
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rate_limiter_allows_within_burst() {
        let limiter = create_rate_limiter(10, 5);
        for _ in 0..5 {
            assert!(limiter.check_key(&"10.0.0.1".to_string()).is_ok());
        }
    }

    #[test]
    fn test_rate_limiter_blocks_past_burst() {
        let limiter = create_rate_limiter(1, 2);
        let key = "10.0.0.2".to_string();
        let _ = limiter.check_key(&key);
        let _ = limiter.check_key(&key);
        assert!(limiter.check_key(&key).is_err());
    }

    #[test]
    fn test_client_ip_prefers_forwarded_header() {
        let request = Request::builder()
            .header("x-forwarded-for", "198.51.100.7, 10.0.0.1")
            .body(Body::empty())
            .unwrap();
        assert_eq!(client_ip(&request), "198.51.100.7");
    }

    #[test]
    fn test_client_ip_falls_back() {
        let request = Request::builder().body(Body::empty()).unwrap();
        assert_eq!(client_ip(&request), "unknown");
    }
}
