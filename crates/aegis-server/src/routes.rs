//! HTTP route definitions

use crate::{handlers, middleware, AppState};
use axum::{
    extract::DefaultBodyLimit,
    middleware as axum_middleware,
    routing::{delete, get, patch, post},
    Router,
};
use std::sync::Arc;
use tower_http::{
    cors::{AllowOrigin, Any, CorsLayer},
    trace::TraceLayer,
};

/// Create the main router
pub fn create_router(state: Arc<AppState>) -> Router {
    let rate_limiter = middleware::create_rate_limiter(
        state.config.rate_limit_rps,
        state.config.rate_limit_burst,
    );

    let cors = build_cors(&state.config.cors_allowed_origins);

    // Bearer-gated API
    let protected = Router::new()
        .route("/api/files", get(handlers::files::list).post(handlers::files::upload))
        .route("/api/files/trash", get(handlers::files::list_trash))
        .route(
            "/api/files/{id}",
            patch(handlers::files::update).delete(handlers::files::trash),
        )
        .route("/api/files/{id}/download", get(handlers::files::download))
        .route("/api/files/{id}/restore", post(handlers::files::restore))
        .route("/api/files/{id}/purge", delete(handlers::files::purge))
        .route(
            "/api/folders",
            get(handlers::folders::list).post(handlers::folders::create),
        )
        .route(
            "/api/folders/{id}",
            patch(handlers::folders::update).delete(handlers::folders::trash),
        )
        .route(
            "/api/rooms",
            get(handlers::rooms::list).post(handlers::rooms::create),
        )
        .route("/api/rooms/{id}/members", post(handlers::rooms::add_member))
        .route("/api/rooms/{id}/files", post(handlers::rooms::attach_file))
        .route(
            "/api/shares",
            get(handlers::shares::list_own).post(handlers::shares::create),
        )
        .route("/api/shares/{id}", delete(handlers::shares::revoke))
        .route(
            "/api/shares/{id}/password",
            get(handlers::shares::reveal_password),
        )
        .route("/api/keys/rotate", post(handlers::rotation::rotate))
        .route("/api/keys/rotate/{id}", get(handlers::rotation::status))
        .route(
            "/api/keys/rotate/{id}/rollback",
            post(handlers::rotation::rollback),
        )
        .route("/api/admin/users", get(handlers::admin::list_users))
        .route("/api/admin/gc", post(handlers::admin::collect_garbage))
        .route("/shared", get(handlers::shares::list_accessed))
        .layer(axum_middleware::from_fn_with_state(
            Arc::clone(&state),
            middleware::auth_middleware,
        ));

    // Public share surface; never cached, never indexed
    let share = Router::new()
        .route("/share/{token}", get(handlers::shares::metadata))
        .route("/share/{token}/access", post(handlers::shares::access))
        .route("/share/{token}/download", get(handlers::shares::download))
        .layer(axum_middleware::from_fn(middleware::share_headers));

    Router::new()
        .route("/health", get(handlers::health::health))
        .route("/api/auth/register", post(handlers::auth::register))
        .route("/api/auth/login", post(handlers::auth::login))
        .merge(share)
        .merge(protected)
        .layer(axum_middleware::from_fn(middleware::security_headers))
        .layer(axum_middleware::from_fn(middleware::logging_middleware))
        .layer(axum_middleware::from_fn_with_state(
            rate_limiter,
            middleware::rate_limit_middleware,
        ))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .layer(DefaultBodyLimit::max(state.config.max_body_bytes))
        .with_state(state)
}

fn build_cors(origins: &[String]) -> CorsLayer {
    if origins.iter().any(|o| o == "*") {
        CorsLayer::new()
            .allow_origin(Any)
            .allow_methods(Any)
            .allow_headers(Any)
    } else {
        let parsed: Vec<_> = origins
            .iter()
            .filter_map(|origin| origin.parse().ok())
            .collect();
        CorsLayer::new()
            .allow_origin(AllowOrigin::list(parsed))
            .allow_methods(Any)
            .allow_headers(Any)
    }
}
