//! # Aegis Server
//!
//! HTTP surface for the Aegis encrypted file vault.
//!
//! This crate provides:
//! - **REST API**: thin handlers over the core engines
//! - **Auth gate**: HS256 bearer sessions with fresh user-row loads
//! - **Share surface**: unauthenticated token endpoints with their own
//!   gating, rate limiting and cache-hostile headers
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────┐
//! │                   HTTP clients                      │
//! └─────────────────────────┬───────────────────────────┘
//!                           │
//! ┌─────────────────────────▼───────────────────────────┐
//! │                   Aegis Server                      │
//! ├─────────────────────────────────────────────────────┤
//! │ Auth gate │ Rate limiter │ Security headers │ CORS  │
//! ├─────────────────────────────────────────────────────┤
//! │     Handlers (files, shares, folders, rotation)     │
//! ├─────────────────────────────────────────────────────┤
//! │                    aegis-core                       │
//! │       (MetaStore, FileEngine, ShareEngine, ...)     │
//! ├─────────────────────────────────────────────────────┤
//! │         aegis-blobstore  ·  aegis-crypto            │
//! └─────────────────────────────────────────────────────┘
//! ```

pub mod auth;
pub mod config;
pub mod error;
pub mod handlers;
pub mod middleware;
pub mod routes;
pub mod server;
pub mod state;

pub use config::{BlobSettings, ServerConfig};
pub use error::ApiError;
pub use server::run_server;
pub use state::AppState;

/// Shorthand for lifting a database failure into the API error space
pub(crate) fn engine_failure(err: sqlx::Error) -> ApiError {
    ApiError::Core(err.into())
}
