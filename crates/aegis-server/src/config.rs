//! Server configuration
//!
//! Everything comes from the environment (see `main.rs` for the variable
//! names); this struct is the validated, immutable result constructed
//! once at startup.

use aegis_crypto::{FileCipher, MIN_ITERATIONS};
use base64::{engine::general_purpose::STANDARD, Engine};

/// Placeholder secret that must never reach production
const JWT_SECRET_PLACEHOLDER: &str = "change-me-please-change-me-please";

/// Object store connection settings
#[derive(Clone, Debug)]
pub struct BlobSettings {
    pub endpoint: String,
    pub access_key: String,
    pub secret_key: String,
    pub bucket: String,
}

/// Validated server configuration
#[derive(Clone, Debug)]
pub struct ServerConfig {
    /// Host to bind to
    pub host: String,
    /// Port to listen on
    pub port: u16,
    /// MetaStore DSN
    pub database_url: String,
    /// Object store; absent means the discouraged store-less mode
    pub blob: Option<BlobSettings>,
    /// Keep ciphertext inline in database rows instead of the object
    /// store; supported but discouraged
    pub inline_blobs: bool,
    /// HMAC key for session tokens
    pub jwt_secret: String,
    /// Session lifetime in hours
    pub token_ttl_hours: i64,
    /// Absolute prefix used in generated share links
    pub base_url: String,
    /// CORS allow-list; `*` opens up to any origin
    pub cors_allowed_origins: Vec<String>,
    /// PBKDF2 cost
    pub pbkdf2_iterations: u32,
    /// On-disk file encryption format
    pub file_cipher: FileCipher,
    /// Wraps the opt-in display-password column (base64, 32 bytes)
    pub share_password_key: Option<Vec<u8>>,
    /// Global HTTP rate limit, requests per second per client
    pub rate_limit_rps: u32,
    /// Burst allowance on top of the steady rate
    pub rate_limit_burst: u32,
    /// Storage quota assigned to new accounts, in bytes
    pub default_storage_quota: i64,
    /// Largest accepted request body
    pub max_body_bytes: usize,
}

impl ServerConfig {
    /// Bind address string
    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Reject configurations that must not serve traffic
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.jwt_secret.len() < 32 {
            anyhow::bail!("JWT_SECRET must be at least 32 bytes");
        }
        if self.jwt_secret == JWT_SECRET_PLACEHOLDER {
            anyhow::bail!("JWT_SECRET is still the placeholder value");
        }
        if self.pbkdf2_iterations < MIN_ITERATIONS {
            anyhow::bail!("PBKDF2_ITERATIONS must be at least {MIN_ITERATIONS}");
        }
        if let Some(key) = &self.share_password_key {
            if key.len() != 32 {
                anyhow::bail!("SHARE_PASSWORD_KEY must decode to exactly 32 bytes");
            }
        }
        if self.rate_limit_rps == 0 {
            anyhow::bail!("RATE_LIMIT_RPS must be positive");
        }
        Ok(())
    }

    /// Decode the base64 display-password key
    pub fn decode_share_password_key(encoded: &str) -> anyhow::Result<Vec<u8>> {
        let key = STANDARD.decode(encoded)?;
        if key.len() != 32 {
            anyhow::bail!("SHARE_PASSWORD_KEY must decode to exactly 32 bytes");
        }
        Ok(key)
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8080,
            database_url: "sqlite://aegis.db".to_string(),
            blob: None,
            inline_blobs: false,
            jwt_secret: JWT_SECRET_PLACEHOLDER.to_string(),
            token_ttl_hours: 24,
            base_url: "http://localhost:8080".to_string(),
            cors_allowed_origins: vec!["http://localhost:3000".to_string()],
            pbkdf2_iterations: aegis_crypto::DEFAULT_ITERATIONS,
            file_cipher: FileCipher::NaclSecretbox,
            share_password_key: None,
            rate_limit_rps: 50,
            rate_limit_burst: 100,
            default_storage_quota: 10 * 1024 * 1024 * 1024,
            max_body_bytes: 256 * 1024 * 1024,
        }
    }
}
