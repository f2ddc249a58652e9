//! Aegis vault server binary

use aegis_server::{run_server, BlobSettings, ServerConfig};
use clap::Parser;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser, Debug)]
#[command(name = "aegis-vault")]
#[command(about = "End-to-end-encrypted file vault server")]
#[command(version)]
struct Args {
    /// Host to bind to
    #[arg(long, default_value = "0.0.0.0", env = "HOST")]
    host: String,

    /// Port to listen on
    #[arg(short, long, default_value = "8080", env = "PORT")]
    port: u16,

    /// MetaStore DSN
    #[arg(long, env = "DATABASE_URL")]
    database_url: String,

    /// Object store endpoint; omit to run store-less (not persistent)
    #[arg(long, env = "BLOB_ENDPOINT")]
    blob_endpoint: Option<String>,

    /// Object store access key
    #[arg(long, env = "BLOB_ACCESS_KEY")]
    blob_access_key: Option<String>,

    /// Object store secret key
    #[arg(long, env = "BLOB_SECRET_KEY")]
    blob_secret_key: Option<String>,

    /// Object store bucket
    #[arg(long, env = "BLOB_BUCKET")]
    blob_bucket: Option<String>,

    /// Store ciphertext inline in database rows (discouraged)
    #[arg(long, env = "BLOB_INLINE")]
    blob_inline: bool,

    /// HMAC key for session tokens; at least 32 bytes
    #[arg(long, env = "JWT_SECRET")]
    jwt_secret: String,

    /// Absolute prefix used in generated share links
    #[arg(long, env = "BASE_URL")]
    base_url: String,

    /// Comma-separated CORS allow-list
    #[arg(long, default_value = "http://localhost:3000", env = "CORS_ALLOWED_ORIGINS")]
    cors_allowed_origins: String,

    /// PBKDF2 cost
    #[arg(long, default_value = "100000", env = "PBKDF2_ITERATIONS")]
    pbkdf2_iterations: u32,

    /// On-disk encryption format: nacl-secretbox or aes-gcm
    #[arg(long, default_value = "nacl-secretbox", env = "FILE_ENCRYPTION_ALGORITHM")]
    file_encryption_algorithm: String,

    /// Base64 32-byte key wrapping the display-password column
    #[arg(long, env = "SHARE_PASSWORD_KEY")]
    share_password_key: Option<String>,

    /// Global HTTP rate limit, requests per second
    #[arg(long, default_value = "50", env = "RATE_LIMIT_RPS")]
    rate_limit_rps: u32,

    /// Burst allowance on top of the steady rate
    #[arg(long, default_value = "100", env = "RATE_LIMIT_BURST")]
    rate_limit_burst: u32,

    /// Storage quota for new accounts, in bytes
    #[arg(long, default_value = "10737418240", env = "DEFAULT_STORAGE_QUOTA")]
    default_storage_quota: i64,

    /// Enable debug logging
    #[arg(short, long, env = "AEGIS_DEBUG")]
    debug: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let args = Args::parse();

    let log_level = if args.debug { "debug" } else { "info" };
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| format!("aegis_server={log_level},aegis_core={log_level},tower_http=warn").into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let blob = match (
        args.blob_endpoint,
        args.blob_access_key,
        args.blob_secret_key,
        args.blob_bucket,
    ) {
        (Some(endpoint), Some(access_key), Some(secret_key), Some(bucket)) => Some(BlobSettings {
            endpoint,
            access_key,
            secret_key,
            bucket,
        }),
        (None, _, _, _) => None,
        _ => anyhow::bail!(
            "BLOB_ENDPOINT requires BLOB_ACCESS_KEY, BLOB_SECRET_KEY and BLOB_BUCKET"
        ),
    };

    let share_password_key = args
        .share_password_key
        .as_deref()
        .map(ServerConfig::decode_share_password_key)
        .transpose()?;

    let config = ServerConfig {
        host: args.host,
        port: args.port,
        database_url: args.database_url,
        blob,
        inline_blobs: args.blob_inline,
        jwt_secret: args.jwt_secret,
        base_url: args.base_url,
        cors_allowed_origins: args
            .cors_allowed_origins
            .split(',')
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect(),
        pbkdf2_iterations: args.pbkdf2_iterations,
        file_cipher: aegis_crypto::FileCipher::from_name(&args.file_encryption_algorithm)
            .map_err(|e| anyhow::anyhow!("{e}"))?,
        share_password_key,
        rate_limit_rps: args.rate_limit_rps,
        rate_limit_burst: args.rate_limit_burst,
        default_storage_quota: args.default_storage_quota,
        ..Default::default()
    };

    run_server(config).await
}
