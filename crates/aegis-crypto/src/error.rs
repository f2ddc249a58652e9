//! Error types for the aegis-crypto crate

use thiserror::Error;

/// Result type alias using `CryptoError`
pub type Result<T> = std::result::Result<T, CryptoError>;

/// Errors that can occur during cryptographic operations
#[derive(Error, Debug)]
pub enum CryptoError {
    /// Encryption failed
    #[error("encryption failed: {0}")]
    Encryption(String),

    /// Decryption failed (tag mismatch, wrong key, tampered data)
    #[error("decryption failed")]
    Decryption,

    /// Invalid key format or length
    #[error("invalid key: {0}")]
    InvalidKey(String),

    /// Invalid ciphertext format
    #[error("invalid ciphertext: {0}")]
    InvalidCiphertext(String),

    /// Unknown cipher algorithm name
    #[error("unknown cipher algorithm: {0}")]
    UnknownAlgorithm(String),

    /// Malformed password hash encoding
    #[error("malformed password hash")]
    MalformedPasswordHash,

    /// Base64 decode error
    #[error("base64 decode error: {0}")]
    Base64Decode(#[from] base64::DecodeError),
}
