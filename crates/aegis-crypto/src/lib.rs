//! # Aegis Crypto
//!
//! Cryptographic primitives for the Aegis encrypted file vault.
//!
//! This crate provides:
//! - **Key derivation**: PBKDF2-HMAC-SHA256 for passwords (envelope keys,
//!   share passwords, login hashes)
//! - **File encryption**: two AEAD backends (NaCl secretbox, AES-256-GCM)
//!   with a `nonce || ciphertext+tag` wire format
//! - **Envelope wrapping**: AES-256-GCM sealing of one 32-byte key under
//!   another, fresh IV per wrap
//! - **Tokens**: url-safe high-entropy share tokens
//! - **Hashing**: SHA-256 content addressing
//!
//! All nonces, IVs, salts and keys are drawn from the OS CSPRNG; a fresh
//! nonce is allocated for every operation so no nonce is ever reused
//! under the same key.

pub mod aead;
pub mod envelope;
pub mod error;
pub mod hashing;
pub mod kdf;
pub mod keys;
pub mod token;

pub use aead::{FileCipher, GCM_NONCE_SIZE, SECRETBOX_NONCE_SIZE, TAG_SIZE};
pub use envelope::{
    unwrap_bytes, unwrap_envelope_key, unwrap_file_key, wrap_bytes, wrap_key, WrappedKey,
    WRAP_IV_SIZE,
};
pub use error::{CryptoError, Result};
pub use hashing::sha256_hex;
pub use kdf::{
    derive_key, generate_salt, hash_password, verify_password, DEFAULT_ITERATIONS, MIN_ITERATIONS,
    SALT_SIZE,
};
pub use keys::{EnvelopeKey, FileKey, KEY_SIZE};
pub use token::{decode_key, encode_key, share_token};
