//! Password-based key derivation
//!
//! All password-derived keys in Aegis come from PBKDF2-HMAC-SHA256 with a
//! per-use random salt. The same primitive backs user envelope keys, share
//! passwords, and the stored login password hashes.

use crate::{keys::KEY_SIZE, CryptoError, EnvelopeKey, Result};
use base64::{engine::general_purpose::STANDARD_NO_PAD, Engine};
use pbkdf2::pbkdf2_hmac;
use rand::rngs::OsRng;
use sha2::Sha256;
use subtle::ConstantTimeEq;

/// Default PBKDF2 iteration count
pub const DEFAULT_ITERATIONS: u32 = 100_000;

/// Lowest iteration count a deployment may configure
pub const MIN_ITERATIONS: u32 = 10_000;

/// Size of a derivation salt in bytes
pub const SALT_SIZE: usize = 16;

/// Generate a random derivation salt
pub fn generate_salt() -> [u8; SALT_SIZE] {
    let mut salt = [0u8; SALT_SIZE];
    rand::RngCore::fill_bytes(&mut OsRng, &mut salt);
    salt
}

/// Derive a 32-byte key from a password and salt
pub fn derive_key(password: &str, salt: &[u8], iterations: u32) -> EnvelopeKey {
    let mut out = [0u8; KEY_SIZE];
    pbkdf2_hmac::<Sha256>(password.as_bytes(), salt, iterations, &mut out);
    EnvelopeKey::from_bytes(&out).expect("derived key has fixed size")
}

/// Hash a password for storage
///
/// Encoding: `pbkdf2-sha256$<iterations>$<salt_b64>$<hash_b64>`.
pub fn hash_password(password: &str, iterations: u32) -> String {
    let salt = generate_salt();
    let mut out = [0u8; KEY_SIZE];
    pbkdf2_hmac::<Sha256>(password.as_bytes(), &salt, iterations, &mut out);
    format!(
        "pbkdf2-sha256${}${}${}",
        iterations,
        STANDARD_NO_PAD.encode(salt),
        STANDARD_NO_PAD.encode(out)
    )
}

/// Verify a password against a stored hash in constant time
pub fn verify_password(password: &str, encoded: &str) -> Result<bool> {
    let mut parts = encoded.split('$');
    let (scheme, iters, salt_b64, hash_b64) = match (
        parts.next(),
        parts.next(),
        parts.next(),
        parts.next(),
        parts.next(),
    ) {
        (Some(s), Some(i), Some(salt), Some(hash), None) => (s, i, salt, hash),
        _ => return Err(CryptoError::MalformedPasswordHash),
    };
    if scheme != "pbkdf2-sha256" {
        return Err(CryptoError::MalformedPasswordHash);
    }
    let iterations: u32 = iters
        .parse()
        .map_err(|_| CryptoError::MalformedPasswordHash)?;
    let salt = STANDARD_NO_PAD.decode(salt_b64)?;
    let expected = STANDARD_NO_PAD.decode(hash_b64)?;

    let mut actual = vec![0u8; expected.len()];
    pbkdf2_hmac::<Sha256>(password.as_bytes(), &salt, iterations, &mut actual);
    Ok(actual.ct_eq(&expected).into())
}

#[cfg(test)]
mod tests {
    use super::*;

    // Low iteration counts keep the test suite fast; production minimums
    // are enforced at configuration load, not here.
    const TEST_ITERS: u32 = 1_000;

    #[test]
    fn test_derivation_is_deterministic() {
        let salt = generate_salt();
        let k1 = derive_key("hunter2", &salt, TEST_ITERS);
        let k2 = derive_key("hunter2", &salt, TEST_ITERS);
        assert_eq!(k1.as_bytes(), k2.as_bytes());
    }

    #[test]
    fn test_salt_changes_key() {
        let k1 = derive_key("hunter2", &generate_salt(), TEST_ITERS);
        let k2 = derive_key("hunter2", &generate_salt(), TEST_ITERS);
        assert_ne!(k1.as_bytes(), k2.as_bytes());
    }

    #[test]
    fn test_password_changes_key() {
        let salt = generate_salt();
        let k1 = derive_key("hunter2", &salt, TEST_ITERS);
        let k2 = derive_key("hunter3", &salt, TEST_ITERS);
        assert_ne!(k1.as_bytes(), k2.as_bytes());
    }

    #[test]
    fn test_password_hash_roundtrip() {
        let encoded = hash_password("correct horse", TEST_ITERS);
        assert!(verify_password("correct horse", &encoded).unwrap());
        assert!(!verify_password("battery staple", &encoded).unwrap());
    }

    #[test]
    fn test_malformed_hash_rejected() {
        assert!(verify_password("x", "not-a-hash").is_err());
        assert!(verify_password("x", "bcrypt$10$abc$def").is_err());
        assert!(verify_password("x", "pbkdf2-sha256$abc$salt$hash").is_err());
    }

    #[test]
    fn test_hashes_are_salted() {
        let a = hash_password("same", TEST_ITERS);
        let b = hash_password("same", TEST_ITERS);
        assert_ne!(a, b);
    }
}
