//! Envelope wrapping of file keys
//!
//! A 32-byte inner key is sealed under a 32-byte outer key with
//! AES-256-GCM. The IV is fresh per wrap and stored beside the
//! ciphertext; the ciphertext carries the 16-byte tag.

use crate::{keys::KEY_SIZE, CryptoError, EnvelopeKey, FileKey, Result};
use aes_gcm::{aead::Aead as _, Aes256Gcm, KeyInit as _};
use rand::rngs::OsRng;

/// IV size for envelope wrapping (AES-GCM)
pub const WRAP_IV_SIZE: usize = 12;

/// A wrapped key together with the IV it was sealed under
#[derive(Clone, Debug)]
pub struct WrappedKey {
    /// Ciphertext of the inner key, tag included
    pub ciphertext: Vec<u8>,
    /// Fresh IV used for this wrap
    pub iv: [u8; WRAP_IV_SIZE],
}

/// Seal a 32-byte inner key under an outer key
pub fn wrap_key(inner: &[u8; KEY_SIZE], outer: &EnvelopeKey) -> Result<WrappedKey> {
    let mut iv = [0u8; WRAP_IV_SIZE];
    rand::RngCore::fill_bytes(&mut OsRng, &mut iv);

    let cipher = Aes256Gcm::new_from_slice(outer.as_bytes())
        .map_err(|e| CryptoError::Encryption(e.to_string()))?;
    let ciphertext = cipher
        .encrypt(aes_gcm::Nonce::from_slice(&iv), inner.as_slice())
        .map_err(|e| CryptoError::Encryption(e.to_string()))?;

    Ok(WrappedKey { ciphertext, iv })
}

/// Recover a file key from its wrapped form
pub fn unwrap_file_key(ciphertext: &[u8], iv: &[u8], outer: &EnvelopeKey) -> Result<FileKey> {
    let inner = unwrap_raw(ciphertext, iv, outer)?;
    FileKey::from_bytes(&inner)
}

/// Recover an envelope key from its wrapped form
pub fn unwrap_envelope_key(ciphertext: &[u8], iv: &[u8], outer: &EnvelopeKey) -> Result<EnvelopeKey> {
    let inner = unwrap_raw(ciphertext, iv, outer)?;
    EnvelopeKey::from_bytes(&inner)
}

/// Seal arbitrary short plaintext under an outer key (display-password column)
pub fn wrap_bytes(plaintext: &[u8], outer: &EnvelopeKey) -> Result<WrappedKey> {
    let mut iv = [0u8; WRAP_IV_SIZE];
    rand::RngCore::fill_bytes(&mut OsRng, &mut iv);

    let cipher = Aes256Gcm::new_from_slice(outer.as_bytes())
        .map_err(|e| CryptoError::Encryption(e.to_string()))?;
    let ciphertext = cipher
        .encrypt(aes_gcm::Nonce::from_slice(&iv), plaintext)
        .map_err(|e| CryptoError::Encryption(e.to_string()))?;
    Ok(WrappedKey { ciphertext, iv })
}

/// Open arbitrary short plaintext sealed with [`wrap_bytes`]
pub fn unwrap_bytes(ciphertext: &[u8], iv: &[u8], outer: &EnvelopeKey) -> Result<Vec<u8>> {
    unwrap_raw(ciphertext, iv, outer)
}

fn unwrap_raw(ciphertext: &[u8], iv: &[u8], outer: &EnvelopeKey) -> Result<Vec<u8>> {
    if iv.len() != WRAP_IV_SIZE {
        return Err(CryptoError::InvalidCiphertext(format!(
            "wrap IV must be {} bytes, got {}",
            WRAP_IV_SIZE,
            iv.len()
        )));
    }
    let cipher = Aes256Gcm::new_from_slice(outer.as_bytes())
        .map_err(|e| CryptoError::Encryption(e.to_string()))?;
    cipher
        .decrypt(aes_gcm::Nonce::from_slice(iv), ciphertext)
        .map_err(|_| CryptoError::Decryption)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wrap_unwrap_roundtrip() {
        let outer = EnvelopeKey::generate();
        let inner = FileKey::generate();

        let wrapped = wrap_key(inner.as_bytes(), &outer).unwrap();
        let recovered = unwrap_file_key(&wrapped.ciphertext, &wrapped.iv, &outer).unwrap();
        assert_eq!(inner.as_bytes(), recovered.as_bytes());
    }

    #[test]
    fn test_wrong_outer_key_fails() {
        let inner = FileKey::generate();
        let wrapped = wrap_key(inner.as_bytes(), &EnvelopeKey::generate()).unwrap();
        assert!(unwrap_file_key(&wrapped.ciphertext, &wrapped.iv, &EnvelopeKey::generate()).is_err());
    }

    #[test]
    fn test_fresh_iv_per_wrap() {
        let outer = EnvelopeKey::generate();
        let inner = FileKey::generate();
        let a = wrap_key(inner.as_bytes(), &outer).unwrap();
        let b = wrap_key(inner.as_bytes(), &outer).unwrap();
        assert_ne!(a.iv, b.iv);
        assert_ne!(a.ciphertext, b.ciphertext);
    }

    #[test]
    fn test_tampered_wrap_rejected() {
        let outer = EnvelopeKey::generate();
        let inner = FileKey::generate();
        let mut wrapped = wrap_key(inner.as_bytes(), &outer).unwrap();
        wrapped.ciphertext[0] ^= 0xFF;
        assert!(unwrap_file_key(&wrapped.ciphertext, &wrapped.iv, &outer).is_err());
    }

    #[test]
    fn test_bad_iv_length_rejected() {
        let outer = EnvelopeKey::generate();
        let inner = FileKey::generate();
        let wrapped = wrap_key(inner.as_bytes(), &outer).unwrap();
        assert!(unwrap_file_key(&wrapped.ciphertext, &wrapped.iv[..8], &outer).is_err());
    }

    #[test]
    fn test_bytes_roundtrip() {
        let outer = EnvelopeKey::generate();
        let wrapped = wrap_bytes(b"hunter2!Aaaa!", &outer).unwrap();
        let opened = unwrap_bytes(&wrapped.ciphertext, &wrapped.iv, &outer).unwrap();
        assert_eq!(opened, b"hunter2!Aaaa!");
    }

    #[test]
    fn test_envelope_chain() {
        // password -> outer KDF key -> envelope key -> file key, the full
        // unwrap chain a client performs after login
        let password_key = EnvelopeKey::generate();
        let envelope = EnvelopeKey::generate();
        let file_key = FileKey::generate();

        let wrapped_envelope = wrap_key(envelope.as_bytes(), &password_key).unwrap();
        let wrapped_file = wrap_key(file_key.as_bytes(), &envelope).unwrap();

        let env2 =
            unwrap_envelope_key(&wrapped_envelope.ciphertext, &wrapped_envelope.iv, &password_key)
                .unwrap();
        let fk2 = unwrap_file_key(&wrapped_file.ciphertext, &wrapped_file.iv, &env2).unwrap();
        assert_eq!(fk2.as_bytes(), file_key.as_bytes());
    }
}
