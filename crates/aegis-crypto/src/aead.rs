//! Authenticated file-content encryption
//!
//! Files are sealed with one of two AEAD backends selected at deployment
//! time. The on-disk framing is identical for both: the first
//! `nonce_len()` bytes of a sealed buffer are the nonce, the remainder is
//! ciphertext followed by the 16-byte authentication tag.

use crate::{CryptoError, FileKey, Result};
use aes_gcm::{aead::Aead as _, Aes256Gcm, KeyInit as _};
use crypto_secretbox::XSalsa20Poly1305;
use rand::rngs::OsRng;

/// Authentication tag size shared by both backends
pub const TAG_SIZE: usize = 16;

/// Nonce size for the secretbox backend
pub const SECRETBOX_NONCE_SIZE: usize = 24;

/// Nonce size for the AES-GCM backend
pub const GCM_NONCE_SIZE: usize = 12;

/// AEAD backend used for file content
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum FileCipher {
    /// XSalsa20-Poly1305 (NaCl secretbox), 24-byte nonce
    #[default]
    NaclSecretbox,
    /// AES-256-GCM, 12-byte nonce
    Aes256Gcm,
}

impl FileCipher {
    /// Parse the configuration name of a backend
    pub fn from_name(name: &str) -> Result<Self> {
        match name {
            "nacl-secretbox" => Ok(Self::NaclSecretbox),
            "aes-gcm" => Ok(Self::Aes256Gcm),
            other => Err(CryptoError::UnknownAlgorithm(other.to_string())),
        }
    }

    /// Configuration name of this backend
    pub fn name(&self) -> &'static str {
        match self {
            Self::NaclSecretbox => "nacl-secretbox",
            Self::Aes256Gcm => "aes-gcm",
        }
    }

    /// Nonce length prefixed to every sealed buffer
    pub fn nonce_len(&self) -> usize {
        match self {
            Self::NaclSecretbox => SECRETBOX_NONCE_SIZE,
            Self::Aes256Gcm => GCM_NONCE_SIZE,
        }
    }

    /// Encrypt plaintext, returning `nonce || ciphertext+tag`
    pub fn seal(&self, key: &FileKey, plaintext: &[u8]) -> Result<Vec<u8>> {
        let mut nonce = vec![0u8; self.nonce_len()];
        rand::RngCore::fill_bytes(&mut OsRng, &mut nonce);

        let ciphertext = match self {
            Self::NaclSecretbox => {
                let cipher = XSalsa20Poly1305::new_from_slice(key.as_bytes())
                    .map_err(|e| CryptoError::Encryption(e.to_string()))?;
                cipher
                    .encrypt(crypto_secretbox::Nonce::from_slice(&nonce), plaintext)
                    .map_err(|e| CryptoError::Encryption(e.to_string()))?
            }
            Self::Aes256Gcm => {
                let cipher = Aes256Gcm::new_from_slice(key.as_bytes())
                    .map_err(|e| CryptoError::Encryption(e.to_string()))?;
                cipher
                    .encrypt(aes_gcm::Nonce::from_slice(&nonce), plaintext)
                    .map_err(|e| CryptoError::Encryption(e.to_string()))?
            }
        };

        let mut out = nonce;
        out.extend_from_slice(&ciphertext);
        Ok(out)
    }

    /// Decrypt a `nonce || ciphertext+tag` buffer
    pub fn open(&self, key: &FileKey, sealed: &[u8]) -> Result<Vec<u8>> {
        let nonce_len = self.nonce_len();
        if sealed.len() < nonce_len + TAG_SIZE {
            return Err(CryptoError::InvalidCiphertext(format!(
                "sealed buffer too short: {} bytes",
                sealed.len()
            )));
        }
        let (nonce, ciphertext) = sealed.split_at(nonce_len);

        match self {
            Self::NaclSecretbox => {
                let cipher = XSalsa20Poly1305::new_from_slice(key.as_bytes())
                    .map_err(|e| CryptoError::Encryption(e.to_string()))?;
                cipher
                    .decrypt(crypto_secretbox::Nonce::from_slice(nonce), ciphertext)
                    .map_err(|_| CryptoError::Decryption)
            }
            Self::Aes256Gcm => {
                let cipher = Aes256Gcm::new_from_slice(key.as_bytes())
                    .map_err(|e| CryptoError::Encryption(e.to_string()))?;
                cipher
                    .decrypt(aes_gcm::Nonce::from_slice(nonce), ciphertext)
                    .map_err(|_| CryptoError::Decryption)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_secretbox_roundtrip() {
        let key = FileKey::generate();
        let cipher = FileCipher::NaclSecretbox;
        let sealed = cipher.seal(&key, b"hello, ").unwrap();
        assert_eq!(sealed.len(), SECRETBOX_NONCE_SIZE + 7 + TAG_SIZE);
        assert_eq!(cipher.open(&key, &sealed).unwrap(), b"hello, ");
    }

    #[test]
    fn test_gcm_roundtrip() {
        let key = FileKey::generate();
        let cipher = FileCipher::Aes256Gcm;
        let sealed = cipher.seal(&key, b"hello, ").unwrap();
        assert_eq!(sealed.len(), GCM_NONCE_SIZE + 7 + TAG_SIZE);
        assert_eq!(cipher.open(&key, &sealed).unwrap(), b"hello, ");
    }

    #[test]
    fn test_wrong_key_fails() {
        let cipher = FileCipher::default();
        let sealed = cipher.seal(&FileKey::generate(), b"secret").unwrap();
        assert!(cipher.open(&FileKey::generate(), &sealed).is_err());
    }

    #[test]
    fn test_tampered_ciphertext_rejected() {
        let key = FileKey::generate();
        let cipher = FileCipher::default();
        let mut sealed = cipher.seal(&key, b"authenticated").unwrap();
        let last = sealed.len() - 1;
        sealed[last] ^= 0x01;
        assert!(cipher.open(&key, &sealed).is_err());
    }

    #[test]
    fn test_truncated_buffer_rejected() {
        let key = FileKey::generate();
        let cipher = FileCipher::default();
        let sealed = cipher.seal(&key, b"short").unwrap();
        assert!(cipher.open(&key, &sealed[..cipher.nonce_len() + 15]).is_err());
        assert!(cipher.open(&key, &[]).is_err());
    }

    #[test]
    fn test_fresh_nonce_per_seal() {
        let key = FileKey::generate();
        let cipher = FileCipher::default();
        let a = cipher.seal(&key, b"same message").unwrap();
        let b = cipher.seal(&key, b"same message").unwrap();
        assert_ne!(a, b);
        assert_ne!(a[..SECRETBOX_NONCE_SIZE], b[..SECRETBOX_NONCE_SIZE]);
    }

    #[test]
    fn test_empty_plaintext() {
        let key = FileKey::generate();
        let cipher = FileCipher::default();
        let sealed = cipher.seal(&key, b"").unwrap();
        assert_eq!(sealed.len(), SECRETBOX_NONCE_SIZE + TAG_SIZE);
        assert_eq!(cipher.open(&key, &sealed).unwrap(), b"");
    }

    #[test]
    fn test_cross_backend_fails() {
        let key = FileKey::generate();
        let sealed = FileCipher::Aes256Gcm.seal(&key, b"backend-bound").unwrap();
        assert!(FileCipher::NaclSecretbox.open(&key, &sealed).is_err());
    }

    #[test]
    fn test_name_parsing() {
        assert_eq!(
            FileCipher::from_name("nacl-secretbox").unwrap(),
            FileCipher::NaclSecretbox
        );
        assert_eq!(
            FileCipher::from_name("aes-gcm").unwrap(),
            FileCipher::Aes256Gcm
        );
        assert!(FileCipher::from_name("rot13").is_err());
    }
}
