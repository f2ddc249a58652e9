//! Content hashing
//!
//! Blobs are addressed by the SHA-256 of their ciphertext. Hashing the
//! ciphertext rather than the plaintext makes the digest safe to index
//! globally: identical plaintext under different file keys produces
//! unrelated digests, and identical ciphertext is by construction the
//! same uploaded object.

use sha2::{Digest, Sha256};

/// SHA-256 of the input, hex encoded
pub fn sha256_hex(data: &[u8]) -> String {
    hex::encode(Sha256::digest(data))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_known_vector() {
        assert_eq!(
            sha256_hex(b"abc"),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }

    #[test]
    fn test_distinct_inputs() {
        assert_ne!(sha256_hex(b"a"), sha256_hex(b"b"));
    }
}
