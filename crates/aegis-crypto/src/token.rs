//! Opaque share tokens
//!
//! Share tokens are pure capability names: url-safe, high-entropy, no
//! internal structure. 24 random bytes encode to 32 base64url characters,
//! comfortably above the 128-bit floor.

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use rand::rngs::OsRng;

/// Bytes of entropy in a share token
pub const TOKEN_BYTES: usize = 24;

/// Generate a url-safe share token
pub fn share_token() -> String {
    let mut bytes = [0u8; TOKEN_BYTES];
    rand::RngCore::fill_bytes(&mut OsRng, &mut bytes);
    URL_SAFE_NO_PAD.encode(bytes)
}

/// Encode raw key bytes for transport in a url
pub fn encode_key(bytes: &[u8]) -> String {
    URL_SAFE_NO_PAD.encode(bytes)
}

/// Decode url-transported key bytes
pub fn decode_key(s: &str) -> Result<Vec<u8>, base64::DecodeError> {
    URL_SAFE_NO_PAD.decode(s)
}
