//! HMAC-SHA256.
//!
//! Used for reconnection challenges: both sides authenticate the handshake
//! verification bytes under the stored identification key, and the head
//! unit advertises a truncated challenge in its service data.

use hmac::{Hmac, Mac};
use sha2::Sha256;
use subtle::ConstantTimeEq;

use crate::{CryptoError, Result};

type HmacSha256 = Hmac<Sha256>;

/// Compute `HMAC-SHA256(key, data)`.
pub fn sign(key: &[u8], data: &[u8]) -> Result<[u8; 32]> {
    let mut mac = HmacSha256::new_from_slice(key)
        .map_err(|e| CryptoError::KeyDerivation(e.to_string()))?;
    mac.update(data);
    let tag = mac.finalize().into_bytes();
    let mut out = [0u8; 32];
    out.copy_from_slice(tag.as_slice());
    Ok(out)
}

/// Constant-time comparison of two MAC tags (or any secret byte strings).
pub fn verify(expected: &[u8], actual: &[u8]) -> bool {
    expected.ct_eq(actual).into()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sign_is_deterministic() {
        let a = sign(b"key", b"data").expect("sign");
        let b = sign(b"key", b"data").expect("sign");
        assert_eq!(a, b);
    }

    #[test]
    fn test_different_keys_differ() {
        let a = sign(b"key-a", b"data").expect("sign");
        let b = sign(b"key-b", b"data").expect("sign");
        assert_ne!(a, b);
    }

    #[test]
    fn test_verify_matches() {
        let tag = sign(b"key", b"data").expect("sign");
        assert!(verify(&tag, &tag));
        let other = sign(b"key", b"other").expect("sign");
        assert!(!verify(&tag, &other));
    }

    #[test]
    fn test_verify_length_mismatch() {
        let tag = sign(b"key", b"data").expect("sign");
        assert!(!verify(&tag, &tag[..16]));
    }
}
