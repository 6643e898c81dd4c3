//! Verification-code rendering.
//!
//! The authentication material from the handshake is rendered as a short
//! decimal string for visual comparison. The resolved security version
//! picks the length (6 or 16 characters).

use crate::{CryptoError, Result};

/// Shortest code the protocol allows.
pub const MIN_CODE_LENGTH: usize = 6;

/// Longest code the protocol allows (bounded by the 32 bytes of
/// authentication material).
pub const MAX_CODE_LENGTH: usize = 32;

/// Render `length` decimal digits from authentication material.
///
/// # Errors
///
/// Returns [`CryptoError::InvalidInput`] when `length` is outside
/// `6..=32` or the material is shorter than `length` bytes.
pub fn render_code(material: &[u8], length: usize) -> Result<String> {
    if !(MIN_CODE_LENGTH..=MAX_CODE_LENGTH).contains(&length) {
        return Err(CryptoError::InvalidInput(format!(
            "verification code length {length} outside {MIN_CODE_LENGTH}..={MAX_CODE_LENGTH}"
        )));
    }
    if material.len() < length {
        return Err(CryptoError::InvalidInput(format!(
            "verification material too short: {} bytes for a {length}-character code",
            material.len()
        )));
    }
    Ok(material[..length]
        .iter()
        .map(|byte| char::from(b'0' + byte % 10))
        .collect())
}
