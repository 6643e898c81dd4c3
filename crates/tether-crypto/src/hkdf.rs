//! HKDF-SHA256 key and IV derivation.

use hkdf::Hkdf;
use sha2::Sha256;

use crate::{CryptoError, Result};

/// Derive a 32-byte key.
pub fn derive_key(salt: &[u8], ikm: &[u8], info: &[u8]) -> Result<[u8; 32]> {
    let mut okm = [0u8; 32];
    expand(salt, ikm, info, &mut okm)?;
    Ok(okm)
}

/// Derive a 12-byte AES-GCM IV.
pub fn derive_iv(salt: &[u8], ikm: &[u8], info: &[u8]) -> Result<[u8; 12]> {
    let mut okm = [0u8; 12];
    expand(salt, ikm, info, &mut okm)?;
    Ok(okm)
}

/// Fill `okm` with HKDF-SHA256 output.
pub fn expand(salt: &[u8], ikm: &[u8], info: &[u8], okm: &mut [u8]) -> Result<()> {
    let hk = Hkdf::<Sha256>::new(Some(salt), ikm);
    hk.expand(info, okm)
        .map_err(|e| CryptoError::KeyDerivation(e.to_string()))
}
