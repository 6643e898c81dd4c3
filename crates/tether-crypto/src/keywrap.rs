//! At-rest wrapping of persistent secrets.
//!
//! The associated-peer store never writes plaintext key material; every
//! identification or encryption key passes through an injected
//! [`KeyWrapper`] first. Hosts back this with a platform keystore; the
//! bundled [`AesGcmKeyWrapper`] seals under a caller-held key-encryption
//! key.

use rand::rngs::OsRng;
use rand::RngCore;

use crate::{aesgcm, CryptoError, Result};

/// Seam for sealing secrets before they reach disk.
pub trait KeyWrapper: Send + Sync {
    /// Seal plaintext key material.
    fn wrap(&self, plaintext: &[u8]) -> Result<Vec<u8>>;

    /// Open previously wrapped key material.
    fn unwrap_key(&self, wrapped: &[u8]) -> Result<Vec<u8>>;
}

/// AES-256-GCM wrapper: output is `nonce || ciphertext`.
pub struct AesGcmKeyWrapper {
    kek: [u8; aesgcm::KEY_SIZE],
}

impl AesGcmKeyWrapper {
    /// Wrap under the given key-encryption key.
    pub fn new(kek: [u8; aesgcm::KEY_SIZE]) -> Self {
        Self { kek }
    }
}

impl KeyWrapper for AesGcmKeyWrapper {
    fn wrap(&self, plaintext: &[u8]) -> Result<Vec<u8>> {
        let mut nonce = [0u8; aesgcm::NONCE_SIZE];
        OsRng.fill_bytes(&mut nonce);
        let ciphertext = aesgcm::encrypt(&self.kek, &nonce, plaintext)?;

        let mut out = Vec::with_capacity(nonce.len() + ciphertext.len());
        out.extend_from_slice(&nonce);
        out.extend_from_slice(&ciphertext);
        Ok(out)
    }

    fn unwrap_key(&self, wrapped: &[u8]) -> Result<Vec<u8>> {
        if wrapped.len() < aesgcm::NONCE_SIZE + aesgcm::TAG_SIZE {
            return Err(CryptoError::InvalidInput(
                "wrapped key too short".to_string(),
            ));
        }
        let (nonce_bytes, ciphertext) = wrapped.split_at(aesgcm::NONCE_SIZE);
        let mut nonce = [0u8; aesgcm::NONCE_SIZE];
        nonce.copy_from_slice(nonce_bytes);
        aesgcm::decrypt(&self.kek, &nonce, ciphertext)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wrap_unwrap_roundtrip() {
        let wrapper = AesGcmKeyWrapper::new([0x11u8; 32]);
        let key = [0xABu8; 32];

        let wrapped = wrapper.wrap(&key).expect("wrap");
        assert_ne!(wrapped, key.to_vec());

        let opened = wrapper.unwrap_key(&wrapped).expect("unwrap");
        assert_eq!(opened, key.to_vec());
    }

    #[test]
    fn test_wrapping_is_randomized() {
        let wrapper = AesGcmKeyWrapper::new([0x11u8; 32]);
        let a = wrapper.wrap(b"secret").expect("wrap");
        let b = wrapper.wrap(b"secret").expect("wrap");
        assert_ne!(a, b);
    }

    #[test]
    fn test_wrong_kek_fails() {
        let wrapper = AesGcmKeyWrapper::new([0x11u8; 32]);
        let wrapped = wrapper.wrap(b"secret").expect("wrap");

        let other = AesGcmKeyWrapper::new([0x22u8; 32]);
        assert!(other.unwrap_key(&wrapped).is_err());
    }

    #[test]
    fn test_truncated_input_rejected() {
        let wrapper = AesGcmKeyWrapper::new([0x11u8; 32]);
        assert!(wrapper.unwrap_key(&[0u8; 8]).is_err());
    }
}
