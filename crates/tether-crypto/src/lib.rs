//! # tether-crypto
//!
//! Cryptographic primitives for the tether protocol. The suite is fixed —
//! no algorithm negotiation beyond the security-version handshake.
//!
//! ## Modules
//!
//! - [`aesgcm`] — AES-256-GCM AEAD (the only session cipher)
//! - [`hkdf`] — HKDF-SHA256 key and IV derivation
//! - [`hmac`] — HMAC-SHA256 for reconnection challenges
//! - [`handshake`] — three-phase committed X25519 key agreement
//! - [`verification`] — verification-code rendering
//! - [`keywrap`] — at-rest wrapping seam for persistent secrets

pub mod aesgcm;
pub mod handshake;
pub mod hkdf;
pub mod hmac;
pub mod keywrap;
pub mod verification;

pub use handshake::{Handshake, SessionKeys};
pub use keywrap::{AesGcmKeyWrapper, KeyWrapper};

/// Error types for cryptographic operations.
#[derive(Debug, thiserror::Error)]
pub enum CryptoError {
    /// AEAD encryption failed.
    #[error("AEAD encryption failed")]
    AeadEncryption,

    /// AEAD decryption failed (authentication tag mismatch).
    #[error("AEAD decryption failed")]
    AeadDecryption,

    /// Key derivation failed.
    #[error("key derivation failed: {0}")]
    KeyDerivation(String),

    /// Invalid key or IV length.
    #[error("invalid key length: expected {expected}, got {actual}")]
    InvalidKeyLength { expected: usize, actual: usize },

    /// A handshake frame arrived in the wrong phase.
    #[error("handshake out of phase: {0}")]
    HandshakePhase(&'static str),

    /// The peer speaks an unsupported handshake version.
    #[error("unsupported handshake version {0}")]
    UnsupportedHandshakeVersion(u32),

    /// The revealed finish frame does not match the commitment.
    #[error("handshake commitment mismatch")]
    CommitmentMismatch,

    /// The shared secret was non-contributory (low-order peer key).
    #[error("non-contributory shared secret")]
    NonContributory,

    /// A handshake frame failed to decode.
    #[error("decode error: {0}")]
    Decode(#[from] prost::DecodeError),

    /// Invalid input data.
    #[error("invalid input: {0}")]
    InvalidInput(String),
}

/// Convenience result type for cryptographic operations.
pub type Result<T> = std::result::Result<T, CryptoError>;
