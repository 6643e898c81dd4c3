//! Three-phase committed key agreement.
//!
//! The mobile side initiates, the head unit responds:
//!
//! ```text
//! mobile                                   head unit
//!   | -- Init { random, commitment } -------> |
//!   | <------ Response { random, pk } ------- |
//!   | -- Finish { pk } ---------------------> |
//! ```
//!
//! The initiator commits to its finish frame (SHA-256) before seeing the
//! responder's key, so neither side can steer the shared secret. Both sides
//! then derive, from the X25519 shared secret and the full transcript:
//!
//! - 32 bytes of authentication material (verification code / HMAC input)
//! - the 32-byte session encryption key
//! - two distinct 96-bit direction IVs (mobile and head unit)
//!
//! Frames are the prost messages in [`tether_proto::handshake`]; the
//! encrypted-stream layer carries them with
//! `operation = ENCRYPTION_HANDSHAKE`.

use std::fmt;

use prost::Message;
use rand::rngs::OsRng;
use rand::RngCore;
use sha2::{Digest, Sha256};
use x25519_dalek::{EphemeralSecret, PublicKey};
use zeroize::{Zeroize, ZeroizeOnDrop};

use tether_proto::{HandshakeFinish, HandshakeInit, HandshakeResponse};

use crate::{hkdf, hmac, CryptoError, Result};

/// The only handshake version this build speaks.
pub const HANDSHAKE_VERSION: u32 = 1;

const INFO_AUTH: &[u8] = b"tether authentication";
const INFO_KEY: &[u8] = b"tether encryption key";
const INFO_MOBILE_IV: &[u8] = b"tether mobile iv";
const INFO_IHU_IV: &[u8] = b"tether ihu iv";

/// Session key material derived by the handshake (or delivered over an OOB
/// channel). The two IVs are always distinct.
#[derive(Clone, PartialEq, Eq, Zeroize, ZeroizeOnDrop)]
pub struct SessionKeys {
    /// AES-256-GCM session key.
    pub encryption_key: [u8; 32],
    /// IV for the mobile → head-unit direction.
    pub mobile_iv: [u8; 12],
    /// IV for the head-unit → mobile direction.
    pub ihu_iv: [u8; 12],
}

impl fmt::Debug for SessionKeys {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("SessionKeys(..)")
    }
}

enum Phase {
    /// Initiator: `initial_message` not yet produced.
    Start,
    /// Initiator: init sent, awaiting the responder frame.
    AwaitingResponse,
    /// Responder: awaiting the init frame.
    AwaitingInit,
    /// Responder: response sent, awaiting the finish frame.
    AwaitingFinish,
    /// Shared secret derived.
    Complete,
}

struct Derived {
    auth: [u8; 32],
    keys: SessionKeys,
}

/// One side of the key agreement. Single-use; a failed handshake is
/// discarded together with its ephemeral secret.
pub struct Handshake {
    phase: Phase,
    secret: Option<EphemeralSecret>,
    random: [u8; 32],
    /// Transcript pieces, in exchange order.
    init_bytes: Vec<u8>,
    response_bytes: Vec<u8>,
    finish_bytes: Vec<u8>,
    /// Responder only: commitment from the init frame.
    commitment: [u8; 32],
    derived: Option<Derived>,
}

impl Handshake {
    /// New initiator (mobile side).
    pub fn initiator() -> Self {
        Self::new(Phase::Start)
    }

    /// New responder (head-unit side).
    pub fn responder() -> Self {
        Self::new(Phase::AwaitingInit)
    }

    fn new(phase: Phase) -> Self {
        let mut random = [0u8; 32];
        OsRng.fill_bytes(&mut random);
        Self {
            phase,
            secret: Some(EphemeralSecret::random_from_rng(OsRng)),
            random,
            init_bytes: Vec::new(),
            response_bytes: Vec::new(),
            finish_bytes: Vec::new(),
            commitment: [0u8; 32],
            derived: None,
        }
    }

    fn public_key_bytes(&self) -> Result<[u8; 32]> {
        let secret = self
            .secret
            .as_ref()
            .ok_or(CryptoError::HandshakePhase("ephemeral secret consumed"))?;
        Ok(*PublicKey::from(secret).as_bytes())
    }

    /// Initiator phase one: produce the init frame.
    pub fn initial_message(&mut self) -> Result<Vec<u8>> {
        if !matches!(self.phase, Phase::Start) {
            return Err(CryptoError::HandshakePhase("initial_message"));
        }
        let finish = HandshakeFinish {
            public_key: self.public_key_bytes()?.to_vec(),
        };
        self.finish_bytes = finish.encode_to_vec();

        let commitment = Sha256::digest(&self.finish_bytes);
        let init = HandshakeInit {
            version: HANDSHAKE_VERSION,
            random: self.random.to_vec(),
            commitment: commitment.as_slice().to_vec(),
        };
        self.init_bytes = init.encode_to_vec();
        self.phase = Phase::AwaitingResponse;
        Ok(self.init_bytes.clone())
    }

    /// Initiator phase three: consume the responder frame and produce the
    /// finish frame. The shared secret is derived here.
    pub fn handle_response(&mut self, bytes: &[u8]) -> Result<Vec<u8>> {
        if !matches!(self.phase, Phase::AwaitingResponse) {
            return Err(CryptoError::HandshakePhase("handle_response"));
        }
        let response = HandshakeResponse::decode(bytes)?;
        if response.version != HANDSHAKE_VERSION {
            return Err(CryptoError::UnsupportedHandshakeVersion(response.version));
        }
        let their_public = decode_public_key(&response.public_key)?;
        self.response_bytes = bytes.to_vec();

        self.derive(&their_public)?;
        self.phase = Phase::Complete;
        Ok(self.finish_bytes.clone())
    }

    /// Responder phase two: consume the init frame and produce the response
    /// frame.
    pub fn handle_init(&mut self, bytes: &[u8]) -> Result<Vec<u8>> {
        if !matches!(self.phase, Phase::AwaitingInit) {
            return Err(CryptoError::HandshakePhase("handle_init"));
        }
        let init = HandshakeInit::decode(bytes)?;
        if init.version != HANDSHAKE_VERSION {
            return Err(CryptoError::UnsupportedHandshakeVersion(init.version));
        }
        self.commitment = init
            .commitment
            .as_slice()
            .try_into()
            .map_err(|_| CryptoError::InvalidInput("commitment must be 32 bytes".to_string()))?;
        self.init_bytes = bytes.to_vec();

        let response = HandshakeResponse {
            version: HANDSHAKE_VERSION,
            random: self.random.to_vec(),
            public_key: self.public_key_bytes()?.to_vec(),
        };
        self.response_bytes = response.encode_to_vec();
        self.phase = Phase::AwaitingFinish;
        Ok(self.response_bytes.clone())
    }

    /// Responder phase three: consume the finish frame, check it against
    /// the commitment, and derive the shared secret.
    pub fn handle_finish(&mut self, bytes: &[u8]) -> Result<()> {
        if !matches!(self.phase, Phase::AwaitingFinish) {
            return Err(CryptoError::HandshakePhase("handle_finish"));
        }
        let digest = Sha256::digest(bytes);
        if !hmac::verify(&self.commitment, digest.as_slice()) {
            return Err(CryptoError::CommitmentMismatch);
        }
        let finish = HandshakeFinish::decode(bytes)?;
        let their_public = decode_public_key(&finish.public_key)?;
        self.finish_bytes = bytes.to_vec();

        self.derive(&their_public)?;
        self.phase = Phase::Complete;
        Ok(())
    }

    fn derive(&mut self, their_public: &PublicKey) -> Result<()> {
        let secret = self
            .secret
            .take()
            .ok_or(CryptoError::HandshakePhase("ephemeral secret consumed"))?;
        let shared = secret.diffie_hellman(their_public);
        if !shared.was_contributory() {
            return Err(CryptoError::NonContributory);
        }

        let mut transcript = Sha256::new();
        transcript.update(&self.init_bytes);
        transcript.update(&self.response_bytes);
        transcript.update(&self.finish_bytes);
        let salt = transcript.finalize();
        let salt = salt.as_slice();

        let ikm = shared.as_bytes();
        self.derived = Some(Derived {
            auth: hkdf::derive_key(salt, ikm, INFO_AUTH)?,
            keys: SessionKeys {
                encryption_key: hkdf::derive_key(salt, ikm, INFO_KEY)?,
                mobile_iv: hkdf::derive_iv(salt, ikm, INFO_MOBILE_IV)?,
                ihu_iv: hkdf::derive_iv(salt, ikm, INFO_IHU_IV)?,
            },
        });
        Ok(())
    }

    /// Whether the shared secret has been derived.
    pub fn is_complete(&self) -> bool {
        matches!(self.phase, Phase::Complete)
    }

    /// The 32 bytes of authentication material both sides agree on.
    ///
    /// Source for the visual verification code, the OOB sealed payload,
    /// and the reconnection HMAC.
    pub fn verification_bytes(&self) -> Result<&[u8; 32]> {
        self.derived
            .as_ref()
            .map(|d| &d.auth)
            .ok_or(CryptoError::HandshakePhase("verification_bytes"))
    }

    /// Render the verification code at the length the resolved security
    /// version calls for.
    pub fn verification_code(&self, length: usize) -> Result<String> {
        crate::verification::render_code(self.verification_bytes()?, length)
    }

    /// Consume the handshake and return the derived session keys.
    pub fn into_session_keys(mut self) -> Result<SessionKeys> {
        let derived = self
            .derived
            .take()
            .ok_or(CryptoError::HandshakePhase("into_session_keys"))?;
        Ok(derived.keys)
    }
}

fn decode_public_key(bytes: &[u8]) -> Result<PublicKey> {
    let raw: [u8; 32] = bytes
        .try_into()
        .map_err(|_| CryptoError::InvalidKeyLength {
            expected: 32,
            actual: bytes.len(),
        })?;
    Ok(PublicKey::from(raw))
}
