//! # tether-pairing
//!
//! Pairing and reconnection state machine.
//!
//! Drives a peer from a discovered advertisement to an authenticated
//! encrypted session:
//!
//! ```text
//! TRANSPORT_CONNECTING -> (BONDING_WAIT) -> MTU_NEGOTIATING
//!     -> SERVICES_DISCOVERING -> NOTIFY_ENABLING -> (PEER_NAME_READ)
//!     -> VERSION_EXCHANGING -> CAPS_EXCHANGING
//!     -> HANDSHAKE_INIT -> HANDSHAKE_CONT -> VERIFY
//!     -> KEY_CONFIRMED -> DEVICE_ID_EXCHANGE -> READY
//! ```
//!
//! **Association** (first pairing) confirms the key exchange visually or
//! over an OOB channel and persists a fresh identification key.
//! **Reconnection** skips user interaction: both sides HMAC the handshake
//! verification bytes under the stored identification key.
//!
//! The platform GATT stack stays outside this crate behind
//! [`GattPeripheral`](gatt::GattPeripheral); the head-unit half of the
//! exchanges lives in [`responder`] so tests can run both peers in
//! process.

mod exchange;
pub mod filter;
pub mod fsm;
pub mod gatt;
pub mod manager;
pub mod resolver;
pub mod responder;
pub mod testing;

pub use fsm::{EstablishedSession, PairingConfig, PairingFsm, PairingMode, PairingState};
pub use manager::PairingManager;
pub use resolver::{verification_code_length, ResolutionError, ResolvedSession};
pub use responder::{EstablishedResponder, PairingResponder, ResponderConfig, ResponderMode};

use tether_types::{DeviceId, FailureKind};

/// Error types for pairing operations.
#[derive(Debug, thiserror::Error)]
pub enum PairingError {
    /// Connect/MTU/discover retries exhausted.
    #[error("transport stuck during {step}")]
    TransportStuck { step: &'static str },

    /// Required GATT characteristics missing after a cache refresh.
    #[error("required GATT characteristics missing")]
    ServiceValidation,

    /// Version or capability resolution failed.
    #[error(transparent)]
    Resolution(#[from] ResolutionError),

    /// Visual, OOB, or HMAC confirmation failed.
    #[error("verification mismatch")]
    AuthMismatch,

    /// The received device id does not match the targeted record.
    #[error("expected device id {expected}, received {received}")]
    IdentityMismatch {
        expected: DeviceId,
        received: DeviceId,
    },

    /// The peer did not answer an exchange in time.
    #[error("peer did not respond during {step}")]
    PeerTimeout { step: &'static str },

    /// The transport dropped mid-exchange.
    #[error("transport lost during {step}")]
    TransportLost { step: &'static str },

    /// A second attempt was started on a pending session.
    #[error("a pairing attempt is already in progress")]
    AlreadyInProgress,

    /// Reconnection targeted a peer the store does not know.
    #[error("peer {0} is not associated")]
    NotAssociated(DeviceId),

    /// Unexpected wire content during setup.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// The attempt was cancelled locally.
    #[error("pairing cancelled")]
    Cancelled,

    #[error(transparent)]
    Transport(#[from] tether_transport::TransportError),

    #[error(transparent)]
    Store(#[from] tether_store::StoreError),

    #[error(transparent)]
    Crypto(#[from] tether_crypto::CryptoError),
}

impl PairingError {
    /// Classification surfaced through host callbacks.
    pub fn failure_kind(&self) -> FailureKind {
        match self {
            PairingError::TransportStuck { .. } | PairingError::ServiceValidation => {
                FailureKind::TransportStuck
            }
            PairingError::Resolution(ResolutionError::UnsupportedVersion { .. }) => {
                FailureKind::UnsupportedVersion
            }
            PairingError::Resolution(ResolutionError::PeerTimeout(_)) => FailureKind::Timeout,
            PairingError::Resolution(_) => FailureKind::Protocol,
            PairingError::AuthMismatch => FailureKind::AuthMismatch,
            PairingError::IdentityMismatch { .. } | PairingError::NotAssociated(_) => {
                FailureKind::IdentityMismatch
            }
            PairingError::PeerTimeout { .. } => FailureKind::Timeout,
            PairingError::TransportLost { .. } | PairingError::Transport(_) => FailureKind::Stream,
            PairingError::Store(_) => FailureKind::Store,
            PairingError::Crypto(_)
            | PairingError::Protocol(_)
            | PairingError::AlreadyInProgress => FailureKind::Protocol,
            PairingError::Cancelled => FailureKind::Cancelled,
        }
    }
}

/// Result type alias for pairing operations.
pub type Result<T> = std::result::Result<T, PairingError>;
