//! # tether-oob
//!
//! Out-of-band verification channels.
//!
//! An OOB channel delivers key material (`encryption key + two direction
//! IVs`) outside the main transport, letting association confirm the key
//! exchange without showing the user a code. Two channel types exist:
//!
//! - [`rfcomm`] — read the token over a bonded RFCOMM socket
//! - a pre-association token parsed from a URI ([`uri`]), e.g. scanned
//!   from a QR code
//!
//! The [`OobChannelManager`](manager::OobChannelManager) races all
//! configured channels and hands the first successful token to the pairing
//! state machine; when every channel fails, association falls back to
//! visual verification.

pub mod channel;
pub mod manager;
pub mod rfcomm;
pub mod uri;

pub use channel::{session_keys_from_token, OobChannel, PreAssociationChannel};
pub use manager::OobChannelManager;
pub use rfcomm::{BtRfcommChannel, RfcommSocket};
pub use uri::{append_oob_parameter, parse_oob_uri, OobUriData};

/// Error types for OOB operations.
#[derive(Debug, thiserror::Error)]
pub enum OobError {
    /// Token fields have the wrong shape.
    #[error("invalid OOB token: {0}")]
    InvalidToken(String),

    /// The token reuses one IV for both directions.
    #[error("OOB token IVs must differ between directions")]
    IvReuse,

    /// The side-channel socket failed.
    #[error("OOB socket error: {0}")]
    Socket(String),

    /// The channel produced nothing (closed or already consumed).
    #[error("OOB channel exhausted")]
    ChannelExhausted,

    /// Malformed URI surface.
    #[error("invalid OOB URI: {0}")]
    InvalidUri(String),

    /// A query parameter uses a reserved prefix this build does not know.
    #[error("unknown reserved parameter {0:?}")]
    ReservedParameter(String),

    /// The URI carries no `oob` parameter.
    #[error("missing oob parameter")]
    MissingOobData,

    /// Token payload failed to decode.
    #[error("decode error: {0}")]
    Decode(#[from] prost::DecodeError),
}

/// Result type alias for OOB operations.
pub type Result<T> = std::result::Result<T, OobError>;
