//! # tether-transport
//!
//! Framed, optionally encrypted message transport between a companion
//! device and a head unit.
//!
//! The physical pipe (BLE GATT characteristics or an RFCOMM socket) is
//! abstracted behind [`PhysicalConnection`]; everything above it is
//! portable:
//!
//! ```text
//! StreamMessage                 -- encrypt payload, set flags
//!     |
//!     v
//! split_message (packets.rs)    -- N packets sized to the MTU
//!     |
//!     v
//! encode_frame (frames.rs)      -- [length:4 LE][packet bytes]
//!     |
//!     v
//! PhysicalConnection::send_frame
//! ```
//!
//! Inbound, [`MessageStream`] feeds received chunks through a
//! [`FrameReader`](frames::FrameReader) and a
//! [`Reassembler`](packets::Reassembler), decrypts flagged payloads, and
//! yields whole stream messages. The stream is single-reader and
//! single-writer by construction: both paths take `&mut self`.

pub mod connection;
pub mod duplex;
pub mod frames;
pub mod packets;
pub mod stream;

pub use connection::{MtuOverride, PhysicalConnection};
pub use duplex::{duplex_pair, DuplexConnection};
pub use stream::{MessageStream, StreamRole};

/// Error types for transport operations.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    /// MTU too small to fit a frame with any payload.
    #[error("invalid MTU {0}: minimum is {min}", min = packets::MIN_MTU)]
    InvalidMtu(usize),

    /// Refusing to split an empty serialization.
    #[error("refusing to send an empty message")]
    EmptyMessage,

    /// The per-session message-id space ran out.
    #[error("message id space exhausted")]
    MessageIdExhausted,

    /// Malformed packet fields.
    #[error("invalid packet: {0}")]
    InvalidPacket(String),

    /// Packet sequence violated; the stream must be torn down.
    #[error("out-of-order packet for message {message_id}: expected {expected}, got {got}")]
    OutOfOrder {
        message_id: u32,
        expected: u32,
        got: u32,
    },

    /// Inbound frame larger than the hard cap.
    #[error("frame of {0} bytes exceeds maximum {max}", max = frames::MAX_FRAME_SIZE)]
    FrameTooLarge(usize),

    /// AEAD tag mismatch; the stream must be torn down.
    #[error("payload decryption failed")]
    DecryptFailed,

    /// Payload encryption failed.
    #[error("payload encryption failed")]
    EncryptFailed,

    /// An encrypted payload arrived before the key was confirmed.
    #[error("encrypted payload received before key confirmation")]
    KeyNotConfirmed,

    /// A packet or message failed to decode.
    #[error("decode error: {0}")]
    Decode(#[from] prost::DecodeError),

    /// The underlying connection is gone.
    #[error("connection closed")]
    ConnectionClosed,

    /// Physical-layer failure.
    #[error("I/O error: {0}")]
    Io(String),
}

/// Result type alias for transport operations.
pub type Result<T> = std::result::Result<T, TransportError>;
