//! # tether-proto
//!
//! Wire message definitions for the tether protocol.
//!
//! Every message exchanged between a companion device and a head unit is a
//! protobuf-encoded struct defined here. The structs are hand-written
//! [`prost`] derives with pinned field tags; there is no build-time codegen.
//!
//! ## Layering
//!
//! ```text
//! UpdateCalendars / Query / ...   -- feature payloads
//!         |
//!         v
//! StreamMessage (stream.rs)       -- operation, encryption flag, recipient
//!         |
//!         v
//! Packet (packet.rs)              -- split/reassembly envelope
//!         |
//!         v
//! [length:4 LE][packet bytes]     -- transport frame
//! ```
//!
//! Unknown enum values received from newer peers are never fatal: each enum
//! carries a `from_wire` helper mapping unknown discriminants to the
//! documented default.

pub mod calendar;
pub mod exchange;
pub mod handshake;
pub mod hierarchy;
pub mod oob;
pub mod packet;
pub mod stream;

pub use calendar::{
    Action, Attendee, AttendeeStatus, AttendeeType, Calendar, Event, TimeRange, Timestamp,
    UpdateCalendars, UpdateType,
};
pub use exchange::{CapabilitiesExchange, OobChannelType, VersionExchange};
pub use handshake::{HandshakeFinish, HandshakeInit, HandshakeResponse};
pub use oob::{OobToken, OutOfBandAssociationData};
pub use packet::Packet;
pub use stream::{OperationType, Query, QueryResponse, StreamMessage, VerificationCode, VerificationCodeState};

/// Re-exported so downstream crates encode/decode without naming prost.
pub use prost::Message;

/// Decode failure type re-export.
pub use prost::DecodeError;
