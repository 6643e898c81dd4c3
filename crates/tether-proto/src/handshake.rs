//! Key-agreement frames.
//!
//! Three-phase exchange carried in `ENCRYPTION_HANDSHAKE` stream messages:
//! the initiator commits to its finish frame, the responder answers with
//! its public key, and the initiator reveals the committed frame.

/// First frame: the initiator's commitment.
#[derive(Clone, PartialEq, Eq, ::prost::Message)]
pub struct HandshakeInit {
    /// Handshake protocol version.
    #[prost(uint32, tag = "1")]
    pub version: u32,
    /// 32 random bytes mixed into the transcript.
    #[prost(bytes = "vec", tag = "2")]
    pub random: Vec<u8>,
    /// SHA-256 over the serialized [`HandshakeFinish`] the initiator will
    /// send in phase three.
    #[prost(bytes = "vec", tag = "3")]
    pub commitment: Vec<u8>,
}

/// Second frame: the responder's contribution.
#[derive(Clone, PartialEq, Eq, ::prost::Message)]
pub struct HandshakeResponse {
    /// Handshake protocol version.
    #[prost(uint32, tag = "1")]
    pub version: u32,
    /// 32 random bytes mixed into the transcript.
    #[prost(bytes = "vec", tag = "2")]
    pub random: Vec<u8>,
    /// Responder's ephemeral X25519 public key.
    #[prost(bytes = "vec", tag = "3")]
    pub public_key: Vec<u8>,
}

/// Third frame: the initiator reveals the committed public key.
#[derive(Clone, PartialEq, Eq, ::prost::Message)]
pub struct HandshakeFinish {
    /// Initiator's ephemeral X25519 public key.
    #[prost(bytes = "vec", tag = "1")]
    pub public_key: Vec<u8>,
}
