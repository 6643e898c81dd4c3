//! Packet envelope for message splitting.

/// One transport packet carrying a slice of a serialized
/// [`StreamMessage`](crate::stream::StreamMessage).
///
/// `packet_number` is 1-based; `total_packets` is identical across all
/// packets of one message. `message_id` is monotonically increasing per
/// sender per session, starting at 1.
#[derive(Clone, PartialEq, Eq, ::prost::Message)]
pub struct Packet {
    /// 1-based index of this packet within its message.
    #[prost(uint32, tag = "1")]
    pub packet_number: u32,
    /// Number of packets the message was split into.
    #[prost(uint32, tag = "2")]
    pub total_packets: u32,
    /// Identifier shared by all packets of one message.
    #[prost(fixed32, tag = "3")]
    pub message_id: u32,
    /// Slice of the serialized stream message.
    #[prost(bytes = "vec", tag = "4")]
    pub payload: Vec<u8>,
}
