//! Length-prefixed frame codec.
//!
//! Wire format: `[length:4 LE][serialized Packet]`.

use prost::Message;
use tether_proto::Packet;

use crate::{Result, TransportError};

/// Size of the length prefix.
pub const LENGTH_PREFIX_SIZE: usize = 4;

/// Hard cap on a single frame, to prevent allocation attacks.
pub const MAX_FRAME_SIZE: usize = 65_536;

/// Encode a packet as one transport frame.
pub fn encode_frame(packet: &Packet) -> Vec<u8> {
    let body = packet.encode_to_vec();
    let mut frame = Vec::with_capacity(LENGTH_PREFIX_SIZE + body.len());
    frame.extend_from_slice(&(body.len() as u32).to_le_bytes());
    frame.extend_from_slice(&body);
    frame
}

/// Incremental frame extractor.
///
/// Chunks from the transport may split or coalesce frames; push them in
/// and pop complete frame bodies out.
#[derive(Debug, Default)]
pub struct FrameReader {
    buf: Vec<u8>,
}

impl FrameReader {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append received bytes.
    pub fn push(&mut self, chunk: &[u8]) {
        self.buf.extend_from_slice(chunk);
    }

    /// Extract the next complete frame body, if one is buffered.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::FrameTooLarge`] for a length prefix over
    /// [`MAX_FRAME_SIZE`]; the stream must be torn down since framing sync
    /// is lost.
    pub fn next_frame(&mut self) -> Result<Option<Vec<u8>>> {
        if self.buf.len() < LENGTH_PREFIX_SIZE {
            return Ok(None);
        }
        let mut prefix = [0u8; LENGTH_PREFIX_SIZE];
        prefix.copy_from_slice(&self.buf[..LENGTH_PREFIX_SIZE]);
        let length = u32::from_le_bytes(prefix) as usize;
        if length > MAX_FRAME_SIZE {
            return Err(TransportError::FrameTooLarge(length));
        }
        if self.buf.len() < LENGTH_PREFIX_SIZE + length {
            return Ok(None);
        }
        let body = self.buf[LENGTH_PREFIX_SIZE..LENGTH_PREFIX_SIZE + length].to_vec();
        self.buf.drain(..LENGTH_PREFIX_SIZE + length);
        Ok(Some(body))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn packet(payload: &[u8]) -> Packet {
        Packet {
            packet_number: 1,
            total_packets: 1,
            message_id: 1,
            payload: payload.to_vec(),
        }
    }

    #[test]
    fn test_frame_roundtrip() {
        let frame = encode_frame(&packet(b"hello"));
        let mut reader = FrameReader::new();
        reader.push(&frame);

        let body = reader.next_frame().expect("frame").expect("complete");
        let restored = Packet::decode(body.as_slice()).expect("decode");
        assert_eq!(restored.payload, b"hello");
        assert!(reader.next_frame().expect("no error").is_none());
    }

    #[test]
    fn test_partial_frames_buffer() {
        let frame = encode_frame(&packet(b"split me"));
        let mut reader = FrameReader::new();

        reader.push(&frame[..3]);
        assert!(reader.next_frame().expect("incomplete").is_none());
        reader.push(&frame[3..7]);
        assert!(reader.next_frame().expect("incomplete").is_none());
        reader.push(&frame[7..]);
        assert!(reader.next_frame().expect("frame").is_some());
    }

    #[test]
    fn test_coalesced_frames_split() {
        let mut bytes = encode_frame(&packet(b"one"));
        bytes.extend_from_slice(&encode_frame(&packet(b"two")));
        let mut reader = FrameReader::new();
        reader.push(&bytes);

        let first = reader.next_frame().expect("frame").expect("first");
        let second = reader.next_frame().expect("frame").expect("second");
        assert_eq!(Packet::decode(first.as_slice()).expect("decode").payload, b"one");
        assert_eq!(Packet::decode(second.as_slice()).expect("decode").payload, b"two");
        assert!(reader.next_frame().expect("drained").is_none());
    }

    #[test]
    fn test_oversized_length_rejected() {
        let mut reader = FrameReader::new();
        reader.push(&(u32::MAX).to_le_bytes());
        assert!(matches!(
            reader.next_frame(),
            Err(TransportError::FrameTooLarge(_))
        ));
    }
}
