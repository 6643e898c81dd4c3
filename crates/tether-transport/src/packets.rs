//! Message splitting and reassembly.

use std::collections::HashMap;

use tether_proto::Packet;

use crate::frames::LENGTH_PREFIX_SIZE;
use crate::{Result, TransportError};

/// Worst-case wire overhead of the non-payload packet fields: two varint
/// fields (tag + 5 bytes each), one fixed32 field (tag + 4 bytes), and the
/// payload field's tag + length varint.
pub const PACKET_WIRE_OVERHEAD: usize = 6 + 6 + 5 + 6;

/// Bytes of each frame unavailable to payload.
pub const FRAME_OVERHEAD: usize = LENGTH_PREFIX_SIZE + PACKET_WIRE_OVERHEAD;

/// Smallest MTU that leaves room for one payload byte per packet.
pub const MIN_MTU: usize = FRAME_OVERHEAD + 1;

/// Split a serialized stream message into packets sized for `mtu`.
///
/// Every packet carries at least one payload byte; `total_packets` is
/// identical across the result.
pub fn split_message(message_id: u32, serialized: &[u8], mtu: usize) -> Result<Vec<Packet>> {
    if mtu < MIN_MTU {
        return Err(TransportError::InvalidMtu(mtu));
    }
    if serialized.is_empty() {
        return Err(TransportError::EmptyMessage);
    }

    let chunk_size = mtu - FRAME_OVERHEAD;
    let total = serialized.len().div_ceil(chunk_size);
    let total_packets = u32::try_from(total).map_err(|_| {
        TransportError::InvalidPacket(format!("message needs {total} packets"))
    })?;

    let packets = serialized
        .chunks(chunk_size)
        .enumerate()
        .map(|(index, chunk)| Packet {
            packet_number: index as u32 + 1,
            total_packets,
            message_id,
            payload: chunk.to_vec(),
        })
        .collect();
    Ok(packets)
}

struct PendingMessage {
    total_packets: u32,
    next_expected: u32,
    bytes: Vec<u8>,
}

/// In-order packet reassembler.
///
/// Packets of one message must arrive with strictly increasing
/// `packet_number`. A duplicate of the most recently accepted number is
/// dropped (links occasionally redeliver the last write); any other gap or
/// reordering is a protocol violation that tears the stream down.
#[derive(Default)]
pub struct Reassembler {
    pending: HashMap<u32, PendingMessage>,
    /// Message whose final packet was most recently accepted, for
    /// dropping a redelivered final packet without double delivery.
    last_completed: Option<u32>,
}

impl Reassembler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Accept one packet. Returns the reassembled message serialization
    /// when this packet completes it.
    pub fn accept(&mut self, packet: Packet) -> Result<Option<Vec<u8>>> {
        if packet.packet_number == 0 || packet.packet_number > packet.total_packets {
            return Err(TransportError::InvalidPacket(format!(
                "packet {}/{} of message {}",
                packet.packet_number, packet.total_packets, packet.message_id
            )));
        }
        if packet.payload.is_empty() {
            return Err(TransportError::InvalidPacket(format!(
                "empty payload in packet {} of message {}",
                packet.packet_number, packet.message_id
            )));
        }

        use std::collections::hash_map::Entry;
        let entry = match self.pending.entry(packet.message_id) {
            Entry::Occupied(occupied) => {
                let entry = occupied.into_mut();
                if entry.total_packets != packet.total_packets {
                    return Err(TransportError::InvalidPacket(format!(
                        "total_packets changed from {} to {} in message {}",
                        entry.total_packets, packet.total_packets, packet.message_id
                    )));
                }
                entry
            }
            Entry::Vacant(vacant) => {
                if self.last_completed == Some(packet.message_id)
                    && packet.packet_number == packet.total_packets
                {
                    // Redelivery of an already-completed final packet.
                    tracing::debug!(
                        message_id = packet.message_id,
                        "dropping duplicate final packet"
                    );
                    return Ok(None);
                }
                if packet.packet_number != 1 {
                    return Err(TransportError::OutOfOrder {
                        message_id: packet.message_id,
                        expected: 1,
                        got: packet.packet_number,
                    });
                }
                vacant.insert(PendingMessage {
                    total_packets: packet.total_packets,
                    next_expected: 1,
                    bytes: Vec::new(),
                })
            }
        };

        if packet.packet_number + 1 == entry.next_expected {
            // Redelivery of the packet we just accepted.
            tracing::debug!(
                message_id = packet.message_id,
                packet_number = packet.packet_number,
                "dropping duplicate packet"
            );
            return Ok(None);
        }
        if packet.packet_number != entry.next_expected {
            let expected = entry.next_expected;
            self.pending.remove(&packet.message_id);
            return Err(TransportError::OutOfOrder {
                message_id: packet.message_id,
                expected,
                got: packet.packet_number,
            });
        }

        entry.bytes.extend_from_slice(&packet.payload);
        entry.next_expected += 1;

        if packet.packet_number == packet.total_packets {
            let bytes = std::mem::take(&mut entry.bytes);
            self.pending.remove(&packet.message_id);
            self.last_completed = Some(packet.message_id);
            Ok(Some(bytes))
        } else {
            Ok(None)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn reassemble_all(packets: Vec<Packet>) -> Vec<u8> {
        let mut reassembler = Reassembler::new();
        let mut complete = None;
        for packet in packets {
            if let Some(bytes) = reassembler.accept(packet).expect("accept") {
                complete = Some(bytes);
            }
        }
        complete.expect("message completed")
    }

    #[test]
    fn test_split_reassemble_roundtrip() {
        let message: Vec<u8> = (0..=255).cycle().take(1000).collect();
        for mtu in [MIN_MTU, 64, 185, 512] {
            let packets = split_message(7, &message, mtu).expect("split");
            assert_eq!(reassemble_all(packets), message, "mtu {mtu}");
        }
    }

    #[test]
    fn test_split_invariants() {
        let message = vec![0xAAu8; 300];
        let packets = split_message(3, &message, 64).expect("split");
        let total = packets.len() as u32;
        for (i, packet) in packets.iter().enumerate() {
            assert_eq!(packet.packet_number, i as u32 + 1);
            assert_eq!(packet.total_packets, total);
            assert_eq!(packet.message_id, 3);
            assert!(!packet.payload.is_empty());
            assert!(packet.payload.len() <= 64 - FRAME_OVERHEAD);
        }
    }

    #[test]
    fn test_single_packet_message() {
        let packets = split_message(1, b"tiny", 185).expect("split");
        assert_eq!(packets.len(), 1);
        assert_eq!(packets[0].total_packets, 1);
    }

    #[test]
    fn test_split_rejects_small_mtu_and_empty_message() {
        assert!(matches!(
            split_message(1, b"data", MIN_MTU - 1),
            Err(TransportError::InvalidMtu(_))
        ));
        assert!(matches!(
            split_message(1, b"", 185),
            Err(TransportError::EmptyMessage)
        ));
    }

    #[test]
    fn test_duplicate_of_last_packet_dropped() {
        let message = vec![1u8; 100];
        let packets = split_message(9, &message, 64).expect("split");
        assert!(packets.len() >= 2);

        let mut reassembler = Reassembler::new();
        assert!(reassembler.accept(packets[0].clone()).expect("first").is_none());
        // Redelivery of the packet just accepted is a no-op.
        assert!(reassembler
            .accept(packets[0].clone())
            .expect("duplicate")
            .is_none());
        for packet in &packets[1..] {
            let _ = reassembler.accept(packet.clone()).expect("rest");
        }
    }

    #[test]
    fn test_no_double_delivery_on_duplicate_final_packet() {
        let packets = split_message(4, b"abc", 185).expect("split");
        let mut reassembler = Reassembler::new();
        assert!(reassembler
            .accept(packets[0].clone())
            .expect("first")
            .is_some());
        // Redelivery of the completed final packet is a no-op.
        assert!(reassembler
            .accept(packets[0].clone())
            .expect("duplicate final")
            .is_none());
        assert!(reassembler.pending.is_empty());
    }

    #[test]
    fn test_gap_raises_out_of_order() {
        let message = vec![2u8; 200];
        let packets = split_message(5, &message, 64).expect("split");
        assert!(packets.len() >= 3);

        let mut reassembler = Reassembler::new();
        let _ = reassembler.accept(packets[0].clone()).expect("first");
        let result = reassembler.accept(packets[2].clone());
        assert!(matches!(
            result,
            Err(TransportError::OutOfOrder {
                expected: 2,
                got: 3,
                ..
            })
        ));
    }

    #[test]
    fn test_first_packet_must_open_message() {
        let message = vec![3u8; 200];
        let packets = split_message(6, &message, 64).expect("split");

        let mut reassembler = Reassembler::new();
        let result = reassembler.accept(packets[1].clone());
        assert!(matches!(
            result,
            Err(TransportError::OutOfOrder { expected: 1, .. })
        ));
    }

    #[test]
    fn test_no_partial_delivery_after_error() {
        let message = vec![4u8; 200];
        let packets = split_message(8, &message, 64).expect("split");

        let mut reassembler = Reassembler::new();
        let _ = reassembler.accept(packets[0].clone()).expect("first");
        assert!(reassembler.accept(packets[2].clone()).is_err());
        // The failed message's state is gone.
        assert!(reassembler.pending.is_empty());
    }

    #[test]
    fn test_interleaved_messages_reassemble() {
        let first = split_message(1, &vec![0x11u8; 120], 64).expect("split");
        let second = split_message(2, &vec![0x22u8; 120], 64).expect("split");

        let mut reassembler = Reassembler::new();
        let mut done = Vec::new();
        for pair in first.iter().zip(second.iter()) {
            for packet in [pair.0, pair.1] {
                if let Some(bytes) = reassembler.accept(packet.clone()).expect("accept") {
                    done.push(bytes);
                }
            }
        }
        assert_eq!(done.len(), 2);
        assert_eq!(done[0], vec![0x11u8; 120]);
        assert_eq!(done[1], vec![0x22u8; 120]);
    }

    #[test]
    fn test_zero_packet_number_rejected() {
        let packet = Packet {
            packet_number: 0,
            total_packets: 1,
            message_id: 1,
            payload: vec![1],
        };
        assert!(matches!(
            Reassembler::new().accept(packet),
            Err(TransportError::InvalidPacket(_))
        ));
    }
}
