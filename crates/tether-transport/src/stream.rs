//! Encrypted message stream.

use prost::Message;

use tether_crypto::{aesgcm, SessionKeys};
use tether_proto::{Packet, StreamMessage};

use crate::connection::PhysicalConnection;
use crate::frames::{encode_frame, FrameReader};
use crate::packets::{split_message, Reassembler, FRAME_OVERHEAD};
use crate::{Result, TransportError};

/// Which direction IV this end seals with.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StreamRole {
    /// Companion device: seals with the mobile IV.
    Mobile,
    /// Head unit: seals with the IHU IV.
    Ihu,
}

/// Per-direction AES-GCM state.
///
/// The handshake yields one key and two direction IVs. Each sealed message
/// mixes the sender's encrypted-message sequence number into the trailing
/// four IV bytes, so nonces are unique per (key, direction, message) while
/// both sides derive them independently.
struct StreamCipher {
    keys: SessionKeys,
    role: StreamRole,
    send_seq: u32,
    recv_seq: u32,
}

impl StreamCipher {
    fn nonce(iv: &[u8; 12], sequence: u32) -> [u8; 12] {
        let mut nonce = *iv;
        for (slot, byte) in nonce[8..].iter_mut().zip(sequence.to_be_bytes()) {
            *slot ^= byte;
        }
        nonce
    }

    fn seal_next(&mut self, plaintext: &[u8]) -> Result<Vec<u8>> {
        let iv = match self.role {
            StreamRole::Mobile => &self.keys.mobile_iv,
            StreamRole::Ihu => &self.keys.ihu_iv,
        };
        self.send_seq += 1;
        aesgcm::encrypt(
            &self.keys.encryption_key,
            &Self::nonce(iv, self.send_seq),
            plaintext,
        )
        .map_err(|_| TransportError::EncryptFailed)
    }

    fn open_next(&mut self, ciphertext: &[u8]) -> Result<Vec<u8>> {
        let iv = match self.role {
            StreamRole::Mobile => &self.keys.ihu_iv,
            StreamRole::Ihu => &self.keys.mobile_iv,
        };
        self.recv_seq += 1;
        aesgcm::decrypt(
            &self.keys.encryption_key,
            &Self::nonce(iv, self.recv_seq),
            ciphertext,
        )
        .map_err(|_| TransportError::DecryptFailed)
    }
}

/// Bidirectional stream of [`StreamMessage`]s over a physical connection.
///
/// Single-reader/single-writer by construction: both [`send`] and
/// [`next_message`] take `&mut self`, so concurrent use cannot compile.
///
/// [`send`]: MessageStream::send
/// [`next_message`]: MessageStream::next_message
pub struct MessageStream<C: PhysicalConnection> {
    conn: C,
    role: StreamRole,
    frames: FrameReader,
    reassembler: Reassembler,
    next_message_id: u32,
    cipher: Option<StreamCipher>,
}

impl<C: PhysicalConnection> MessageStream<C> {
    pub fn new(conn: C, role: StreamRole) -> Self {
        Self {
            conn,
            role,
            frames: FrameReader::new(),
            reassembler: Reassembler::new(),
            next_message_id: 1,
            cipher: None,
        }
    }

    /// Largest frame the connection carries.
    pub fn mtu(&self) -> usize {
        self.conn.mtu()
    }

    /// Install the confirmed session keys. From here on, payloads of
    /// encryptable operations are sealed on send and opened on receive.
    pub fn confirm_encryption(&mut self, keys: SessionKeys) {
        self.cipher = Some(StreamCipher {
            keys,
            role: self.role,
            send_seq: 0,
            recv_seq: 0,
        });
    }

    /// Whether the session key has been confirmed.
    pub fn is_encrypted(&self) -> bool {
        self.cipher.is_some()
    }

    /// Send one message; returns its `message_id`.
    ///
    /// Payloads are encrypted before splitting; a message whose
    /// serialization exceeds one packet carries the pre-split plaintext
    /// length in `original_message_size`.
    pub async fn send(&mut self, mut message: StreamMessage) -> Result<u32> {
        let plaintext_len = message.payload.len();
        let encrypt = self
            .cipher
            .is_some()
            && message
                .operation_type()
                .is_some_and(|op| op.encrypted_after_handshake())
            && !message.is_payload_encrypted;
        if encrypt {
            if let Some(cipher) = self.cipher.as_mut() {
                message.payload = cipher.seal_next(&message.payload)?;
                message.is_payload_encrypted = true;
            }
        }

        let mtu = self.conn.mtu();
        let single_packet_capacity = mtu
            .checked_sub(FRAME_OVERHEAD)
            .ok_or(TransportError::InvalidMtu(mtu))?;
        let mut serialized = message.encode_to_vec();
        if serialized.len() > single_packet_capacity {
            message.original_message_size = u32::try_from(plaintext_len)
                .map_err(|_| TransportError::InvalidPacket("oversized payload".to_string()))?;
            serialized = message.encode_to_vec();
        }

        let message_id = self.next_message_id;
        self.next_message_id = self
            .next_message_id
            .checked_add(1)
            .ok_or(TransportError::MessageIdExhausted)?;

        let packets = split_message(message_id, &serialized, mtu)?;
        tracing::trace!(
            message_id,
            packets = packets.len(),
            bytes = serialized.len(),
            "sending message"
        );
        for packet in &packets {
            self.conn.send_frame(&encode_frame(packet)).await?;
        }
        Ok(message_id)
    }

    /// Receive the next whole message, decrypting flagged payloads.
    ///
    /// Returns `None` when the peer closed the connection. Any error is
    /// terminal for the stream.
    pub async fn next_message(&mut self) -> Result<Option<StreamMessage>> {
        loop {
            while let Some(frame) = self.frames.next_frame()? {
                let packet = Packet::decode(frame.as_slice())?;
                if let Some(bytes) = self.reassembler.accept(packet)? {
                    let mut message = StreamMessage::decode(bytes.as_slice())?;
                    if message.is_payload_encrypted {
                        let cipher = self
                            .cipher
                            .as_mut()
                            .ok_or(TransportError::KeyNotConfirmed)?;
                        message.payload = cipher.open_next(&message.payload)?;
                        message.is_payload_encrypted = false;
                    }
                    return Ok(Some(message));
                }
            }
            match self.conn.recv_chunk().await? {
                None => return Ok(None),
                Some(chunk) => self.frames.push(&chunk),
            }
        }
    }

    /// Close the underlying connection.
    pub async fn close(&mut self) {
        self.conn.close().await;
    }
}
