//! Stream message envelope, query payloads, and verification payloads.

use uuid::Uuid;

/// Operation carried by a [`StreamMessage`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, ::prost::Enumeration)]
#[repr(i32)]
pub enum OperationType {
    /// Never sent; decodes of missing fields land here.
    OperationUnknown = 0,
    /// Key-agreement and verification payloads (never encrypted).
    EncryptionHandshake = 1,
    /// Feature payload routed by recipient.
    ClientMessage = 2,
    /// Request half of the query layer.
    Query = 3,
    /// Response half of the query layer.
    QueryResponse = 4,
    /// Stream-level acknowledgement (unused by features).
    Ack = 5,
    /// Feature teardown notice.
    Disable = 6,
}

impl OperationType {
    /// Whether payloads with this operation are encrypted once the session
    /// key is confirmed.
    pub fn encrypted_after_handshake(self) -> bool {
        matches!(
            self,
            OperationType::ClientMessage
                | OperationType::Query
                | OperationType::QueryResponse
                | OperationType::Disable
        )
    }
}

/// The unit of exchange between two peers, possibly split across packets.
#[derive(Clone, PartialEq, Eq, ::prost::Message)]
pub struct StreamMessage {
    /// Feature payload; ciphertext when `is_payload_encrypted`.
    #[prost(bytes = "vec", tag = "1")]
    pub payload: Vec<u8>,
    /// Operation discriminant; see [`OperationType`].
    #[prost(enumeration = "OperationType", tag = "2")]
    pub operation: i32,
    /// True when `payload` is AES-GCM ciphertext.
    #[prost(bool, tag = "3")]
    pub is_payload_encrypted: bool,
    /// Zero when the sender did not split; otherwise the pre-split
    /// plaintext length.
    #[prost(uint32, tag = "4")]
    pub original_message_size: u32,
    /// 16-byte feature identifier on the remote peer (little-endian mixed).
    #[prost(bytes = "vec", optional, tag = "5")]
    pub recipient: Option<Vec<u8>>,
}

impl StreamMessage {
    /// The operation, or `None` for discriminants this build does not know.
    pub fn operation_type(&self) -> Option<OperationType> {
        OperationType::try_from(self.operation).ok()
    }

    /// The recipient as a UUID, when present and well-formed.
    pub fn recipient_uuid(&self) -> Option<Uuid> {
        let bytes: [u8; 16] = self.recipient.as_deref()?.try_into().ok()?;
        Some(Uuid::from_bytes_le(bytes))
    }

    /// Set the recipient from a UUID (little-endian byte layout).
    pub fn set_recipient_uuid(&mut self, recipient: Uuid) {
        self.recipient = Some(recipient.to_bytes_le().to_vec());
    }
}

/// Request half of the query layer.
#[derive(Clone, PartialEq, Eq, ::prost::Message)]
pub struct Query {
    /// Per-session monotonic identifier; `0` is reserved for the
    /// synchronous failure response.
    #[prost(fixed32, tag = "1")]
    pub id: u32,
    /// Recipient on the *sender's* side that the response targets.
    #[prost(bytes = "vec", tag = "2")]
    pub sender: Vec<u8>,
    /// Request payload.
    #[prost(bytes = "vec", tag = "3")]
    pub request: Vec<u8>,
    /// Optional opaque parameters.
    #[prost(bytes = "vec", tag = "4")]
    pub parameters: Vec<u8>,
}

/// Response half of the query layer.
#[derive(Clone, PartialEq, Eq, ::prost::Message)]
pub struct QueryResponse {
    /// Identifier copied from the query.
    #[prost(fixed32, tag = "1")]
    pub id: u32,
    /// Whether the remote feature handled the query.
    #[prost(bool, tag = "2")]
    pub is_successful: bool,
    /// Response payload.
    #[prost(bytes = "vec", tag = "3")]
    pub response: Vec<u8>,
}

/// Phase of the post-handshake verification exchange.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, ::prost::Enumeration)]
#[repr(i32)]
pub enum VerificationCodeState {
    /// Unset.
    VerificationUnknown = 0,
    /// The sender is displaying the code and awaiting user confirmation.
    VisualVerification = 1,
    /// The sender's user confirmed the displayed code.
    VisualConfirmation = 2,
    /// `payload` carries the verification bytes sealed with the OOB key.
    OobVerification = 3,
    /// `payload` carries the HMAC of the verification bytes under the
    /// stored identification key (reconnection).
    ReconnectVerification = 4,
}

/// Verification payload exchanged with `operation = ENCRYPTION_HANDSHAKE`
/// after the third handshake message.
#[derive(Clone, PartialEq, Eq, ::prost::Message)]
pub struct VerificationCode {
    /// Which verification flow this message belongs to.
    #[prost(enumeration = "VerificationCodeState", tag = "1")]
    pub state: i32,
    /// Flow-specific bytes; empty for visual messages.
    #[prost(bytes = "vec", tag = "2")]
    pub payload: Vec<u8>,
}

impl VerificationCode {
    /// The state, or `None` for unknown discriminants.
    pub fn state_type(&self) -> Option<VerificationCodeState> {
        VerificationCodeState::try_from(self.state).ok()
    }
}
