//! Setup-phase wire helpers shared by the initiator FSM and the
//! responder: handshake frames, verification payloads, and the encrypted
//! device-id / identification-key exchange.

use std::time::Duration;

use prost::Message;
use tokio::time::timeout;

use tether_proto::{OperationType, StreamMessage, VerificationCode, VerificationCodeState};
use tether_transport::{MessageStream, PhysicalConnection};
use tether_types::{DeviceId, IdentificationKey};

use crate::{PairingError, Result};

fn setup_message(operation: OperationType, payload: Vec<u8>) -> StreamMessage {
    StreamMessage {
        payload,
        operation: operation as i32,
        is_payload_encrypted: false,
        original_message_size: 0,
        recipient: None,
    }
}

/// Send one handshake frame.
pub(crate) async fn send_handshake<C: PhysicalConnection>(
    stream: &mut MessageStream<C>,
    payload: Vec<u8>,
) -> Result<()> {
    stream
        .send(setup_message(OperationType::EncryptionHandshake, payload))
        .await?;
    Ok(())
}

/// Await the next handshake-operation payload.
pub(crate) async fn expect_handshake<C: PhysicalConnection>(
    stream: &mut MessageStream<C>,
    step: &'static str,
    wait: Duration,
) -> Result<Vec<u8>> {
    let deadline = timeout(wait, async {
        loop {
            let Some(message) = stream.next_message().await? else {
                return Err(PairingError::TransportLost { step });
            };
            match message.operation_type() {
                Some(OperationType::EncryptionHandshake) => return Ok(message.payload),
                Some(OperationType::Ack) => continue,
                other => {
                    return Err(PairingError::Protocol(format!(
                        "unexpected operation {other:?} during {step}"
                    )))
                }
            }
        }
    })
    .await;
    deadline.map_err(|_| PairingError::PeerTimeout { step })?
}

/// Send a verification payload.
pub(crate) async fn send_verification<C: PhysicalConnection>(
    stream: &mut MessageStream<C>,
    state: VerificationCodeState,
    payload: Vec<u8>,
) -> Result<()> {
    let body = VerificationCode {
        state: state as i32,
        payload,
    };
    send_handshake(stream, body.encode_to_vec()).await
}

/// Await a verification payload in one of the accepted states.
///
/// A `VISUAL_VERIFICATION` notice (the peer announcing it is displaying
/// the code) is skipped when not explicitly accepted, so the two sides'
/// confirmations can cross in either order.
pub(crate) async fn expect_verification<C: PhysicalConnection>(
    stream: &mut MessageStream<C>,
    accepted: &[VerificationCodeState],
    step: &'static str,
    wait: Duration,
) -> Result<VerificationCode> {
    loop {
        let payload = expect_handshake(stream, step, wait).await?;
        let code = VerificationCode::decode(payload.as_slice())
            .map_err(|e| PairingError::Protocol(format!("malformed verification: {e}")))?;
        match code.state_type() {
            Some(state) if accepted.contains(&state) => return Ok(code),
            Some(VerificationCodeState::VisualVerification) => continue,
            other => {
                return Err(PairingError::Protocol(format!(
                    "unexpected verification state {other:?} during {step}"
                )))
            }
        }
    }
}

/// Send an encrypted setup payload (device id or identification key).
async fn send_secret_payload<C: PhysicalConnection>(
    stream: &mut MessageStream<C>,
    payload: Vec<u8>,
) -> Result<()> {
    // CLIENT_MESSAGE without a recipient: consumed by the setup sequence
    // before any session routing exists. Encrypted because the key is
    // confirmed by the time these flow.
    stream
        .send(setup_message(OperationType::ClientMessage, payload))
        .await?;
    Ok(())
}

/// Await an encrypted setup payload.
async fn expect_secret_payload<C: PhysicalConnection>(
    stream: &mut MessageStream<C>,
    step: &'static str,
    wait: Duration,
) -> Result<Vec<u8>> {
    let deadline = timeout(wait, async {
        loop {
            let Some(message) = stream.next_message().await? else {
                return Err(PairingError::TransportLost { step });
            };
            match message.operation_type() {
                Some(OperationType::ClientMessage) if message.recipient.is_none() => {
                    return Ok(message.payload)
                }
                Some(OperationType::Ack) => continue,
                other => {
                    return Err(PairingError::Protocol(format!(
                        "unexpected operation {other:?} during {step}"
                    )))
                }
            }
        }
    })
    .await;
    deadline.map_err(|_| PairingError::PeerTimeout { step })?
}

/// Send this side's device identifier (first encrypted payload).
pub(crate) async fn send_device_id<C: PhysicalConnection>(
    stream: &mut MessageStream<C>,
    device_id: DeviceId,
) -> Result<()> {
    send_secret_payload(stream, device_id.as_bytes().to_vec()).await
}

/// Await the peer's device identifier.
pub(crate) async fn expect_device_id<C: PhysicalConnection>(
    stream: &mut MessageStream<C>,
    wait: Duration,
) -> Result<DeviceId> {
    let payload = expect_secret_payload(stream, "device id", wait).await?;
    DeviceId::from_slice(&payload).ok_or_else(|| {
        PairingError::Protocol(format!("device id of {} bytes", payload.len()))
    })
}

/// Send the freshly generated identification key (association only).
pub(crate) async fn send_identification_key<C: PhysicalConnection>(
    stream: &mut MessageStream<C>,
    key: &IdentificationKey,
) -> Result<()> {
    send_secret_payload(stream, key.as_bytes().to_vec()).await
}

/// Await the identification key (association only).
pub(crate) async fn expect_identification_key<C: PhysicalConnection>(
    stream: &mut MessageStream<C>,
    wait: Duration,
) -> Result<IdentificationKey> {
    let payload = expect_secret_payload(stream, "identification key", wait).await?;
    let bytes: [u8; 32] = payload.as_slice().try_into().map_err(|_| {
        PairingError::Protocol(format!("identification key of {} bytes", payload.len()))
    })?;
    Ok(IdentificationKey::from_bytes(bytes))
}
