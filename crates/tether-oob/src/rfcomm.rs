//! RFCOMM OOB channel.
//!
//! After classic Bluetooth pairing, a bonded RFCOMM socket carries one
//! serialized [`OobToken`]. The platform socket lives outside this
//! workspace behind [`RfcommSocket`].

use async_trait::async_trait;
use prost::Message;

use tether_crypto::SessionKeys;
use tether_proto::{OobChannelType, OobToken};

use crate::channel::{session_keys_from_token, OobChannel};
use crate::{OobError, Result};

/// A connected, bonded RFCOMM socket.
#[async_trait]
pub trait RfcommSocket: Send + Sync {
    /// Receive the next complete payload, or `None` when the peer hung up.
    async fn recv_payload(&mut self) -> std::result::Result<Option<Vec<u8>>, String>;
}

/// OOB channel reading the token from an RFCOMM socket.
pub struct BtRfcommChannel<S: RfcommSocket> {
    socket: S,
}

impl<S: RfcommSocket> BtRfcommChannel<S> {
    pub fn new(socket: S) -> Self {
        Self { socket }
    }
}

#[async_trait]
impl<S: RfcommSocket> OobChannel for BtRfcommChannel<S> {
    fn channel_type(&self) -> OobChannelType {
        OobChannelType::BtRfcomm
    }

    async fn read_data(&mut self) -> Result<SessionKeys> {
        let payload = self
            .socket
            .recv_payload()
            .await
            .map_err(OobError::Socket)?
            .ok_or(OobError::ChannelExhausted)?;
        let token = OobToken::decode(payload.as_slice())?;
        session_keys_from_token(&token)
    }
}
