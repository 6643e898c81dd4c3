//! Responder (head-unit side) of the pairing exchanges.
//!
//! Runs over an already-established connection — the head unit is the
//! GATT server, so its link setup is advertisement + accept rather than
//! the initiator's connect sequence. From version exchange onward the
//! steps mirror [`PairingFsm`](crate::fsm::PairingFsm).

use std::time::Duration;

use tokio::sync::oneshot;
use tokio::time::timeout;

use tether_crypto::{aesgcm, hmac, Handshake, SessionKeys};
use tether_proto::{OobChannelType, VerificationCodeState};
use tether_store::{NewPeerRecord, PeerStore};
use tether_transport::{MessageStream, PhysicalConnection, StreamRole};
use tether_types::{DeviceId, MacAddress};

use crate::exchange;
use crate::resolver::{self, verification_code_length, ResolvedSession};
use crate::{PairingError, Result};

/// Responder tunables.
pub struct ResponderConfig {
    pub exchange_timeout: Duration,
    pub visual_timeout: Duration,
    pub local_capabilities: Vec<OobChannelType>,
    /// Key material this head unit published out of band (QR / RFCOMM),
    /// enabling the OOB verification path.
    pub oob: Option<SessionKeys>,
    /// Visual path: resolves when the head unit's user accepts the code.
    /// `None` auto-accepts (kiosk installs and tests).
    pub host_confirm: Option<oneshot::Receiver<bool>>,
    /// MAC address of the connecting peer, persisted on association.
    pub peer_mac: MacAddress,
    /// Display name of the connecting peer, when known.
    pub peer_name: Option<String>,
}

impl Default for ResponderConfig {
    fn default() -> Self {
        Self {
            exchange_timeout: Duration::from_secs(10),
            visual_timeout: Duration::from_secs(60),
            local_capabilities: vec![OobChannelType::BtRfcomm, OobChannelType::PreAssociation],
            oob: None,
            host_confirm: None,
            peer_mac: MacAddress::from_bytes([0; 6]),
            peer_name: None,
        }
    }
}

/// What this responder run is.
pub enum ResponderMode {
    Associate,
    Reconnect { expected_device_id: DeviceId },
}

/// Output of a successful responder run.
pub struct EstablishedResponder {
    pub device_id: DeviceId,
    pub resolved: ResolvedSession,
    pub stream: MessageStream<Box<dyn PhysicalConnection>>,
}

/// Head-unit half of the pairing exchanges.
pub struct PairingResponder {
    stream: MessageStream<Box<dyn PhysicalConnection>>,
    store: PeerStore,
    config: ResponderConfig,
    mode: ResponderMode,
}

impl PairingResponder {
    pub fn new(
        connection: Box<dyn PhysicalConnection>,
        store: PeerStore,
        config: ResponderConfig,
        mode: ResponderMode,
    ) -> Self {
        Self {
            stream: MessageStream::new(connection, StreamRole::Ihu),
            store,
            config,
            mode,
        }
    }

    /// Drive the responder half to completion.
    pub async fn run(mut self) -> Result<EstablishedResponder> {
        let wait = self.config.exchange_timeout;

        let local_capabilities = self.config.local_capabilities.clone();
        let resolved =
            resolver::exchange(&mut self.stream, &local_capabilities, wait).await?;

        let mut handshake = Handshake::responder();
        let init = exchange::expect_handshake(&mut self.stream, "handshake", wait).await?;
        let response = handshake.handle_init(&init)?;
        exchange::send_handshake(&mut self.stream, response).await?;
        let finish = exchange::expect_handshake(&mut self.stream, "handshake", wait).await?;
        handshake.handle_finish(&finish)?;

        self.verify(&handshake, &resolved).await?;
        self.stream.confirm_encryption(handshake.into_session_keys()?);

        let device_id = self.exchange_identity().await?;

        Ok(EstablishedResponder {
            device_id,
            resolved,
            stream: self.stream,
        })
    }

    async fn verify(&mut self, handshake: &Handshake, resolved: &ResolvedSession) -> Result<()> {
        let verification = *handshake.verification_bytes()?;
        let wait = self.config.exchange_timeout;

        match &self.mode {
            ResponderMode::Reconnect { expected_device_id } => {
                let expected = *expected_device_id;
                let tag = self
                    .store
                    .hmac_with_identification_key(expected, &verification)
                    .await?
                    .ok_or(PairingError::NotAssociated(expected))?;
                let peer = exchange::expect_verification(
                    &mut self.stream,
                    &[VerificationCodeState::ReconnectVerification],
                    "reconnect verification",
                    wait,
                )
                .await?;
                if !hmac::verify(&tag, &peer.payload) {
                    return Err(PairingError::AuthMismatch);
                }
                exchange::send_verification(
                    &mut self.stream,
                    VerificationCodeState::ReconnectVerification,
                    tag.to_vec(),
                )
                .await?;
            }
            ResponderMode::Associate => {
                let peer = exchange::expect_verification(
                    &mut self.stream,
                    &[
                        VerificationCodeState::OobVerification,
                        VerificationCodeState::VisualConfirmation,
                    ],
                    "verification",
                    wait,
                )
                .await?;
                match peer.state_type() {
                    Some(VerificationCodeState::OobVerification) => {
                        let oob = self
                            .config
                            .oob
                            .clone()
                            .ok_or(PairingError::AuthMismatch)?;
                        let opened =
                            aesgcm::decrypt(&oob.encryption_key, &oob.mobile_iv, &peer.payload)
                                .map_err(|_| PairingError::AuthMismatch)?;
                        if !hmac::verify(&verification, &opened) {
                            return Err(PairingError::AuthMismatch);
                        }
                        let sealed =
                            aesgcm::encrypt(&oob.encryption_key, &oob.ihu_iv, &verification)?;
                        exchange::send_verification(
                            &mut self.stream,
                            VerificationCodeState::OobVerification,
                            sealed,
                        )
                        .await?;
                    }
                    Some(VerificationCodeState::VisualConfirmation) => {
                        // The initiator's user confirmed; bind the local
                        // decision and reply.
                        let code = handshake.verification_code(verification_code_length(
                            resolved.security_version,
                        ))?;
                        tracing::info!(%code, "peer confirmed verification code");
                        if let Some(confirm) = self.config.host_confirm.take() {
                            let accepted = timeout(self.config.visual_timeout, confirm)
                                .await
                                .map_err(|_| PairingError::PeerTimeout {
                                    step: "visual confirmation",
                                })?
                                .unwrap_or(false);
                            if !accepted {
                                return Err(PairingError::AuthMismatch);
                            }
                        }
                        exchange::send_verification(
                            &mut self.stream,
                            VerificationCodeState::VisualConfirmation,
                            Vec::new(),
                        )
                        .await?;
                    }
                    _ => return Err(PairingError::AuthMismatch),
                }
            }
        }
        Ok(())
    }

    async fn exchange_identity(&mut self) -> Result<DeviceId> {
        let wait = self.config.exchange_timeout;

        // The initiator sends first.
        let peer_id = exchange::expect_device_id(&mut self.stream, wait).await?;
        let local_id = self.store.local_device_id().await?;
        exchange::send_device_id(&mut self.stream, local_id).await?;

        match &self.mode {
            ResponderMode::Reconnect { expected_device_id } => {
                if peer_id != *expected_device_id {
                    return Err(PairingError::IdentityMismatch {
                        expected: *expected_device_id,
                        received: peer_id,
                    });
                }
            }
            ResponderMode::Associate => {
                let identification_key =
                    exchange::expect_identification_key(&mut self.stream, wait).await?;
                self.store
                    .add(NewPeerRecord {
                        device_id: peer_id,
                        identification_key,
                        encryption_key: None,
                        mac_address: self.config.peer_mac,
                        name: self.config.peer_name.clone(),
                    })
                    .await?;
            }
        }
        Ok(peer_id)
    }
}
