//! Initiator (mobile-side) pairing state machine.

use std::time::Duration;

use rand::rngs::OsRng;
use rand::RngCore;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::timeout;
use uuid::Uuid;

use tether_crypto::{aesgcm, hmac, Handshake, SessionKeys};
use tether_oob::{OobChannel, OobChannelManager};
use tether_proto::{OobChannelType, VerificationCodeState};
use tether_store::{NewPeerRecord, PeerStore};
use tether_transport::{MessageStream, PhysicalConnection, StreamRole};
use tether_types::{
    AssociationEvent, DeviceId, IdentificationKey, MacAddress, SERVER_WRITE_CHARACTERISTIC_UUID,
};

use crate::exchange;
use crate::gatt::{validate_services, BondingState, GattEvent, GattPeripheral};
use crate::resolver::{self, verification_code_length, ResolvedSession};
use crate::{PairingError, Result};

/// Largest ATT MTU worth requesting.
pub const MAX_REQUEST_MTU: usize = 517;

/// MTU assumed when the stack never reports the negotiation result.
pub const FALLBACK_MTU: usize = 185;

/// FSM states, in transition order.
///
/// `Discovering` belongs to the host's scanner (see [`crate::filter`]);
/// `Disconnected` is the terminal the session layer reports when an
/// established link later drops. Both are part of the observable state
/// set even though this struct never holds them itself.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PairingState {
    Idle,
    Discovering,
    TransportConnecting,
    BondingWait,
    MtuNegotiating,
    ServicesDiscovering,
    NotifyEnabling,
    PeerNameRead,
    VersionExchanging,
    CapsExchanging,
    HandshakeInit,
    HandshakeCont,
    Verify,
    KeyConfirmed,
    DeviceIdExchange,
    Ready,
    Failed,
    Disconnected,
}

/// Tunables; the defaults match production behavior.
#[derive(Clone)]
pub struct PairingConfig {
    /// Requested ATT MTU; `None` asks for the implementation maximum.
    pub mtu_override: Option<usize>,
    /// Retry budget for connect, MTU, and service discovery, each counted
    /// independently.
    pub max_retry: u32,
    pub connect_timeout: Duration,
    /// Stale-stack bound: a silent MTU callback past this proceeds anyway.
    pub mtu_timeout: Duration,
    /// Bound on every peer exchange (version, caps, handshake, device id).
    pub exchange_timeout: Duration,
    /// Bound on the user confirming the displayed code.
    pub visual_timeout: Duration,
    /// Bound on the OOB channel race before falling back to visual.
    pub oob_timeout: Duration,
    /// Bound on the OS finishing a bonding it started mid-setup.
    pub bonding_timeout: Duration,
    /// OOB channel types this build offers in the capability exchange.
    pub local_capabilities: Vec<OobChannelType>,
}

impl Default for PairingConfig {
    fn default() -> Self {
        Self {
            mtu_override: None,
            max_retry: 3,
            connect_timeout: Duration::from_secs(10),
            mtu_timeout: Duration::from_secs(3),
            exchange_timeout: Duration::from_secs(10),
            visual_timeout: Duration::from_secs(60),
            oob_timeout: Duration::from_secs(5),
            bonding_timeout: Duration::from_secs(30),
            local_capabilities: vec![OobChannelType::BtRfcomm, OobChannelType::PreAssociation],
        }
    }
}

/// What this attempt is.
pub enum PairingMode {
    /// First-time pairing; `oob` channels race for key material, visual
    /// verification is the fallback.
    Associate { oob: Vec<Box<dyn OobChannel>> },
    /// Re-establishing a session with a stored peer.
    Reconnect { expected_device_id: DeviceId },
}

/// Output of a successful run: an encrypted stream ready for the session
/// layer.
pub struct EstablishedSession {
    pub device_id: DeviceId,
    pub resolved: ResolvedSession,
    pub stream: MessageStream<Box<dyn PhysicalConnection>>,
}

enum StepWait {
    Got(GattEvent),
    BondingPause,
    Failed(String),
    TimedOut,
}

/// Single-owner pairing attempt. Construct, then [`run`](Self::run) once.
pub struct PairingFsm {
    peripheral: Option<Box<dyn GattPeripheral>>,
    store: PeerStore,
    config: PairingConfig,
    mode: PairingMode,
    peer_mac: MacAddress,
    advertised_name: Option<String>,
    events: mpsc::Sender<AssociationEvent>,
    /// Visual path only: resolves when the user accepts or rejects the
    /// displayed code.
    host_confirm: Option<oneshot::Receiver<bool>>,
    state: PairingState,
}

impl PairingFsm {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        peripheral: Box<dyn GattPeripheral>,
        store: PeerStore,
        config: PairingConfig,
        mode: PairingMode,
        peer_mac: MacAddress,
        advertised_name: Option<String>,
        events: mpsc::Sender<AssociationEvent>,
        host_confirm: Option<oneshot::Receiver<bool>>,
    ) -> Self {
        Self {
            peripheral: Some(peripheral),
            store,
            config,
            mode,
            peer_mac,
            advertised_name,
            events,
            host_confirm,
            state: PairingState::Idle,
        }
    }

    /// Current state, for observability.
    pub fn state(&self) -> PairingState {
        self.state
    }

    fn is_association(&self) -> bool {
        matches!(self.mode, PairingMode::Associate { .. })
    }

    async fn emit(&self, event: AssociationEvent) {
        if self.is_association() {
            let _ = self.events.send(event).await;
        }
    }

    fn set_state(&mut self, state: PairingState) {
        tracing::debug!(from = ?self.state, to = ?state, "pairing transition");
        self.state = state;
    }

    /// Drive the attempt to completion. Exactly one terminal outcome is
    /// produced: the established session, or a typed error after
    /// transport cleanup and a single `Failed` event.
    pub async fn run(mut self) -> Result<EstablishedSession> {
        self.emit(AssociationEvent::Started).await;
        match self.run_inner().await {
            Ok(session) => {
                self.set_state(PairingState::Ready);
                self.emit(AssociationEvent::Completed(session.device_id)).await;
                Ok(session)
            }
            Err(error) => {
                if let Some(mut peripheral) = self.peripheral.take() {
                    peripheral.disconnect().await;
                }
                self.set_state(PairingState::Failed);
                tracing::warn!(%error, "pairing failed");
                self.emit(AssociationEvent::Failed(error.failure_kind()))
                    .await;
                Err(error)
            }
        }
    }

    async fn run_inner(&mut self) -> Result<EstablishedSession> {
        // The OOB race runs concurrently with transport bring-up.
        let oob_task = self.start_oob_race();

        self.connect_transport().await?;
        let mtu = self.negotiate_mtu().await?;
        let service = self.discover_and_validate().await?;

        self.set_state(PairingState::NotifyEnabling);
        self.peripheral_mut()?
            .enable_notifications(service, SERVER_WRITE_CHARACTERISTIC_UUID)
            .await?;

        if let Some(name) = self.read_peer_name().await {
            self.advertised_name = Some(name);
        }

        let connection = self
            .peripheral
            .take()
            .ok_or_else(|| PairingError::Protocol("peripheral consumed".to_string()))?
            .into_connection(mtu);
        let mut stream = MessageStream::new(connection, StreamRole::Mobile);

        self.set_state(PairingState::VersionExchanging);
        let local_capabilities = self.config.local_capabilities.clone();
        let resolved = resolver::exchange(
            &mut stream,
            &local_capabilities,
            self.config.exchange_timeout,
        )
        .await?;
        self.set_state(PairingState::CapsExchanging);

        let handshake = self.run_handshake(&mut stream).await?;
        self.verify(&mut stream, &handshake, &resolved, oob_task)
            .await?;

        self.set_state(PairingState::KeyConfirmed);
        stream.confirm_encryption(handshake.into_session_keys()?);

        let device_id = self.exchange_identity(&mut stream).await?;

        Ok(EstablishedSession {
            device_id,
            resolved,
            stream,
        })
    }

    fn start_oob_race(&mut self) -> Option<JoinHandle<Option<SessionKeys>>> {
        let PairingMode::Associate { oob } = &mut self.mode else {
            return None;
        };
        let channels = std::mem::take(oob);
        if channels.is_empty() {
            return None;
        }
        let manager = OobChannelManager::new(channels);
        Some(tokio::spawn(manager.read_first()))
    }

    fn peripheral_mut(&mut self) -> Result<&mut dyn GattPeripheral> {
        match self.peripheral.as_deref_mut() {
            Some(peripheral) => Ok(peripheral),
            None => Err(PairingError::Protocol("peripheral consumed".to_string())),
        }
    }

    /// Wait for an event matching `want`, surfacing bonding interruptions
    /// and link loss.
    async fn await_gatt(
        &mut self,
        want: fn(&GattEvent) -> bool,
        wait: Duration,
        step: &'static str,
    ) -> Result<StepWait> {
        let peripheral = self.peripheral_mut()?;
        let waited = timeout(wait, async {
            loop {
                match peripheral.next_event().await {
                    None => return Err(PairingError::TransportLost { step }),
                    Some(GattEvent::Disconnected) => {
                        return Err(PairingError::TransportLost { step })
                    }
                    Some(GattEvent::ConnectFailed(reason)) => {
                        return Ok(StepWait::Failed(reason))
                    }
                    Some(GattEvent::BondingChanged(BondingState::Bonding)) => {
                        return Ok(StepWait::BondingPause)
                    }
                    Some(event) if want(&event) => return Ok(StepWait::Got(event)),
                    Some(event) => {
                        tracing::trace!(?event, step, "ignoring event");
                    }
                }
            }
        })
        .await;
        match waited {
            Err(_) => Ok(StepWait::TimedOut),
            Ok(inner) => inner,
        }
    }

    /// Hold all transport steps until the OS reports the bond settled,
    /// then let the caller restart its step.
    async fn wait_bonding_settled(&mut self, step: &'static str) -> Result<()> {
        self.set_state(PairingState::BondingWait);
        let bound = self.config.bonding_timeout;
        match self
            .await_gatt(
                |event| {
                    matches!(
                        event,
                        GattEvent::BondingChanged(BondingState::Bonded)
                            | GattEvent::BondingChanged(BondingState::None)
                    )
                },
                bound,
                step,
            )
            .await?
        {
            StepWait::Got(_) => Ok(()),
            StepWait::BondingPause => Ok(()),
            StepWait::Failed(_) | StepWait::TimedOut => {
                Err(PairingError::TransportStuck { step })
            }
        }
    }

    async fn connect_transport(&mut self) -> Result<()> {
        self.set_state(PairingState::TransportConnecting);
        let wait = self.config.connect_timeout;
        let mut attempts = 0u32;
        while attempts < self.config.max_retry {
            attempts += 1;
            self.peripheral_mut()?.connect().await?;
            match self
                .await_gatt(
                    |event| matches!(event, GattEvent::Connected),
                    wait,
                    "connect",
                )
                .await?
            {
                StepWait::Got(_) => return Ok(()),
                StepWait::BondingPause => {
                    self.wait_bonding_settled("connect").await?;
                    self.set_state(PairingState::TransportConnecting);
                    // The pause does not consume a retry.
                    attempts = attempts.saturating_sub(1);
                }
                StepWait::Failed(reason) => {
                    tracing::warn!(%reason, attempts, "connect attempt failed");
                }
                StepWait::TimedOut => {
                    tracing::warn!(attempts, "connect attempt timed out");
                }
            }
        }
        Err(PairingError::TransportStuck { step: "connect" })
    }

    async fn negotiate_mtu(&mut self) -> Result<usize> {
        self.set_state(PairingState::MtuNegotiating);
        let request = self.config.mtu_override.unwrap_or(MAX_REQUEST_MTU);
        let wait = self.config.mtu_timeout;

        let mut attempts = 0u32;
        loop {
            attempts += 1;
            match self.peripheral_mut()?.request_mtu(request).await {
                Ok(()) => {}
                Err(error) if attempts < self.config.max_retry => {
                    tracing::warn!(%error, attempts, "MTU request failed");
                    continue;
                }
                Err(_) => return Err(PairingError::TransportStuck { step: "mtu" }),
            }
            match self
                .await_gatt(
                    |event| matches!(event, GattEvent::MtuChanged(_)),
                    wait,
                    "mtu",
                )
                .await?
            {
                StepWait::Got(GattEvent::MtuChanged(mtu)) => {
                    return Ok(mtu.max(tether_transport::packets::MIN_MTU));
                }
                StepWait::Got(_) => unreachable!("filtered by predicate"),
                StepWait::BondingPause => {
                    self.wait_bonding_settled("mtu").await?;
                    self.set_state(PairingState::MtuNegotiating);
                }
                StepWait::Failed(_) => {
                    return Err(PairingError::TransportLost { step: "mtu" })
                }
                StepWait::TimedOut => {
                    // Stale stack: the callback never fires on some
                    // devices. Proceed to discovery regardless.
                    tracing::warn!("MTU callback missing; proceeding with fallback");
                    return Ok(FALLBACK_MTU);
                }
            }
        }
    }

    async fn discover_and_validate(&mut self) -> Result<Uuid> {
        self.set_state(PairingState::ServicesDiscovering);
        let wait = self.config.exchange_timeout;
        let mut attempts = 0u32;
        let mut refreshed = false;
        while attempts < self.config.max_retry {
            attempts += 1;
            self.peripheral_mut()?.discover_services().await?;
            match self
                .await_gatt(
                    |event| matches!(event, GattEvent::ServicesDiscovered),
                    wait,
                    "discover services",
                )
                .await?
            {
                StepWait::Got(_) => {
                    let services = self.peripheral_mut()?.services();
                    if let Some(service) = validate_services(&services) {
                        return Ok(service);
                    }
                    if refreshed {
                        return Err(PairingError::ServiceValidation);
                    }
                    tracing::warn!("required characteristics missing; refreshing service cache");
                    refreshed = true;
                    self.peripheral_mut()?.refresh_service_cache().await?;
                    attempts = attempts.saturating_sub(1);
                }
                StepWait::BondingPause => {
                    self.wait_bonding_settled("discover services").await?;
                    self.set_state(PairingState::ServicesDiscovering);
                    attempts = attempts.saturating_sub(1);
                }
                StepWait::Failed(_) => {
                    return Err(PairingError::TransportLost {
                        step: "discover services",
                    })
                }
                StepWait::TimedOut => {
                    tracing::warn!(attempts, "service discovery timed out");
                }
            }
        }
        Err(PairingError::TransportStuck {
            step: "discover services",
        })
    }

    /// Best-effort GAP name read; the advertisement name wins when set.
    async fn read_peer_name(&mut self) -> Option<String> {
        if !self.is_association() || self.advertised_name.is_some() {
            return self.advertised_name.clone();
        }
        self.set_state(PairingState::PeerNameRead);
        match self.peripheral_mut() {
            Ok(peripheral) => match peripheral.read_device_name().await {
                Ok(name) => name,
                Err(error) => {
                    tracing::debug!(%error, "peer name read failed");
                    None
                }
            },
            Err(_) => None,
        }
    }

    async fn run_handshake(
        &mut self,
        stream: &mut MessageStream<Box<dyn PhysicalConnection>>,
    ) -> Result<Handshake> {
        self.set_state(PairingState::HandshakeInit);
        let mut handshake = Handshake::initiator();
        let init = handshake.initial_message()?;
        exchange::send_handshake(stream, init).await?;

        self.set_state(PairingState::HandshakeCont);
        let response =
            exchange::expect_handshake(stream, "handshake", self.config.exchange_timeout).await?;
        let finish = handshake.handle_response(&response)?;
        exchange::send_handshake(stream, finish).await?;
        Ok(handshake)
    }

    async fn verify(
        &mut self,
        stream: &mut MessageStream<Box<dyn PhysicalConnection>>,
        handshake: &Handshake,
        resolved: &ResolvedSession,
        oob_task: Option<JoinHandle<Option<SessionKeys>>>,
    ) -> Result<()> {
        self.set_state(PairingState::Verify);
        let verification = *handshake.verification_bytes()?;
        let wait = self.config.exchange_timeout;
        let reconnect_target = match &self.mode {
            PairingMode::Reconnect { expected_device_id } => Some(*expected_device_id),
            PairingMode::Associate { .. } => None,
        };

        match reconnect_target {
            Some(expected) => {
                let tag = self
                    .store
                    .hmac_with_identification_key(expected, &verification)
                    .await?
                    .ok_or(PairingError::NotAssociated(expected))?;
                exchange::send_verification(
                    stream,
                    VerificationCodeState::ReconnectVerification,
                    tag.to_vec(),
                )
                .await?;
                let peer = exchange::expect_verification(
                    stream,
                    &[VerificationCodeState::ReconnectVerification],
                    "reconnect verification",
                    wait,
                )
                .await?;
                if !hmac::verify(&tag, &peer.payload) {
                    return Err(PairingError::AuthMismatch);
                }
            }
            None => {
                let oob_data = match oob_task {
                    Some(task) => timeout(self.config.oob_timeout, task)
                        .await
                        .ok()
                        .and_then(|joined| joined.ok())
                        .flatten(),
                    None => None,
                };
                match oob_data {
                    Some(oob) => self.verify_oob(stream, &verification, &oob, wait).await?,
                    None => {
                        self.verify_visual(stream, handshake, resolved, wait)
                            .await?
                    }
                }
            }
        }
        Ok(())
    }

    async fn verify_oob(
        &mut self,
        stream: &mut MessageStream<Box<dyn PhysicalConnection>>,
        verification: &[u8; 32],
        oob: &SessionKeys,
        wait: Duration,
    ) -> Result<()> {
        let sealed = aesgcm::encrypt(&oob.encryption_key, &oob.mobile_iv, verification)?;
        exchange::send_verification(stream, VerificationCodeState::OobVerification, sealed)
            .await?;

        let peer = exchange::expect_verification(
            stream,
            &[VerificationCodeState::OobVerification],
            "oob verification",
            wait,
        )
        .await?;
        let opened = aesgcm::decrypt(&oob.encryption_key, &oob.ihu_iv, &peer.payload)
            .map_err(|_| PairingError::AuthMismatch)?;
        if !hmac::verify(verification, &opened) {
            return Err(PairingError::AuthMismatch);
        }
        Ok(())
    }

    async fn verify_visual(
        &mut self,
        stream: &mut MessageStream<Box<dyn PhysicalConnection>>,
        handshake: &Handshake,
        resolved: &ResolvedSession,
        wait: Duration,
    ) -> Result<()> {
        let code =
            handshake.verification_code(verification_code_length(resolved.security_version))?;
        exchange::send_verification(
            stream,
            VerificationCodeState::VisualVerification,
            Vec::new(),
        )
        .await?;
        self.emit(AssociationEvent::AuthStringAvailable(code)).await;

        let confirm = self
            .host_confirm
            .take()
            .ok_or_else(|| PairingError::Protocol("no host confirmation channel".to_string()))?;
        let accepted = timeout(self.config.visual_timeout, confirm)
            .await
            .map_err(|_| PairingError::PeerTimeout {
                step: "visual confirmation",
            })?
            .unwrap_or(false);
        if !accepted {
            return Err(PairingError::AuthMismatch);
        }
        exchange::send_verification(stream, VerificationCodeState::VisualConfirmation, Vec::new())
            .await?;

        // The peer's confirmation binds the same decision on its side.
        exchange::expect_verification(
            stream,
            &[VerificationCodeState::VisualConfirmation],
            "visual confirmation",
            wait,
        )
        .await?;
        Ok(())
    }

    async fn exchange_identity(
        &mut self,
        stream: &mut MessageStream<Box<dyn PhysicalConnection>>,
    ) -> Result<DeviceId> {
        self.set_state(PairingState::DeviceIdExchange);
        let wait = self.config.exchange_timeout;

        let local_id = self.store.local_device_id().await?;
        exchange::send_device_id(stream, local_id).await?;
        let peer_id = exchange::expect_device_id(stream, wait).await?;
        self.emit(AssociationEvent::DeviceIdReceived(peer_id)).await;

        match &self.mode {
            PairingMode::Reconnect { expected_device_id } => {
                if peer_id != *expected_device_id {
                    return Err(PairingError::IdentityMismatch {
                        expected: *expected_device_id,
                        received: peer_id,
                    });
                }
            }
            PairingMode::Associate { .. } => {
                let mut key_bytes = [0u8; 32];
                OsRng.fill_bytes(&mut key_bytes);
                let identification_key = IdentificationKey::from_bytes(key_bytes);
                exchange::send_identification_key(stream, &identification_key).await?;

                self.store
                    .add(NewPeerRecord {
                        device_id: peer_id,
                        identification_key,
                        encryption_key: None,
                        mac_address: self.peer_mac,
                        name: self.advertised_name.clone(),
                    })
                    .await?;
            }
        }
        Ok(peer_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use tether_crypto::AesGcmKeyWrapper;
    use tether_oob::PreAssociationChannel;
    use tether_transport::duplex_pair;

    use crate::responder::{PairingResponder, ResponderConfig, ResponderMode};
    use crate::testing::FakePeripheral;

    fn test_store() -> PeerStore {
        let conn = tether_store::open_memory().expect("open db");
        PeerStore::new(conn, Arc::new(AesGcmKeyWrapper::new([0x33u8; 32])))
    }

    fn test_mac() -> MacAddress {
        "AA:BB:CC:DD:EE:FF".parse().expect("mac")
    }

    fn oob_keys() -> SessionKeys {
        SessionKeys {
            encryption_key: [0x44u8; 32],
            mobile_iv: [0x01u8; 12],
            ihu_iv: [0x02u8; 12],
        }
    }

    struct Rig {
        mobile_store: PeerStore,
        ihu_store: PeerStore,
        events: mpsc::Receiver<AssociationEvent>,
        confirm: Option<oneshot::Sender<bool>>,
        fsm: PairingFsm,
        responder: crate::responder::PairingResponder,
    }

    fn rig(
        mode: PairingMode,
        responder_mode: ResponderMode,
        responder_oob: Option<SessionKeys>,
        shape: fn(FakePeripheral) -> FakePeripheral,
    ) -> Rig {
        let mobile_store = test_store();
        let ihu_store = test_store();
        let (mobile_conn, ihu_conn) = duplex_pair(185);
        let peripheral = shape(FakePeripheral::new(mobile_conn));
        let (confirm_tx, confirm_rx) = oneshot::channel();
        let (events_tx, events) = mpsc::channel(16);

        let fsm = PairingFsm::new(
            Box::new(peripheral),
            mobile_store.clone(),
            PairingConfig::default(),
            mode,
            test_mac(),
            Some("Car".to_string()),
            events_tx,
            Some(confirm_rx),
        );
        let responder = PairingResponder::new(
            Box::new(ihu_conn),
            ihu_store.clone(),
            ResponderConfig {
                oob: responder_oob,
                peer_mac: test_mac(),
                peer_name: Some("Phone".to_string()),
                ..ResponderConfig::default()
            },
            responder_mode,
        );
        Rig {
            mobile_store,
            ihu_store,
            events,
            confirm: Some(confirm_tx),
            fsm,
            responder,
        }
    }

    async fn drive_visual(rig: Rig) -> (Result<EstablishedSession>, Vec<AssociationEvent>) {
        let Rig {
            events: mut events_rx,
            mut confirm,
            fsm,
            responder,
            ..
        } = rig;
        let ihu_task = tokio::spawn(responder.run());
        let mobile_task = tokio::spawn(fsm.run());

        let mut events = Vec::new();
        while let Some(event) = events_rx.recv().await {
            if let AssociationEvent::AuthStringAvailable(_) = &event {
                if let Some(tx) = confirm.take() {
                    let _ = tx.send(true);
                }
            }
            events.push(event);
        }
        let result = mobile_task.await.expect("join mobile");
        let _ = ihu_task.await.expect("join ihu");
        (result, events)
    }

    #[tokio::test]
    async fn test_association_with_visual_verification() {
        let rig = rig(
            PairingMode::Associate { oob: Vec::new() },
            ResponderMode::Associate,
            None,
            |p| p,
        );
        let mobile_store = rig.mobile_store.clone();
        let ihu_store = rig.ihu_store.clone();

        let (result, events) = drive_visual(rig).await;
        let session = result.expect("association succeeds");

        // The exchanged ids are each side's local id.
        let ihu_id = ihu_store.local_device_id().await.expect("ihu id");
        assert_eq!(session.device_id, ihu_id);

        // The verification code length is pinned by the security version.
        let code = events.iter().find_map(|e| match e {
            AssociationEvent::AuthStringAvailable(code) => Some(code.clone()),
            _ => None,
        });
        assert_eq!(
            code.expect("code emitted").len(),
            verification_code_length(session.resolved.security_version)
        );

        // Exactly one completion event.
        let completions = events
            .iter()
            .filter(|e| matches!(e, AssociationEvent::Completed(_)))
            .count();
        assert_eq!(completions, 1);

        // Both stores now hold exactly one peer.
        assert_eq!(mobile_store.retrieve_all().await.expect("peers").len(), 1);
        assert_eq!(ihu_store.retrieve_all().await.expect("peers").len(), 1);
    }

    #[tokio::test]
    async fn test_association_with_oob_verification() {
        let keys = oob_keys();
        let rig = rig(
            PairingMode::Associate {
                oob: vec![Box::new(PreAssociationChannel::new(keys.clone()))],
            },
            ResponderMode::Associate,
            Some(keys),
            |p| p,
        );
        let mobile_store = rig.mobile_store.clone();

        let (result, events) = drive_visual(rig).await;
        result.expect("oob association succeeds");

        // No code surfaced: OOB accepted the key without user input.
        assert!(events
            .iter()
            .all(|e| !matches!(e, AssociationEvent::AuthStringAvailable(_))));
        assert_eq!(mobile_store.retrieve_all().await.expect("peers").len(), 1);
    }

    #[tokio::test]
    async fn test_oob_key_mismatch_fails_association() {
        let mut wrong = oob_keys();
        wrong.encryption_key = [0x55u8; 32];
        let rig = rig(
            PairingMode::Associate {
                oob: vec![Box::new(PreAssociationChannel::new(oob_keys()))],
            },
            ResponderMode::Associate,
            Some(wrong),
            |p| p,
        );
        let mobile_store = rig.mobile_store.clone();

        let (result, events) = drive_visual(rig).await;
        assert!(result.is_err());
        assert!(events
            .iter()
            .any(|e| matches!(e, AssociationEvent::Failed(_))));
        // Nothing persisted on failure.
        assert!(mobile_store.retrieve_all().await.expect("peers").is_empty());
    }

    #[tokio::test]
    async fn test_visual_decline_is_auth_mismatch() {
        let rig = rig(
            PairingMode::Associate { oob: Vec::new() },
            ResponderMode::Associate,
            None,
            |p| p,
        );
        let mobile_store = rig.mobile_store.clone();
        let Rig {
            events: mut events_rx,
            mut confirm,
            fsm,
            responder,
            ..
        } = rig;

        let _ihu_task = tokio::spawn(responder.run());
        let mobile_task = tokio::spawn(fsm.run());

        while let Some(event) = events_rx.recv().await {
            if matches!(event, AssociationEvent::AuthStringAvailable(_)) {
                if let Some(tx) = confirm.take() {
                    let _ = tx.send(false);
                }
            }
        }
        let result = mobile_task.await.expect("join");
        assert!(matches!(result, Err(PairingError::AuthMismatch)));
        assert!(mobile_store.retrieve_all().await.expect("peers").is_empty());
    }

    async fn associate_stores() -> (PeerStore, PeerStore, DeviceId, DeviceId) {
        let rig = rig(
            PairingMode::Associate { oob: Vec::new() },
            ResponderMode::Associate,
            None,
            |p| p,
        );
        let mobile_store = rig.mobile_store.clone();
        let ihu_store = rig.ihu_store.clone();
        let (result, _) = drive_visual(rig).await;
        result.expect("association");

        let mobile_id = mobile_store.local_device_id().await.expect("id");
        let ihu_id = ihu_store.local_device_id().await.expect("id");
        (mobile_store, ihu_store, mobile_id, ihu_id)
    }

    #[tokio::test]
    async fn test_reconnection_with_stored_key() {
        let (mobile_store, ihu_store, mobile_id, ihu_id) = associate_stores().await;

        let (mobile_conn, ihu_conn) = duplex_pair(185);
        let (events_tx, _events) = mpsc::channel(16);
        let fsm = PairingFsm::new(
            Box::new(FakePeripheral::new(mobile_conn)),
            mobile_store.clone(),
            PairingConfig::default(),
            PairingMode::Reconnect {
                expected_device_id: ihu_id,
            },
            test_mac(),
            None,
            events_tx,
            None,
        );
        let responder = PairingResponder::new(
            Box::new(ihu_conn),
            ihu_store.clone(),
            ResponderConfig::default(),
            ResponderMode::Reconnect {
                expected_device_id: mobile_id,
            },
        );

        let ihu_task = tokio::spawn(responder.run());
        let session = fsm.run().await.expect("reconnection succeeds");
        assert_eq!(session.device_id, ihu_id);
        let _ = ihu_task.await.expect("join ihu").expect("responder ok");

        // The stored record count is unchanged.
        assert_eq!(mobile_store.retrieve_all().await.expect("peers").len(), 1);
    }

    #[tokio::test]
    async fn test_reconnection_key_mismatch_fails() {
        let (mobile_store, _ihu_store, mobile_id, ihu_id) = associate_stores().await;

        // A store with a different identification key for the same peer.
        let rogue_store = test_store();
        let _ = rogue_store.local_device_id().await.expect("id");
        rogue_store
            .add(tether_store::NewPeerRecord {
                device_id: mobile_id,
                identification_key: IdentificationKey::from_bytes([0x99u8; 32]),
                encryption_key: None,
                mac_address: test_mac(),
                name: None,
            })
            .await
            .expect("add");

        let (mobile_conn, ihu_conn) = duplex_pair(185);
        let (events_tx, _events) = mpsc::channel(16);
        let fsm = PairingFsm::new(
            Box::new(FakePeripheral::new(mobile_conn)),
            mobile_store.clone(),
            PairingConfig::default(),
            PairingMode::Reconnect {
                expected_device_id: ihu_id,
            },
            test_mac(),
            None,
            events_tx,
            None,
        );
        let responder = PairingResponder::new(
            Box::new(ihu_conn),
            rogue_store,
            ResponderConfig::default(),
            ResponderMode::Reconnect {
                expected_device_id: mobile_id,
            },
        );

        let ihu_task = tokio::spawn(responder.run());
        let result = fsm.run().await;
        assert!(result.is_err());
        let ihu_result = ihu_task.await.expect("join");
        assert!(ihu_result.is_err());
    }

    #[tokio::test]
    async fn test_identity_mismatch_on_reconnection() {
        // Both stores share one identification key, so verification
        // passes; the mobile targets a decoy id the head unit will not
        // present.
        let shared_key = [0x77u8; 32];
        let mobile_store = test_store();
        let ihu_store = test_store();
        let mobile_id = mobile_store.local_device_id().await.expect("id");
        let decoy = DeviceId::random();

        mobile_store
            .add(tether_store::NewPeerRecord {
                device_id: decoy,
                identification_key: IdentificationKey::from_bytes(shared_key),
                encryption_key: None,
                mac_address: test_mac(),
                name: None,
            })
            .await
            .expect("add decoy");
        ihu_store
            .add(tether_store::NewPeerRecord {
                device_id: mobile_id,
                identification_key: IdentificationKey::from_bytes(shared_key),
                encryption_key: None,
                mac_address: test_mac(),
                name: None,
            })
            .await
            .expect("add mobile");

        let (mobile_conn, ihu_conn) = duplex_pair(185);
        let (events_tx, _events) = mpsc::channel(16);
        let fsm = PairingFsm::new(
            Box::new(FakePeripheral::new(mobile_conn)),
            mobile_store.clone(),
            PairingConfig::default(),
            PairingMode::Reconnect {
                expected_device_id: decoy,
            },
            test_mac(),
            None,
            events_tx,
            None,
        );
        let responder = PairingResponder::new(
            Box::new(ihu_conn),
            ihu_store,
            ResponderConfig::default(),
            ResponderMode::Reconnect {
                expected_device_id: mobile_id,
            },
        );

        let _ihu_task = tokio::spawn(responder.run());
        let result = fsm.run().await;
        assert!(matches!(
            result,
            Err(PairingError::IdentityMismatch { .. })
        ));
        // No secret material was persisted for the received id.
        assert_eq!(mobile_store.retrieve_all().await.expect("peers").len(), 1);
    }

    #[tokio::test]
    async fn test_connect_retries_then_succeeds() {
        let rig = rig(
            PairingMode::Associate { oob: Vec::new() },
            ResponderMode::Associate,
            None,
            |p| p.with_connect_failures(2),
        );
        let (result, _) = drive_visual(rig).await;
        result.expect("succeeds on the third attempt");
    }

    #[tokio::test]
    async fn test_connect_retries_exhausted() {
        let rig = rig(
            PairingMode::Associate { oob: Vec::new() },
            ResponderMode::Associate,
            None,
            |p| p.with_connect_failures(5),
        );
        let (result, events) = drive_visual(rig).await;
        assert!(matches!(
            result,
            Err(PairingError::TransportStuck { step: "connect" })
        ));
        assert!(events.iter().any(|e| matches!(
            e,
            AssociationEvent::Failed(tether_types::FailureKind::TransportStuck)
        )));
    }

    #[tokio::test]
    async fn test_bonding_pause_resumes_connect() {
        let rig = rig(
            PairingMode::Associate { oob: Vec::new() },
            ResponderMode::Associate,
            None,
            |p| p.with_bonding_interrupt(),
        );
        let (result, _) = drive_visual(rig).await;
        result.expect("bonding pause then success");
    }

    #[tokio::test(start_paused = true)]
    async fn test_stale_mtu_callback_proceeds() {
        let rig = rig(
            PairingMode::Associate { oob: Vec::new() },
            ResponderMode::Associate,
            None,
            |p| p.with_mtu_response(None),
        );
        let (result, _) = drive_visual(rig).await;
        result.expect("stale MTU stack still associates");
    }

    #[tokio::test]
    async fn test_service_refresh_recovers_missing_characteristics() {
        let rig = rig(
            PairingMode::Associate { oob: Vec::new() },
            ResponderMode::Associate,
            None,
            |p| {
                p.with_services(Vec::new())
                    .with_services_after_refresh(crate::testing::default_services())
            },
        );
        let (result, _) = drive_visual(rig).await;
        result.expect("cache refresh recovers the service set");
    }

    #[tokio::test]
    async fn test_service_validation_fails_after_refresh() {
        let rig = rig(
            PairingMode::Associate { oob: Vec::new() },
            ResponderMode::Associate,
            None,
            |p| p.with_services(Vec::new()),
        );
        let (result, _) = drive_visual(rig).await;
        assert!(matches!(result, Err(PairingError::ServiceValidation)));
    }
}
