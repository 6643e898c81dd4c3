//! Attempt ownership and host-facing events.
//!
//! A [`PairingManager`] guards against concurrent attempts (the FSM is
//! single-owner) and converts run outcomes into the connection events
//! hosts subscribe to.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

use tether_oob::OobChannel;
use tether_store::PeerStore;
use tether_types::{AssociationEvent, ConnectionEvent, DeviceId, DiscoveredPeer};

use crate::fsm::{EstablishedSession, PairingConfig, PairingFsm, PairingMode};
use crate::gatt::GattPeripheral;
use crate::{PairingError, Result};

const EVENT_CHANNEL_CAPACITY: usize = 16;

/// A started association attempt.
pub struct AssociationAttempt {
    /// Progress events, ending in `Completed` or `Failed`.
    pub events: mpsc::Receiver<AssociationEvent>,
    /// Resolves with the established session once the FSM reaches READY.
    pub outcome: JoinHandle<Result<EstablishedSession>>,
}

/// A started reconnection attempt.
pub struct ReconnectionAttempt {
    /// Connection lifecycle events.
    pub events: mpsc::Receiver<ConnectionEvent>,
    /// Resolves with the established session once the FSM reaches READY.
    pub outcome: JoinHandle<Result<EstablishedSession>>,
}

/// Owns at most one in-flight pairing attempt.
pub struct PairingManager {
    store: PeerStore,
    config: PairingConfig,
    active: Arc<AtomicBool>,
}

impl PairingManager {
    pub fn new(store: PeerStore, config: PairingConfig) -> Self {
        Self {
            store,
            config,
            active: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Whether an attempt is currently running.
    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::SeqCst)
    }

    fn claim(&self) -> Result<()> {
        if self
            .active
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return Err(PairingError::AlreadyInProgress);
        }
        Ok(())
    }

    /// Start first-time association with a discovered peer.
    pub fn start_association(
        &self,
        peripheral: Box<dyn GattPeripheral>,
        peer: &DiscoveredPeer,
        oob: Vec<Box<dyn OobChannel>>,
        host_confirm: oneshot::Receiver<bool>,
    ) -> Result<AssociationAttempt> {
        self.claim()?;
        let (events_tx, events) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
        let fsm = PairingFsm::new(
            peripheral,
            self.store.clone(),
            self.config.clone(),
            PairingMode::Associate { oob },
            peer.mac_address,
            peer.name.clone(),
            events_tx,
            Some(host_confirm),
        );
        let active = self.active.clone();
        let outcome = tokio::spawn(async move {
            let result = fsm.run().await;
            active.store(false, Ordering::SeqCst);
            result
        });
        Ok(AssociationAttempt { events, outcome })
    }

    /// Start reconnection to a stored peer.
    pub fn start_reconnection(
        &self,
        peripheral: Box<dyn GattPeripheral>,
        peer: &DiscoveredPeer,
        expected_device_id: DeviceId,
    ) -> Result<ReconnectionAttempt> {
        self.claim()?;
        let (fsm_events_tx, _fsm_events) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
        let (events_tx, events) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
        let fsm = PairingFsm::new(
            peripheral,
            self.store.clone(),
            self.config.clone(),
            PairingMode::Reconnect { expected_device_id },
            peer.mac_address,
            peer.name.clone(),
            fsm_events_tx,
            None,
        );
        let active = self.active.clone();
        let outcome = tokio::spawn(async move {
            let result = fsm.run().await;
            active.store(false, Ordering::SeqCst);
            match &result {
                Ok(session) => {
                    let _ = events_tx
                        .send(ConnectionEvent::Connected(session.device_id))
                        .await;
                }
                Err(error) => {
                    let _ = events_tx
                        .send(ConnectionEvent::ConnectionFailed(
                            expected_device_id,
                            error.failure_kind(),
                        ))
                        .await;
                }
            }
            result
        });
        Ok(ReconnectionAttempt { events, outcome })
    }
}
