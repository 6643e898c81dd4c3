//! Top-level stack owner.
//!
//! Owns the associated-peer store, the pairing manager, and the calendar
//! source controller, and republishes their lifecycle events on the
//! [`EventBus`]. Platform collaborators (GATT peripherals, OOB channels,
//! the calendar provider and its change feed) are injected by the host.

use std::sync::Arc;

use tokio::sync::{mpsc, oneshot};

use tether_calendar::{
    CalendarProvider, DayAlignedWindow, SourceCommand, SourceConfig, SourceController,
};
use tether_crypto::KeyWrapper;
use tether_pairing::fsm::PairingConfig;
use tether_pairing::gatt::GattPeripheral;
use tether_pairing::manager::{AssociationAttempt, PairingManager, ReconnectionAttempt};
use tether_store::PeerStore;
use tether_types::{DeviceId, DisassociationEvent, DiscoveredPeer};

use crate::config::DaemonConfig;
use crate::events::{Event, EventBus};

const EVENT_BUS_CAPACITY: usize = 1000;

/// Dependency-injected service owner with an explicit lifecycle.
pub struct Stack {
    config: DaemonConfig,
    store: PeerStore,
    event_bus: EventBus,
    pairing: PairingManager,
    source_commands: Option<mpsc::Sender<SourceCommand>>,
}

impl Stack {
    /// Open the store and bring the services up.
    pub fn start(config: DaemonConfig, key_wrapper: Arc<dyn KeyWrapper>) -> anyhow::Result<Self> {
        let data_dir = config.data_dir();
        std::fs::create_dir_all(&data_dir)?;
        let conn = tether_store::open(&data_dir.join("tether.db"))?;
        let store = PeerStore::new(conn, key_wrapper);

        let pairing_config = PairingConfig {
            mtu_override: (config.transport.mtu_override > 0)
                .then_some(config.transport.mtu_override as usize),
            max_retry: config.transport.max_retry,
            ..PairingConfig::default()
        };
        let pairing = PairingManager::new(store.clone(), pairing_config);

        let event_bus = EventBus::new(EVENT_BUS_CAPACITY);
        event_bus.emit(Event {
            event_type: "StackStarted".to_string(),
            payload: serde_json::json!({ "version": env!("CARGO_PKG_VERSION") }),
        });

        Ok(Self {
            config,
            store,
            event_bus,
            pairing,
            source_commands: None,
        })
    }

    pub fn store(&self) -> &PeerStore {
        &self.store
    }

    pub fn events(&self) -> &EventBus {
        &self.event_bus
    }

    /// Start the calendar source over an injected provider and change
    /// feed; returns the command handle for peer lifecycle updates.
    pub fn start_calendar_source<P: CalendarProvider + 'static>(
        &mut self,
        provider: P,
        changes: mpsc::Receiver<()>,
    ) -> mpsc::Sender<SourceCommand> {
        let mut source_config = SourceConfig::new(
            self.config.sync.tracked_calendars.clone(),
            Box::new(DayAlignedWindow::new(self.config.sync.window_days)),
        );
        source_config.debounce = std::time::Duration::from_millis(self.config.sync.debounce_ms);

        let controller = SourceController::new(provider, source_config);
        let (commands_tx, commands_rx) = mpsc::channel(16);
        tokio::spawn(controller.run(changes, commands_rx));
        self.source_commands = Some(commands_tx.clone());
        commands_tx
    }

    /// Start first-time association, mirroring progress onto the bus.
    pub fn associate(
        &self,
        peripheral: Box<dyn GattPeripheral>,
        peer: &DiscoveredPeer,
        oob: Vec<Box<dyn tether_oob::OobChannel>>,
        host_confirm: oneshot::Receiver<bool>,
    ) -> tether_pairing::Result<AssociationAttempt> {
        let mut attempt = self
            .pairing
            .start_association(peripheral, peer, oob, host_confirm)?;
        let bus = self.event_bus.clone();
        let (forward_tx, forward_rx) = mpsc::channel(16);
        let mut events = std::mem::replace(&mut attempt.events, forward_rx);
        tokio::spawn(async move {
            while let Some(event) = events.recv().await {
                bus.emit_association(&event);
                if forward_tx.send(event).await.is_err() {
                    break;
                }
            }
        });
        Ok(attempt)
    }

    /// Start reconnection, mirroring the outcome onto the bus.
    pub fn reconnect(
        &self,
        peripheral: Box<dyn GattPeripheral>,
        peer: &DiscoveredPeer,
        device_id: DeviceId,
    ) -> tether_pairing::Result<ReconnectionAttempt> {
        let mut attempt = self.pairing.start_reconnection(peripheral, peer, device_id)?;
        let bus = self.event_bus.clone();
        let (forward_tx, forward_rx) = mpsc::channel(16);
        let mut events = std::mem::replace(&mut attempt.events, forward_rx);
        tokio::spawn(async move {
            while let Some(event) = events.recv().await {
                bus.emit_connection(&event);
                if forward_tx.send(event).await.is_err() {
                    break;
                }
            }
        });
        Ok(attempt)
    }

    /// Remove one peer's record.
    pub async fn disassociate(&self, device_id: DeviceId) -> tether_store::Result<bool> {
        let removed = self.store.clear(device_id).await?;
        if removed {
            if let Some(commands) = &self.source_commands {
                let _ = commands.send(SourceCommand::Disable(device_id)).await;
            }
            self.event_bus
                .emit_disassociation(&DisassociationEvent::Peer(device_id));
        }
        Ok(removed)
    }

    /// Remove every peer record.
    pub async fn disassociate_all(&self) -> tether_store::Result<usize> {
        let removed = self.store.clear_all().await?;
        if removed > 0 {
            self.event_bus
                .emit_disassociation(&DisassociationEvent::All);
        }
        Ok(removed)
    }

    /// Stop the services.
    pub fn shutdown(mut self) {
        self.source_commands.take();
        self.event_bus.emit(Event {
            event_type: "StackStopped".to_string(),
            payload: serde_json::json!({}),
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tether_crypto::AesGcmKeyWrapper;

    fn test_stack() -> Stack {
        let dir = std::env::temp_dir().join(format!("tether-test-{}", DeviceId::random()));
        let config = DaemonConfig {
            store: crate::config::StoreConfig {
                data_dir: dir.to_string_lossy().into_owned(),
            },
            ..DaemonConfig::default()
        };
        Stack::start(config, Arc::new(AesGcmKeyWrapper::new([0x21u8; 32]))).expect("stack")
    }

    #[tokio::test]
    async fn test_stack_starts_and_emits() {
        let stack = test_stack();
        let mut rx = stack.events().subscribe();
        assert!(stack.events().sequence() >= 1);

        stack.events().emit(Event {
            event_type: "Probe".to_string(),
            payload: serde_json::json!({}),
        });
        let event = rx.try_recv().expect("event");
        assert_eq!(event.event_type, "Probe");
    }

    #[tokio::test]
    async fn test_disassociate_unknown_peer_is_noop() {
        let stack = test_stack();
        let removed = stack
            .disassociate(DeviceId::random())
            .await
            .expect("disassociate");
        assert!(!removed);
        assert_eq!(stack.disassociate_all().await.expect("clear"), 0);
    }
}
