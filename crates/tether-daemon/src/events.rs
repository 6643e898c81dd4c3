//! Event emission system.
//!
//! Lifecycle events are pushed from the stack to host subscribers over a
//! broadcast channel; each subscriber has an independent buffer.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use tether_types::{AssociationEvent, ConnectionEvent, DeviceId, DisassociationEvent};

/// An event emitted by the stack.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    /// Event type name (e.g. "PeerAssociated", "PeerConnected").
    pub event_type: String,
    /// Type-specific payload.
    pub payload: serde_json::Value,
}

/// Event bus for broadcasting events to subscribers.
#[derive(Clone)]
pub struct EventBus {
    sender: broadcast::Sender<Event>,
    sequence: Arc<AtomicU64>,
}

impl EventBus {
    /// Create a new event bus with the given buffer capacity.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self {
            sender,
            sequence: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Emit an event to all subscribers.
    pub fn emit(&self, event: Event) {
        self.sequence.fetch_add(1, Ordering::SeqCst);
        // No subscribers is fine.
        let _ = self.sender.send(event);
    }

    /// Subscribe to events.
    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.sender.subscribe()
    }

    /// Number of events emitted so far.
    pub fn sequence(&self) -> u64 {
        self.sequence.load(Ordering::SeqCst)
    }

    /// Emit an association progress event.
    pub fn emit_association(&self, event: &AssociationEvent) {
        let (event_type, payload) = match event {
            AssociationEvent::Started => ("AssociationStarted", serde_json::json!({})),
            AssociationEvent::DeviceIdReceived(id) => (
                "AssociationDeviceIdReceived",
                serde_json::json!({ "device_id": id.to_string() }),
            ),
            AssociationEvent::AuthStringAvailable(code) => (
                "AssociationCodeAvailable",
                serde_json::json!({ "code": code }),
            ),
            AssociationEvent::Completed(id) => (
                "PeerAssociated",
                serde_json::json!({ "device_id": id.to_string() }),
            ),
            AssociationEvent::Failed(kind) => (
                "AssociationFailed",
                serde_json::json!({ "kind": kind }),
            ),
        };
        self.emit(Event {
            event_type: event_type.to_string(),
            payload,
        });
    }

    /// Emit a connection lifecycle event.
    pub fn emit_connection(&self, event: &ConnectionEvent) {
        let (event_type, payload) = match event {
            ConnectionEvent::Connected(id) => (
                "PeerConnected",
                serde_json::json!({ "device_id": id.to_string() }),
            ),
            ConnectionEvent::Disconnected(id) => (
                "PeerDisconnected",
                serde_json::json!({ "device_id": id.to_string() }),
            ),
            ConnectionEvent::ConnectionFailed(id, kind) => (
                "PeerConnectionFailed",
                serde_json::json!({ "device_id": id.to_string(), "kind": kind }),
            ),
        };
        self.emit(Event {
            event_type: event_type.to_string(),
            payload,
        });
    }

    /// Emit a disassociation event.
    pub fn emit_disassociation(&self, event: &DisassociationEvent) {
        match event {
            DisassociationEvent::Peer(id) => self.emit(Event {
                event_type: "PeerDisassociated".to_string(),
                payload: serde_json::json!({ "device_id": id.to_string() }),
            }),
            DisassociationEvent::All => self.emit(Event {
                event_type: "AllPeersDisassociated".to_string(),
                payload: serde_json::json!({}),
            }),
        }
    }
}

/// Convenience constructor for device-scoped payloads.
pub fn device_payload(id: DeviceId) -> serde_json::Value {
    serde_json::json!({ "device_id": id.to_string() })
}
