//! # tether-types
//!
//! Shared domain types used across the tether workspace: peer identity,
//! scan results, time windows, and the lifecycle events surfaced to hosts.

pub mod events;
pub mod peer;
pub mod time;

pub use events::{AssociationEvent, ConnectionEvent, DisassociationEvent, FailureKind};
pub use peer::{AssociatedPeer, DeviceId, DiscoveredPeer, IdentificationKey, MacAddress};
pub use time::{TimeRange, TimeWindow};

use uuid::{uuid, Uuid};

/// GATT service advertised by a head unit accepting first-time association.
pub const ASSOCIATION_SERVICE_UUID: Uuid = uuid!("0000fef3-0000-1000-8000-00805f9b34fb");

/// Service-data UUID carrying the reconnection challenge in advertisements.
pub const RECONNECT_DATA_UUID: Uuid = uuid!("00000020-0000-1000-8000-00805f9b34fb");

/// Characteristic the mobile side writes outbound frames to.
pub const CLIENT_WRITE_CHARACTERISTIC_UUID: Uuid = uuid!("5e2a68a5-27be-43f9-8d1e-4546976fabd7");

/// Characteristic the head unit writes (notifies) inbound frames on.
pub const SERVER_WRITE_CHARACTERISTIC_UUID: Uuid = uuid!("5e2a68a6-27be-43f9-8d1e-4546976fabd7");

/// Optional characteristic exposing raw advertise data for identity checks.
pub const ADVERTISE_DATA_CHARACTERISTIC_UUID: Uuid =
    uuid!("24289b40-af40-4149-a5f4-878ccff87566");

/// Length of an identification key in bytes (256 bits).
pub const IDENTIFICATION_KEY_LEN: usize = 32;

/// Length of a device identifier in bytes (128 bits).
pub const DEVICE_ID_LEN: usize = 16;

/// Seconds in one whole UTC day.
pub const SECONDS_PER_DAY: u64 = 86_400;
