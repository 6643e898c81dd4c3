//! GATT peripheral seam.
//!
//! The platform Bluetooth stack implements [`GattPeripheral`]; the state
//! machine only sequences calls and consumes [`GattEvent`]s. Once setup
//! finishes, the peripheral converts into the raw byte pipe
//! ([`PhysicalConnection`]) the stream runs over.

use async_trait::async_trait;
use uuid::Uuid;

use tether_transport::PhysicalConnection;
use tether_types::{CLIENT_WRITE_CHARACTERISTIC_UUID, SERVER_WRITE_CHARACTERISTIC_UUID};

use crate::Result;

/// OS-reported bond state of the peer.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BondingState {
    None,
    Bonding,
    Bonded,
}

/// Asynchronous notifications from the platform stack.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum GattEvent {
    /// The GATT link is up.
    Connected,
    /// The connect attempt failed before the link came up.
    ConnectFailed(String),
    /// The ATT MTU was (re)negotiated.
    MtuChanged(usize),
    /// Service discovery finished; [`GattPeripheral::services`] is fresh.
    ServicesDiscovered,
    /// The peer's bond state changed. Many stacks drop GATT traffic while
    /// BONDING; the state machine pauses until a terminal state.
    BondingChanged(BondingState),
    /// The link dropped.
    Disconnected,
}

/// One GATT service and its characteristic UUIDs.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct GattService {
    pub uuid: Uuid,
    pub characteristics: Vec<Uuid>,
}

/// Platform GATT connection to one peripheral.
#[async_trait]
pub trait GattPeripheral: Send + Sync {
    /// Start connecting; completion arrives as [`GattEvent::Connected`].
    async fn connect(&mut self) -> Result<()>;

    /// Request an ATT MTU; completion arrives as [`GattEvent::MtuChanged`].
    async fn request_mtu(&mut self, mtu: usize) -> Result<()>;

    /// Start service discovery; completion arrives as
    /// [`GattEvent::ServicesDiscovered`].
    async fn discover_services(&mut self) -> Result<()>;

    /// Invalidate the OS service cache before a rediscovery.
    async fn refresh_service_cache(&mut self) -> Result<()>;

    /// Services from the most recent discovery.
    fn services(&self) -> Vec<GattService>;

    /// Subscribe to notifications on a characteristic.
    async fn enable_notifications(&mut self, service: Uuid, characteristic: Uuid) -> Result<()>;

    /// Read the peer's GAP device name, when exposed.
    async fn read_device_name(&mut self) -> Result<Option<String>>;

    /// Next asynchronous event. Pends until one arrives; `None` when the
    /// platform handle is gone.
    async fn next_event(&mut self) -> Option<GattEvent>;

    /// Drop the link.
    async fn disconnect(&mut self);

    /// Convert the set-up link into the stream's byte pipe. The returned
    /// connection must report `negotiated_mtu`.
    fn into_connection(self: Box<Self>, negotiated_mtu: usize) -> Box<dyn PhysicalConnection>;
}

/// Find the service exposing both required characteristics.
///
/// The advertise-data characteristic is optional; client-write and
/// server-write are mandatory.
pub fn validate_services(services: &[GattService]) -> Option<Uuid> {
    services
        .iter()
        .find(|service| {
            service
                .characteristics
                .contains(&CLIENT_WRITE_CHARACTERISTIC_UUID)
                && service
                    .characteristics
                    .contains(&SERVER_WRITE_CHARACTERISTIC_UUID)
        })
        .map(|service| service.uuid)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tether_types::{ADVERTISE_DATA_CHARACTERISTIC_UUID, ASSOCIATION_SERVICE_UUID};

    fn service(characteristics: Vec<Uuid>) -> GattService {
        GattService {
            uuid: ASSOCIATION_SERVICE_UUID,
            characteristics,
        }
    }

    #[test]
    fn test_complete_service_validates() {
        let services = [service(vec![
            CLIENT_WRITE_CHARACTERISTIC_UUID,
            SERVER_WRITE_CHARACTERISTIC_UUID,
            ADVERTISE_DATA_CHARACTERISTIC_UUID,
        ])];
        assert_eq!(validate_services(&services), Some(ASSOCIATION_SERVICE_UUID));
    }

    #[test]
    fn test_advertise_data_characteristic_is_optional() {
        let services = [service(vec![
            CLIENT_WRITE_CHARACTERISTIC_UUID,
            SERVER_WRITE_CHARACTERISTIC_UUID,
        ])];
        assert_eq!(validate_services(&services), Some(ASSOCIATION_SERVICE_UUID));
    }

    #[test]
    fn test_missing_required_characteristic_fails() {
        let services = [service(vec![CLIENT_WRITE_CHARACTERISTIC_UUID])];
        assert_eq!(validate_services(&services), None);
        assert_eq!(validate_services(&[]), None);
    }
}
