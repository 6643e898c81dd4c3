//! Scripted GATT peripheral over an in-memory connection.
//!
//! Lets unit and integration tests drive the full pairing state machine
//! against an in-process head unit: the peripheral acknowledges setup
//! calls by queueing the events a platform stack would emit, and converts
//! into one end of a duplex pipe.

use std::collections::VecDeque;

use async_trait::async_trait;
use uuid::Uuid;

use tether_transport::{DuplexConnection, MtuOverride, PhysicalConnection};
use tether_types::{
    ASSOCIATION_SERVICE_UUID, CLIENT_WRITE_CHARACTERISTIC_UUID, SERVER_WRITE_CHARACTERISTIC_UUID,
};

use crate::gatt::{BondingState, GattEvent, GattPeripheral, GattService};
use crate::Result;

/// The service set a well-behaved head unit exposes.
pub fn default_services() -> Vec<GattService> {
    vec![GattService {
        uuid: ASSOCIATION_SERVICE_UUID,
        characteristics: vec![
            CLIENT_WRITE_CHARACTERISTIC_UUID,
            SERVER_WRITE_CHARACTERISTIC_UUID,
        ],
    }]
}

/// Scripted peripheral; defaults model a healthy head unit.
pub struct FakePeripheral {
    conn: Option<DuplexConnection>,
    services: Vec<GattService>,
    services_after_refresh: Option<Vec<GattService>>,
    mtu_response: Option<usize>,
    device_name: Option<String>,
    connect_failures: u32,
    bonding_interrupt: bool,
    queue: VecDeque<GattEvent>,
}

impl FakePeripheral {
    /// Wrap one end of a [`duplex_pair`]; the other end is the head unit.
    pub fn new(conn: DuplexConnection) -> Self {
        Self {
            conn: Some(conn),
            services: default_services(),
            services_after_refresh: None,
            mtu_response: Some(185),
            device_name: Some("Fake Head Unit".to_string()),
            connect_failures: 0,
            bonding_interrupt: false,
            queue: VecDeque::new(),
        }
    }

    /// Replace the discovered service set.
    pub fn with_services(mut self, services: Vec<GattService>) -> Self {
        self.services = services;
        self
    }

    /// Service set appearing only after a cache refresh.
    pub fn with_services_after_refresh(mut self, services: Vec<GattService>) -> Self {
        self.services_after_refresh = Some(services);
        self
    }

    /// `None` models a stack that never delivers the MTU callback.
    pub fn with_mtu_response(mut self, mtu: Option<usize>) -> Self {
        self.mtu_response = mtu;
        self
    }

    /// Fail the first `failures` connect attempts.
    pub fn with_connect_failures(mut self, failures: u32) -> Self {
        self.connect_failures = failures;
        self
    }

    /// Interrupt the first connect with a bonding round.
    pub fn with_bonding_interrupt(mut self) -> Self {
        self.bonding_interrupt = true;
        self
    }
}

#[async_trait]
impl GattPeripheral for FakePeripheral {
    async fn connect(&mut self) -> Result<()> {
        if self.connect_failures > 0 {
            self.connect_failures -= 1;
            self.queue
                .push_back(GattEvent::ConnectFailed("scripted failure".to_string()));
        } else if self.bonding_interrupt {
            self.bonding_interrupt = false;
            self.queue
                .push_back(GattEvent::BondingChanged(BondingState::Bonding));
            self.queue
                .push_back(GattEvent::BondingChanged(BondingState::Bonded));
        } else {
            self.queue.push_back(GattEvent::Connected);
        }
        Ok(())
    }

    async fn request_mtu(&mut self, _mtu: usize) -> Result<()> {
        if let Some(mtu) = self.mtu_response {
            self.queue.push_back(GattEvent::MtuChanged(mtu));
        }
        Ok(())
    }

    async fn discover_services(&mut self) -> Result<()> {
        self.queue.push_back(GattEvent::ServicesDiscovered);
        Ok(())
    }

    async fn refresh_service_cache(&mut self) -> Result<()> {
        if let Some(services) = self.services_after_refresh.take() {
            self.services = services;
        }
        Ok(())
    }

    fn services(&self) -> Vec<GattService> {
        self.services.clone()
    }

    async fn enable_notifications(&mut self, _service: Uuid, _characteristic: Uuid) -> Result<()> {
        Ok(())
    }

    async fn read_device_name(&mut self) -> Result<Option<String>> {
        Ok(self.device_name.clone())
    }

    async fn next_event(&mut self) -> Option<GattEvent> {
        match self.queue.pop_front() {
            Some(event) => Some(event),
            // A real stack pends until something happens; model that so
            // step timeouts are exercised.
            None => std::future::pending().await,
        }
    }

    async fn disconnect(&mut self) {
        if let Some(mut conn) = self.conn.take() {
            conn.close().await;
        }
    }

    fn into_connection(mut self: Box<Self>, negotiated_mtu: usize) -> Box<dyn PhysicalConnection> {
        match self.conn.take() {
            Some(conn) => Box::new(MtuOverride::new(conn, negotiated_mtu)),
            // Already disconnected; hand back a dead pipe.
            None => Box::new(ClosedConnection),
        }
    }
}

/// A connection whose peer is already gone.
struct ClosedConnection;

#[async_trait]
impl PhysicalConnection for ClosedConnection {
    async fn send_frame(&mut self, _frame: &[u8]) -> tether_transport::Result<()> {
        Err(tether_transport::TransportError::ConnectionClosed)
    }

    async fn recv_chunk(&mut self) -> tether_transport::Result<Option<Vec<u8>>> {
        Ok(None)
    }

    fn mtu(&self) -> usize {
        tether_transport::packets::MIN_MTU
    }

    async fn close(&mut self) {}
}
