//! Peer identity types.
//!
//! An associated peer is identified by a stable 128-bit [`DeviceId`]; its
//! [`MacAddress`] is only used to target reconnection scans. The 256-bit
//! [`IdentificationKey`] is the sole persistent secret and lives wrapped in
//! the associated-peer store.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use uuid::Uuid;
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::DEVICE_ID_LEN;

/// Stable 128-bit identifier of a paired device.
///
/// Unique per associated-peer store; exchanged as the first encrypted
/// payload of every session.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DeviceId(Uuid);

impl DeviceId {
    /// Generate a fresh random device identifier.
    pub fn random() -> Self {
        Self(Uuid::new_v4())
    }

    /// Build a device identifier from its 16 raw big-endian bytes.
    pub fn from_bytes(bytes: [u8; DEVICE_ID_LEN]) -> Self {
        Self(Uuid::from_bytes(bytes))
    }

    /// Parse a device identifier from a wire payload.
    ///
    /// Returns `None` unless the slice is exactly 16 bytes.
    pub fn from_slice(bytes: &[u8]) -> Option<Self> {
        let raw: [u8; DEVICE_ID_LEN] = bytes.try_into().ok()?;
        Some(Self::from_bytes(raw))
    }

    /// The 16 raw big-endian bytes of this identifier.
    pub fn as_bytes(&self) -> &[u8; DEVICE_ID_LEN] {
        self.0.as_bytes()
    }

    /// The underlying UUID.
    pub fn as_uuid(&self) -> Uuid {
        self.0
    }
}

impl From<Uuid> for DeviceId {
    fn from(uuid: Uuid) -> Self {
        Self(uuid)
    }
}

impl FromStr for DeviceId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self(Uuid::parse_str(s)?))
    }
}

impl fmt::Display for DeviceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.hyphenated())
    }
}

impl fmt::Debug for DeviceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "DeviceId({})", self.0.hyphenated())
    }
}

/// A 48-bit Bluetooth MAC address.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct MacAddress([u8; 6]);

impl MacAddress {
    /// Build a MAC address from its 6 raw bytes.
    pub fn from_bytes(bytes: [u8; 6]) -> Self {
        Self(bytes)
    }

    /// The 6 raw bytes of this address.
    pub fn as_bytes(&self) -> &[u8; 6] {
        &self.0
    }
}

/// Error parsing a `AA:BB:CC:DD:EE:FF` MAC address string.
#[derive(Debug, thiserror::Error)]
#[error("invalid MAC address: {0}")]
pub struct MacAddressParseError(String);

impl FromStr for MacAddress {
    type Err = MacAddressParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut bytes = [0u8; 6];
        let mut octets = s.split(':');
        for byte in &mut bytes {
            let octet = octets
                .next()
                .ok_or_else(|| MacAddressParseError(s.to_string()))?;
            *byte = u8::from_str_radix(octet, 16)
                .map_err(|_| MacAddressParseError(s.to_string()))?;
        }
        if octets.next().is_some() {
            return Err(MacAddressParseError(s.to_string()));
        }
        Ok(Self(bytes))
    }
}

impl TryFrom<String> for MacAddress {
    type Error = MacAddressParseError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        s.parse()
    }
}

impl From<MacAddress> for String {
    fn from(mac: MacAddress) -> Self {
        mac.to_string()
    }
}

impl fmt::Display for MacAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let [a, b, c, d, e, g] = self.0;
        write!(f, "{a:02X}:{b:02X}:{c:02X}:{d:02X}:{e:02X}:{g:02X}")
    }
}

/// Persistent per-peer symmetric secret created at association time.
///
/// Never serialized in the clear; the store wraps it through an injected
/// crypto helper before it touches disk.
#[derive(Clone, PartialEq, Eq, Zeroize, ZeroizeOnDrop)]
pub struct IdentificationKey([u8; 32]);

impl IdentificationKey {
    /// Wrap 32 raw key bytes.
    pub fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    /// The raw key bytes.
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }
}

impl fmt::Debug for IdentificationKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // Key material never reaches logs.
        f.write_str("IdentificationKey(..)")
    }
}

/// A peer record as surfaced to hosts (no key material).
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AssociatedPeer {
    /// Stable device identifier.
    pub device_id: DeviceId,
    /// Last known MAC address, used to target reconnection scans.
    pub mac_address: MacAddress,
    /// Human-visible name.
    pub name: Option<String>,
    /// True once the user has renamed the peer locally.
    pub is_user_renamed: bool,
}

/// Advertisement metadata for a peer found during discovery (transient).
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DiscoveredPeer {
    /// Address to connect to.
    pub mac_address: MacAddress,
    /// Displayed name from the advertisement, if present.
    pub name: Option<String>,
    /// BLE service UUID the peer advertised.
    pub service_uuid: Uuid,
    /// RFCOMM service UUID, when the peer supports an RFCOMM channel.
    pub rfcomm_uuid: Option<Uuid>,
}
