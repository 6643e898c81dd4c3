//! Version and capability exchange records.
//!
//! Sent unencrypted, before the key agreement, as the first two messages in
//! each direction on a fresh transport.

/// Supported version ranges, sent by each side.
///
/// Resolution picks `min(max_local, max_remote)` per axis and fails when an
/// intersection is empty.
#[derive(Clone, PartialEq, Eq, ::prost::Message)]
pub struct VersionExchange {
    /// Lowest messaging version this side still speaks.
    #[prost(uint32, tag = "1")]
    pub min_supported_messaging_version: u32,
    /// Highest messaging version this side speaks.
    #[prost(uint32, tag = "2")]
    pub max_supported_messaging_version: u32,
    /// Lowest security (handshake/verification) version supported.
    #[prost(uint32, tag = "3")]
    pub min_supported_security_version: u32,
    /// Highest security version supported.
    #[prost(uint32, tag = "4")]
    pub max_supported_security_version: u32,
}

/// Out-of-band verification channel types.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, ::prost::Enumeration)]
#[repr(i32)]
pub enum OobChannelType {
    /// Unset.
    OobChannelUnknown = 0,
    /// Bonded RFCOMM socket opened after Bluetooth pairing.
    BtRfcomm = 1,
    /// Caller-supplied token, e.g. delivered via QR code or URI.
    PreAssociation = 2,
}

/// Capability record: the OOB channels a side can verify over.
///
/// The resolved set is the intersection of both sides' lists.
#[derive(Clone, PartialEq, Eq, ::prost::Message)]
pub struct CapabilitiesExchange {
    /// Supported channel types; unknown values from newer peers are
    /// dropped during resolution.
    #[prost(enumeration = "OobChannelType", repeated, tag = "1")]
    pub supported_oob_channels: Vec<i32>,
}

impl CapabilitiesExchange {
    /// The channels this record names, dropping unknown discriminants.
    pub fn channels(&self) -> Vec<OobChannelType> {
        self.supported_oob_channels
            .iter()
            .filter_map(|&value| OobChannelType::try_from(value).ok())
            .filter(|channel| *channel != OobChannelType::OobChannelUnknown)
            .collect()
    }
}
