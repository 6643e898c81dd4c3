//! Out-of-band association payloads.

/// Key material delivered over an OOB side channel.
///
/// The two IVs must differ; the reader side rejects tokens where they are
/// equal.
#[derive(Clone, PartialEq, Eq, ::prost::Message)]
pub struct OobToken {
    /// 32-byte AES-256-GCM key used to seal verification payloads.
    #[prost(bytes = "vec", tag = "1")]
    pub encryption_key: Vec<u8>,
    /// 12-byte IV for head-unit → mobile sealing.
    #[prost(bytes = "vec", tag = "2")]
    pub ihu_iv: Vec<u8>,
    /// 12-byte IV for mobile → head-unit sealing.
    #[prost(bytes = "vec", tag = "3")]
    pub mobile_iv: Vec<u8>,
}

/// Payload of the `oob` query parameter in a pre-association URI.
#[derive(Clone, PartialEq, Eq, ::prost::Message)]
pub struct OutOfBandAssociationData {
    /// Key material for sealing the verification exchange.
    #[prost(message, optional, tag = "1")]
    pub token: Option<OobToken>,
    /// 16-byte device identifier of the advertising head unit, when known.
    #[prost(bytes = "vec", tag = "2")]
    pub device_identifier: Vec<u8>,
}
