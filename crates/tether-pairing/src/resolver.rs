//! Version and capability resolution.
//!
//! First exchange on a fresh transport: each side sends its version
//! record, then its capability record, and resolves the session tuple
//! `(message_version, security_version, oob_channels)` from both.

use std::time::Duration;

use prost::Message;
use tokio::time::timeout;

use tether_proto::{
    CapabilitiesExchange, OobChannelType, OperationType, StreamMessage, VersionExchange,
};
use tether_transport::{MessageStream, PhysicalConnection, TransportError};

/// Lowest messaging version this build still speaks.
pub const MIN_MESSAGE_VERSION: u32 = 1;
/// Highest messaging version this build speaks.
pub const MAX_MESSAGE_VERSION: u32 = 3;
/// Lowest security version this build still speaks.
pub const MIN_SECURITY_VERSION: u32 = 1;
/// Highest security version this build speaks.
pub const MAX_SECURITY_VERSION: u32 = 4;

/// Resolution failures.
#[derive(Debug, thiserror::Error)]
pub enum ResolutionError {
    /// The peer did not answer in time.
    #[error("peer did not answer the {0} exchange in time")]
    PeerTimeout(&'static str),

    /// The peer dropped the connection mid-exchange.
    #[error("transport lost during the {0} exchange")]
    TransportLost(&'static str),

    /// Empty intersection on one version axis.
    #[error(
        "no common {axis} version: local {local_min}..={local_max}, \
         remote {remote_min}..={remote_max}"
    )]
    UnsupportedVersion {
        axis: &'static str,
        local_min: u32,
        local_max: u32,
        remote_min: u32,
        remote_max: u32,
    },

    /// The peer's record failed to decode.
    #[error("malformed {0} record")]
    Malformed(&'static str),

    /// Underlying stream failure.
    #[error(transparent)]
    Transport(#[from] TransportError),
}

/// Resolved session parameters.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ResolvedSession {
    pub message_version: u32,
    pub security_version: u32,
    /// Intersection of both sides' OOB channel capabilities.
    pub oob_channels: Vec<OobChannelType>,
}

/// Verification-code length mandated by the resolved security version:
/// six characters up to v1, sixteen from v2 on.
pub fn verification_code_length(security_version: u32) -> usize {
    if security_version <= 1 {
        6
    } else {
        16
    }
}

/// This build's version record.
pub fn local_version_record() -> VersionExchange {
    VersionExchange {
        min_supported_messaging_version: MIN_MESSAGE_VERSION,
        max_supported_messaging_version: MAX_MESSAGE_VERSION,
        min_supported_security_version: MIN_SECURITY_VERSION,
        max_supported_security_version: MAX_SECURITY_VERSION,
    }
}

/// Resolve one axis: `min(max_local, max_remote)`, failing on an empty
/// intersection.
fn resolve_axis(
    axis: &'static str,
    local: (u32, u32),
    remote: (u32, u32),
) -> Result<u32, ResolutionError> {
    let resolved = local.1.min(remote.1);
    if resolved < local.0.max(remote.0) {
        return Err(ResolutionError::UnsupportedVersion {
            axis,
            local_min: local.0,
            local_max: local.1,
            remote_min: remote.0,
            remote_max: remote.1,
        });
    }
    Ok(resolved)
}

/// Resolve both version axes from the two records.
pub fn resolve_versions(
    local: &VersionExchange,
    remote: &VersionExchange,
) -> Result<(u32, u32), ResolutionError> {
    let message_version = resolve_axis(
        "messaging",
        (
            local.min_supported_messaging_version,
            local.max_supported_messaging_version,
        ),
        (
            remote.min_supported_messaging_version,
            remote.max_supported_messaging_version,
        ),
    )?;
    let security_version = resolve_axis(
        "security",
        (
            local.min_supported_security_version,
            local.max_supported_security_version,
        ),
        (
            remote.min_supported_security_version,
            remote.max_supported_security_version,
        ),
    )?;
    Ok((message_version, security_version))
}

/// Intersection of both capability records, preserving local order.
pub fn resolve_capabilities(
    local: &[OobChannelType],
    remote: &CapabilitiesExchange,
) -> Vec<OobChannelType> {
    let remote = remote.channels();
    local
        .iter()
        .copied()
        .filter(|channel| remote.contains(channel))
        .collect()
}

/// Run the full exchange over an established stream: send the local
/// version and capability records, await the peer's, and resolve.
pub async fn exchange<C: PhysicalConnection>(
    stream: &mut MessageStream<C>,
    local_capabilities: &[OobChannelType],
    wait: Duration,
) -> Result<ResolvedSession, ResolutionError> {
    let local_versions = local_version_record();
    send_setup(stream, "version", local_versions.encode_to_vec()).await?;
    let remote_versions: VersionExchange = expect_setup(stream, "version", wait).await?;
    let (message_version, security_version) = resolve_versions(&local_versions, &remote_versions)?;

    let local_caps = CapabilitiesExchange {
        supported_oob_channels: local_capabilities.iter().map(|c| *c as i32).collect(),
    };
    send_setup(stream, "capability", local_caps.encode_to_vec()).await?;
    let remote_caps: CapabilitiesExchange = expect_setup(stream, "capability", wait).await?;
    let oob_channels = resolve_capabilities(local_capabilities, &remote_caps);

    tracing::debug!(
        message_version,
        security_version,
        ?oob_channels,
        "session parameters resolved"
    );
    Ok(ResolvedSession {
        message_version,
        security_version,
        oob_channels,
    })
}

async fn send_setup<C: PhysicalConnection>(
    stream: &mut MessageStream<C>,
    step: &'static str,
    payload: Vec<u8>,
) -> Result<(), ResolutionError> {
    stream
        .send(StreamMessage {
            payload,
            operation: OperationType::EncryptionHandshake as i32,
            is_payload_encrypted: false,
            original_message_size: 0,
            recipient: None,
        })
        .await
        .map_err(|error| match error {
            TransportError::ConnectionClosed => ResolutionError::TransportLost(step),
            other => ResolutionError::Transport(other),
        })?;
    Ok(())
}

async fn expect_setup<C: PhysicalConnection, M: Message + Default>(
    stream: &mut MessageStream<C>,
    step: &'static str,
    wait: Duration,
) -> Result<M, ResolutionError> {
    let message = timeout(wait, stream.next_message())
        .await
        .map_err(|_| ResolutionError::PeerTimeout(step))??
        .ok_or(ResolutionError::TransportLost(step))?;
    if message.operation_type() != Some(OperationType::EncryptionHandshake) {
        return Err(ResolutionError::Malformed(step));
    }
    M::decode(message.payload.as_slice()).map_err(|_| ResolutionError::Malformed(step))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tether_transport::{duplex_pair, StreamRole};

    #[test]
    fn test_resolution_picks_min_of_maxima() {
        let local = local_version_record();
        let remote = VersionExchange {
            min_supported_messaging_version: 1,
            max_supported_messaging_version: 2,
            min_supported_security_version: 2,
            max_supported_security_version: 9,
        };
        let (message, security) = resolve_versions(&local, &remote).expect("resolve");
        assert_eq!(message, 2);
        assert_eq!(security, MAX_SECURITY_VERSION);
    }

    #[test]
    fn test_empty_intersection_fails() {
        let local = local_version_record();
        let remote = VersionExchange {
            min_supported_messaging_version: MAX_MESSAGE_VERSION + 1,
            max_supported_messaging_version: MAX_MESSAGE_VERSION + 2,
            min_supported_security_version: 1,
            max_supported_security_version: 4,
        };
        assert!(matches!(
            resolve_versions(&local, &remote),
            Err(ResolutionError::UnsupportedVersion {
                axis: "messaging",
                ..
            })
        ));
    }

    #[test]
    fn test_code_length_by_security_version() {
        assert_eq!(verification_code_length(1), 6);
        assert_eq!(verification_code_length(2), 16);
        assert_eq!(verification_code_length(4), 16);
    }

    #[test]
    fn test_capability_intersection() {
        let local = [OobChannelType::BtRfcomm, OobChannelType::PreAssociation];
        let remote = CapabilitiesExchange {
            supported_oob_channels: vec![OobChannelType::PreAssociation as i32, 77],
        };
        assert_eq!(
            resolve_capabilities(&local, &remote),
            vec![OobChannelType::PreAssociation]
        );
    }

    #[tokio::test]
    async fn test_exchange_over_duplex() {
        let (mobile_conn, ihu_conn) = duplex_pair(185);
        let mut mobile = MessageStream::new(mobile_conn, StreamRole::Mobile);
        let mut ihu = MessageStream::new(ihu_conn, StreamRole::Ihu);

        let mobile_caps = [OobChannelType::PreAssociation];
        let ihu_caps = [OobChannelType::BtRfcomm, OobChannelType::PreAssociation];

        let ihu_task = tokio::spawn(async move {
            exchange(&mut ihu, &ihu_caps, Duration::from_secs(5)).await
        });
        let mobile_resolved = exchange(&mut mobile, &mobile_caps, Duration::from_secs(5))
            .await
            .expect("mobile resolve");
        let ihu_resolved = ihu_task
            .await
            .expect("join")
            .expect("ihu resolve");

        assert_eq!(mobile_resolved.message_version, MAX_MESSAGE_VERSION);
        assert_eq!(mobile_resolved.security_version, MAX_SECURITY_VERSION);
        assert_eq!(
            mobile_resolved.oob_channels,
            vec![OobChannelType::PreAssociation]
        );
        assert_eq!(ihu_resolved.message_version, mobile_resolved.message_version);
        assert_eq!(
            ihu_resolved.oob_channels,
            vec![OobChannelType::PreAssociation]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_silent_peer_times_out() {
        let (mobile_conn, _ihu_conn) = duplex_pair(185);
        let mut mobile = MessageStream::new(mobile_conn, StreamRole::Mobile);

        let result = exchange(&mut mobile, &[], Duration::from_secs(5)).await;
        assert!(matches!(result, Err(ResolutionError::PeerTimeout("version"))));
    }

    #[tokio::test]
    async fn test_dropped_peer_is_transport_lost() {
        let (mobile_conn, mut ihu_conn) = duplex_pair(185);
        use tether_transport::PhysicalConnection as _;
        ihu_conn.close().await;
        drop(ihu_conn);

        let mut mobile = MessageStream::new(mobile_conn, StreamRole::Mobile);
        let result = exchange(&mut mobile, &[], Duration::from_secs(5)).await;
        assert!(matches!(
            result,
            Err(ResolutionError::TransportLost("version"))
        ));
    }
}
