//! Lifecycle events surfaced to hosts.
//!
//! Observer interfaces become typed channels: the pairing and session
//! layers push these records into bounded `mpsc` channels the host reads.

use serde::{Deserialize, Serialize};

use crate::peer::DeviceId;

/// Terminal failure classification shared across subsystems.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// Connect/MTU/discover retries exhausted.
    TransportStuck,
    /// Empty intersection in message or security version.
    UnsupportedVersion,
    /// Visual/OOB/HMAC confirmation failed.
    AuthMismatch,
    /// Expected device id differs from the received one.
    IdentityMismatch,
    /// Packet sequence violated or AEAD tag mismatch.
    Stream,
    /// Peer did not answer an exchange in time.
    Timeout,
    /// Persisted-state I/O failure.
    Store,
    /// Malformed or unexpected wire content.
    Protocol,
    /// The attempt was cancelled locally.
    Cancelled,
}

/// Progress of a first-time association attempt.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum AssociationEvent {
    /// The attempt started and owns the transport.
    Started,
    /// The peer's device identifier was received.
    DeviceIdReceived(DeviceId),
    /// Visual verification: the code to display to the user.
    AuthStringAvailable(String),
    /// Association finished; the peer is persisted.
    Completed(DeviceId),
    /// Association failed; nothing was persisted.
    Failed(FailureKind),
}

/// Connection lifecycle for an already-associated peer.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ConnectionEvent {
    /// An authenticated encrypted session is ready.
    Connected(DeviceId),
    /// The session ended.
    Disconnected(DeviceId),
    /// Reconnection failed before reaching the ready state.
    ConnectionFailed(DeviceId, FailureKind),
}

/// Removal of persisted peers.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum DisassociationEvent {
    /// A single peer's record was cleared.
    Peer(DeviceId),
    /// The whole store was cleared.
    All,
}
