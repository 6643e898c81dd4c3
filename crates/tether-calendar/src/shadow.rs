//! Per-peer shadow snapshots.
//!
//! The shadow is the source's best lower bound of what a peer holds:
//! the last snapshot written before a send. Diffs are always computed
//! against it.

use std::collections::HashMap;

use tether_proto::calendar as wire;
use tether_types::DeviceId;

/// Last-sent snapshot per peer, keyed by device id.
#[derive(Debug, Default)]
pub struct ShadowStore {
    peers: HashMap<DeviceId, Vec<wire::Calendar>>,
}

impl ShadowStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// The peer's shadow, empty for a fresh peer.
    pub fn snapshot(&self, peer: DeviceId) -> Vec<wire::Calendar> {
        self.peers.get(&peer).cloned().unwrap_or_default()
    }

    /// Replace the peer's shadow. Written before the corresponding send,
    /// so the shadow reflects intended state.
    pub fn set(&mut self, peer: DeviceId, snapshot: Vec<wire::Calendar>) {
        self.peers.insert(peer, snapshot);
    }

    /// Drop all state for a peer (disconnect or disable).
    pub fn clear(&mut self, peer: DeviceId) {
        self.peers.remove(&peer);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tether_proto::Calendar;

    #[test]
    fn test_fresh_peer_has_empty_shadow() {
        let shadow = ShadowStore::new();
        assert!(shadow.snapshot(DeviceId::random()).is_empty());
    }

    #[test]
    fn test_set_and_clear() {
        let mut shadow = ShadowStore::new();
        let peer = DeviceId::random();
        shadow.set(
            peer,
            vec![Calendar {
                key: "C1".to_string(),
                ..Default::default()
            }],
        );
        assert_eq!(shadow.snapshot(peer).len(), 1);

        shadow.clear(peer);
        assert!(shadow.snapshot(peer).is_empty());
    }

    #[test]
    fn test_peers_are_independent() {
        let mut shadow = ShadowStore::new();
        let a = DeviceId::random();
        let b = DeviceId::random();
        shadow.set(
            a,
            vec![Calendar {
                key: "C1".to_string(),
                ..Default::default()
            }],
        );
        assert!(shadow.snapshot(b).is_empty());
        assert_eq!(shadow.snapshot(a).len(), 1);
    }
}
