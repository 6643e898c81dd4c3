//! Advertisement filters.
//!
//! Association scans match on the advertised service UUID alone.
//! Reconnection scans additionally match the service-data entry under
//! [`RECONNECT_DATA_UUID`](tether_types::RECONNECT_DATA_UUID) against a
//! challenge derived from the peer's identification key, so only the
//! targeted head unit passes the filter.

use std::collections::HashMap;

use uuid::Uuid;

use tether_types::{DiscoveredPeer, MacAddress, ASSOCIATION_SERVICE_UUID, RECONNECT_DATA_UUID};

/// Advertised bytes the reconnection filter compares (HMAC truncation).
pub const RECONNECT_CHALLENGE_LEN: usize = 8;

/// Fixed HMAC input for the advertised reconnection challenge.
pub const RECONNECT_CHALLENGE_CONTEXT: &[u8] = b"tether reconnect challenge";

/// One parsed BLE advertisement.
#[derive(Clone, Debug, Default)]
pub struct Advertisement {
    pub mac_address: Option<MacAddress>,
    pub name: Option<String>,
    pub service_uuids: Vec<Uuid>,
    pub service_data: HashMap<Uuid, Vec<u8>>,
}

/// Whether an advertisement is a head unit accepting association.
pub fn matches_association(advertisement: &Advertisement) -> bool {
    advertisement
        .service_uuids
        .contains(&ASSOCIATION_SERVICE_UUID)
}

/// Whether an advertisement is the specific head unit whose
/// identification-key challenge is `expected_challenge` (already
/// truncated to [`RECONNECT_CHALLENGE_LEN`]).
pub fn matches_reconnection(advertisement: &Advertisement, expected_challenge: &[u8]) -> bool {
    if !matches_association(advertisement) {
        return false;
    }
    advertisement
        .service_data
        .get(&RECONNECT_DATA_UUID)
        .is_some_and(|data| data.as_slice() == expected_challenge)
}

/// Truncate a full HMAC tag to the advertised challenge.
pub fn truncate_challenge(tag: &[u8; 32]) -> &[u8] {
    &tag[..RECONNECT_CHALLENGE_LEN]
}

/// Convert a matching advertisement into a discovered-peer record.
pub fn to_discovered_peer(advertisement: &Advertisement) -> Option<DiscoveredPeer> {
    Some(DiscoveredPeer {
        mac_address: advertisement.mac_address?,
        name: advertisement.name.clone(),
        service_uuid: ASSOCIATION_SERVICE_UUID,
        rfcomm_uuid: None,
    })
}
