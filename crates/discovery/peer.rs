use crate::types::Endpoint;
use devp2p_core::NodeId;

/// A peer's discovery status, monotonically advancing within one session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PeerStatus {
    Known,
    Bonding,
    Bonded,
}

/// A peer known to the local node: identity, where to reach it, and the bookkeeping
/// timestamps the controller uses to decide eviction order and bonding freshness.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiscoveryPeer {
    pub node_id: NodeId,
    pub endpoint: Endpoint,
    pub status: PeerStatus,
    pub first_discovered_ts: u64,
    pub last_seen_ts: u64,
    pub last_contacted_ts: u64,
}

impl DiscoveryPeer {
    pub fn new(node_id: NodeId, endpoint: Endpoint) -> Self {
        Self {
            node_id,
            endpoint,
            status: PeerStatus::Known,
            first_discovered_ts: 0,
            last_seen_ts: 0,
            last_contacted_ts: 0,
        }
    }
}
