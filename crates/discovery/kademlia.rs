use crate::peer::DiscoveryPeer;
use devp2p_core::NodeId;

/// Peers per bucket (discv4's `k`).
pub const BUCKET_SIZE: usize = 16;

/// `NodeId` is a 512-bit value, so there are 512 possible log-distances.
pub const NUMBER_OF_BUCKETS: usize = 512;

/// Outcome of attempting to insert a peer into the table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AddOutcome {
    Added,
    AlreadyExisted,
    BucketFull,
    SelfReference,
}

/// Result of [`PeerTable::try_add`]. `eviction_candidate` is only populated on
/// `BucketFull`, naming the least-recently-seen peer the caller may choose to
/// evict before retrying the insert.
#[derive(Debug, Clone)]
pub struct AddResult {
    pub outcome: AddOutcome,
    pub eviction_candidate: Option<DiscoveryPeer>,
}

fn xor(a: &NodeId, b: &NodeId) -> [u8; 64] {
    let mut out = [0u8; 64];
    for i in 0..64 {
        out[i] = a.0[i] ^ b.0[i];
    }
    out
}

/// Position (0-indexed from the least significant bit) of the highest set bit,
/// or `None` if every bit is zero.
fn highest_set_bit(value: &[u8; 64]) -> Option<usize> {
    for (i, byte) in value.iter().enumerate() {
        if *byte != 0 {
            let bit_in_byte = 7 - byte.leading_zeros() as usize;
            let bits_after = (value.len() - 1 - i) * 8;
            return Some(bits_after + bit_in_byte);
        }
    }
    None
}

/// Index of the bucket that should hold a peer at distance `a XOR b` from `a`.
/// Bucket `i` holds peers whose XOR distance has its highest set bit at position `i`.
pub fn bucket_number(a: &NodeId, b: &NodeId) -> usize {
    highest_set_bit(&xor(a, b)).unwrap_or(0)
}

/// The local node's routing table: `NUMBER_OF_BUCKETS` buckets of up to
/// `BUCKET_SIZE` peers each, ordered from least-recently-seen (front) to
/// most-recently-seen (back).
#[derive(Debug)]
pub struct PeerTable {
    local_node_id: NodeId,
    buckets: Vec<Vec<DiscoveryPeer>>,
}

impl PeerTable {
    pub fn new(local_node_id: NodeId) -> Self {
        Self {
            local_node_id,
            buckets: (0..NUMBER_OF_BUCKETS).map(|_| Vec::new()).collect(),
        }
    }

    fn bucket_index(&self, node_id: &NodeId) -> usize {
        bucket_number(&self.local_node_id, node_id)
    }

    /// Inserts `peer` into its bucket. Does not evict on its own: on
    /// `AddOutcome::BucketFull` the caller decides whether to evict
    /// `eviction_candidate` and retry.
    pub fn try_add(&mut self, peer: DiscoveryPeer) -> AddResult {
        if peer.node_id == self.local_node_id {
            return AddResult {
                outcome: AddOutcome::SelfReference,
                eviction_candidate: None,
            };
        }

        let index = self.bucket_index(&peer.node_id);
        let bucket = &mut self.buckets[index];

        if bucket.iter().any(|p| p.node_id == peer.node_id) {
            return AddResult {
                outcome: AddOutcome::AlreadyExisted,
                eviction_candidate: None,
            };
        }

        if bucket.len() < BUCKET_SIZE {
            bucket.push(peer);
            return AddResult {
                outcome: AddOutcome::Added,
                eviction_candidate: None,
            };
        }

        AddResult {
            outcome: AddOutcome::BucketFull,
            eviction_candidate: bucket.first().cloned(),
        }
    }

    pub fn get(&self, node_id: &NodeId) -> Option<&DiscoveryPeer> {
        let index = self.bucket_index(node_id);
        self.buckets[index].iter().find(|p| &p.node_id == node_id)
    }

    pub fn get_mut(&mut self, node_id: &NodeId) -> Option<&mut DiscoveryPeer> {
        let index = self.bucket_index(node_id);
        self.buckets[index]
            .iter_mut()
            .find(|p| &p.node_id == node_id)
    }

    /// Removes a peer unconditionally, freeing a slot in its bucket.
    pub fn evict(&mut self, node_id: &NodeId) -> Option<DiscoveryPeer> {
        let index = self.bucket_index(node_id);
        let bucket = &mut self.buckets[index];
        let position = bucket.iter().position(|p| &p.node_id == node_id)?;
        Some(bucket.remove(position))
    }

    /// Moves a known peer to the back of its bucket, marking it most-recently-seen.
    pub fn mark_seen(&mut self, node_id: &NodeId) {
        let index = self.bucket_index(node_id);
        let bucket = &mut self.buckets[index];
        if let Some(position) = bucket.iter().position(|p| &p.node_id == node_id) {
            let peer = bucket.remove(position);
            bucket.push(peer);
        }
    }

    /// The `k` peers closest to `target`, ordered nearest-first.
    pub fn nearest_peers(&self, target: &NodeId, k: usize) -> Vec<DiscoveryPeer> {
        let mut all: Vec<&DiscoveryPeer> = self.buckets.iter().flatten().collect();
        all.sort_by_key(|peer| xor(target, &peer.node_id));
        all.into_iter().take(k).cloned().collect()
    }

    pub fn buckets(&self) -> &[Vec<DiscoveryPeer>] {
        &self.buckets
    }

    pub fn len(&self) -> usize {
        self.buckets.iter().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Endpoint;
    use std::net::{IpAddr, Ipv4Addr};

    fn node_id_with_byte(index: usize, value: u8) -> NodeId {
        let mut bytes = [0u8; 64];
        bytes[index] = value;
        NodeId(bytes)
    }

    fn peer_at(node_id: NodeId) -> DiscoveryPeer {
        DiscoveryPeer::new(
            node_id,
            Endpoint {
                ip: IpAddr::V4(Ipv4Addr::new(10, 0, 0, 1)),
                udp_port: 30303,
                tcp_port: 30303,
            },
        )
    }

    #[test]
    fn bucket_number_lowest_bit_is_bucket_zero() {
        let local = NodeId::zero();
        let other = node_id_with_byte(63, 0x01);
        assert_eq!(bucket_number(&local, &other), 0);
    }

    #[test]
    fn bucket_number_highest_bit_is_last_bucket() {
        let local = NodeId::zero();
        let other = node_id_with_byte(0, 0x80);
        assert_eq!(bucket_number(&local, &other), NUMBER_OF_BUCKETS - 1);
    }

    #[test]
    fn try_add_rejects_self_reference() {
        let local = NodeId::zero();
        let mut table = PeerTable::new(local);
        let result = table.try_add(peer_at(local));
        assert_eq!(result.outcome, AddOutcome::SelfReference);
        assert_eq!(table.len(), 0);
    }

    #[test]
    fn try_add_then_duplicate_reports_already_existed() {
        let local = NodeId::zero();
        let mut table = PeerTable::new(local);
        let peer_id = node_id_with_byte(63, 0x02);

        let first = table.try_add(peer_at(peer_id));
        assert_eq!(first.outcome, AddOutcome::Added);

        let second = table.try_add(peer_at(peer_id));
        assert_eq!(second.outcome, AddOutcome::AlreadyExisted);
        assert_eq!(table.len(), 1);
    }

    #[test]
    fn try_add_reports_bucket_full_with_oldest_candidate() {
        let local = NodeId::zero();
        let mut table = PeerTable::new(local);

        // All of these land in bucket 0 (differ only in the low bits of the last byte).
        for i in 0..BUCKET_SIZE as u8 {
            let peer_id = node_id_with_byte(63, 0x10 | i);
            let result = table.try_add(peer_at(peer_id));
            assert_eq!(result.outcome, AddOutcome::Added);
        }

        let oldest = node_id_with_byte(63, 0x10);
        let overflow_id = node_id_with_byte(63, 0x20);
        let result = table.try_add(peer_at(overflow_id));
        assert_eq!(result.outcome, AddOutcome::BucketFull);
        assert_eq!(result.eviction_candidate.unwrap().node_id, oldest);
    }

    #[test]
    fn mark_seen_moves_peer_to_back_of_bucket() {
        let local = NodeId::zero();
        let mut table = PeerTable::new(local);
        let first_id = node_id_with_byte(63, 0x10);
        let second_id = node_id_with_byte(63, 0x11);
        table.try_add(peer_at(first_id));
        table.try_add(peer_at(second_id));

        table.mark_seen(&first_id);

        let bucket = &table.buckets()[0];
        assert_eq!(bucket.first().unwrap().node_id, second_id);
        assert_eq!(bucket.last().unwrap().node_id, first_id);
    }

    #[test]
    fn nearest_peers_orders_by_xor_distance_ascending() {
        let local = NodeId::zero();
        let mut table = PeerTable::new(local);
        let far = node_id_with_byte(0, 0x80);
        let near = node_id_with_byte(63, 0x01);
        table.try_add(peer_at(far));
        table.try_add(peer_at(near));

        let ordered = table.nearest_peers(&local, 2);
        assert_eq!(ordered[0].node_id, near);
        assert_eq!(ordered[1].node_id, far);
    }

    #[test]
    fn evict_frees_the_slot() {
        let local = NodeId::zero();
        let mut table = PeerTable::new(local);
        let peer_id = node_id_with_byte(63, 0x01);
        table.try_add(peer_at(peer_id));
        assert!(table.evict(&peer_id).is_some());
        assert_eq!(table.len(), 0);
        assert!(table.get(&peer_id).is_none());
    }
}
