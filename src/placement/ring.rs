use fnv::FnvHasher;
use std::hash::Hasher;

use crate::membership::types::{MembershipView, Node, NodeId, NodeState};

/// Stable 64-bit ring position. FNV-1a is deterministic across platforms and
/// releases, unlike the std `DefaultHasher`.
pub fn position(bytes: &[u8]) -> u64 {
    let mut hasher = FnvHasher::default();
    hasher.write(bytes);
    hasher.finish()
}

/// Computes the replica set for `key` under `view`: the first `replicas`
/// distinct non-dead nodes encountered walking the ring clockwise from the
/// key's position. The first entry is the primary. Pure and allocation-cheap;
/// no I/O.
pub fn owners(key: &str, view: &MembershipView, replicas: usize) -> Vec<Node> {
    if replicas == 0 {
        return vec![];
    }

    let mut ring: Vec<(u64, &Node)> = view
        .nodes
        .iter()
        .filter(|node| node.state != NodeState::Dead)
        .map(|node| (position(node.id.0.as_bytes()), node))
        .collect();

    if ring.is_empty() {
        return vec![];
    }

    // Position ties are broken by id so every node sorts the ring identically.
    ring.sort_by(|a, b| a.0.cmp(&b.0).then_with(|| a.1.id.cmp(&b.1.id)));

    let key_position = position(key.as_bytes());
    let start = ring.partition_point(|(pos, _)| *pos <= key_position) % ring.len();

    let take = replicas.min(ring.len());
    let mut owners = Vec::with_capacity(take);
    for i in 0..take {
        let (_, node) = ring[(start + i) % ring.len()];
        owners.push(node.clone());
    }

    owners
}

/// True when `id` appears anywhere in the replica set.
pub fn is_owner(id: &NodeId, owners: &[Node]) -> bool {
    owners.iter().any(|node| &node.id == id)
}

/// The primary owner, if any nodes are placeable.
pub fn primary(owners: &[Node]) -> Option<&Node> {
    owners.first()
}
