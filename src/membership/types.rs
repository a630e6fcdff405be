use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::time::Instant;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(pub String);

impl NodeId {
    pub fn new() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }
}

impl Default for NodeId {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum NodeState {
    Alive,
    Suspect,
    Dead,
}

/// Represents a single member in the cluster.
///
/// Contains identity, network addressing for all three listeners, and the
/// current lifecycle state. The `incarnation` field is a logical clock used to
/// order updates and resolve conflicts (e.g., refuting a false "Suspect"
/// claim). Dead members stay in the table as tombstones so a re-join is an
/// idempotent upsert rather than a brand-new identity.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Node {
    pub id: NodeId,
    pub gossip_addr: SocketAddr,
    pub rpc_addr: SocketAddr,
    pub http_addr: SocketAddr,
    pub state: NodeState,
    pub incarnation: u64,

    #[serde(skip)]
    pub last_seen: Option<Instant>,
}

/// A versioned snapshot of the locally believed cluster topology.
///
/// The generation counter bumps on every accepted join/leave/health
/// transition, so placement results computed from the same generation agree.
/// Different nodes may transiently hold diverging views; gossip converges
/// them.
#[derive(Debug, Clone)]
pub struct MembershipView {
    pub generation: u64,
    /// All known members, tombstones included, sorted by node id.
    pub nodes: Vec<Node>,
}

impl MembershipView {
    /// Members eligible for ring placement (dead nodes are excluded).
    pub fn placement_nodes(&self) -> impl Iterator<Item = &Node> {
        self.nodes.iter().filter(|n| n.state != NodeState::Dead)
    }

    pub fn alive_count(&self) -> usize {
        self.nodes
            .iter()
            .filter(|n| n.state == NodeState::Alive)
            .count()
    }
}

/// The wire protocol for gossip exchanges.
///
/// - `Ping/Ack`: Used for liveness checks; the ack piggybacks the full member
///   list so health facts disseminate without a broadcast tree.
/// - `Join`: Sent by new nodes to seed nodes to enter the cluster.
/// - `Suspect/Alive`: Disseminates changes in node health.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum GossipMessage {
    Ping {
        from: Node,
    },

    Ack {
        from: NodeId,
        incarnation: u64,
        members: Vec<Node>,
    },

    Join {
        node: Node,
    },

    Suspect {
        node_id: NodeId,
        incarnation: u64,
    },

    Alive {
        node_id: NodeId,
        incarnation: u64,
    },
}
