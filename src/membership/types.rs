use serde::{Deserialize, Serialize};
use std::fmt;
use std::net::SocketAddr;
use std::time::Instant;

/// Identity of one node (one OS process hosting a group of sibling workers).
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

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A network peer as seen by the local directory.
///
/// `gossip_addr` carries membership traffic, `http_addr` carries blackboard envelopes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Peer {
    pub id: NodeId,
    pub gossip_addr: SocketAddr,
    pub http_addr: SocketAddr,

    #[serde(skip)]
    pub last_seen: Option<Instant>,
}

/// UDP wire protocol, bincode encoded.
///
/// - `Join`: a new node introduces itself to a seed.
/// - `Heartbeat`: periodic liveness plus the sender's view of the cluster.
/// - `Leave`: graceful departure.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum GossipMessage {
    Join { peer: Peer },

    Heartbeat { from: Peer, known: Vec<Peer> },

    Leave { id: NodeId },
}
