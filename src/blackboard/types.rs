use crate::membership::types::NodeId;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

/// Index of a worker inside its node's vertical cluster.
pub type WorkerId = u32;

/// Which part of the cluster a publish reaches, or a subscription listens to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum Scope {
    /// Sibling workers and network peers.
    #[default]
    Everywhere,
    /// Sibling workers of this node only.
    LocalCluster,
    /// Network peers only.
    ExternalOnly,
}

impl Scope {
    pub fn includes_local(self) -> bool {
        matches!(self, Scope::Everywhere | Scope::LocalCluster)
    }

    pub fn includes_external(self) -> bool {
        matches!(self, Scope::Everywhere | Scope::ExternalOnly)
    }

    /// Whether a subscription with this scope hears a message that arrived via `delivery`.
    pub fn admits(self, delivery: Delivery) -> bool {
        match delivery {
            Delivery::Local => self.includes_local(),
            Delivery::External => self.includes_external(),
        }
    }
}

/// The path an envelope took to reach this worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Delivery {
    Local,
    External,
}

/// Cluster-wide address of one worker.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct MemberId {
    pub node: NodeId,
    pub worker: WorkerId,
}

impl MemberId {
    pub fn new(node: NodeId, worker: WorkerId) -> Self {
        Self { node, worker }
    }
}

impl fmt::Display for MemberId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.node, self.worker)
    }
}

/// Correlation handle for routing a reply back to exactly one outstanding request.
///
/// Minted per `get_reply` call; the requester forgets it once its wait expires,
/// after which replies carrying it are dropped.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlackboardControl {
    pub request_id: String,
    pub requester: MemberId,
}

/// What travels between workers and nodes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Envelope {
    pub topic: String,
    pub body: EnvelopeBody,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum EnvelopeBody {
    Publish {
        from: MemberId,
        payload: Value,
        control: Option<BlackboardControl>,
    },
    Reply {
        control: BlackboardControl,
        payload: Value,
    },
}

/// A delivered publish, as handed to listeners.
#[derive(Debug, Clone)]
pub struct BoardMessage {
    pub topic: String,
    pub from: MemberId,
    pub payload: Value,
    /// Present when the publisher is waiting for replies.
    pub control: Option<BlackboardControl>,
    pub delivery: Delivery,
}

/// Acknowledgement for envelopes posted over HTTP.
#[derive(Debug, Serialize, Deserialize)]
pub struct BlackboardAck {
    pub result: bool,
}
