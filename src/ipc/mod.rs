//! Vertical Cluster Relay
//!
//! The parent/worker message channel of one node. Workers never talk to each other
//! directly: every message goes to the `Supervisor`, which relays broadcasts to all
//! registered workers (sender included) and routes directed messages to one.
//!
//! ## Components
//! - **`Supervisor`**: the relay itself; also answers "how many workers exist".
//! - **`IpcChannel`**: one worker's endpoint, with the sibling-count round trip.

pub mod channel;
pub mod supervisor;

pub use channel::IpcChannel;
pub use supervisor::Supervisor;

use crate::blackboard::types::{Delivery, Envelope, WorkerId};
use crate::cluster_memory::protocol::ClusterMemoryMessage;

/// Everything that crosses the relay.
#[derive(Debug, Clone)]
pub enum IpcMessage {
    Blackboard {
        envelope: Envelope,
        delivery: Delivery,
    },
    ClusterMemory(ClusterMemoryMessage),
    /// Answered by the supervisor, never relayed.
    CountWorkers {
        request_id: String,
        from: WorkerId,
    },
    WorkerCount {
        request_id: String,
        count: usize,
    },
}
