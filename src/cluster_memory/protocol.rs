//! Cluster Memory Relay Protocol
//!
//! Messages exchanged between sibling workers through the supervisor. `Set`,
//! `Poll` and `ReplicaRequest` are broadcast; everything else is directed back
//! to the worker named in the request's `from`.

use crate::blackboard::types::WorkerId;
use serde_json::Value;
use std::collections::HashMap;

#[derive(Debug, Clone)]
pub enum ClusterMemoryMessage {
    /// Replicate one key. With an `ack_id` the sender waits for `SetAck`s.
    Set {
        key: String,
        value: Value,
        from: WorkerId,
        ack_id: Option<String>,
    },
    SetAck {
        ack_id: String,
        key: String,
        from: WorkerId,
    },
    /// Ask siblings for a key missing locally.
    Poll {
        key: String,
        request_id: String,
        from: WorkerId,
    },
    PollReply {
        request_id: String,
        value: Option<Value>,
    },
    /// "Do you have anything to replicate?" sent by a starting worker.
    ReplicaRequest {
        request_id: String,
        from: WorkerId,
    },
    ReplicaOffer {
        request_id: String,
        entries: HashMap<String, Value>,
    },
}
