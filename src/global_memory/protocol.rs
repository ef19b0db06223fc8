//! Global Memory Protocol
//!
//! Blackboard topics and payloads. Writes travel on `TOPIC_SET`; the sync handshake
//! (offer request, accept, full data push) travels on `TOPIC_SYNC`.

use super::types::GlobalMemoryEntry;
use crate::blackboard::types::MemberId;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;

pub const TOPIC_SET: &str = "org.memgrid.global_memory.set";
pub const TOPIC_SYNC: &str = "org.memgrid.global_memory.sync";

/// Marks a set as part of a partial sync round announcing `total` sets.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PartialTag {
    pub sync_id: String,
    pub total: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SetOperation {
    pub key: String,
    pub value: Value,
    pub time: u64,
    pub sender: MemberId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub partial: Option<PartialTag>,
}

impl SetOperation {
    pub fn entry(&self) -> GlobalMemoryEntry {
        GlobalMemoryEntry::new(self.value.clone(), self.time)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SyncMessage {
    /// "Who can offer me a sync?" Sent with a reply control.
    OfferRequest { requester: MemberId, sync_id: String },
    /// The requester picked `offerer`.
    Accept {
        requester: MemberId,
        offerer: MemberId,
        sync_id: String,
    },
    /// The offerer's whole memory, addressed to the requester.
    FullSync {
        from: MemberId,
        to: MemberId,
        sync_id: String,
        entries: HashMap<String, GlobalMemoryEntry>,
        complete: bool,
    },
}

/// Reply to an `OfferRequest`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncOffer {
    pub offerer: MemberId,
    pub sync_id: String,
    /// The offerer is not in sync itself.
    pub partial: bool,
    /// Sync id the offerer tags its partial sets with in its current run.
    #[serde(default)]
    pub round: Option<String>,
}

/// Body of the `globalmem` HTTP API.
#[derive(Debug, Serialize, Deserialize)]
pub struct GlobalMemRequest {
    pub op: String,
    pub key: String,
    #[serde(default)]
    pub value: Option<Value>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct GlobalMemResponse {
    pub result: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<Value>,
}
