use crate::blackboard::types::MemberId;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::Duration;
use tokio::time::Instant;

/// A timestamped value. Replicas keep, per key, the entry with the highest `time`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GlobalMemoryEntry {
    pub value: Value,
    pub time: u64,
}

impl GlobalMemoryEntry {
    pub fn new(value: Value, time: u64) -> Self {
        Self { value, time }
    }

    /// Last-writer-wins: an incoming entry replaces the held one only if strictly newer.
    pub fn supersedes(&self, held: Option<&GlobalMemoryEntry>) -> bool {
        held.is_none_or(|held| held.time < self.time)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncState {
    Unsynced,
    Syncing,
    InSync,
}

/// Progress of a peer that could only offer a partial sync.
#[derive(Debug, Clone)]
pub struct PartialOfferRecord {
    pub id: MemberId,
    /// Partial sync round the counts belong to.
    pub sync_id: Option<String>,
    pub received: usize,
    pub expected: Option<usize>,
    pub complete: bool,
    pub last_set_received: Instant,
}

impl PartialOfferRecord {
    pub fn new(id: MemberId, now: Instant) -> Self {
        Self {
            id,
            sync_id: None,
            received: 0,
            expected: None,
            complete: false,
            last_set_received: now,
        }
    }

    /// Counts one tagged set. A new round from the same peer restarts the count.
    pub fn record_set(&mut self, sync_id: &str, total: usize, now: Instant) {
        if self.sync_id.as_deref() != Some(sync_id) {
            self.sync_id = Some(sync_id.to_string());
            self.received = 0;
            self.complete = false;
        }
        self.received += 1;
        self.expected = Some(total);
        self.last_set_received = now;
        if self.received >= total {
            self.complete = true;
        }
    }

    /// Done when every announced set arrived, or the peer has been quiet for `max_wait`.
    pub fn is_complete(&self, now: Instant, max_wait: Duration) -> bool {
        self.complete || now.saturating_duration_since(self.last_set_received) > max_wait
    }
}
