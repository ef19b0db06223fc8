//! Global Memory
//!
//! Eventually consistent key/value memory shared by every worker of every node.
//!
//! ## Core Concepts
//! - **Last writer wins**: each value carries a millisecond timestamp; a replica only
//!   replaces its entry with a strictly newer one, so replicas converge whatever the
//!   delivery order.
//! - **Sync state machine**: `Unsynced -> Syncing -> InSync`. A joining worker asks
//!   replication nodes for offers and takes a full copy from one that is in sync itself.
//! - **Partial sync**: when only out-of-sync peers answer, every party publishes its
//!   entries tagged with a count and waits until each peer delivered its count or
//!   went quiet.
//! - **Replication nodes**: answer offers and persist to an NDJSON replay log, which is
//!   the last resort when nobody in the cluster answers.
//!
//! ## Submodules
//! - `types`: entries, sync state, partial offer progress.
//! - `protocol`: blackboard topics and messages, HTTP bodies.
//! - `memory`: the replica and its sync runs.
//! - `handlers`: the `globalmem` HTTP API.

pub mod handlers;
pub mod memory;
pub mod protocol;
pub mod types;

pub use memory::{GlobalMemory, SyncListener};
pub use types::{GlobalMemoryEntry, SyncState};

pub const ENDPOINT_GLOBALMEM: &str = "/globalmem";
