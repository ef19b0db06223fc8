//! Distributed Memory Grid Library
//!
//! Shared state and coordination for a cluster of nodes, each running a group of
//! sibling workers. The binary (`main.rs`) wires these modules into a node.
//!
//! ## Architecture Modules
//! - **`blackboard`**: topic pub/sub and scatter-gather request/reply across sibling
//!   workers and network peers. Every other cluster protocol rides on it.
//! - **`cluster_memory`**: key/value memory replicated across the workers of one node.
//! - **`global_memory`**: eventually consistent key/value memory across all nodes, with
//!   a sync state machine and replay-log durability on replication nodes.
//! - **`jobs`**: leaderless "lowest stamp wins" election running a job once cluster-wide.
//! - **`watcher`**: NDJSON replay log for in-memory maps.
//! - **`ipc`**: the supervisor relay between sibling workers.
//! - **`membership`**: UDP gossip directory of network peers.
//! - **`netcheck`**: connectivity monitor driving global memory resyncs.
//! - **`node`**: per-worker wiring of the above.
//! - **`config`**, **`util`**: tunables, clocks and reply correlation.

pub mod blackboard;
pub mod cluster_memory;
pub mod config;
pub mod global_memory;
pub mod ipc;
pub mod jobs;
pub mod membership;
pub mod netcheck;
pub mod node;
pub mod util;
pub mod watcher;

#[cfg(test)]
pub(crate) mod testkit;
