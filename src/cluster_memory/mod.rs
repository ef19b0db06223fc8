//! Cluster Memory Module
//!
//! The vertical tier of the grid: a key/value map kept identical across the sibling
//! workers of one node. Writes are relayed through the supervisor (not the
//! blackboard), optionally waiting for every sibling to confirm.
//!
//! ## Core Concepts
//! - **Relay**: `set` applies locally, then broadcasts to siblings.
//! - **Confirmation**: `ensure_replicated` counts siblings via the supervisor and
//!   waits for that many acknowledgements of the exact key.
//! - **Read-through**: `get` can poll siblings for keys missing locally.
//! - **Restart**: a starting worker copies memory from the first sibling that has any.

pub mod memory;
pub mod protocol;

pub use memory::{ClusterMemory, ReplicationStatus};

#[cfg(test)]
mod tests;
