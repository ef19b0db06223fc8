//! Blackboard Messaging Module
//!
//! Topic-based publish/subscribe plus request/reply for every cross-worker and
//! cross-node protocol in the grid.
//!
//! ## Core Concepts
//! - **Scopes**: a publish reaches sibling workers (through the supervisor relay),
//!   network peers (over HTTP), or both. Subscriptions filter by the path a message took.
//! - **Self-delivery**: a publisher subscribed to its own topic hears its own messages.
//! - **Scatter-gather**: `get_reply` attaches a `BlackboardControl`, then collects replies
//!   until a timeout. Cluster size is unknown, so an empty result is never an error.
//!
//! ## Submodules
//! - **`board`**: the `Blackboard` itself.
//! - **`transport`**: the `Transport` trait, the sibling relay path and the scope router.
//! - **`network`**: HTTP delivery to peers from the membership directory.
//! - **`handlers`**: HTTP ingress for envelopes posted by peers.
//! - **`types`**: envelopes, scopes, controls.

pub mod board;
pub mod handlers;
pub mod network;
pub mod transport;
pub mod types;

pub use board::{Blackboard, SubscriptionId};

/// Ingress path for envelopes from network peers.
pub const ENDPOINT_BLACKBOARD: &str = "/__blackboard";

#[cfg(test)]
mod tests;
