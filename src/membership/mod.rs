//! Network Peer Directory
//!
//! Discovers the other nodes of a horizontal cluster so the blackboard knows where
//! to deliver network traffic. Nodes join through seeds, exchange heartbeats that
//! carry their peer lists over UDP, and drop peers that fall silent.
//!
//! Membership is advisory: the grid never waits for a quorum, so an outdated
//! peer list only means fewer replies to a scatter-gather.

pub mod service;
pub mod types;
