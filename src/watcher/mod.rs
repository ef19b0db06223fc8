//! Object Watcher
//!
//! Durable, best-effort persistence for an in-memory map: every mutation is appended
//! as one NDJSON line (`{op, property, value?, time}`) and the map can be rebuilt after
//! a crash by replaying the file. Durability is not transactional; a failed log write
//! leaves the in-memory change standing.

pub mod observed;
pub mod writer;

pub use observed::{ObservedMap, ReplayLogEntry, RestoreStop, restore_object};
pub use writer::ReplayLogWriter;
