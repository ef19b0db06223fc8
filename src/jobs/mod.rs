//! Distributed Job Handler
//!
//! Leaderless "lowest stamp wins" election that runs a uniquely identified job once
//! across the local or distributed cluster.
//!
//! ## Core Concepts
//! - **Jobstamp**: `<job_id>+<timestamp>+<random>`. Each worker stamps a job once and
//!   answers every vote with that same stamp, even before it runs the job itself.
//! - **Winner**: the caller whose stamp is lowest among all replies (its own included)
//!   runs the job. Ties and an empty vote resolve to running it.
//! - **Losers**: poll for the result; the first non-null reply is cached.
//! - **Records never expire**: callers embed a request id in job ids that must run again.
//!
//! ## Submodules
//! - `types`: `Jobstamp`, `JobScope`, `JobRecord`.
//! - `protocol`: vote and result topics.
//! - `registry`: per-signature vote generators.
//! - `handler`: `DistributedJobHandler`.

pub mod handler;
pub mod protocol;
pub mod registry;
pub mod types;

pub use handler::DistributedJobHandler;
pub use registry::{JobFunctionRegistry, JobFunctions};
pub use types::{JobScope, Jobstamp};
