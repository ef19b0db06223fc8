//! Job Function Registry
//!
//! Maps a job signature (the part of a job id before its first `.`) to the generators
//! used to stamp its votes. Signatures without an entry vote with wall-clock time
//! and a uniform random tie-breaker.

use super::types::Jobstamp;
use crate::util::now_ms;

use dashmap::DashMap;
use std::sync::Arc;

pub type TimestampFn = Arc<dyn Fn() -> u64 + Send + Sync>;
pub type RandomFn = Arc<dyn Fn() -> f64 + Send + Sync>;

/// Vote generators for one job signature, e.g. to bias voting by load.
#[derive(Clone)]
pub struct JobFunctions {
    pub vote_timestamp: TimestampFn,
    pub random: RandomFn,
}

impl Default for JobFunctions {
    fn default() -> Self {
        Self {
            vote_timestamp: Arc::new(now_ms),
            random: Arc::new(rand::random::<f64>),
        }
    }
}

#[derive(Default)]
pub struct JobFunctionRegistry {
    functions: DashMap<String, JobFunctions>,
}

impl JobFunctionRegistry {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn signature(job_id: &str) -> &str {
        job_id.split('.').next().unwrap_or(job_id)
    }

    pub fn register(&self, signature: &str, functions: JobFunctions) {
        self.functions.insert(signature.to_string(), functions);
        tracing::info!("Registered job functions: {}", signature);
    }

    pub fn has_functions(&self, signature: &str) -> bool {
        self.functions.contains_key(signature)
    }

    /// Stamps `job_id` with the generators of its signature.
    pub fn stamp(&self, job_id: &str) -> Jobstamp {
        let functions = self
            .functions
            .get(Self::signature(job_id))
            .map(|entry| entry.value().clone())
            .unwrap_or_default();
        Jobstamp::new(job_id, (functions.vote_timestamp)(), (functions.random)())
    }
}
