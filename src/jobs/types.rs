use crate::blackboard::types::{BlackboardControl, Scope};
use serde_json::Value;
use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;

/// Ballot for one job: the job id plus the voter's timestamp and random tie-breaker.
/// Written as `<job_id>+<timestamp>+<random>`.
#[derive(Debug, Clone, PartialEq)]
pub struct Jobstamp {
    pub job_id: String,
    pub timestamp: u64,
    pub random: f64,
}

impl Jobstamp {
    pub fn new(job_id: &str, timestamp: u64, random: f64) -> Self {
        Self {
            job_id: job_id.to_string(),
            timestamp,
            random,
        }
    }

    /// Lower timestamp first; equal timestamps fall to the lower random value.
    pub fn vote_order(&self, other: &Jobstamp) -> Ordering {
        self.timestamp
            .cmp(&other.timestamp)
            .then_with(|| self.random.total_cmp(&other.random))
    }
}

impl fmt::Display for Jobstamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}+{}+{}", self.job_id, self.timestamp, self.random)
    }
}

impl FromStr for Jobstamp {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut parts = s.rsplitn(3, '+');
        let (Some(random), Some(timestamp), Some(job_id)) = (parts.next(), parts.next(), parts.next())
        else {
            anyhow::bail!("malformed jobstamp: {}", s);
        };
        Ok(Self {
            job_id: job_id.to_string(),
            timestamp: timestamp.parse()?,
            random: random.parse()?,
        })
    }
}

/// How far a job's vote reaches.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum JobScope {
    /// Sibling workers of this node.
    #[default]
    LocalCluster,
    /// Every worker of every node.
    DistributedCluster,
}

impl JobScope {
    pub fn blackboard_scope(self) -> Scope {
        match self {
            JobScope::LocalCluster => Scope::LocalCluster,
            JobScope::DistributedCluster => Scope::Everywhere,
        }
    }
}

/// Per job id bookkeeping, kept for the life of the worker.
#[derive(Debug, Default)]
pub struct JobRecord {
    pub jobstamp: Option<Jobstamp>,
    pub result: Option<Value>,
    /// Result polls that arrived before the result was ready.
    pub waiting: Vec<BlackboardControl>,
    pub running: bool,
}
