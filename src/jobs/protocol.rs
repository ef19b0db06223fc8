use serde::{Deserialize, Serialize};
use serde_json::Value;

pub const TOPIC_VOTE: &str = "org.memgrid.jobs.vote";
pub const TOPIC_RESULT: &str = "org.memgrid.jobs.result";

/// Vote request and vote reply share a shape: the sender's stamp for the job.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VoteMessage {
    pub jobstamp: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResultRequest {
    pub job_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResultReply {
    pub jobstamp: Option<String>,
    pub result: Value,
}
