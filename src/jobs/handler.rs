use super::protocol::*;
use super::registry::JobFunctionRegistry;
use super::types::*;
use crate::blackboard::Blackboard;
use crate::blackboard::types::{BlackboardControl, BoardMessage, Scope};
use crate::config::JobsConfig;

use anyhow::Result;
use dashmap::DashMap;
use serde_json::Value;
use std::future::Future;
use std::sync::{Arc, Weak};
use std::time::Duration;

/// Runs uniquely identified jobs exactly once across a cluster by leaderless vote:
/// every participant stamps the job, and the lowest `(timestamp, random)` runs it.
pub struct DistributedJobHandler {
    blackboard: Arc<Blackboard>,
    registry: Arc<JobFunctionRegistry>,
    jobs: DashMap<String, JobRecord>,
    config: JobsConfig,
}

/// What the vote decided for this worker.
enum Ballot {
    Run,
    Poll,
}

impl DistributedJobHandler {
    pub fn new(
        blackboard: Arc<Blackboard>,
        registry: Arc<JobFunctionRegistry>,
        config: JobsConfig,
    ) -> Arc<Self> {
        Arc::new(Self {
            blackboard,
            registry,
            jobs: DashMap::new(),
            config,
        })
    }

    pub fn registry(&self) -> &Arc<JobFunctionRegistry> {
        &self.registry
    }

    /// Answers votes and result polls from local and network peers.
    pub fn init(self: &Arc<Self>) {
        let this: Weak<Self> = Arc::downgrade(self);
        self.blackboard.subscribe(TOPIC_VOTE, Scope::Everywhere, move |msg| {
            if let Some(handler) = this.upgrade() {
                handler.on_vote(msg);
            }
        });
        let this: Weak<Self> = Arc::downgrade(self);
        self.blackboard.subscribe(TOPIC_RESULT, Scope::Everywhere, move |msg| {
            if let Some(handler) = this.upgrade() {
                handler.on_result_request(msg);
            }
        });
    }

    pub fn cached_result(&self, job_id: &str) -> Option<Value> {
        self.jobs.get(job_id).and_then(|record| record.result.clone())
    }

    pub fn job_count(&self) -> usize {
        self.jobs.len()
    }

    /// Runs `job` here if this worker wins the vote for `job_id`, otherwise waits for
    /// the winner's result. `Ok(None)` means no result arrived and the job was not
    /// run locally. A failing job is not cached, so the same id can be retried.
    pub async fn run_job<F, Fut>(
        &self,
        job_id: &str,
        job: F,
        scope: JobScope,
        run_locally_on_poll_error: bool,
        result_timeout: Option<Duration>,
    ) -> Result<Option<Value>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<Value>>,
    {
        if let Some(result) = self.cached_result(job_id) {
            tracing::debug!("Job {} already has a result", job_id);
            return Ok(Some(result));
        }

        let ours = self.stamp(job_id);
        let ballot = self.vote(&ours, scope).await;

        match ballot {
            Ballot::Run if self.claim(job_id) => self.execute(job_id, job).await.map(Some),
            _ => {
                let timeout = result_timeout.unwrap_or_else(|| self.config.result_timeout());
                if let Some(result) = self.poll_result(job_id, scope, timeout).await {
                    return Ok(Some(result));
                }
                if run_locally_on_poll_error && self.claim(job_id) {
                    tracing::warn!("No result for job {} from the cluster, running it locally", job_id);
                    return self.execute(job_id, job).await.map(Some);
                }
                tracing::warn!("Job {} produced no result within {:?}", job_id, timeout);
                Ok(None)
            }
        }
    }

    /// The job's stamp, minted on first reference.
    fn stamp(&self, job_id: &str) -> Jobstamp {
        let mut record = self.jobs.entry(job_id.to_string()).or_default();
        record
            .jobstamp
            .get_or_insert_with(|| self.registry.stamp(job_id))
            .clone()
    }

    async fn vote(&self, ours: &Jobstamp, scope: JobScope) -> Ballot {
        let request = VoteMessage {
            jobstamp: ours.to_string(),
        };
        let Ok(payload) = serde_json::to_value(&request) else {
            return Ballot::Run;
        };

        let replies = self
            .blackboard
            .get_reply(
                TOPIC_VOTE,
                payload,
                Some(self.config.vote_timeout()),
                scope.blackboard_scope(),
            )
            .await;

        let lowest = replies
            .into_iter()
            .filter_map(|reply| serde_json::from_value::<VoteMessage>(reply).ok())
            .filter_map(|vote| vote.jobstamp.parse::<Jobstamp>().ok())
            .filter(|stamp| stamp.job_id == ours.job_id)
            .min_by(|a, b| a.vote_order(b));

        match lowest {
            Some(lowest) if lowest.vote_order(ours).is_lt() => {
                tracing::debug!("Job {}: {} beats our {}", ours.job_id, lowest, ours);
                Ballot::Poll
            }
            _ => Ballot::Run,
        }
    }

    /// Marks the job running unless a result or a concurrent run already exists.
    fn claim(&self, job_id: &str) -> bool {
        let mut record = self.jobs.entry(job_id.to_string()).or_default();
        if record.running || record.result.is_some() {
            return false;
        }
        record.running = true;
        true
    }

    async fn execute<F, Fut>(&self, job_id: &str, job: F) -> Result<Value>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<Value>>,
    {
        tracing::info!("{} running job {}", self.blackboard.member(), job_id);
        match job().await {
            Ok(result) => {
                self.complete(job_id, result.clone());
                Ok(result)
            }
            Err(e) => {
                if let Some(mut record) = self.jobs.get_mut(job_id) {
                    record.running = false;
                }
                tracing::error!("Job {} failed: {:#}", job_id, e);
                Err(e)
            }
        }
    }

    /// Caches the result and answers every poll that was waiting for it.
    fn complete(&self, job_id: &str, result: Value) {
        let (jobstamp, waiting) = {
            let mut record = self.jobs.entry(job_id.to_string()).or_default();
            record.running = false;
            record.result = Some(result.clone());
            (
                record.jobstamp.as_ref().map(|s| s.to_string()),
                std::mem::take(&mut record.waiting),
            )
        };

        if waiting.is_empty() {
            return;
        }
        tracing::debug!("Job {}: answering {} waiting poll(s)", job_id, waiting.len());
        let reply = ResultReply { jobstamp, result };
        for control in &waiting {
            self.reply_result(control, &reply);
        }
    }

    /// The first non-null result any peer reports.
    async fn poll_result(&self, job_id: &str, scope: JobScope, timeout: Duration) -> Option<Value> {
        let request = ResultRequest {
            job_id: job_id.to_string(),
        };
        let payload = serde_json::to_value(&request).ok()?;

        let reply = self
            .blackboard
            .get_first_reply(
                TOPIC_RESULT,
                payload,
                Some(timeout),
                scope.blackboard_scope(),
                |reply| reply.get("result").is_some_and(|r| !r.is_null()),
            )
            .await?;

        let ResultReply { result, .. } = serde_json::from_value(reply).ok()?;
        self.complete(job_id, result.clone());
        Some(result)
    }

    fn on_vote(&self, msg: BoardMessage) {
        let Some(control) = msg.control else { return };
        let vote: VoteMessage = match serde_json::from_value(msg.payload) {
            Ok(vote) => vote,
            Err(e) => {
                tracing::warn!("Malformed job vote from {}: {}", msg.from, e);
                return;
            }
        };
        let theirs: Jobstamp = match vote.jobstamp.parse() {
            Ok(stamp) => stamp,
            Err(e) => {
                tracing::warn!("Bad jobstamp from {}: {}", msg.from, e);
                return;
            }
        };

        let ours = self.stamp(&theirs.job_id);
        let reply = VoteMessage {
            jobstamp: ours.to_string(),
        };
        if let Ok(payload) = serde_json::to_value(&reply) {
            self.blackboard.send_reply(TOPIC_VOTE, &control, payload);
        }
    }

    fn on_result_request(&self, msg: BoardMessage) {
        let Some(control) = msg.control else { return };
        let request: ResultRequest = match serde_json::from_value(msg.payload) {
            Ok(request) => request,
            Err(e) => {
                tracing::warn!("Malformed job result request from {}: {}", msg.from, e);
                return;
            }
        };

        let reply = {
            let mut record = self.jobs.entry(request.job_id.clone()).or_default();
            match record.result.clone() {
                Some(result) => Some(ResultReply {
                    jobstamp: record.jobstamp.as_ref().map(|s| s.to_string()),
                    result,
                }),
                None => {
                    record.waiting.push(control.clone());
                    None
                }
            }
        };

        if let Some(reply) = reply {
            self.reply_result(&control, &reply);
        }
    }

    fn reply_result(&self, control: &BlackboardControl, reply: &ResultReply) {
        match serde_json::to_value(reply) {
            Ok(payload) => self.blackboard.send_reply(TOPIC_RESULT, control, payload),
            Err(e) => tracing::error!("Failed to encode job result: {}", e),
        }
    }
}
