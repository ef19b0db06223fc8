use super::protocol::ClusterMemoryMessage;
use crate::blackboard::types::WorkerId;
use crate::config::ClusterMemoryConfig;
use crate::ipc::{IpcChannel, IpcMessage};
use crate::util::{PendingReplies, collect_count, first_matching};

use dashmap::DashMap;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

/// Outcome of a replicated `set`. Coordination failures are reported here
/// instead of as errors, so callers decide whether to retry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReplicationStatus {
    /// Applied locally and relayed; nobody was asked to confirm.
    Relayed,
    /// Every sibling confirmed the key.
    Replicated { siblings: usize },
    /// Some siblings did not confirm before the timeout.
    TimedOut { acked: usize, expected: usize },
    /// The worker count probe got no answer.
    ClusterUnknown,
}

impl ReplicationStatus {
    pub const TIMEOUT_MARKER: &'static str = "_org_memgrid_cluster_memory_timeout";

    pub fn is_ok(&self) -> bool {
        matches!(self, Self::Relayed | Self::Replicated { .. })
    }

    /// Error marker string for failed replication, `None` on success.
    pub fn marker(&self) -> Option<&'static str> {
        if self.is_ok() {
            None
        } else {
            Some(Self::TIMEOUT_MARKER)
        }
    }
}

/// Key/value memory replicated across the sibling workers of one node.
///
/// Last writer by delivery order wins; entries live for the lifetime of the worker.
pub struct ClusterMemory {
    channel: Arc<IpcChannel>,
    memory: DashMap<String, Value>,
    acks: PendingReplies<String>,
    polls: PendingReplies<Option<Value>>,
    offers: PendingReplies<HashMap<String, Value>>,
    config: ClusterMemoryConfig,
}

impl ClusterMemory {
    pub fn new(channel: Arc<IpcChannel>, config: ClusterMemoryConfig) -> Arc<Self> {
        Arc::new(Self {
            channel,
            memory: DashMap::new(),
            acks: PendingReplies::new(),
            polls: PendingReplies::new(),
            offers: PendingReplies::new(),
            config,
        })
    }

    fn me(&self) -> WorkerId {
        self.channel.worker_id()
    }

    /// Restores from a sibling that already holds memory, if configured.
    pub async fn init(&self) -> usize {
        if !self.config.restore_on_start {
            return 0;
        }
        self.restore_from_siblings(self.config.timeout()).await
    }

    /// Asks siblings for their memory and merges the first non-empty answer.
    /// Keys already set locally are kept.
    pub async fn restore_from_siblings(&self, timeout: Duration) -> usize {
        let (request_id, mut rx) = self.offers.register();
        self.channel
            .broadcast(IpcMessage::ClusterMemory(ClusterMemoryMessage::ReplicaRequest {
                request_id: request_id.clone(),
                from: self.me(),
            }));

        let offer = first_matching(&mut rx, timeout, |entries| !entries.is_empty()).await;
        self.offers.remove(&request_id);

        let Some(entries) = offer else {
            tracing::info!("Worker {}: no sibling memory to restore", self.me());
            return 0;
        };

        let mut merged = 0;
        for (key, value) in entries {
            self.memory.entry(key).or_insert_with(|| {
                merged += 1;
                value
            });
        }
        tracing::info!("Worker {} restored {} key(s) from a sibling", self.me(), merged);
        merged
    }

    /// Stores locally and relays to every sibling. With `ensure_replicated`, waits
    /// until each sibling confirmed the key or `timeout` elapsed.
    pub async fn set(
        &self,
        key: &str,
        value: Value,
        ensure_replicated: bool,
        timeout: Option<Duration>,
    ) -> ReplicationStatus {
        self.memory.insert(key.to_string(), value.clone());

        if !ensure_replicated {
            self.relay_set(key, value, None);
            return ReplicationStatus::Relayed;
        }

        let timeout = timeout.unwrap_or_else(|| self.config.timeout());
        let deadline = Instant::now() + timeout;
        let (ack_id, mut rx) = self.acks.register();
        self.relay_set(key, value, Some(ack_id.clone()));

        let status = match self.channel.count_workers(timeout).await {
            None => ReplicationStatus::ClusterUnknown,
            Some(workers) => {
                let expected = workers.saturating_sub(1);
                let remaining = deadline.saturating_duration_since(Instant::now());
                let acked = collect_count(&mut rx, expected, remaining)
                    .await
                    .into_iter()
                    .filter(|acked_key| acked_key == key)
                    .count();
                if acked >= expected {
                    ReplicationStatus::Replicated { siblings: expected }
                } else {
                    ReplicationStatus::TimedOut { acked, expected }
                }
            }
        };
        self.acks.remove(&ack_id);

        if !status.is_ok() {
            tracing::warn!("Worker {}: replication of {} incomplete: {:?}", self.me(), key, status);
        }
        status
    }

    fn relay_set(&self, key: &str, value: Value, ack_id: Option<String>) {
        self.channel
            .broadcast(IpcMessage::ClusterMemory(ClusterMemoryMessage::Set {
                key: key.to_string(),
                value,
                from: self.me(),
                ack_id,
            }));
    }

    /// Reads a key. Missing keys are optionally polled from siblings, then
    /// optionally initialised with `init_if_undefined`.
    pub async fn get(
        &self,
        key: &str,
        init_if_undefined: Option<Value>,
        poll_replicas: bool,
        timeout: Option<Duration>,
    ) -> Option<Value> {
        if let Some(value) = self.get_local(key) {
            return Some(value);
        }

        if poll_replicas
            && let Some(value) = self.poll_siblings(key, timeout.unwrap_or_else(|| self.config.timeout())).await
        {
            self.memory.insert(key.to_string(), value.clone());
            return Some(value);
        }

        let default = init_if_undefined?;
        self.set(key, default.clone(), false, None).await;
        Some(default)
    }

    pub fn get_local(&self, key: &str) -> Option<Value> {
        self.memory.get(key).map(|v| v.value().clone())
    }

    pub fn len(&self) -> usize {
        self.memory.len()
    }

    pub fn is_empty(&self) -> bool {
        self.memory.is_empty()
    }

    async fn poll_siblings(&self, key: &str, timeout: Duration) -> Option<Value> {
        let (request_id, mut rx) = self.polls.register();
        self.channel
            .broadcast(IpcMessage::ClusterMemory(ClusterMemoryMessage::Poll {
                key: key.to_string(),
                request_id: request_id.clone(),
                from: self.me(),
            }));
        let reply = first_matching(&mut rx, timeout, |value| value.is_some()).await;
        self.polls.remove(&request_id);
        reply.flatten()
    }

    /// Called by the worker inbox loop.
    pub fn handle_message(&self, msg: ClusterMemoryMessage) {
        match msg {
            ClusterMemoryMessage::Set {
                key,
                value,
                from,
                ack_id,
            } => {
                if from == self.me() {
                    return;
                }
                self.memory.insert(key.clone(), value);
                if let Some(ack_id) = ack_id {
                    self.channel.send_to(
                        from,
                        IpcMessage::ClusterMemory(ClusterMemoryMessage::SetAck {
                            ack_id,
                            key,
                            from: self.me(),
                        }),
                    );
                }
            }
            ClusterMemoryMessage::SetAck { ack_id, key, from } => {
                if !self.acks.deliver(&ack_id, key) {
                    tracing::debug!("Late set ack from worker {}", from);
                }
            }
            ClusterMemoryMessage::Poll {
                key,
                request_id,
                from,
            } => {
                if from == self.me() {
                    return;
                }
                let value = self.get_local(&key);
                self.channel.send_to(
                    from,
                    IpcMessage::ClusterMemory(ClusterMemoryMessage::PollReply { request_id, value }),
                );
            }
            ClusterMemoryMessage::PollReply { request_id, value } => {
                self.polls.deliver(&request_id, value);
            }
            ClusterMemoryMessage::ReplicaRequest { request_id, from } => {
                if from == self.me() || self.memory.is_empty() {
                    return;
                }
                let entries: HashMap<String, Value> = self
                    .memory
                    .iter()
                    .map(|entry| (entry.key().clone(), entry.value().clone()))
                    .collect();
                self.channel.send_to(
                    from,
                    IpcMessage::ClusterMemory(ClusterMemoryMessage::ReplicaOffer {
                        request_id,
                        entries,
                    }),
                );
            }
            ClusterMemoryMessage::ReplicaOffer {
                request_id,
                entries,
            } => {
                self.offers.deliver(&request_id, entries);
            }
        }
    }
}
