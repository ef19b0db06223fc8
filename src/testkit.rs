//! Test fixtures: in-process clusters and a loopback network between supervisors.

use crate::blackboard::transport::Transport;
use crate::blackboard::types::{Envelope, EnvelopeBody};
use crate::config::GridConfig;
use crate::ipc::Supervisor;
use crate::jobs::JobFunctionRegistry;
use crate::membership::types::NodeId;
use crate::node::Worker;

use anyhow::Result;
use dashmap::DashMap;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

/// Short timeouts so sync and vote rounds finish quickly.
pub fn fast_config(data_dir: &Path) -> GridConfig {
    let mut config = GridConfig::default();
    config.blackboard.reply_timeout_ms = 200;
    config.cluster_memory.timeout_ms = 200;
    config.cluster_memory.restore_on_start = false;
    config.global_memory.sync_retries = 2;
    config.global_memory.sync_timeout_ms = 100;
    config.global_memory.partial_sync_check_interval_ms = 20;
    config.global_memory.partial_sync_max_wait_ms = 300;
    config.global_memory.wait_for_sync = false;
    config.global_memory.replay_log_dir = data_dir.to_path_buf();
    config.jobs.vote_timeout_ms = 150;
    config.jobs.result_timeout_ms = 1000;
    config
}

/// Spawns `n` workers under one supervisor. Workers are not initialised.
pub fn spawn_workers(
    supervisor: &Arc<Supervisor>,
    network: Option<Arc<dyn Transport>>,
    n: usize,
    config: &GridConfig,
) -> Vec<Arc<Worker>> {
    let registry = JobFunctionRegistry::new();
    (0..n)
        .map(|_| Worker::spawn(supervisor, network.clone(), None, registry.clone(), config))
        .collect()
}

pub fn local_cluster(n: usize, config: &GridConfig) -> (Arc<Supervisor>, Vec<Arc<Worker>>) {
    let supervisor = Supervisor::new(NodeId::new());
    let workers = spawn_workers(&supervisor, None, n, config);
    (supervisor, workers)
}

/// Delivers envelopes straight into other supervisors, standing in for HTTP peers.
pub struct LoopbackNetwork {
    nodes: DashMap<NodeId, Arc<Supervisor>>,
}

impl LoopbackNetwork {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            nodes: DashMap::new(),
        })
    }

    /// Adds a node and returns its transport.
    pub fn join(self: &Arc<Self>, supervisor: &Arc<Supervisor>) -> Arc<dyn Transport> {
        self.nodes
            .insert(supervisor.node_id().clone(), supervisor.clone());
        Arc::new(LoopbackTransport {
            node: supervisor.node_id().clone(),
            network: self.clone(),
        })
    }

    pub fn leave(&self, node: &NodeId) {
        self.nodes.remove(node);
    }
}

struct LoopbackTransport {
    node: NodeId,
    network: Arc<LoopbackNetwork>,
}

impl Transport for LoopbackTransport {
    fn name(&self) -> &'static str {
        "loopback"
    }

    fn publish(&self, envelope: Envelope) -> Result<()> {
        if !self.network.nodes.contains_key(&self.node) {
            anyhow::bail!("{} is offline", self.node);
        }
        let peers: Vec<Arc<Supervisor>> = self
            .network
            .nodes
            .iter()
            .filter(|entry| entry.key() != &self.node)
            .map(|entry| entry.value().clone())
            .collect();
        for peer in peers {
            peer.inject_external(envelope.clone());
        }
        Ok(())
    }

    fn reply(&self, envelope: Envelope) -> Result<()> {
        let EnvelopeBody::Reply { control, .. } = &envelope.body else {
            anyhow::bail!("not a reply");
        };
        let Some(peer) = self
            .network
            .nodes
            .get(&control.requester.node)
            .map(|entry| entry.value().clone())
        else {
            anyhow::bail!("{} unreachable", control.requester.node);
        };
        peer.inject_external(envelope);
        Ok(())
    }
}

pub async fn settle() {
    tokio::time::sleep(Duration::from_millis(50)).await;
}
