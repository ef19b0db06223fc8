//! Worker Wiring
//!
//! A `Worker` is one member of a node's vertical cluster: its relay endpoint, its
//! blackboard, and the memory and job subsystems built on them. Each worker runs an
//! inbox loop that dispatches relayed messages to the subsystem they belong to.

use crate::blackboard::Blackboard;
use crate::blackboard::transport::{LocalTransport, Transport, TransportRouter};
use crate::blackboard::types::MemberId;
use crate::cluster_memory::ClusterMemory;
use crate::config::GridConfig;
use crate::global_memory::GlobalMemory;
use crate::ipc::{IpcChannel, IpcMessage, Supervisor};
use crate::jobs::{DistributedJobHandler, JobFunctionRegistry};
use crate::netcheck::NetCheck;

use anyhow::Result;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

pub struct Worker {
    pub member: MemberId,
    pub channel: Arc<IpcChannel>,
    pub blackboard: Arc<Blackboard>,
    pub cluster_memory: Arc<ClusterMemory>,
    pub global_memory: Arc<GlobalMemory>,
    pub jobs: Arc<DistributedJobHandler>,
    inbox_task: JoinHandle<()>,
}

impl Worker {
    /// Connects a new worker to `supervisor` and starts its inbox loop. Subsystems
    /// are built but not yet initialised; see [`Worker::init`].
    pub fn spawn(
        supervisor: &Arc<Supervisor>,
        network: Option<Arc<dyn Transport>>,
        netcheck: Option<&NetCheck>,
        registry: Arc<JobFunctionRegistry>,
        config: &GridConfig,
    ) -> Arc<Self> {
        let (channel, inbox) = supervisor.connect();
        let channel = Arc::new(channel);
        let member = MemberId::new(channel.node_id().clone(), channel.worker_id());

        let local: Arc<dyn Transport> = Arc::new(LocalTransport::new(channel.clone()));
        let router = TransportRouter::new(member.node.clone(), local, network);
        let blackboard = Blackboard::new(member.clone(), router, config.blackboard.clone());

        let cluster_memory = ClusterMemory::new(channel.clone(), config.cluster_memory.clone());
        let global_memory = GlobalMemory::new(
            blackboard.clone(),
            config.global_memory.clone(),
            &config.node.stable_name(),
        );
        if let Some(netcheck) = netcheck {
            global_memory.attach_netcheck(netcheck);
        }
        let jobs = DistributedJobHandler::new(blackboard.clone(), registry, config.jobs.clone());

        let inbox_task = tokio::spawn(inbox_loop(
            inbox,
            channel.clone(),
            blackboard.clone(),
            cluster_memory.clone(),
        ));

        Arc::new(Self {
            member,
            channel,
            blackboard,
            cluster_memory,
            global_memory,
            jobs,
            inbox_task,
        })
    }

    /// Subscribes the job handler, restores cluster memory from siblings and starts
    /// the global memory sync (waiting for it when configured).
    pub async fn init(&self) -> Result<()> {
        self.jobs.init();
        let restored = self.cluster_memory.init().await;
        self.global_memory.init().await?;
        tracing::info!(
            "Worker {} ready: {} cluster key(s) restored, global memory {:?}",
            self.member,
            restored,
            self.global_memory.state()
        );
        Ok(())
    }

    /// Leaves the vertical cluster and stops the inbox loop.
    pub fn shutdown(&self) {
        self.channel.disconnect();
        self.inbox_task.abort();
    }
}

async fn inbox_loop(
    mut inbox: mpsc::UnboundedReceiver<IpcMessage>,
    channel: Arc<IpcChannel>,
    blackboard: Arc<Blackboard>,
    cluster_memory: Arc<ClusterMemory>,
) {
    while let Some(msg) = inbox.recv().await {
        match msg {
            IpcMessage::Blackboard { envelope, delivery } => {
                blackboard.handle_inbound(envelope, delivery);
            }
            IpcMessage::ClusterMemory(msg) => cluster_memory.handle_message(msg),
            IpcMessage::WorkerCount { request_id, count } => {
                channel.complete_count(&request_id, count);
            }
            IpcMessage::CountWorkers { .. } => {
                tracing::debug!("Worker {} ignoring relayed count request", channel.worker_id());
            }
        }
    }
    tracing::debug!("Worker {} inbox closed", channel.worker_id());
}
