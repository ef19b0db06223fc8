use super::{IpcMessage, Supervisor};
use crate::blackboard::types::WorkerId;
use crate::membership::types::NodeId;
use crate::util::{PendingReplies, first_matching};

use std::sync::Arc;
use std::time::Duration;

/// A worker's end of the relay.
pub struct IpcChannel {
    worker: WorkerId,
    supervisor: Arc<Supervisor>,
    counts: PendingReplies<usize>,
}

impl IpcChannel {
    pub(super) fn new(worker: WorkerId, supervisor: Arc<Supervisor>) -> Self {
        Self {
            worker,
            supervisor,
            counts: PendingReplies::new(),
        }
    }

    pub fn worker_id(&self) -> WorkerId {
        self.worker
    }

    pub fn node_id(&self) -> &NodeId {
        self.supervisor.node_id()
    }

    /// Relays to every worker, this one included.
    pub fn broadcast(&self, msg: IpcMessage) {
        self.supervisor.relay(self.worker, msg);
    }

    pub fn send_to(&self, worker: WorkerId, msg: IpcMessage) -> bool {
        self.supervisor.send_to(worker, msg)
    }

    /// Asks the supervisor how many workers exist. `None` when it did not answer in time.
    pub async fn count_workers(&self, timeout: Duration) -> Option<usize> {
        let (request_id, mut rx) = self.counts.register();
        self.supervisor.relay(
            self.worker,
            IpcMessage::CountWorkers {
                request_id: request_id.clone(),
                from: self.worker,
            },
        );
        let count = first_matching(&mut rx, timeout, |_| true).await;
        self.counts.remove(&request_id);
        if count.is_none() {
            tracing::info!("Worker count probe timed out after {:?}", timeout);
        }
        count
    }

    /// Called by the worker's inbox loop when a count arrives.
    pub fn complete_count(&self, request_id: &str, count: usize) {
        if !self.counts.deliver(request_id, count) {
            tracing::debug!("Late worker count {} for {}", count, request_id);
        }
    }

    pub fn disconnect(&self) {
        self.supervisor.disconnect(self.worker);
    }
}
