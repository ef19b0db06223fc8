use super::{IpcChannel, IpcMessage};
use crate::blackboard::types::{Delivery, Envelope, EnvelopeBody, WorkerId};
use crate::membership::types::NodeId;

use dashmap::DashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use tokio::sync::mpsc;

/// Relays messages between the sibling workers of one node.
pub struct Supervisor {
    node_id: NodeId,
    workers: DashMap<WorkerId, mpsc::UnboundedSender<IpcMessage>>,
    next_worker: AtomicU32,
}

impl Supervisor {
    pub fn new(node_id: NodeId) -> Arc<Self> {
        Arc::new(Self {
            node_id,
            workers: DashMap::new(),
            next_worker: AtomicU32::new(0),
        })
    }

    pub fn node_id(&self) -> &NodeId {
        &self.node_id
    }

    /// Registers a new worker and returns its endpoint plus inbox.
    pub fn connect(self: &Arc<Self>) -> (IpcChannel, mpsc::UnboundedReceiver<IpcMessage>) {
        let worker = self.next_worker.fetch_add(1, Ordering::SeqCst);
        let (tx, rx) = mpsc::unbounded_channel();
        self.workers.insert(worker, tx);
        tracing::info!("Worker {} connected, {} worker(s) in cluster", worker, self.workers.len());
        (IpcChannel::new(worker, self.clone()), rx)
    }

    /// Forgets a worker, e.g. after it died.
    pub fn disconnect(&self, worker: WorkerId) {
        if self.workers.remove(&worker).is_some() {
            tracing::info!("Worker {} disconnected, {} worker(s) remain", worker, self.workers.len());
        }
    }

    pub fn worker_count(&self) -> usize {
        self.workers.len()
    }

    /// Handles a message sent up by worker `from`.
    pub fn relay(&self, from: WorkerId, msg: IpcMessage) {
        match msg {
            IpcMessage::CountWorkers { request_id, .. } => {
                let count = self.workers.len();
                self.send_to(from, IpcMessage::WorkerCount { request_id, count });
            }
            IpcMessage::Blackboard {
                envelope:
                    Envelope {
                        topic,
                        body: body @ EnvelopeBody::Reply { .. },
                    },
                delivery,
            } => self.route_reply(Envelope { topic, body }, delivery),
            other => self.broadcast(other),
        }
    }

    /// Sends to one worker. Returns false if it is gone.
    pub fn send_to(&self, worker: WorkerId, msg: IpcMessage) -> bool {
        let delivered = self
            .workers
            .get(&worker)
            .map(|tx| tx.send(msg).is_ok())
            .unwrap_or(false);
        if !delivered {
            tracing::debug!("Dropping message for missing worker {}", worker);
        }
        delivered
    }

    pub fn broadcast(&self, msg: IpcMessage) {
        for entry in self.workers.iter() {
            if entry.value().send(msg.clone()).is_err() {
                tracing::debug!("Worker {} inbox closed", entry.key());
            }
        }
    }

    /// Entry point for envelopes that arrived from a network peer.
    pub fn inject_external(&self, envelope: Envelope) {
        match envelope.body {
            EnvelopeBody::Reply { .. } => self.route_reply(envelope, Delivery::External),
            EnvelopeBody::Publish { .. } => self.broadcast(IpcMessage::Blackboard {
                envelope,
                delivery: Delivery::External,
            }),
        }
    }

    fn route_reply(&self, envelope: Envelope, delivery: Delivery) {
        let target = match &envelope.body {
            EnvelopeBody::Reply { control, .. } if control.requester.node == self.node_id => {
                control.requester.worker
            }
            _ => {
                tracing::debug!("Reply on {} not addressed to this node", envelope.topic);
                return;
            }
        };
        self.send_to(target, IpcMessage::Blackboard { envelope, delivery });
    }
}
