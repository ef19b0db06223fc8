//! Delivery paths for blackboard envelopes.
//!
//! A `Transport` moves envelopes along one path (sibling relay or network peers).
//! `TransportRouter` picks the paths a publish takes from its `Scope`, and sends a
//! reply along the single path that leads back to the requester.

use super::types::{Delivery, Envelope, EnvelopeBody, Scope};
use crate::ipc::{IpcChannel, IpcMessage};
use crate::membership::types::NodeId;

use anyhow::Result;
use std::sync::Arc;

pub trait Transport: Send + Sync {
    fn name(&self) -> &'static str;

    /// Fans the envelope out to everything this path reaches.
    fn publish(&self, envelope: Envelope) -> Result<()>;

    /// Sends a reply envelope to the worker named in its control.
    fn reply(&self, envelope: Envelope) -> Result<()>;
}

/// Sibling workers through the supervisor relay.
pub struct LocalTransport {
    channel: Arc<IpcChannel>,
}

impl LocalTransport {
    pub fn new(channel: Arc<IpcChannel>) -> Self {
        Self { channel }
    }
}

impl Transport for LocalTransport {
    fn name(&self) -> &'static str {
        "local"
    }

    fn publish(&self, envelope: Envelope) -> Result<()> {
        self.channel.broadcast(IpcMessage::Blackboard {
            envelope,
            delivery: Delivery::Local,
        });
        Ok(())
    }

    fn reply(&self, envelope: Envelope) -> Result<()> {
        let EnvelopeBody::Reply { control, .. } = &envelope.body else {
            anyhow::bail!("local reply without a control on {}", envelope.topic);
        };
        if &control.requester.node != self.channel.node_id() {
            anyhow::bail!("requester {} is not a sibling", control.requester);
        }
        self.channel.broadcast(IpcMessage::Blackboard {
            envelope,
            delivery: Delivery::Local,
        });
        Ok(())
    }
}

pub struct TransportRouter {
    local_node: NodeId,
    local: Arc<dyn Transport>,
    network: Option<Arc<dyn Transport>>,
}

impl TransportRouter {
    pub fn new(
        local_node: NodeId,
        local: Arc<dyn Transport>,
        network: Option<Arc<dyn Transport>>,
    ) -> Self {
        Self {
            local_node,
            local,
            network,
        }
    }

    pub fn has_network(&self) -> bool {
        self.network.is_some()
    }

    pub fn publish(&self, envelope: Envelope, scope: Scope) {
        if scope.includes_external()
            && let Some(network) = &self.network
            && let Err(e) = network.publish(envelope.clone())
        {
            tracing::warn!("{} publish on {} failed: {}", network.name(), envelope.topic, e);
        }
        if scope.includes_local()
            && let Err(e) = self.local.publish(envelope.clone())
        {
            tracing::warn!("{} publish on {} failed: {}", self.local.name(), envelope.topic, e);
        }
    }

    pub fn reply(&self, envelope: Envelope) {
        let EnvelopeBody::Reply { control, .. } = &envelope.body else {
            tracing::error!("Refusing to route a publish as a reply on {}", envelope.topic);
            return;
        };

        let transport = if control.requester.node == self.local_node {
            Some(&self.local)
        } else {
            self.network.as_ref()
        };

        match transport {
            Some(transport) => {
                let topic = envelope.topic.clone();
                if let Err(e) = transport.reply(envelope) {
                    tracing::warn!("{} reply on {} failed: {}", transport.name(), topic, e);
                }
            }
            None => tracing::debug!(
                "No network path to {}, dropping reply on {}",
                control.requester,
                envelope.topic
            ),
        }
    }
}
