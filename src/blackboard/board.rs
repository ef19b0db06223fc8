use super::transport::TransportRouter;
use super::types::*;
use crate::config::BlackboardConfig;
use crate::util::{PendingReplies, collect_until, first_matching};

use dashmap::DashMap;
use serde_json::Value;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

/// Type alias for a topic listener. Listeners run on the worker's inbox loop and
/// must not block; async follow-up work is spawned.
pub type Listener = Arc<dyn Fn(BoardMessage) + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

struct Subscriber {
    id: SubscriptionId,
    scope: Scope,
    listener: Listener,
}

/// One worker's view of the cluster-wide publish/subscribe and request/reply bus.
pub struct Blackboard {
    member: MemberId,
    /// Topic -> subscribers in subscription order.
    topics: DashMap<String, Vec<Subscriber>>,
    pending: PendingReplies<Value>,
    router: TransportRouter,
    next_subscription: AtomicU64,
    config: BlackboardConfig,
}

impl Blackboard {
    pub fn new(member: MemberId, router: TransportRouter, config: BlackboardConfig) -> Arc<Self> {
        Arc::new(Self {
            member,
            topics: DashMap::new(),
            pending: PendingReplies::new(),
            router,
            next_subscription: AtomicU64::new(1),
            config,
        })
    }

    pub fn member(&self) -> &MemberId {
        &self.member
    }

    pub fn default_timeout(&self) -> Duration {
        self.config.reply_timeout()
    }

    /// Registers `listener` for `topic`, hearing only deliveries `scope` admits.
    pub fn subscribe<F>(&self, topic: &str, scope: Scope, listener: F) -> SubscriptionId
    where
        F: Fn(BoardMessage) + Send + Sync + 'static,
    {
        let id = SubscriptionId(self.next_subscription.fetch_add(1, Ordering::Relaxed));
        self.topics.entry(topic.to_string()).or_default().push(Subscriber {
            id,
            scope,
            listener: Arc::new(listener),
        });
        tracing::debug!("{} subscribed to {} ({:?})", self.member, topic, scope);
        id
    }

    /// Removes a listener. Unknown ids are ignored.
    pub fn unsubscribe(&self, topic: &str, id: SubscriptionId) {
        if let Some(mut subscribers) = self.topics.get_mut(topic) {
            subscribers.retain(|s| s.id != id);
        }
    }

    pub fn topic_count(&self) -> usize {
        self.topics.len()
    }

    pub fn publish(&self, topic: &str, payload: Value, scope: Scope) {
        self.publish_with_control(topic, payload, None, scope);
    }

    fn publish_with_control(
        &self,
        topic: &str,
        payload: Value,
        control: Option<BlackboardControl>,
        scope: Scope,
    ) {
        let envelope = Envelope {
            topic: topic.to_string(),
            body: EnvelopeBody::Publish {
                from: self.member.clone(),
                payload,
                control,
            },
        };
        self.router.publish(envelope, scope);
    }

    /// Scatter-gather: publishes with a fresh control and collects every reply until
    /// `timeout` elapses. Fewer replies than members, or none at all, is a normal outcome.
    pub async fn get_reply(
        &self,
        topic: &str,
        payload: Value,
        timeout: Option<Duration>,
        scope: Scope,
    ) -> Vec<Value> {
        let timeout = timeout.unwrap_or_else(|| self.default_timeout());
        let (request_id, mut rx) = self.pending.register();
        let control = BlackboardControl {
            request_id: request_id.clone(),
            requester: self.member.clone(),
        };

        self.publish_with_control(topic, payload, Some(control), scope);
        let replies = collect_until(&mut rx, timeout).await;
        self.pending.remove(&request_id);

        tracing::debug!("{} collected {} replies on {}", self.member, replies.len(), topic);
        replies
    }

    /// Scatter-gather that resolves on the first reply `accept` takes.
    pub async fn get_first_reply<F>(
        &self,
        topic: &str,
        payload: Value,
        timeout: Option<Duration>,
        scope: Scope,
        accept: F,
    ) -> Option<Value>
    where
        F: FnMut(&Value) -> bool,
    {
        let timeout = timeout.unwrap_or_else(|| self.default_timeout());
        let (request_id, mut rx) = self.pending.register();
        let control = BlackboardControl {
            request_id: request_id.clone(),
            requester: self.member.clone(),
        };

        self.publish_with_control(topic, payload, Some(control), scope);
        let reply = first_matching(&mut rx, timeout, accept).await;
        self.pending.remove(&request_id);

        if reply.is_none() {
            tracing::debug!("{} got no usable reply on {} within {:?}", self.member, topic, timeout);
        }
        reply
    }

    /// Answers the request identified by `control`.
    pub fn send_reply(&self, topic: &str, control: &BlackboardControl, reply: Value) {
        if control.requester == self.member {
            if !self.pending.deliver(&control.request_id, reply) {
                tracing::debug!("Dropping self reply on {}: wait expired", topic);
            }
            return;
        }
        self.router.reply(Envelope {
            topic: topic.to_string(),
            body: EnvelopeBody::Reply {
                control: control.clone(),
                payload: reply,
            },
        });
    }

    /// Called by the worker inbox loop for every blackboard envelope.
    pub fn handle_inbound(&self, envelope: Envelope, delivery: Delivery) {
        let Envelope { topic, body } = envelope;
        match body {
            EnvelopeBody::Publish {
                from,
                payload,
                control,
            } => {
                let message = BoardMessage {
                    topic,
                    from,
                    payload,
                    control,
                    delivery,
                };
                self.dispatch(message);
            }
            EnvelopeBody::Reply { control, payload } => {
                if control.requester != self.member {
                    tracing::debug!("Reply on {} for {} reached {}", topic, control.requester, self.member);
                    return;
                }
                if !self.pending.deliver(&control.request_id, payload) {
                    tracing::debug!("Dropping late reply on {}", topic);
                }
            }
        }
    }

    fn dispatch(&self, message: BoardMessage) {
        let listeners: Vec<Listener> = match self.topics.get(&message.topic) {
            Some(subscribers) => subscribers
                .iter()
                .filter(|s| s.scope.admits(message.delivery))
                .map(|s| s.listener.clone())
                .collect(),
            None => return,
        };

        for listener in listeners {
            listener(message.clone());
        }

        // Drained topics are collected after a publish.
        self.topics.remove_if(&message.topic, |_, subscribers| subscribers.is_empty());
    }
}
