use super::ENDPOINT_BLACKBOARD;
use super::transport::Transport;
use super::types::{BlackboardAck, Envelope, EnvelopeBody};
use crate::membership::service::MembershipService;

use anyhow::Result;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

const POST_TIMEOUT: Duration = Duration::from_millis(500);

/// Network peers over HTTP. Peers come from the membership directory, so the
/// local node is never a target.
pub struct NetworkTransport {
    membership: Arc<MembershipService>,
    http_client: reqwest::Client,
    attempts: usize,
}

impl NetworkTransport {
    pub fn new(membership: Arc<MembershipService>, attempts: usize) -> Self {
        Self {
            membership,
            http_client: reqwest::Client::new(),
            attempts: attempts.max(1),
        }
    }

    fn spawn_post(&self, addr: SocketAddr, envelope: Arc<Envelope>) {
        let client = self.http_client.clone();
        let attempts = self.attempts;
        tokio::spawn(async move {
            let url = format!("http://{}{}", addr, ENDPOINT_BLACKBOARD);
            if let Err(e) = post_with_retry(&client, &url, envelope.as_ref(), attempts).await {
                tracing::error!("Blackboard delivery to {} failed: {}", addr, e);
            }
        });
    }
}

impl Transport for NetworkTransport {
    fn name(&self) -> &'static str {
        "network"
    }

    fn publish(&self, envelope: Envelope) -> Result<()> {
        let peers = self.membership.live_peers();
        if peers.is_empty() {
            tracing::trace!("No network peers for {}", envelope.topic);
            return Ok(());
        }
        let envelope = Arc::new(envelope);
        for peer in peers {
            self.spawn_post(peer.http_addr, envelope.clone());
        }
        Ok(())
    }

    fn reply(&self, envelope: Envelope) -> Result<()> {
        let EnvelopeBody::Reply { control, .. } = &envelope.body else {
            anyhow::bail!("network reply without a control on {}", envelope.topic);
        };
        let peer = self
            .membership
            .get_peer(&control.requester.node)
            .ok_or_else(|| anyhow::anyhow!("Requester node not found: {}", control.requester.node))?;
        self.spawn_post(peer.http_addr, Arc::new(envelope));
        Ok(())
    }
}

async fn post_with_retry(
    client: &reqwest::Client,
    url: &str,
    envelope: &Envelope,
    attempts: usize,
) -> Result<()> {
    let mut delay_ms = 100u64;

    for attempt in 0..attempts {
        let response = client
            .post(url)
            .json(envelope)
            .timeout(POST_TIMEOUT)
            .send()
            .await;

        let failure = match response {
            Ok(resp) if resp.status().is_success() => match resp.json::<BlackboardAck>().await {
                Ok(ack) if ack.result => return Ok(()),
                Ok(_) => anyhow::anyhow!("peer rejected envelope"),
                Err(e) => anyhow::anyhow!(e),
            },
            Ok(resp) => anyhow::anyhow!("status {}", resp.status()),
            Err(e) => anyhow::anyhow!(e),
        };

        if attempt + 1 == attempts {
            return Err(failure);
        }
        let jitter = rand::random::<u64>() % 50;
        tokio::time::sleep(Duration::from_millis(delay_ms + jitter)).await;
        delay_ms = (delay_ms * 2).min(1000);
    }

    Err(anyhow::anyhow!("Retry attempts exhausted"))
}
