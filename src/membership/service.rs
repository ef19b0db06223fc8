use anyhow::Result;
use dashmap::DashMap;
use rand::seq::SliceRandom;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::net::UdpSocket;
use tracing::info;

use super::types::{GossipMessage, NodeId, Peer};

const HEARTBEAT_INTERVAL: Duration = Duration::from_millis(1000);
const EXPIRY_INTERVAL: Duration = Duration::from_secs(2);
const PEER_TIMEOUT: Duration = Duration::from_secs(6);
const HEARTBEAT_FANOUT: usize = 3;

pub struct MembershipService {
    pub local: Peer,
    peers: DashMap<NodeId, Peer>,
    seeds: Vec<SocketAddr>,
    socket: UdpSocket,
}

impl MembershipService {
    pub async fn new(
        gossip_addr: SocketAddr,
        http_addr: SocketAddr,
        seeds: Vec<SocketAddr>,
    ) -> Result<Arc<Self>> {
        let socket = UdpSocket::bind(gossip_addr).await?;
        let local = Peer {
            id: NodeId::new(),
            gossip_addr: socket.local_addr()?,
            http_addr,
            last_seen: None,
        };

        let service = Arc::new(Self {
            local,
            peers: DashMap::new(),
            seeds,
            socket,
        });

        if !service.seeds.is_empty() {
            info!("Joining cluster via {} seed(s)", service.seeds.len());
            let join = GossipMessage::Join {
                peer: service.local.clone(),
            };
            for seed in service.seeds.iter() {
                service.send(&join, *seed).await?;
            }
        }

        Ok(service)
    }

    pub async fn start(self: Arc<Self>) {
        let heartbeat = self.clone();
        tokio::spawn(async move { heartbeat.heartbeat_loop().await });

        let receiver = self.clone();
        tokio::spawn(async move { receiver.receive_loop().await });

        let expiry = self.clone();
        tokio::spawn(async move { expiry.expiry_loop().await });

        tracing::info!("Membership service started on {}", self.local.gossip_addr);
    }

    /// Live peers, excluding the local node.
    pub fn live_peers(&self) -> Vec<Peer> {
        self.peers.iter().map(|entry| entry.value().clone()).collect()
    }

    pub fn get_peer(&self, id: &NodeId) -> Option<Peer> {
        self.peers.get(id).map(|entry| entry.value().clone())
    }

    pub fn peer_count(&self) -> usize {
        self.peers.len()
    }

    /// Tells every known peer we are leaving.
    pub async fn leave(&self) {
        let msg = GossipMessage::Leave {
            id: self.local.id.clone(),
        };
        for peer in self.live_peers() {
            if let Err(e) = self.send(&msg, peer.gossip_addr).await {
                tracing::warn!("Failed to send leave to {}: {}", peer.id, e);
            }
        }
    }

    async fn send(&self, msg: &GossipMessage, to: SocketAddr) -> Result<()> {
        let encoded = bincode::serialize(msg)?;
        self.socket.send_to(&encoded, to).await?;
        Ok(())
    }

    async fn heartbeat_loop(self: Arc<Self>) {
        let mut interval = tokio::time::interval(HEARTBEAT_INTERVAL);

        loop {
            interval.tick().await;

            let mut known = self.live_peers();
            let msg = GossipMessage::Heartbeat {
                from: self.local.clone(),
                known: known.clone(),
            };

            // Seeds are retried until they show up as peers.
            let mut targets: Vec<SocketAddr> = self
                .seeds
                .iter()
                .filter(|seed| !known.iter().any(|p| p.gossip_addr == **seed))
                .copied()
                .collect();

            known.shuffle(&mut rand::thread_rng());
            targets.extend(known.iter().take(HEARTBEAT_FANOUT).map(|p| p.gossip_addr));

            for target in targets {
                if let Err(e) = self.send(&msg, target).await {
                    tracing::debug!("Failed to send heartbeat to {}: {}", target, e);
                }
            }
        }
    }

    async fn receive_loop(self: Arc<Self>) {
        let mut buf = vec![0u8; 65536];

        loop {
            match self.socket.recv_from(&mut buf).await {
                Ok((len, src)) => match bincode::deserialize::<GossipMessage>(&buf[..len]) {
                    Ok(msg) => self.handle_message(msg),
                    Err(e) => tracing::warn!("Failed to decode gossip from {}: {}", src, e),
                },
                Err(e) => {
                    tracing::error!("Failed to receive UDP packet: {}", e);
                    tokio::time::sleep(Duration::from_millis(100)).await;
                }
            }
        }
    }

    pub(crate) fn handle_message(&self, msg: GossipMessage) {
        match msg {
            GossipMessage::Join { peer } => {
                tracing::info!("Node {} joining at {}", peer.id, peer.http_addr);
                self.observe(peer, true);
            }
            GossipMessage::Heartbeat { from, known } => {
                self.observe(from, true);
                for peer in known {
                    self.observe(peer, false);
                }
            }
            GossipMessage::Leave { id } => {
                if self.peers.remove(&id).is_some() {
                    tracing::info!("Node {} left, {} peer(s) remain", id, self.peers.len());
                }
            }
        }
    }

    /// Records a peer. Direct contact refreshes liveness; hearsay only introduces new peers.
    fn observe(&self, mut peer: Peer, direct: bool) {
        if peer.id == self.local.id {
            return;
        }
        match self.peers.get_mut(&peer.id) {
            Some(mut existing) => {
                if direct {
                    existing.last_seen = Some(Instant::now());
                    existing.http_addr = peer.http_addr;
                    existing.gossip_addr = peer.gossip_addr;
                }
            }
            None => {
                tracing::info!("Discovered peer {} at {}", peer.id, peer.http_addr);
                peer.last_seen = Some(Instant::now());
                self.peers.insert(peer.id.clone(), peer);
            }
        }
    }

    async fn expiry_loop(self: Arc<Self>) {
        let mut interval = tokio::time::interval(EXPIRY_INTERVAL);

        loop {
            interval.tick().await;
            self.expire(Instant::now());
        }
    }

    pub(crate) fn expire(&self, now: Instant) -> Vec<NodeId> {
        let expired: Vec<NodeId> = self
            .peers
            .iter()
            .filter(|entry| {
                entry
                    .value()
                    .last_seen
                    .map(|seen| now.duration_since(seen) > PEER_TIMEOUT)
                    .unwrap_or(false)
            })
            .map(|entry| entry.key().clone())
            .collect();

        for id in expired.iter() {
            self.peers.remove(id);
            tracing::warn!("Peer {} expired (no heartbeat for {:?})", id, PEER_TIMEOUT);
        }
        expired
    }
}
