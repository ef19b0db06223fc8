//! Network Connectivity Monitor
//!
//! Periodically probes a well-known host over TCP and tells listeners when the node
//! goes offline or comes back. The state starts unknown (`None`).

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

pub type NetListener = Arc<dyn Fn(Option<bool>, bool) + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct NetListenerId(u64);

const PROBE_TIMEOUT: Duration = Duration::from_secs(2);

#[derive(Default)]
pub struct NetCheck {
    online: Mutex<Option<bool>>,
    listeners: Mutex<Vec<(NetListenerId, NetListener)>>,
    next_id: AtomicU64,
}

impl NetCheck {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// `None` until the first probe finished.
    pub fn is_online(&self) -> Option<bool> {
        self.online.lock().ok().and_then(|online| *online)
    }

    /// Registers `listener(old, new)`, called on every change of state.
    pub fn add_listener<F>(&self, listener: F) -> NetListenerId
    where
        F: Fn(Option<bool>, bool) + Send + Sync + 'static,
    {
        let id = NetListenerId(self.next_id.fetch_add(1, Ordering::Relaxed));
        if let Ok(mut listeners) = self.listeners.lock() {
            listeners.push((id, Arc::new(listener)));
        }
        id
    }

    pub fn remove_listener(&self, id: NetListenerId) {
        if let Ok(mut listeners) = self.listeners.lock() {
            listeners.retain(|(existing, _)| *existing != id);
        }
    }

    /// Records a probe result. Listeners only hear about changes.
    pub fn set_online(&self, online: bool) {
        let old = match self.online.lock() {
            Ok(mut state) => state.replace(online),
            Err(_) => return,
        };
        if old == Some(online) {
            return;
        }

        if online {
            tracing::info!("Network is online");
        } else {
            tracing::warn!("Network is offline");
        }

        let listeners: Vec<NetListener> = match self.listeners.lock() {
            Ok(listeners) => listeners.iter().map(|(_, l)| l.clone()).collect(),
            Err(_) => return,
        };
        for listener in listeners {
            listener(old, online);
        }
    }

    /// Probes `host` (a `host:port`) every `frequency` until the monitor is dropped.
    pub fn start(self: &Arc<Self>, host: String, frequency: Duration) {
        let weak = Arc::downgrade(self);
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(frequency);
            loop {
                interval.tick().await;
                let Some(netcheck) = weak.upgrade() else { break };
                let online = probe(&host, frequency.min(PROBE_TIMEOUT)).await;
                netcheck.set_online(online);
            }
        });
    }
}

async fn probe(host: &str, timeout: Duration) -> bool {
    match tokio::time::timeout(timeout, tokio::net::TcpStream::connect(host)).await {
        Ok(Ok(_)) => true,
        Ok(Err(e)) => {
            tracing::debug!("Connectivity probe to {} failed: {}", host, e);
            false
        }
        Err(_) => {
            tracing::debug!("Connectivity probe to {} timed out", host);
            false
        }
    }
}
