//! Grid Configuration
//!
//! Tunables consumed by the messaging, memory and job subsystems. Loaded from a
//! JSON file; every field has a default so a partial (or absent) file is valid.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct GridConfig {
    pub node: NodeConfig,
    pub blackboard: BlackboardConfig,
    pub cluster_memory: ClusterMemoryConfig,
    pub global_memory: GlobalMemoryConfig,
    pub jobs: JobsConfig,
    pub netcheck: NetCheckConfig,
}

impl GridConfig {
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("reading config {}", path.display()))?;
        let conf: GridConfig = serde_json::from_str(&raw)
            .with_context(|| format!("parsing config {}", path.display()))?;
        Ok(conf)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NodeConfig {
    /// Stable node name used in replay log file names. Defaults to the gossip port.
    pub name: Option<String>,
    /// Sibling workers to run; `0` means one per CPU.
    pub workers: usize,
    pub min_workers: usize,
    pub gossip_addr: SocketAddr,
    pub http_addr: SocketAddr,
    pub seeds: Vec<SocketAddr>,
}

impl NodeConfig {
    pub fn worker_count(&self) -> usize {
        if self.workers > 0 {
            return self.workers;
        }
        let cpus = std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(1);
        cpus.max(self.min_workers).max(1)
    }

    /// Name that survives restarts, unlike the gossip `NodeId`.
    pub fn stable_name(&self) -> String {
        match &self.name {
            Some(name) => name.clone(),
            None => self.gossip_addr.port().to_string(),
        }
    }
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            name: None,
            workers: 0,
            min_workers: 1,
            gossip_addr: SocketAddr::from(([127, 0, 0, 1], 5000)),
            http_addr: SocketAddr::from(([127, 0, 0, 1], 6000)),
            seeds: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BlackboardConfig {
    pub reply_timeout_ms: u64,
    /// Attempts per outbound post to a network peer.
    pub post_attempts: usize,
}

impl BlackboardConfig {
    pub fn reply_timeout(&self) -> Duration {
        Duration::from_millis(self.reply_timeout_ms)
    }
}

impl Default for BlackboardConfig {
    fn default() -> Self {
        Self {
            reply_timeout_ms: 1000,
            post_attempts: 3,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ClusterMemoryConfig {
    pub timeout_ms: u64,
    pub restore_on_start: bool,
}

impl ClusterMemoryConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

impl Default for ClusterMemoryConfig {
    fn default() -> Self {
        Self {
            timeout_ms: 1000,
            restore_on_start: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GlobalMemoryConfig {
    pub sync_retries: usize,
    pub sync_timeout_ms: u64,
    pub partial_sync_check_interval_ms: u64,
    pub partial_sync_max_wait_ms: u64,
    /// Serves full syncs to other members and persists to a replay log.
    pub replication_node: bool,
    pub replay_log_dir: PathBuf,
    /// Hold `init` until the memory is in sync.
    pub wait_for_sync: bool,
    pub file_close_timeout_ms: u64,
}

impl GlobalMemoryConfig {
    pub fn sync_timeout(&self) -> Duration {
        Duration::from_millis(self.sync_timeout_ms)
    }

    pub fn partial_sync_check_interval(&self) -> Duration {
        Duration::from_millis(self.partial_sync_check_interval_ms)
    }

    pub fn partial_sync_max_wait(&self) -> Duration {
        Duration::from_millis(self.partial_sync_max_wait_ms)
    }

    pub fn file_close_timeout(&self) -> Duration {
        Duration::from_millis(self.file_close_timeout_ms)
    }
}

impl Default for GlobalMemoryConfig {
    fn default() -> Self {
        Self {
            sync_retries: 3,
            sync_timeout_ms: 1000,
            partial_sync_check_interval_ms: 250,
            partial_sync_max_wait_ms: 5000,
            replication_node: false,
            replay_log_dir: PathBuf::from("./data"),
            wait_for_sync: true,
            file_close_timeout_ms: 5000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct JobsConfig {
    pub vote_timeout_ms: u64,
    pub result_timeout_ms: u64,
}

impl JobsConfig {
    pub fn vote_timeout(&self) -> Duration {
        Duration::from_millis(self.vote_timeout_ms)
    }

    pub fn result_timeout(&self) -> Duration {
        Duration::from_millis(self.result_timeout_ms)
    }
}

impl Default for JobsConfig {
    fn default() -> Self {
        Self {
            vote_timeout_ms: 500,
            result_timeout_ms: 5000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NetCheckConfig {
    /// `host:port` probed for backbone connectivity. No probing when unset.
    pub host: Option<String>,
    pub frequency_ms: u64,
}

impl Default for NetCheckConfig {
    fn default() -> Self {
        Self {
            host: None,
            frequency_ms: 5000,
        }
    }
}
