use super::protocol::*;
use super::types::*;
use crate::blackboard::Blackboard;
use crate::blackboard::types::{BoardMessage, MemberId, Scope};
use crate::config::GlobalMemoryConfig;
use crate::netcheck::NetCheck;
use crate::util::timestamp;
use crate::watcher::{ObservedMap, restore_object};

use anyhow::Result;
use dashmap::DashMap;
use serde_json::Value;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, Weak};
use tokio::sync::{oneshot, watch};
use tokio::time::Instant;

/// Called with `true` when the memory becomes in sync and `false` when it stops being so.
pub type SyncListener = Arc<dyn Fn(bool) + Send + Sync>;

/// The full sync the current sync run is waiting for.
struct SyncWaiter {
    sync_id: String,
    offerer: MemberId,
    tx: oneshot::Sender<HashMap<String, GlobalMemoryEntry>>,
}

/// Eventually consistent key/value memory replicated to every worker of every node.
///
/// Writes are timestamped and broadcast; each replica keeps the newest entry per key.
/// A joining worker syncs from a replication node before reporting itself in sync.
pub struct GlobalMemory {
    blackboard: Arc<Blackboard>,
    config: GlobalMemoryConfig,
    memory: ObservedMap<GlobalMemoryEntry>,
    state: watch::Sender<SyncState>,
    waiter: Mutex<Option<SyncWaiter>>,
    partial_offers: DashMap<MemberId, PartialOfferRecord>,
    /// Sync id of the current or last sync run, announced in partial offers.
    round: Mutex<Option<String>>,
    listeners: Mutex<Vec<SyncListener>>,
    /// Serializes sync runs.
    sync_lock: tokio::sync::Mutex<()>,
}

impl GlobalMemory {
    pub fn new(blackboard: Arc<Blackboard>, config: GlobalMemoryConfig, node_name: &str) -> Arc<Self> {
        let memory = if config.replication_node {
            let path = Self::replay_log_path(&config, node_name, blackboard.member());
            ObservedMap::observe(HashMap::new(), path, config.file_close_timeout())
        } else {
            ObservedMap::unobserved()
        };
        let (state, _) = watch::channel(SyncState::Unsynced);

        Arc::new(Self {
            blackboard,
            config,
            memory,
            state,
            waiter: Mutex::new(None),
            partial_offers: DashMap::new(),
            round: Mutex::new(None),
            listeners: Mutex::new(Vec::new()),
            sync_lock: tokio::sync::Mutex::new(()),
        })
    }

    fn replay_log_path(config: &GlobalMemoryConfig, node_name: &str, member: &MemberId) -> PathBuf {
        config
            .replay_log_dir
            .join(format!("globalmemory-{}-{}.ndjson", node_name, member.worker))
    }

    /// Replay log of a replication node; `None` for plain workers.
    pub fn log_path(&self) -> Option<&Path> {
        self.memory.log_path()
    }

    /// Blocks until every queued replay log write reached the file.
    pub async fn flush_log(&self) {
        self.memory.flush().await;
    }

    fn me(&self) -> &MemberId {
        self.blackboard.member()
    }

    /// Subscribes to the memory topics and starts the initial sync. Waits for it
    /// to finish when `wait_for_sync` is configured.
    pub async fn init(self: &Arc<Self>) -> Result<()> {
        let this = Arc::downgrade(self);
        self.blackboard.subscribe(TOPIC_SET, Scope::Everywhere, move |msg| {
            if let Some(memory) = this.upgrade() {
                memory.on_set(msg);
            }
        });
        let this = Arc::downgrade(self);
        self.blackboard.subscribe(TOPIC_SYNC, Scope::Everywhere, move |msg| {
            if let Some(memory) = this.upgrade() {
                memory.on_sync(msg);
            }
        });

        tokio::spawn(self.clone().run_sync(true));

        if self.config.wait_for_sync {
            self.wait_until_synced().await;
        }
        Ok(())
    }

    /// Follows connectivity: going offline drops out of sync, coming back online
    /// after an outage resyncs from the cluster.
    pub fn attach_netcheck(self: &Arc<Self>, netcheck: &NetCheck) {
        let this: Weak<Self> = Arc::downgrade(self);
        netcheck.add_listener(move |old, new| {
            let Some(memory) = this.upgrade() else { return };
            memory.on_network_change(old, new);
        });
    }

    pub(crate) fn on_network_change(self: &Arc<Self>, old: Option<bool>, new: bool) {
        if !new {
            tracing::warn!("{} lost network, global memory out of sync", self.me());
            self.set_state(SyncState::Unsynced);
        } else if old == Some(false) {
            tracing::info!("{} back online, resyncing global memory", self.me());
            tokio::spawn(self.clone().run_sync(false));
        }
    }

    // ------------------------------------------------------------------
    // Reads and writes
    // ------------------------------------------------------------------

    /// Stamps and broadcasts a write. The local replica applies it immediately.
    pub fn set(&self, key: &str, value: Value) {
        let op = SetOperation {
            key: key.to_string(),
            value,
            time: timestamp(),
            sender: self.me().clone(),
            partial: None,
        };
        self.apply(&op.key, op.entry());
        self.publish_set(&op);
    }

    pub fn get(&self, key: &str) -> Option<Value> {
        self.memory.get(key).map(|entry| entry.value)
    }

    pub fn entry(&self, key: &str) -> Option<GlobalMemoryEntry> {
        self.memory.get(key)
    }

    pub fn snapshot(&self) -> HashMap<String, GlobalMemoryEntry> {
        self.memory.snapshot()
    }

    pub fn len(&self) -> usize {
        self.memory.len()
    }

    pub fn is_empty(&self) -> bool {
        self.memory.is_empty()
    }

    fn publish_set(&self, op: &SetOperation) {
        match serde_json::to_value(op) {
            Ok(payload) => self.blackboard.publish(TOPIC_SET, payload, Scope::Everywhere),
            Err(e) => tracing::error!("Failed to encode set of {}: {}", op.key, e),
        }
    }

    /// Last-writer-wins merge of one entry. Returns whether it replaced the held one.
    fn apply(&self, key: &str, entry: GlobalMemoryEntry) -> bool {
        self.memory
            .update_with(key, |held| entry.supersedes(held).then(|| entry.clone()))
    }

    // ------------------------------------------------------------------
    // Sync state
    // ------------------------------------------------------------------

    pub fn state(&self) -> SyncState {
        *self.state.borrow()
    }

    pub fn is_synced(&self) -> bool {
        self.state() == SyncState::InSync
    }

    pub async fn wait_until_synced(&self) {
        let mut rx = self.state.subscribe();
        // The sender lives as long as `self`, so this only ends on InSync.
        let _ = rx.wait_for(|state| *state == SyncState::InSync).await;
    }

    pub fn add_sync_listener<F>(&self, listener: F)
    where
        F: Fn(bool) + Send + Sync + 'static,
    {
        if let Ok(mut listeners) = self.listeners.lock() {
            listeners.push(Arc::new(listener));
        }
    }

    fn set_state(&self, state: SyncState) {
        let old = self.state.send_replace(state);
        if old == state {
            return;
        }
        tracing::info!("{} global memory {:?} -> {:?}", self.me(), old, state);

        let synced = match (old, state) {
            (_, SyncState::InSync) => true,
            (SyncState::InSync, _) => false,
            _ => return,
        };
        let listeners: Vec<SyncListener> = match self.listeners.lock() {
            Ok(listeners) => listeners.clone(),
            Err(_) => return,
        };
        for listener in listeners {
            listener(synced);
        }
    }

    // ------------------------------------------------------------------
    // Sync run
    // ------------------------------------------------------------------

    /// Requests offers, takes a full sync from the first full offerer, and falls back
    /// to partial sync or the replay log when nobody can offer one.
    async fn run_sync(self: Arc<Self>, allow_disk_restore: bool) {
        let _running = self.sync_lock.lock().await;
        self.set_state(SyncState::Syncing);

        let sync_id = uuid::Uuid::new_v4().to_string();
        if let Ok(mut round) = self.round.lock() {
            *round = Some(sync_id.clone());
        }
        self.partial_offers.clear();
        let mut partial_offers: Vec<SyncOffer> = Vec::new();

        for attempt in 1..=self.config.sync_retries.max(1) {
            let (full, partials) = self.request_offers(&sync_id).await;

            if let Some(full) = full {
                if self.accept_full_offer(&full.offerer, &sync_id).await {
                    self.set_state(SyncState::InSync);
                    return;
                }
                continue;
            }

            for offer in partials {
                match partial_offers.iter_mut().find(|known| known.offerer == offer.offerer) {
                    Some(known) => *known = offer,
                    None => partial_offers.push(offer),
                }
            }
            tracing::debug!(
                "{} sync attempt {}: no full offer ({} partial)",
                self.me(),
                attempt,
                partial_offers.len()
            );
        }

        let restore = self.config.replication_node && allow_disk_restore;
        if !partial_offers.is_empty() {
            // Durable entries join the exchange before the log is compacted.
            if restore {
                self.restore_logged().await;
            }
            self.partial_sync(partial_offers, &sync_id).await;
        } else if restore {
            self.restore_logged().await;
        } else {
            tracing::info!("{} found no sync offers, starting empty", self.me());
        }

        self.set_state(SyncState::InSync);
    }

    /// Asks every member for an offer. Returns the first full offer as soon as it
    /// arrives, along with the partial offers seen before it.
    async fn request_offers(&self, sync_id: &str) -> (Option<SyncOffer>, Vec<SyncOffer>) {
        let request = SyncMessage::OfferRequest {
            requester: self.me().clone(),
            sync_id: sync_id.to_string(),
        };
        let Ok(payload) = serde_json::to_value(&request) else {
            return (None, Vec::new());
        };

        let mut partials = Vec::new();
        let full = self
            .blackboard
            .get_first_reply(
                TOPIC_SYNC,
                payload,
                Some(self.config.sync_timeout()),
                Scope::Everywhere,
                |reply| {
                    let Ok(offer) = serde_json::from_value::<SyncOffer>(reply.clone()) else {
                        return false;
                    };
                    if offer.sync_id != sync_id || &offer.offerer == self.me() {
                        return false;
                    }
                    if offer.partial {
                        partials.push(offer);
                        return false;
                    }
                    true
                },
            )
            .await
            .and_then(|reply| serde_json::from_value::<SyncOffer>(reply).ok());

        (full, partials)
    }

    async fn accept_full_offer(&self, offerer: &MemberId, sync_id: &str) -> bool {
        let (tx, rx) = oneshot::channel();
        if let Ok(mut waiter) = self.waiter.lock() {
            *waiter = Some(SyncWaiter {
                sync_id: sync_id.to_string(),
                offerer: offerer.clone(),
                tx,
            });
        }

        let accept = SyncMessage::Accept {
            requester: self.me().clone(),
            offerer: offerer.clone(),
            sync_id: sync_id.to_string(),
        };
        match serde_json::to_value(&accept) {
            Ok(payload) => self.blackboard.publish(TOPIC_SYNC, payload, Scope::Everywhere),
            Err(e) => tracing::error!("Failed to encode sync accept: {}", e),
        }

        match tokio::time::timeout(self.config.sync_timeout(), rx).await {
            Ok(Ok(entries)) => {
                self.merge_full_sync(entries);
                true
            }
            _ => {
                if let Ok(mut waiter) = self.waiter.lock() {
                    waiter.take();
                }
                tracing::warn!("{} got no full sync from {} in time", self.me(), offerer);
                false
            }
        }
    }

    /// Merges a full sync, then pushes back local entries the offerer lacks or holds older.
    fn merge_full_sync(&self, entries: HashMap<String, GlobalMemoryEntry>) {
        let mut merged = 0;
        for (key, entry) in &entries {
            if self.apply(key, entry.clone()) {
                merged += 1;
            }
        }

        let mut pushed = 0;
        for (key, local) in self.memory.snapshot() {
            let offerer_current = entries.get(&key).is_some_and(|remote| remote.time >= local.time);
            if !offerer_current {
                self.publish_set(&SetOperation {
                    key,
                    value: local.value,
                    time: local.time,
                    sender: self.me().clone(),
                    partial: None,
                });
                pushed += 1;
            }
        }

        if self.config.replication_node {
            self.memory.rewrite();
        }
        tracing::info!(
            "{} full sync merged {} of {} entries, pushed back {}",
            self.me(),
            merged,
            entries.len(),
            pushed
        );
    }

    /// Exchanges entries with peers that are themselves out of sync. Every local entry
    /// is published tagged with this round's size; peers are waited on until they
    /// sent all of theirs or went quiet for the max wait.
    async fn partial_sync(&self, offers: Vec<SyncOffer>, sync_id: &str) {
        let snapshot = self.memory.snapshot();
        let total = snapshot.len();
        tracing::info!(
            "{} partial sync with {} peer(s), sending {} entries",
            self.me(),
            offers.len(),
            total
        );

        // Only sets from the round each peer announced count towards its progress.
        let started = Instant::now();
        for offer in &offers {
            let current = self.partial_offers.get(&offer.offerer).is_some_and(|record| {
                record.sync_id.is_some() && record.sync_id == offer.round
            });
            if !current {
                self.partial_offers
                    .insert(offer.offerer.clone(), PartialOfferRecord::new(offer.offerer.clone(), started));
            }
        }
        let offerers: Vec<MemberId> = offers.into_iter().map(|offer| offer.offerer).collect();

        for (key, entry) in snapshot {
            self.publish_set(&SetOperation {
                key,
                value: entry.value,
                time: entry.time,
                sender: self.me().clone(),
                partial: Some(PartialTag {
                    sync_id: sync_id.to_string(),
                    total,
                }),
            });
        }

        let max_wait = self.config.partial_sync_max_wait();
        let mut interval = tokio::time::interval(self.config.partial_sync_check_interval());
        loop {
            interval.tick().await;
            let now = Instant::now();
            let done = offerers.iter().all(|peer| {
                self.partial_offers
                    .get(peer)
                    .is_none_or(|record| record.is_complete(now, max_wait))
            });
            if done {
                break;
            }
        }

        for peer in &offerers {
            if let Some((_, record)) = self.partial_offers.remove(peer) {
                tracing::debug!(
                    "{} partial sync from {}: {}/{:?} sets",
                    self.me(),
                    record.id,
                    record.received,
                    record.expected
                );
            }
        }
        self.partial_offers.clear();
    }

    async fn restore_logged(&self) {
        match self.restore_from_disk().await {
            Ok(merged) => tracing::info!("{} restored {} entries from disk", self.me(), merged),
            Err(e) => tracing::error!("{} disk restore failed: {:#}", self.me(), e),
        }
    }

    /// Merges newer entries from this worker's replay log.
    async fn restore_from_disk(&self) -> Result<usize> {
        let Some(path) = self.memory.log_path().map(|p| p.to_path_buf()) else {
            return Ok(0);
        };
        let mut restored: HashMap<String, GlobalMemoryEntry> = HashMap::new();
        restore_object(&mut restored, &path, None).await?;

        let mut merged = 0;
        for (key, entry) in restored {
            if self.apply(&key, entry) {
                merged += 1;
            }
        }
        self.memory.rewrite();
        Ok(merged)
    }

    // ------------------------------------------------------------------
    // Inbound
    // ------------------------------------------------------------------

    fn on_set(&self, msg: BoardMessage) {
        let op: SetOperation = match serde_json::from_value(msg.payload) {
            Ok(op) => op,
            Err(e) => {
                tracing::warn!("Malformed global memory set from {}: {}", msg.from, e);
                return;
            }
        };

        self.apply(&op.key, op.entry());

        // Progress is tracked only while this member is out of sync itself.
        if let Some(tag) = &op.partial
            && !self.is_synced()
        {
            let now = Instant::now();
            self.partial_offers
                .entry(op.sender.clone())
                .or_insert_with(|| PartialOfferRecord::new(op.sender.clone(), now))
                .record_set(&tag.sync_id, tag.total, now);
        }
    }

    fn on_sync(&self, msg: BoardMessage) {
        let message: SyncMessage = match serde_json::from_value(msg.payload) {
            Ok(message) => message,
            Err(e) => {
                tracing::warn!("Malformed global memory sync message from {}: {}", msg.from, e);
                return;
            }
        };

        match message {
            SyncMessage::OfferRequest { requester, sync_id } => {
                if !self.config.replication_node || &requester == self.me() {
                    return;
                }
                let Some(control) = msg.control else { return };
                let partial = !self.is_synced();
                let round = match self.round.lock() {
                    Ok(round) if partial => round.clone(),
                    _ => None,
                };
                let offer = SyncOffer {
                    offerer: self.me().clone(),
                    sync_id,
                    partial,
                    round,
                };
                if let Ok(reply) = serde_json::to_value(&offer) {
                    self.blackboard.send_reply(TOPIC_SYNC, &control, reply);
                }
            }
            SyncMessage::Accept {
                requester,
                offerer,
                sync_id,
            } => {
                if !self.config.replication_node || &offerer != self.me() {
                    return;
                }
                self.push_full_sync(requester, sync_id);
            }
            SyncMessage::FullSync {
                from,
                to,
                sync_id,
                entries,
                ..
            } => {
                if &to != self.me() {
                    return;
                }
                self.complete_full_sync(from, sync_id, entries);
            }
        }
    }

    fn push_full_sync(&self, requester: MemberId, sync_id: String) {
        let scope = if requester.node == self.me().node {
            Scope::LocalCluster
        } else {
            Scope::ExternalOnly
        };
        let entries = self.memory.snapshot();
        tracing::info!("{} sending full sync of {} entries to {}", self.me(), entries.len(), requester);

        let message = SyncMessage::FullSync {
            from: self.me().clone(),
            to: requester,
            sync_id,
            entries,
            complete: true,
        };
        match serde_json::to_value(&message) {
            Ok(payload) => self.blackboard.publish(TOPIC_SYNC, payload, scope),
            Err(e) => tracing::error!("Failed to encode full sync: {}", e),
        }
    }

    fn complete_full_sync(
        &self,
        from: MemberId,
        sync_id: String,
        entries: HashMap<String, GlobalMemoryEntry>,
    ) {
        let waiter = match self.waiter.lock() {
            Ok(mut waiter) => match waiter.take() {
                Some(w) if w.sync_id == sync_id && w.offerer == from => Some(w),
                other => {
                    *waiter = other;
                    None
                }
            },
            Err(_) => None,
        };

        match waiter {
            Some(waiter) => {
                if waiter.tx.send(entries).is_err() {
                    tracing::warn!("{} full sync from {} arrived as the wait ended", self.me(), from);
                }
            }
            None => tracing::warn!(
                "Sync fragmentation: full sync from {} to {} arrived outside a sync wait, discarded",
                from,
                self.me()
            ),
        }
    }
}
