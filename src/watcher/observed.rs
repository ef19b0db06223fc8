use super::writer::ReplayLogWriter;
use crate::util::MonotonicClock;

use anyhow::{Context, Result};
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::io::AsyncBufReadExt;

/// One line of the NDJSON replay log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "lowercase")]
pub enum ReplayLogEntry<V> {
    Update { property: String, value: V, time: u64 },
    Delete { property: String, time: u64 },
}

impl<V> ReplayLogEntry<V> {
    pub fn time(&self) -> u64 {
        match self {
            Self::Update { time, .. } | Self::Delete { time, .. } => *time,
        }
    }
}

/// A key/value map whose every mutation is appended to a replay log.
///
/// Mutations go through `set`/`delete`/`update_with`; the log line is queued first,
/// then the map changes. Log failures are logged and never undo the mutation.
pub struct ObservedMap<V> {
    inner: DashMap<String, V>,
    log: Option<ReplayLogWriter>,
    clock: MonotonicClock,
}

impl<V> ObservedMap<V>
where
    V: Clone + Serialize + DeserializeOwned + Send + Sync + 'static,
{
    /// A map that records nothing.
    pub fn unobserved() -> Self {
        Self {
            inner: DashMap::new(),
            log: None,
            clock: MonotonicClock::new(),
        }
    }

    /// Wraps `object`, logging subsequent mutations to `path`.
    pub fn observe(object: HashMap<String, V>, path: impl AsRef<Path>, idle_close: Duration) -> Self {
        Self {
            inner: object.into_iter().collect(),
            log: Some(ReplayLogWriter::open(path.as_ref(), idle_close)),
            clock: MonotonicClock::new(),
        }
    }

    pub fn is_observed(&self) -> bool {
        self.log.is_some()
    }

    pub fn log_path(&self) -> Option<&Path> {
        self.log.as_ref().map(|log| log.path())
    }

    pub fn get(&self, key: &str) -> Option<V> {
        self.inner.get(key).map(|v| v.value().clone())
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.inner.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.inner.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }

    pub fn snapshot(&self) -> HashMap<String, V> {
        self.inner
            .iter()
            .map(|entry| (entry.key().clone(), entry.value().clone()))
            .collect()
    }

    pub fn set(&self, key: &str, value: V) {
        self.record_update(key, &value);
        self.inner.insert(key.to_string(), value);
    }

    pub fn delete(&self, key: &str) -> Option<V> {
        let removed = self.inner.remove(key).map(|(_, v)| v);
        if removed.is_some() {
            self.record(&ReplayLogEntry::<&V>::Delete {
                property: key.to_string(),
                time: self.clock.now(),
            });
        }
        removed
    }

    /// Atomically decides the new value from the current one. `decide` returning
    /// `None` leaves the key untouched and logs nothing. Returns whether it changed.
    pub fn update_with<F>(&self, key: &str, decide: F) -> bool
    where
        F: FnOnce(Option<&V>) -> Option<V>,
    {
        match self.inner.entry(key.to_string()) {
            Entry::Occupied(mut occupied) => match decide(Some(occupied.get())) {
                Some(value) => {
                    self.record_update(key, &value);
                    occupied.insert(value);
                    true
                }
                None => false,
            },
            Entry::Vacant(vacant) => match decide(None) {
                Some(value) => {
                    self.record_update(key, &value);
                    vacant.insert(value);
                    true
                }
                None => false,
            },
        }
    }

    /// Truncates the log and rebuilds it from the current contents.
    pub fn rewrite(&self) {
        let Some(log) = &self.log else { return };
        let time = self.clock.now();
        let mut lines = Vec::with_capacity(self.inner.len());
        for entry in self.inner.iter() {
            let line = ReplayLogEntry::Update {
                property: entry.key().clone(),
                value: entry.value(),
                time,
            };
            match serde_json::to_string(&line) {
                Ok(line) => lines.push(line),
                Err(e) => tracing::error!("Object change serialization error: {}", e),
            }
        }
        log.rewrite(lines);
    }

    pub async fn flush(&self) {
        if let Some(log) = &self.log {
            log.flush().await;
        }
    }

    /// Flushes and closes the log, returning the plain map.
    pub async fn stop_observing(self) -> HashMap<String, V> {
        if let Some(log) = &self.log {
            log.close().await;
        }
        self.inner.into_iter().collect()
    }

    fn record_update(&self, key: &str, value: &V) {
        self.record(&ReplayLogEntry::Update {
            property: key.to_string(),
            value,
            time: self.clock.now(),
        });
    }

    fn record(&self, entry: &ReplayLogEntry<&V>) {
        let Some(log) = &self.log else { return };
        match serde_json::to_string(entry) {
            Ok(line) => log.append(line),
            Err(e) => tracing::error!("Object change serialization error: {}", e),
        }
    }
}

/// Cooperative cancellation for `restore_object`.
#[derive(Debug, Default)]
pub struct RestoreStop(AtomicBool);

impl RestoreStop {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn stop(&self) {
        self.0.store(true, Ordering::Release);
    }

    pub fn is_stopped(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }
}

/// Replays `path` into `object` in order and returns the time of the last applied
/// entry (0 if none). A missing file restores nothing; unparsable lines are skipped.
pub async fn restore_object<V>(
    object: &mut HashMap<String, V>,
    path: impl AsRef<Path>,
    stop: Option<&RestoreStop>,
) -> Result<u64>
where
    V: DeserializeOwned,
{
    let path = path.as_ref();
    let file = match tokio::fs::File::open(path).await {
        Ok(file) => file,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            tracing::debug!("No replay log at {}", path.display());
            return Ok(0);
        }
        Err(e) => return Err(e).with_context(|| format!("opening replay log {}", path.display())),
    };

    let mut lines = tokio::io::BufReader::new(file).lines();
    let mut time_till = 0;
    let mut applied = 0usize;

    while let Some(line) = lines
        .next_line()
        .await
        .with_context(|| format!("reading replay log {}", path.display()))?
    {
        if stop.is_some_and(|s| s.is_stopped()) {
            tracing::info!("Restore from {} stopped after {} entries", path.display(), applied);
            break;
        }
        if line.trim().is_empty() {
            continue;
        }

        let entry: ReplayLogEntry<V> = match serde_json::from_str(&line) {
            Ok(entry) => entry,
            Err(e) => {
                tracing::warn!("Skipping bad replay log line in {}: {}", path.display(), e);
                continue;
            }
        };

        time_till = entry.time();
        match entry {
            ReplayLogEntry::Update { property, value, .. } => {
                object.insert(property, value);
            }
            ReplayLogEntry::Delete { property, .. } => {
                object.remove(&property);
            }
        }
        applied += 1;
    }

    tracing::debug!("Replayed {} entries from {}", applied, path.display());
    Ok(time_till)
}
