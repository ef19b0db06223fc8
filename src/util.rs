//! Shared plumbing for the request/reply protocols.
//!
//! Every scatter-gather in the crate (blackboard replies, sibling counting,
//! cluster memory polls) correlates answers to the request that solicited them
//! through a `PendingReplies` table, then drains the collector until a deadline.

use dashmap::DashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tokio::sync::mpsc;
use tokio::time::Instant;

/// Wall clock in milliseconds since the epoch.
pub fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

/// Wall-clock timestamps that never repeat and never go backwards within one process.
#[derive(Debug, Default)]
pub struct MonotonicClock {
    last: AtomicU64,
}

impl MonotonicClock {
    pub const fn new() -> Self {
        Self {
            last: AtomicU64::new(0),
        }
    }

    pub fn now(&self) -> u64 {
        let wall = now_ms();
        let mut prev = self.last.load(Ordering::Acquire);
        loop {
            let next = wall.max(prev + 1);
            match self
                .last
                .compare_exchange(prev, next, Ordering::AcqRel, Ordering::Acquire)
            {
                Ok(_) => return next,
                Err(actual) => prev = actual,
            }
        }
    }
}

/// Next timestamp of the process-wide clock, shared by every worker of this node.
pub fn timestamp() -> u64 {
    static CLOCK: MonotonicClock = MonotonicClock::new();
    CLOCK.now()
}

/// Correlation table mapping a request id to the collector waiting for its replies.
pub struct PendingReplies<T> {
    waiting: DashMap<String, mpsc::UnboundedSender<T>>,
}

impl<T> Default for PendingReplies<T> {
    fn default() -> Self {
        Self {
            waiting: DashMap::new(),
        }
    }
}

impl<T> PendingReplies<T> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Opens a collector under a fresh request id.
    pub fn register(&self) -> (String, mpsc::UnboundedReceiver<T>) {
        let id = uuid::Uuid::new_v4().to_string();
        let (tx, rx) = mpsc::unbounded_channel();
        self.waiting.insert(id.clone(), tx);
        (id, rx)
    }

    /// Hands a reply to its collector. Returns false when nobody waits any more.
    pub fn deliver(&self, id: &str, item: T) -> bool {
        match self.waiting.get(id) {
            Some(tx) => tx.send(item).is_ok(),
            None => false,
        }
    }

    pub fn remove(&self, id: &str) {
        self.waiting.remove(id);
    }

    pub fn is_waiting(&self, id: &str) -> bool {
        self.waiting.contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.waiting.len()
    }

    pub fn is_empty(&self) -> bool {
        self.waiting.is_empty()
    }
}

/// Drains `rx` until `timeout` elapses. Never fails: whatever arrived is returned.
pub async fn collect_until<T>(rx: &mut mpsc::UnboundedReceiver<T>, timeout: Duration) -> Vec<T> {
    let deadline = Instant::now() + timeout;
    let mut collected = Vec::new();
    loop {
        match tokio::time::timeout_at(deadline, rx.recv()).await {
            Ok(Some(item)) => collected.push(item),
            Ok(None) | Err(_) => break,
        }
    }
    collected
}

/// Drains `rx` until `expected` items arrived or `timeout` elapses.
pub async fn collect_count<T>(
    rx: &mut mpsc::UnboundedReceiver<T>,
    expected: usize,
    timeout: Duration,
) -> Vec<T> {
    let deadline = Instant::now() + timeout;
    let mut collected = Vec::new();
    while collected.len() < expected {
        match tokio::time::timeout_at(deadline, rx.recv()).await {
            Ok(Some(item)) => collected.push(item),
            Ok(None) | Err(_) => break,
        }
    }
    collected
}

/// Returns the first item accepted by `accept`, or `None` once `timeout` elapses.
pub async fn first_matching<T, F>(
    rx: &mut mpsc::UnboundedReceiver<T>,
    timeout: Duration,
    mut accept: F,
) -> Option<T>
where
    F: FnMut(&T) -> bool,
{
    let deadline = Instant::now() + timeout;
    loop {
        match tokio::time::timeout_at(deadline, rx.recv()).await {
            Ok(Some(item)) if accept(&item) => return Some(item),
            Ok(Some(_)) => continue,
            Ok(None) | Err(_) => return None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_monotonic_clock_never_repeats() {
        let clock = MonotonicClock::new();
        let mut last = 0;
        for _ in 0..1000 {
            let t = clock.now();
            assert!(t > last);
            last = t;
        }
    }

    #[tokio::test]
    async fn test_collect_until_returns_partial_results() {
        let pending: PendingReplies<u32> = PendingReplies::new();
        let (id, mut rx) = pending.register();

        assert!(pending.deliver(&id, 1));
        assert!(pending.deliver(&id, 2));

        let got = collect_until(&mut rx, Duration::from_millis(50)).await;
        assert_eq!(got, vec![1, 2]);
    }

    #[tokio::test]
    async fn test_deliver_after_remove_is_dropped() {
        let pending: PendingReplies<u32> = PendingReplies::new();
        let (id, _rx) = pending.register();
        pending.remove(&id);

        assert!(!pending.deliver(&id, 7));
        assert!(pending.is_empty());
    }

    #[tokio::test]
    async fn test_first_matching_skips_rejected_items() {
        let pending: PendingReplies<Option<u32>> = PendingReplies::new();
        let (id, mut rx) = pending.register();
        pending.deliver(&id, None);
        pending.deliver(&id, Some(5));

        let got = first_matching(&mut rx, Duration::from_millis(50), |v| v.is_some()).await;
        assert_eq!(got, Some(Some(5)));
    }

    #[tokio::test]
    async fn test_collect_count_stops_early() {
        let pending: PendingReplies<u32> = PendingReplies::new();
        let (id, mut rx) = pending.register();
        pending.deliver(&id, 1);
        pending.deliver(&id, 2);

        let started = Instant::now();
        let got = collect_count(&mut rx, 2, Duration::from_secs(5)).await;
        assert_eq!(got.len(), 2);
        assert!(started.elapsed() < Duration::from_secs(1));
    }
}
