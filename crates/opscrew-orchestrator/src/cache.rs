//! Result cache with single-flight reservations.
//!
//! Concurrent lookups for the same fingerprint never trigger a second
//! execution: the first caller receives a [`Reservation`], everyone else a
//! [`Waiter`] that resolves when the reservation is stored or aborted.
//! Failures are handed to the waiters but never cached.
//!
//! The store is bounded: expired entries are swept at most once per TTL when a
//! new reservation is made, and at capacity the oldest stored entry is evicted.
//! In-flight reservations are never evicted.

use opscrew_core::{AgentId, ErrorKind, Task, TaskFailure};
use parking_lot::Mutex;
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::Instant;
use tracing::{debug, warn};

/// A cached successful result.
#[derive(Debug, Clone, PartialEq)]
pub struct CacheEntry {
    /// Key the entry is stored under.
    pub fingerprint: String,
    /// The successful payload.
    pub payload: serde_json::Value,
    /// Agent that produced the payload.
    pub agent: Option<AgentId>,
    /// When the entry was stored.
    pub created_at: Instant,
    /// How long the entry stays live.
    pub ttl: Duration,
}

impl CacheEntry {
    fn is_live(&self, now: Instant) -> bool {
        now.duration_since(self.created_at) < self.ttl
    }
}

type Resolution = Result<CacheEntry, TaskFailure>;

enum Slot {
    Ready(CacheEntry),
    InFlight(watch::Sender<Option<Resolution>>),
}

struct Store {
    slots: HashMap<String, Slot>,
    next_sweep: Instant,
}

impl Store {
    fn sweep_expired(&mut self, now: Instant) -> usize {
        let before = self.slots.len();
        self.slots.retain(|_, slot| match slot {
            Slot::Ready(entry) => entry.is_live(now),
            Slot::InFlight(_) => true,
        });
        before - self.slots.len()
    }

    fn evict_oldest(&mut self) -> Option<String> {
        let oldest = self
            .slots
            .iter()
            .filter_map(|(key, slot)| match slot {
                Slot::Ready(entry) => Some((entry.created_at, key)),
                Slot::InFlight(_) => None,
            })
            .min()
            .map(|(_, key)| key.clone())?;
        self.slots.remove(&oldest);
        Some(oldest)
    }
}

fn sweep_after(now: Instant, ttl: Duration) -> Instant {
    now.checked_add(ttl).unwrap_or(now)
}

type Slots = Arc<Mutex<Store>>;

/// Stored entries kept before the oldest is evicted.
pub const DEFAULT_CAPACITY: usize = 1000;

/// Outcome of [`ResultCache::lookup_or_reserve`].
pub enum Lookup {
    /// A live entry exists.
    Hit(CacheEntry),
    /// The caller is now the only executor for this fingerprint.
    Reserved(Reservation),
    /// Another caller is executing; wait for its outcome.
    Wait(Waiter),
}

/// Fingerprint-keyed result cache. Cloning shares the underlying store.
#[derive(Clone)]
pub struct ResultCache {
    store: Slots,
    default_ttl: Duration,
    capacity: usize,
}

impl ResultCache {
    /// A cache with [`DEFAULT_CAPACITY`].
    pub fn new(default_ttl: Duration) -> Self {
        Self::with_capacity(default_ttl, DEFAULT_CAPACITY)
    }

    /// A cache holding at most `capacity` stored entries (minimum one).
    pub fn with_capacity(default_ttl: Duration, capacity: usize) -> Self {
        Self {
            store: Arc::new(Mutex::new(Store {
                slots: HashMap::new(),
                next_sweep: sweep_after(Instant::now(), default_ttl),
            })),
            default_ttl,
            capacity: capacity.max(1),
        }
    }

    /// Stored entries kept before eviction.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// TTL of entries stored without their own.
    pub fn default_ttl(&self) -> Duration {
        self.default_ttl
    }

    /// Return a live entry, join an in-flight execution, or reserve the
    /// fingerprint for the caller.
    pub fn lookup_or_reserve(&self, fingerprint: &str) -> Lookup {
        let mut store = self.store.lock();
        let now = Instant::now();
        match store.slots.get(fingerprint) {
            Some(Slot::Ready(entry)) if entry.is_live(now) => {
                debug!(fingerprint, "cache: hit");
                return Lookup::Hit(entry.clone());
            }
            Some(Slot::InFlight(tx)) => {
                debug!(fingerprint, "cache: joining in-flight execution");
                return Lookup::Wait(Waiter {
                    fingerprint: fingerprint.to_string(),
                    rx: tx.subscribe(),
                });
            }
            Some(Slot::Ready(_)) => debug!(fingerprint, "cache: entry expired"),
            None => {}
        }

        if now >= store.next_sweep {
            let swept = store.sweep_expired(now);
            store.next_sweep = sweep_after(now, self.default_ttl);
            if swept > 0 {
                debug!(swept, "cache: swept expired entries");
            }
        }
        if !store.slots.contains_key(fingerprint) && store.slots.len() >= self.capacity {
            store.sweep_expired(now);
            if store.slots.len() >= self.capacity {
                if let Some(evicted) = store.evict_oldest() {
                    debug!(fingerprint = %evicted, "cache: evicted oldest entry");
                }
            }
        }

        let (tx, _rx) = watch::channel(None);
        store
            .slots
            .insert(fingerprint.to_string(), Slot::InFlight(tx));
        debug!(fingerprint, "cache: reserved");
        Lookup::Reserved(Reservation {
            fingerprint: fingerprint.to_string(),
            store: Arc::clone(&self.store),
            resolved: false,
        })
    }

    /// Publish a successful payload and release the waiters.
    pub fn store(
        &self,
        reservation: Reservation,
        payload: serde_json::Value,
        agent: Option<AgentId>,
        ttl: Option<Duration>,
    ) -> CacheEntry {
        let entry = CacheEntry {
            fingerprint: reservation.fingerprint.clone(),
            payload,
            agent,
            created_at: Instant::now(),
            ttl: ttl.unwrap_or(self.default_ttl),
        };
        reservation.resolve(Ok(entry.clone()));
        entry
    }

    /// Release the waiters with `failure`. Nothing is cached.
    pub fn abort(&self, reservation: Reservation, failure: TaskFailure) {
        reservation.resolve(Err(failure));
    }

    /// Drop a stored entry. In-flight reservations are left alone.
    pub fn invalidate(&self, fingerprint: &str) -> bool {
        let mut store = self.store.lock();
        if matches!(store.slots.get(fingerprint), Some(Slot::Ready(_))) {
            store.slots.remove(fingerprint);
            return true;
        }
        false
    }

    /// Remove expired entries; returns how many were evicted.
    pub fn purge_expired(&self) -> usize {
        self.store.lock().sweep_expired(Instant::now())
    }

    /// Number of live stored entries.
    pub fn len(&self) -> usize {
        let now = Instant::now();
        self.store
            .lock()
            .slots
            .values()
            .filter(|slot| matches!(slot, Slot::Ready(e) if e.is_live(now)))
            .count()
    }

    /// Keys currently held, expired and in-flight ones included.
    pub fn held(&self) -> usize {
        self.store.lock().slots.len()
    }

    /// Whether no live entry is stored.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Exclusive right to execute a fingerprint. Dropping an unresolved
/// reservation aborts it with `Cancelled`.
pub struct Reservation {
    fingerprint: String,
    store: Slots,
    resolved: bool,
}

impl Reservation {
    /// The reserved key.
    pub fn fingerprint(&self) -> &str {
        &self.fingerprint
    }

    fn resolve(mut self, resolution: Resolution) {
        self.publish(resolution);
    }

    fn publish(&mut self, resolution: Resolution) {
        self.resolved = true;
        let mut store = self.store.lock();
        let tx = match store.slots.remove(&self.fingerprint) {
            Some(Slot::InFlight(tx)) => tx,
            Some(ready) => {
                // Someone else already owns this key; leave their entry.
                store.slots.insert(self.fingerprint.clone(), ready);
                warn!(fingerprint = %self.fingerprint, "cache: reservation lost its slot");
                return;
            }
            None => return,
        };
        if let Ok(entry) = &resolution {
            store
                .slots
                .insert(self.fingerprint.clone(), Slot::Ready(entry.clone()));
        }
        drop(store);
        tx.send_replace(Some(resolution));
    }
}

impl Drop for Reservation {
    fn drop(&mut self) {
        if !self.resolved {
            self.publish(Err(TaskFailure::new(
                ErrorKind::Cancelled,
                "execution abandoned before completion",
            )));
        }
    }
}

/// Handle on another caller's in-flight execution.
pub struct Waiter {
    fingerprint: String,
    rx: watch::Receiver<Option<Resolution>>,
}

impl Waiter {
    /// The key being waited on.
    pub fn fingerprint(&self) -> &str {
        &self.fingerprint
    }

    /// Block until the reservation resolves. The executor's failure is
    /// returned verbatim; waiters never retry.
    pub async fn wait(mut self) -> Result<CacheEntry, TaskFailure> {
        match self.rx.wait_for(Option::is_some).await {
            Ok(value) => match &*value {
                Some(resolution) => resolution.clone(),
                None => Err(abandoned()),
            },
            Err(_) => Err(abandoned()),
        }
    }
}

fn abandoned() -> TaskFailure {
    TaskFailure::new(ErrorKind::Cancelled, "execution abandoned before completion")
}

/// Deterministic cache key for `task` run against `context`.
///
/// Covers the kind, the normalized description (trimmed, lower-cased,
/// whitespace collapsed), the priority, the sorted capability and action
/// lists and the accumulated context.
pub fn fingerprint(task: &Task, context: &serde_json::Value) -> String {
    let description = task
        .description
        .split_whitespace()
        .map(str::to_lowercase)
        .collect::<Vec<_>>()
        .join(" ");

    let mut capabilities = task.required_capabilities.clone();
    capabilities.sort();
    capabilities.dedup();
    let mut actions = task.requested_actions.clone();
    actions.sort();
    actions.dedup();

    let mut hasher = Sha256::new();
    for part in [
        task.kind.to_string(),
        description,
        task.priority.to_string(),
        capabilities.join(","),
        actions.join(","),
        task.resource.clone().unwrap_or_default(),
        context.to_string(),
    ] {
        hasher.update(part.as_bytes());
        hasher.update([0u8]);
    }
    hex::encode(hasher.finalize())
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use opscrew_core::{Priority, TaskKind};
    use serde_json::json;

    fn reserve(cache: &ResultCache, fp: &str) -> Reservation {
        match cache.lookup_or_reserve(fp) {
            Lookup::Reserved(r) => r,
            _ => panic!("expected reservation"),
        }
    }

    #[tokio::test]
    async fn test_reserve_then_hit() {
        let cache = ResultCache::new(Duration::from_secs(300));
        let r = reserve(&cache, "fp");
        cache.store(r, json!({"ok": true}), Some("infra".into()), None);

        match cache.lookup_or_reserve("fp") {
            Lookup::Hit(entry) => {
                assert_eq!(entry.payload, json!({"ok": true}));
                assert_eq!(entry.agent.unwrap().as_str(), "infra");
            }
            _ => panic!("expected hit"),
        }
        assert_eq!(cache.len(), 1);
    }

    #[tokio::test]
    async fn test_second_caller_waits_for_first() {
        let cache = ResultCache::new(Duration::from_secs(300));
        let r = reserve(&cache, "fp");
        let waiter = match cache.lookup_or_reserve("fp") {
            Lookup::Wait(w) => w,
            _ => panic!("expected wait"),
        };

        let handle = tokio::spawn(waiter.wait());
        cache.store(r, json!(42), None, None);
        let entry = handle.await.unwrap().unwrap();
        assert_eq!(entry.payload, json!(42));
    }

    #[tokio::test]
    async fn test_abort_propagates_and_is_not_cached() {
        let cache = ResultCache::new(Duration::from_secs(300));
        let r = reserve(&cache, "fp");
        let waiter = match cache.lookup_or_reserve("fp") {
            Lookup::Wait(w) => w,
            _ => panic!("expected wait"),
        };

        cache.abort(r, TaskFailure::new(ErrorKind::BackendError, "boom"));
        let failure = waiter.wait().await.unwrap_err();
        assert_eq!(failure.kind, ErrorKind::BackendError);
        assert_eq!(failure.reason, "boom");

        assert!(matches!(cache.lookup_or_reserve("fp"), Lookup::Reserved(_)));
    }

    #[tokio::test]
    async fn test_dropped_reservation_releases_waiters() {
        let cache = ResultCache::new(Duration::from_secs(300));
        let r = reserve(&cache, "fp");
        let waiter = match cache.lookup_or_reserve("fp") {
            Lookup::Wait(w) => w,
            _ => panic!("expected wait"),
        };
        drop(r);
        let failure = waiter.wait().await.unwrap_err();
        assert_eq!(failure.kind, ErrorKind::Cancelled);
    }

    #[tokio::test(start_paused = true)]
    async fn test_entry_expires_after_ttl() {
        let cache = ResultCache::new(Duration::from_secs(300));
        let r = reserve(&cache, "fp");
        cache.store(r, json!("v"), None, Some(Duration::from_secs(10)));

        tokio::time::advance(Duration::from_secs(9)).await;
        assert!(matches!(cache.lookup_or_reserve("fp"), Lookup::Hit(_)));

        tokio::time::advance(Duration::from_secs(2)).await;
        assert_eq!(cache.purge_expired(), 1);
        assert!(matches!(cache.lookup_or_reserve("fp"), Lookup::Reserved(_)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_expired_entries_swept_on_reserve() {
        let cache = ResultCache::new(Duration::from_secs(1));
        for i in 0..500 {
            let r = reserve(&cache, &format!("old-{i}"));
            cache.store(r, json!(i), None, None);
        }
        assert_eq!(cache.held(), 500);

        tokio::time::advance(Duration::from_secs(10)).await;
        for i in 0..10 {
            let r = reserve(&cache, &format!("new-{i}"));
            cache.store(r, json!(i), None, None);
        }
        assert_eq!(cache.held(), 10);
        assert_eq!(cache.len(), 10);
    }

    #[tokio::test(start_paused = true)]
    async fn test_capacity_evicts_oldest_stored_entry() {
        let cache = ResultCache::with_capacity(Duration::from_secs(300), 3);
        for fp in ["a", "b", "c"] {
            let r = reserve(&cache, fp);
            cache.store(r, json!(fp), None, None);
            tokio::time::advance(Duration::from_millis(10)).await;
        }

        let r = reserve(&cache, "d");
        assert_eq!(cache.held(), 3);
        assert!(matches!(cache.lookup_or_reserve("b"), Lookup::Hit(_)));
        assert!(matches!(cache.lookup_or_reserve("c"), Lookup::Hit(_)));
        assert!(matches!(cache.lookup_or_reserve("a"), Lookup::Reserved(_)));
        drop(r);
    }

    #[tokio::test]
    async fn test_in_flight_never_evicted() {
        let cache = ResultCache::with_capacity(Duration::from_secs(300), 1);
        let a = reserve(&cache, "a");
        let b = reserve(&cache, "b");
        assert!(matches!(cache.lookup_or_reserve("a"), Lookup::Wait(_)));
        assert!(matches!(cache.lookup_or_reserve("b"), Lookup::Wait(_)));
        cache.store(a, json!(1), None, None);
        cache.store(b, json!(2), None, None);
        assert_eq!(cache.len(), 2);
    }

    #[tokio::test]
    async fn test_invalidate_leaves_in_flight() {
        let cache = ResultCache::new(Duration::from_secs(300));
        let r = reserve(&cache, "a");
        assert!(!cache.invalidate("a"));
        cache.store(r, json!(1), None, None);
        assert!(cache.invalidate("a"));
        assert!(cache.is_empty());
    }

    #[test]
    fn test_fingerprint_normalizes_description() {
        let a = Task::new("a", TaskKind::Incident, "  High   LATENCY on web ")
            .requiring("aws")
            .requiring("infrastructure");
        let b = Task::new("b", TaskKind::Incident, "high latency on web")
            .requiring("infrastructure")
            .requiring("aws");
        assert_eq!(fingerprint(&a, &json!({})), fingerprint(&b, &json!({})));
    }

    #[test]
    fn test_fingerprint_distinguishes_context_and_priority() {
        let task = Task::new("a", TaskKind::Incident, "disk full");
        let base = fingerprint(&task, &json!({}));
        assert_ne!(base, fingerprint(&task, &json!({"prev": 1})));
        let urgent = task.clone().with_priority(Priority::Critical);
        assert_ne!(base, fingerprint(&urgent, &json!({})));
        let other_kind = Task::new("a", TaskKind::Optimization, "disk full");
        assert_ne!(base, fingerprint(&other_kind, &json!({})));
        assert_eq!(base.len(), 64);
    }
}
