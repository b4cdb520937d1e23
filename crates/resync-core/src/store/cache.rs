//! In-memory cache store.
//!
//! One map from [`CacheKey`] to slot, guarded by a mutex that is only held for
//! the duration of a single read-then-write step and never across an await.
//! Observers are called after the lock is released, so an observer may read the
//! store again from inside its callback.

use super::entry::{CacheEntry, CacheEvent, CacheEventKind, StoreConfig, StoreStats};
use crate::error::{ErrorInfo, Result};
use crate::keys::{CacheKey, KeyPrefix};
use futures::future::{BoxFuture, FutureExt, Shared};
use serde_json::Value;
use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::{Duration, Instant};
use tracing::{debug, trace};

/// Outcome of a fetch, shared between every caller waiting on it.
pub type FetchResult = std::result::Result<Value, ErrorInfo>;

type SharedFetch = Shared<BoxFuture<'static, FetchResult>>;

/// Callback invoked for every change to an observed key.
pub type Observer = Arc<dyn Fn(&CacheEvent) + Send + Sync>;

struct Slot {
    entry: CacheEntry,
    observers: Vec<(u64, Observer)>,
    in_flight: Option<SharedFetch>,
    /// Bumped whenever a pending fetch must no longer be applied.
    generation: u64,
    /// Whether the pending fetch started while the key was observed.
    fetch_observed: bool,
    last_active: Instant,
}

impl Slot {
    fn new(key: CacheKey, stale_after: Duration) -> Self {
        Self {
            entry: CacheEntry::new(key, stale_after),
            observers: Vec::new(),
            in_flight: None,
            generation: 0,
            fetch_observed: false,
            last_active: Instant::now(),
        }
    }

    fn events(&self, kind: CacheEventKind) -> Vec<(Observer, CacheEvent)> {
        self.observers
            .iter()
            .map(|(_, observer)| {
                (
                    observer.clone(),
                    CacheEvent {
                        key: self.entry.key.clone(),
                        kind,
                    },
                )
            })
            .collect()
    }

    fn is_orphaned(&self) -> bool {
        self.fetch_observed && self.entry.subscriber_count == 0
    }

    fn abandon_fetch(&mut self) {
        if self.in_flight.take().is_some() {
            self.generation += 1;
            self.entry.settle();
        }
    }
}

#[derive(Default)]
struct Inner {
    slots: HashMap<CacheKey, Slot>,
    next_observer_id: u64,
}

/// Normalized client cache.
///
/// Construct one per application (or per test) and share it by `Arc`.
pub struct CacheStore {
    inner: Mutex<Inner>,
    config: StoreConfig,
}

impl Default for CacheStore {
    fn default() -> Self {
        Self::new(StoreConfig::default())
    }
}

impl CacheStore {
    pub fn new(config: StoreConfig) -> Self {
        Self {
            inner: Mutex::new(Inner::default()),
            config,
        }
    }

    /// Create a store ready to be shared.
    pub fn shared(config: StoreConfig) -> Arc<Self> {
        Arc::new(Self::new(config))
    }

    pub fn config(&self) -> &StoreConfig {
        &self.config
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn slot<'a>(&self, inner: &'a mut Inner, key: &CacheKey) -> &'a mut Slot {
        let stale_after = self.config.default_stale_time;
        inner
            .slots
            .entry(key.clone())
            .or_insert_with(|| Slot::new(key.clone(), stale_after))
    }

    fn dispatch(events: Vec<(Observer, CacheEvent)>) {
        for (observer, event) in events {
            observer(&event);
        }
    }

    // === Reads ===

    /// Snapshot of an entry. No side effects.
    pub fn get(&self, key: &CacheKey) -> Option<CacheEntry> {
        self.lock().slots.get(key).map(|slot| slot.entry.clone())
    }

    /// The cached value for a key, if any.
    pub fn get_data(&self, key: &CacheKey) -> Option<Value> {
        self.lock()
            .slots
            .get(key)
            .and_then(|slot| slot.entry.data.clone())
    }

    /// Decode the cached value for a key.
    pub fn get_as<T: serde::de::DeserializeOwned>(&self, key: &CacheKey) -> Result<Option<T>> {
        match self.get_data(key) {
            Some(value) => Ok(Some(serde_json::from_value(value)?)),
            None => Ok(None),
        }
    }

    pub fn contains(&self, key: &CacheKey) -> bool {
        self.lock().slots.contains_key(key)
    }

    /// Every key currently held, sorted.
    pub fn keys(&self) -> Vec<CacheKey> {
        let mut keys: Vec<CacheKey> = self.lock().slots.keys().cloned().collect();
        keys.sort();
        keys
    }

    pub fn stats(&self) -> StoreStats {
        let inner = self.lock();
        let mut stats = StoreStats {
            total_entries: inner.slots.len(),
            ..Default::default()
        };
        for slot in inner.slots.values() {
            if slot.entry.subscriber_count > 0 {
                stats.observed_entries += 1;
            }
            if slot.entry.is_stale() {
                stats.stale_entries += 1;
            }
            if slot.in_flight.is_some() {
                stats.in_flight += 1;
            }
        }
        stats
    }

    // === Writes ===

    /// Overwrite a key's value and mark it fresh.
    pub fn set(&self, key: &CacheKey, data: Value) {
        let events = {
            let mut inner = self.lock();
            let slot = self.slot(&mut inner, key);
            slot.entry.write(data);
            slot.last_active = Instant::now();
            slot.events(CacheEventKind::Updated)
        };
        trace!("cache set {}", key);
        Self::dispatch(events);
    }

    /// Record a failed fetch. Last known-good data is kept.
    pub fn set_error(&self, key: &CacheKey, error: ErrorInfo) {
        let events = {
            let mut inner = self.lock();
            let slot = self.slot(&mut inner, key);
            slot.entry.write_error(error);
            slot.last_active = Instant::now();
            slot.events(CacheEventKind::Updated)
        };
        Self::dispatch(events);
    }

    /// Override the staleness window for one key.
    pub fn set_stale_time(&self, key: &CacheKey, stale_after: Duration) {
        let mut inner = self.lock();
        self.slot(&mut inner, key).entry.stale_after = stale_after;
    }

    /// Atomically read the current value and write a replacement.
    ///
    /// `update` sees the current value; returning `None` leaves the entry
    /// untouched. Any pending fetch for the key is abandoned so its result
    /// cannot overwrite the new value. Returns `(previous, written)`.
    pub fn replace_with<F>(&self, key: &CacheKey, update: F) -> (Option<Value>, Option<Value>)
    where
        F: FnOnce(Option<&Value>) -> Option<Value>,
    {
        let (previous, written, events) = {
            let mut inner = self.lock();
            let previous = inner
                .slots
                .get(key)
                .and_then(|slot| slot.entry.data.clone());
            let written = update(previous.as_ref());
            match &written {
                Some(value) => {
                    let slot = self.slot(&mut inner, key);
                    slot.abandon_fetch();
                    slot.entry.write(value.clone());
                    slot.last_active = Instant::now();
                    (previous, written, slot.events(CacheEventKind::Updated))
                }
                None => (previous, None, Vec::new()),
            }
        };
        Self::dispatch(events);
        (previous, written)
    }

    /// Mark a key stale.
    ///
    /// With `exact = false` every key sharing the `(collection, kind)` of `key`
    /// is marked instead. Returns how many entries were marked.
    pub fn invalidate(&self, key: &CacheKey, exact: bool) -> usize {
        if exact {
            let events = {
                let mut inner = self.lock();
                match inner.slots.get_mut(key) {
                    Some(slot) => {
                        slot.entry.invalidated = true;
                        slot.events(CacheEventKind::Invalidated)
                    }
                    None => return 0,
                }
            };
            debug!("invalidated {}", key);
            Self::dispatch(events);
            1
        } else {
            self.invalidate_prefix(&KeyPrefix::kind(key.collection(), key.kind().clone()))
        }
    }

    /// Mark every key matching a prefix stale.
    pub fn invalidate_prefix(&self, prefix: &KeyPrefix) -> usize {
        let (count, events) = {
            let mut inner = self.lock();
            let mut count = 0;
            let mut events = Vec::new();
            for (key, slot) in inner.slots.iter_mut() {
                if prefix.matches(key) {
                    slot.entry.invalidated = true;
                    events.extend(slot.events(CacheEventKind::Invalidated));
                    count += 1;
                }
            }
            (count, events)
        };
        debug!("invalidated {} entries under {}", count, prefix);
        Self::dispatch(events);
        count
    }

    /// Drop a key's data.
    ///
    /// Unobserved entries are deleted. Observed entries are reset to `Idle`
    /// instead, so their subscriber count survives.
    pub fn remove(&self, key: &CacheKey) -> bool {
        let (removed, events) = {
            let mut inner = self.lock();
            let Some(slot) = inner.slots.get_mut(key) else {
                return false;
            };
            slot.abandon_fetch();
            let events = slot.events(CacheEventKind::Removed);
            if slot.entry.subscriber_count == 0 {
                inner.slots.remove(key);
            } else {
                slot.entry.reset();
            }
            (true, events)
        };
        debug!("removed {}", key);
        Self::dispatch(events);
        removed
    }

    /// Remove every key matching a prefix.
    pub fn remove_prefix(&self, prefix: &KeyPrefix) -> usize {
        let keys: Vec<CacheKey> = self
            .lock()
            .slots
            .keys()
            .filter(|k| prefix.matches(k))
            .cloned()
            .collect();
        keys.iter().filter(|key| self.remove(key)).count()
    }

    /// Drop everything, observers included.
    pub fn clear(&self) {
        self.lock().slots.clear();
    }

    // === Subscriptions ===

    /// Observe a key. The returned guard unsubscribes when dropped.
    pub fn subscribe(self: &Arc<Self>, key: &CacheKey, observer: Observer) -> Subscription {
        let id = {
            let mut inner = self.lock();
            let id = inner.next_observer_id;
            inner.next_observer_id += 1;
            let slot = self.slot(&mut inner, key);
            slot.observers.push((id, observer));
            slot.entry.subscriber_count += 1;
            slot.last_active = Instant::now();
            id
        };
        trace!("subscribed {} to {}", id, key);
        Subscription {
            store: Arc::downgrade(self),
            key: key.clone(),
            id,
            active: true,
        }
    }

    fn unsubscribe(&self, key: &CacheKey, id: u64) {
        let mut inner = self.lock();
        if let Some(slot) = inner.slots.get_mut(key) {
            let before = slot.observers.len();
            slot.observers.retain(|(observer_id, _)| *observer_id != id);
            if slot.observers.len() < before {
                slot.entry.subscriber_count = slot.entry.subscriber_count.saturating_sub(1);
                slot.last_active = Instant::now();
            }
        }
    }

    // === Fetching ===

    /// Fetch a key with single-flight semantics.
    ///
    /// If a fetch for `key` is already pending, this awaits that fetch instead of
    /// starting another one, and `fetcher` is never polled. The result is
    /// written to the store when the fetch completes unless the fetch started
    /// observed and the key lost all of its subscribers meanwhile, or the fetch
    /// was superseded by a direct write.
    pub async fn fetch<F, Fut>(self: &Arc<Self>, key: &CacheKey, fetcher: F) -> FetchResult
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<Value>> + Send + 'static,
    {
        let pending = fetcher();

        let (shared, events) = {
            let mut inner = self.lock();
            let slot = self.slot(&mut inner, key);
            match &slot.in_flight {
                Some(existing) => {
                    trace!("joining in-flight fetch for {}", key);
                    (existing.clone(), Vec::new())
                }
                None => {
                    slot.generation += 1;
                    slot.fetch_observed = slot.entry.subscriber_count > 0;
                    let generation = slot.generation;
                    let store = Arc::downgrade(self);
                    let fetch_key = key.clone();
                    let shared = async move {
                        let result = pending.await.map_err(|e| e.to_info());
                        if let Some(store) = store.upgrade() {
                            store.complete_fetch(&fetch_key, generation, &result);
                        }
                        result
                    }
                    .boxed()
                    .shared();

                    slot.in_flight = Some(shared.clone());
                    slot.entry.begin_loading();
                    debug!("fetching {}", key);
                    (shared, slot.events(CacheEventKind::Updated))
                }
            }
        };

        Self::dispatch(events);
        shared.await
    }

    fn complete_fetch(&self, key: &CacheKey, generation: u64, result: &FetchResult) {
        let events = {
            let mut inner = self.lock();
            let Some(slot) = inner.slots.get_mut(key) else {
                return;
            };
            if slot.generation != generation {
                trace!("discarding superseded fetch for {}", key);
                return;
            }
            slot.in_flight = None;

            if slot.is_orphaned() {
                debug!("discarding fetch for orphaned key {}", key);
                slot.entry.settle();
                return;
            }

            match result {
                Ok(value) => slot.entry.write(value.clone()),
                Err(error) => slot.entry.write_error(error.clone()),
            }
            slot.last_active = Instant::now();
            slot.events(CacheEventKind::Updated)
        };
        Self::dispatch(events);
    }

    // === Garbage collection ===

    /// Delete unobserved, idle entries older than the GC grace period.
    ///
    /// Returns the number of entries deleted.
    pub fn collect_garbage(&self) -> usize {
        let grace = self.config.gc_grace;
        let mut inner = self.lock();
        let before = inner.slots.len();
        inner.slots.retain(|_, slot| {
            slot.entry.subscriber_count > 0
                || slot.in_flight.is_some()
                || slot.last_active.elapsed() < grace
        });
        let collected = before - inner.slots.len();
        if collected > 0 {
            debug!("garbage collected {} cache entries", collected);
        }
        collected
    }
}

/// Guard for an observer registration.
pub struct Subscription {
    store: Weak<CacheStore>,
    key: CacheKey,
    id: u64,
    active: bool,
}

impl Subscription {
    pub fn key(&self) -> &CacheKey {
        &self.key
    }

    /// Stop observing. Equivalent to dropping the guard.
    pub fn unsubscribe(mut self) {
        self.release();
    }

    fn release(&mut self) {
        if !self.active {
            return;
        }
        self.active = false;
        if let Some(store) = self.store.upgrade() {
            store.unsubscribe(&self.key, self.id);
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.release();
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("key", &self.key)
            .field("id", &self.id)
            .field("active", &self.active)
            .finish()
    }
}
