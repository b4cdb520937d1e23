//! Cache entry and store configuration types.

use crate::config::CacheDefaults;
use crate::error::{ErrorInfo, Result};
use crate::keys::CacheKey;
use chrono::{DateTime, TimeDelta, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::Duration;

/// Configuration for store behavior.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreConfig {
    /// Staleness window for entries that don't set their own.
    pub default_stale_time: Duration,
    /// How long an unobserved entry is kept before garbage collection.
    pub gc_grace: Duration,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            default_stale_time: CacheDefaults::STALE_TIME,
            gc_grace: CacheDefaults::GC_GRACE,
        }
    }
}

/// Lifecycle state of an entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntryStatus {
    Idle,
    Loading,
    Success,
    Error,
}

/// A cached value with its metadata.
///
/// `status == Success` implies `data` is set and `status == Error` implies
/// `error` is set. Entries are handed out as clones; mutating one does not
/// touch the store.
#[derive(Debug, Clone, PartialEq)]
pub struct CacheEntry {
    pub key: CacheKey,
    /// Last known-good value.
    pub data: Option<Value>,
    pub status: EntryStatus,
    pub error: Option<ErrorInfo>,
    pub last_fetched_at: Option<DateTime<Utc>>,
    pub stale_after: Duration,
    /// Explicitly marked stale by an invalidation.
    pub invalidated: bool,
    pub subscriber_count: usize,
}

impl CacheEntry {
    pub(crate) fn new(key: CacheKey, stale_after: Duration) -> Self {
        Self {
            key,
            data: None,
            status: EntryStatus::Idle,
            error: None,
            last_fetched_at: None,
            stale_after,
            invalidated: false,
            subscriber_count: 0,
        }
    }

    /// Whether the next read by a subscriber should refetch.
    pub fn is_stale(&self) -> bool {
        self.is_stale_at(Utc::now())
    }

    pub fn is_stale_at(&self, now: DateTime<Utc>) -> bool {
        if self.invalidated {
            return true;
        }
        let Some(fetched) = self.last_fetched_at else {
            return true;
        };
        let window = TimeDelta::from_std(self.stale_after).unwrap_or(TimeDelta::MAX);
        now.signed_duration_since(fetched) >= window
    }

    pub fn is_loading(&self) -> bool {
        self.status == EntryStatus::Loading
    }

    /// Decode the cached value into a typed model.
    pub fn data_as<T: DeserializeOwned>(&self) -> Result<Option<T>> {
        match &self.data {
            Some(value) => Ok(Some(serde_json::from_value(value.clone())?)),
            None => Ok(None),
        }
    }

    pub(crate) fn write(&mut self, data: Value) {
        self.data = Some(data);
        self.status = EntryStatus::Success;
        self.error = None;
        self.last_fetched_at = Some(Utc::now());
        self.invalidated = false;
    }

    pub(crate) fn write_error(&mut self, error: ErrorInfo) {
        self.status = EntryStatus::Error;
        self.error = Some(error);
    }

    pub(crate) fn reset(&mut self) {
        self.data = None;
        self.status = EntryStatus::Idle;
        self.error = None;
        self.last_fetched_at = None;
        self.invalidated = false;
    }

    /// Start a fetch. The previous error no longer describes the entry.
    pub(crate) fn begin_loading(&mut self) {
        self.status = EntryStatus::Loading;
        self.error = None;
    }

    /// Leave `Loading` without a result. `error` is only kept alongside `Error`.
    pub(crate) fn settle(&mut self) {
        self.status = self.settled_status();
        if self.status != EntryStatus::Error {
            self.error = None;
        }
    }

    /// Status to fall back to when a pending fetch is abandoned.
    pub(crate) fn settled_status(&self) -> EntryStatus {
        if self.error.is_some() && self.data.is_none() {
            EntryStatus::Error
        } else if self.data.is_some() {
            EntryStatus::Success
        } else {
            EntryStatus::Idle
        }
    }
}

/// What happened to an observed key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheEventKind {
    /// Data, status or error changed.
    Updated,
    /// Marked stale.
    Invalidated,
    /// Data dropped.
    Removed,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheEvent {
    pub key: CacheKey,
    pub kind: CacheEventKind,
}

/// Point-in-time store statistics.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoreStats {
    pub total_entries: usize,
    pub observed_entries: usize,
    pub stale_entries: usize,
    pub in_flight: usize,
}
