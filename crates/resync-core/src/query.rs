//! Read side: subscribe to a key, fetch when stale, observe changes.
//!
//! A [`ResourceHandle`] keeps its key observed for as long as it lives. Reads
//! through [`ResourceHandle::load`] refetch stale data; invalidation never
//! triggers a fetch on its own.

use crate::error::{ErrorInfo, Result};
use crate::keys::CacheKey;
use crate::models::Pagination;
use crate::network::{retry_with_policy, RetryPolicy};
use crate::store::{CacheEventKind, CacheStore, EntryStatus, FetchResult, Observer, Subscription};
use futures::future::{BoxFuture, FutureExt};
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::debug;

/// Produces a fresh canonical value for a key.
pub type Fetcher = Arc<dyn Fn() -> BoxFuture<'static, Result<Value>> + Send + Sync>;

/// Per-query behavior.
#[derive(Debug, Clone, PartialEq)]
pub struct QueryOptions {
    /// Overrides the store's default staleness window for this key.
    pub stale_time: Option<Duration>,
    pub retry: RetryPolicy,
    /// Disabled queries subscribe but never fetch on their own.
    pub enabled: bool,
}

impl Default for QueryOptions {
    fn default() -> Self {
        Self {
            stale_time: None,
            retry: RetryPolicy::query(),
            enabled: true,
        }
    }
}

impl QueryOptions {
    pub fn stale_time(mut self, stale_time: Duration) -> Self {
        self.stale_time = Some(stale_time);
        self
    }

    pub fn retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }
}

/// What a subscriber sees for its key.
#[derive(Debug, Clone, PartialEq)]
pub struct QueryState {
    pub data: Option<Value>,
    pub status: EntryStatus,
    pub is_loading: bool,
    pub is_stale: bool,
    pub error: Option<ErrorInfo>,
}

impl QueryState {
    pub fn data_as<T: DeserializeOwned>(&self) -> Result<Option<T>> {
        match &self.data {
            Some(value) => Ok(Some(serde_json::from_value(value.clone())?)),
            None => Ok(None),
        }
    }
}

/// Entry point for reads against one store.
#[derive(Clone)]
pub struct QueryClient {
    store: Arc<CacheStore>,
    retry: RetryPolicy,
}

impl QueryClient {
    pub fn new(store: Arc<CacheStore>) -> Self {
        Self {
            store,
            retry: RetryPolicy::query(),
        }
    }

    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn store(&self) -> &Arc<CacheStore> {
        &self.store
    }

    /// Subscribe to `key`, fetching first if it is stale or absent.
    pub async fn use_resource<F, Fut>(&self, key: CacheKey, fetcher: F) -> ResourceHandle
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Value>> + Send + 'static,
    {
        let options = QueryOptions::default().retry(self.retry.clone());
        self.use_resource_with(key, fetcher, options).await
    }

    pub async fn use_resource_with<F, Fut>(
        &self,
        key: CacheKey,
        fetcher: F,
        options: QueryOptions,
    ) -> ResourceHandle
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Value>> + Send + 'static,
    {
        let fetcher: Fetcher = Arc::new(move || fetcher().boxed());
        let (events_tx, events) = watch::channel(None);
        let observer: Observer = Arc::new(move |event| {
            events_tx.send_replace(Some(event.kind));
        });

        let subscription = self.store.subscribe(&key, observer);
        if let Some(stale_time) = options.stale_time {
            self.store.set_stale_time(&key, stale_time);
        }

        let handle = ResourceHandle {
            store: self.store.clone(),
            key,
            fetcher,
            retry: options.retry,
            enabled: options.enabled,
            events,
            _subscription: subscription,
        };
        if handle.enabled {
            handle.load().await;
        }
        handle
    }

    /// One-shot read: cached data when fresh, otherwise a fetch.
    pub async fn fetch_query<F, Fut>(&self, key: &CacheKey, fetcher: F) -> FetchResult
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Value>> + Send + 'static,
    {
        if let Some(entry) = self.store.get(key) {
            if let (Some(data), false) = (&entry.data, entry.is_stale()) {
                return Ok(data.clone());
            }
        }
        let fetcher: Fetcher = Arc::new(move || fetcher().boxed());
        fetch_with_retry(&self.store, key, fetcher, self.retry.clone()).await
    }
}

fn fetch_with_retry(
    store: &Arc<CacheStore>,
    key: &CacheKey,
    fetcher: Fetcher,
    retry: RetryPolicy,
) -> impl Future<Output = FetchResult> + Send + 'static {
    let store = store.clone();
    let key = key.clone();
    async move {
        store
            .fetch(&key, move || async move {
                let (result, _) = retry_with_policy(&retry, || fetcher()).await;
                result
            })
            .await
    }
}

/// A live subscription to one key.
pub struct ResourceHandle {
    store: Arc<CacheStore>,
    key: CacheKey,
    fetcher: Fetcher,
    retry: RetryPolicy,
    enabled: bool,
    events: watch::Receiver<Option<CacheEventKind>>,
    _subscription: Subscription,
}

impl ResourceHandle {
    pub fn key(&self) -> &CacheKey {
        &self.key
    }

    /// Current state, without fetching.
    pub fn state(&self) -> QueryState {
        match self.store.get(&self.key) {
            Some(entry) => QueryState {
                is_loading: entry.is_loading(),
                is_stale: entry.is_stale(),
                data: entry.data,
                status: entry.status,
                error: entry.error,
            },
            None => QueryState {
                data: None,
                status: EntryStatus::Idle,
                is_loading: false,
                is_stale: true,
                error: None,
            },
        }
    }

    pub fn data_as<T: DeserializeOwned>(&self) -> Result<Option<T>> {
        self.state().data_as()
    }

    /// Read, refetching first if the entry is stale. Fetch errors land in the
    /// returned state rather than being returned.
    pub async fn load(&self) -> QueryState {
        let state = self.state();
        if self.enabled && (state.is_stale || state.is_loading) {
            if !state.is_loading {
                debug!("{} is stale, refetching", self.key);
            }
            // Joins the pending fetch when one is already running.
            let _ = self.refetch().await;
        }
        self.state()
    }

    /// Fetch now, joining any fetch already in flight for this key.
    pub async fn refetch(&self) -> FetchResult {
        fetch_with_retry(&self.store, &self.key, self.fetcher.clone(), self.retry.clone()).await
    }

    /// Wait for the next change to this key. `None` once the store has been
    /// cleared out from under this handle.
    pub async fn changed(&mut self) -> Option<CacheEventKind> {
        self.events.changed().await.ok()?;
        *self.events.borrow_and_update()
    }

    /// Stop observing the key.
    pub fn unsubscribe(self) {}
}

/// Page to request after `pagination`, or `None` on the last page.
pub fn next_page_param(pagination: &Pagination) -> Option<u32> {
    pagination.next_page()
}
