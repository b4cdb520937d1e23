//! The client facade: one store, one transport, typed reads and mutation handles.

mod builder;

pub use builder::ResyncClientBuilder;

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use serde_json::{json, Value};
use tracing::debug;

use crate::config::{CacheDefaults, ClientConfig};
use crate::error::Result;
use crate::keys::CacheKey;
use crate::models::{Paginated, QueryParams, Todo};
use crate::mutation::{AuthMutations, Mutation, MutationCoordinator, MutationHandle, TodoMutations};
use crate::network::{RetryPolicy, TokenStore, Transport};
use crate::query::{next_page_param, QueryClient, QueryOptions, ResourceHandle};
use crate::services::{AuthService, TodoService, AUTH_KEYS, TODO_KEYS};
use crate::store::CacheStore;

/// Main entry point for UI collaborators.
///
/// Every read and write goes through the same [`CacheStore`], so a mutation's
/// optimistic write and its invalidations reach every live [`ResourceHandle`].
pub struct ResyncClient {
    config: ClientConfig,
    store: Arc<CacheStore>,
    transport: Arc<dyn Transport>,
    tokens: Arc<dyn TokenStore>,
    queries: QueryClient,
    coordinator: MutationCoordinator,
    todos: TodoService,
    auth: AuthService,
}

/// Wrap a service call returning a typed model into a store fetcher.
fn fetch_value<T, Fut>(call: impl FnOnce() -> Fut) -> impl Future<Output = Result<Value>>
where
    T: Serialize,
    Fut: Future<Output = Result<T>>,
{
    let pending = call();
    async move { Ok(serde_json::to_value(pending.await?)?) }
}

impl ResyncClient {
    /// Create a builder for ResyncClient.
    pub fn builder(config: ClientConfig) -> ResyncClientBuilder {
        ResyncClientBuilder::new(config)
    }

    /// Create a client with an HTTP transport and in-memory tokens.
    pub fn new(config: ClientConfig) -> Result<Self> {
        Self::builder(config).build()
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    pub fn store(&self) -> &Arc<CacheStore> {
        &self.store
    }

    pub fn transport(&self) -> &Arc<dyn Transport> {
        &self.transport
    }

    pub fn tokens(&self) -> &Arc<dyn TokenStore> {
        &self.tokens
    }

    pub fn queries(&self) -> &QueryClient {
        &self.queries
    }

    pub fn coordinator(&self) -> &MutationCoordinator {
        &self.coordinator
    }

    pub fn todo_service(&self) -> &TodoService {
        &self.todos
    }

    pub fn auth_service(&self) -> &AuthService {
        &self.auth
    }

    // ========================================
    // Reads
    // ========================================

    /// Subscribe to an arbitrary key with an arbitrary fetcher.
    pub async fn use_resource<F, Fut>(&self, key: CacheKey, fetcher: F) -> ResourceHandle
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Value>> + Send + 'static,
    {
        self.queries.use_resource(key, fetcher).await
    }

    async fn use_resource_for<F, Fut>(
        &self,
        key: CacheKey,
        stale_time: Duration,
        fetcher: F,
    ) -> ResourceHandle
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Value>> + Send + 'static,
    {
        let options = QueryOptions::default()
            .retry(RetryPolicy::query().with_max_retries(self.config.retries))
            .stale_time(stale_time);
        self.queries.use_resource_with(key, fetcher, options).await
    }

    /// A page of todos. Stored as `{ data, pagination }`.
    pub async fn use_todos(&self, params: QueryParams) -> ResourceHandle {
        let service = self.todos.clone();
        let key = TODO_KEYS.list(&params);
        self.use_resource_for(key, CacheDefaults::LIST_STALE_TIME, move || {
            let service = service.clone();
            let params = params.clone();
            fetch_value(move || async move { service.list(&params).await })
        })
        .await
    }

    pub async fn use_todo(&self, id: &str) -> ResourceHandle {
        let service = self.todos.clone();
        let id = id.to_string();
        self.use_resource_for(TODO_KEYS.detail(&id), CacheDefaults::DETAIL_STALE_TIME, move || {
            let service = service.clone();
            let id = id.clone();
            fetch_value(move || async move { service.get(&id).await })
        })
        .await
    }

    pub async fn use_todo_stats(&self) -> ResourceHandle {
        let service = self.todos.clone();
        self.use_resource_for(TODO_KEYS.stats(), CacheDefaults::STATS_STALE_TIME, move || {
            let service = service.clone();
            fetch_value(move || async move { service.stats().await })
        })
        .await
    }

    pub async fn use_profile(&self) -> ResourceHandle {
        let service = self.auth.clone();
        self.use_resource_for(AUTH_KEYS.profile(), CacheDefaults::PROFILE_STALE_TIME, move || {
            let service = service.clone();
            fetch_value(move || async move { service.profile().await })
        })
        .await
    }

    /// Load the next page of an infinite todo list into its key.
    ///
    /// The key holds `{ pages, pageParams }`. Returns the fetched page, or
    /// `None` when the last loaded page was the final one.
    pub async fn fetch_next_todo_page(&self, params: &QueryParams) -> Result<Option<Paginated<Todo>>> {
        let key = TODO_KEYS.infinite(params);
        let loaded: Option<InfinitePages> = self.store.get_as(&key)?;

        let page = match loaded.as_ref().and_then(|pages| pages.pages.last()) {
            Some(last) => match next_page_param(&last.pagination) {
                Some(page) => page,
                None => return Ok(None),
            },
            None => 1,
        };

        debug!("Fetching page {} of {}", page, key);
        let fetched = self.todos.list(&params.clone().page(page)).await?;
        let fetched_value = serde_json::to_value(&fetched)?;

        self.store.replace_with(&key, |current| {
            let mut pages = current
                .and_then(|value| value.get("pages"))
                .and_then(Value::as_array)
                .cloned()
                .unwrap_or_default();
            let mut params = current
                .and_then(|value| value.get("pageParams"))
                .and_then(Value::as_array)
                .cloned()
                .unwrap_or_default();
            pages.push(fetched_value);
            params.push(json!(page));
            Some(json!({ "pages": pages, "pageParams": params }))
        });

        Ok(Some(fetched))
    }

    // ========================================
    // Writes
    // ========================================

    /// Bind a mutation to this client's store and notifier.
    pub fn use_mutate_resource<M: Mutation>(&self, mutation: M) -> MutationHandle<M> {
        MutationHandle::new(self.coordinator.clone(), mutation)
    }

    pub fn todo_mutations(&self) -> TodoMutations {
        TodoMutations::new(self.todos.clone())
    }

    pub fn auth_mutations(&self) -> AuthMutations {
        AuthMutations::new(self.auth.clone(), self.tokens.clone())
    }

    /// Drop unobserved entries past their grace period.
    pub fn collect_garbage(&self) -> usize {
        self.store.collect_garbage()
    }
}

#[derive(serde::Deserialize)]
#[serde(rename_all = "camelCase")]
struct InfinitePages {
    pages: Vec<Paginated<Todo>>,
}
