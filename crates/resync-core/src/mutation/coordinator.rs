//! Mutation coordinator.
//!
//! Every write runs the same sequence: apply the optimistic value, run the
//! network call, then either commit the server's value or restore the snapshot,
//! and finally invalidate the keys that depend on the write. Invalidation runs
//! on both outcomes.

use crate::error::{ResyncError, Result};
use crate::keys::{CacheKey, KeyPrefix};
use crate::network::{retry_with_policy, RetryPolicy};
use crate::notify::{Notification, Notifier};
use crate::store::CacheStore;
use async_trait::async_trait;
use serde_json::Value;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{debug, info, warn};

/// Where a mutation is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MutationState {
    Idle,
    Applying,
    Committing,
    SettledSuccess,
    SettledRolledBack,
}

impl MutationState {
    pub fn is_pending(&self) -> bool {
        matches!(self, MutationState::Applying | MutationState::Committing)
    }
}

/// Per-run bookkeeping for an optimistic write.
#[derive(Debug, Clone, PartialEq)]
pub struct MutationContext {
    pub key: CacheKey,
    /// Value before the optimistic write; restored on failure.
    pub previous_snapshot: Option<Value>,
    /// `None` when the updater declined to write anything.
    pub optimistic_value: Option<Value>,
}

/// A key or key range to mark stale once a mutation settles.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Invalidation {
    Key(CacheKey),
    Prefix(KeyPrefix),
}

impl From<CacheKey> for Invalidation {
    fn from(key: CacheKey) -> Self {
        Invalidation::Key(key)
    }
}

impl From<KeyPrefix> for Invalidation {
    fn from(prefix: KeyPrefix) -> Self {
        Invalidation::Prefix(prefix)
    }
}

/// One kind of write against the backend.
///
/// Only [`Mutation::execute`] and [`Mutation::name`] are required. A mutation
/// without a [`Mutation::target`] skips the optimistic step entirely.
#[async_trait]
pub trait Mutation: Send + Sync {
    type Input: Send + Sync;

    /// Short name for logs.
    fn name(&self) -> &'static str;

    /// The key written optimistically, if any.
    fn target(&self, _input: &Self::Input) -> Option<CacheKey> {
        None
    }

    /// Value to write before the network call. `None` leaves the cache alone.
    fn optimistic(&self, _current: Option<&Value>, _input: &Self::Input) -> Option<Value> {
        None
    }

    /// The network call. Returns the canonical server value.
    async fn execute(&self, input: &Self::Input) -> Result<Value>;

    /// Value to write to the target once the server answered. Sees the
    /// current (optimistic) value. `None` keeps the optimistic value.
    fn commit(
        &self,
        _current: Option<&Value>,
        _context: &MutationContext,
        _server: &Value,
    ) -> Option<Value> {
        None
    }

    /// Writes to other keys after success, such as detail keys.
    fn on_success(&self, _store: &CacheStore, _input: &Self::Input, _server: &Value) {}

    /// Cleanup after failure, beyond restoring the target.
    fn on_error(&self, _store: &CacheStore, _input: &Self::Input, _error: &ResyncError) {}

    /// Keys to mark stale once the mutation settles, whatever the outcome.
    fn invalidations(&self, _input: &Self::Input) -> Vec<Invalidation> {
        Vec::new()
    }

    fn success_notification(&self, _input: &Self::Input, _server: &Value) -> Option<Notification> {
        None
    }

    fn error_notification(&self, _input: &Self::Input, _error: &ResyncError) -> Option<Notification> {
        None
    }

    /// Overrides the coordinator's retry policy.
    fn retry_policy(&self) -> Option<RetryPolicy> {
        None
    }
}

/// Runs mutations against one store.
#[derive(Clone)]
pub struct MutationCoordinator {
    store: Arc<CacheStore>,
    notifier: Arc<dyn Notifier>,
    retry: RetryPolicy,
}

impl MutationCoordinator {
    pub fn new(store: Arc<CacheStore>, notifier: Arc<dyn Notifier>) -> Self {
        Self {
            store,
            notifier,
            retry: RetryPolicy::mutation(),
        }
    }

    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn store(&self) -> &Arc<CacheStore> {
        &self.store
    }

    /// Run a mutation to settle.
    pub async fn run<M: Mutation>(&self, mutation: &M, input: M::Input) -> Result<Value> {
        let (state, _) = watch::channel(MutationState::Idle);
        self.run_tracked(mutation, input, &state).await
    }

    /// Run a mutation, publishing each state transition.
    pub async fn run_tracked<M: Mutation>(
        &self,
        mutation: &M,
        input: M::Input,
        state: &watch::Sender<MutationState>,
    ) -> Result<Value> {
        state.send_replace(MutationState::Applying);
        let context = self.apply(mutation, &input);

        state.send_replace(MutationState::Committing);
        let policy = mutation.retry_policy().unwrap_or_else(|| self.retry.clone());
        let (result, stats) = retry_with_policy(&policy, || mutation.execute(&input)).await;

        match result {
            Ok(server) => {
                if let Some(context) = &context {
                    self.store
                        .replace_with(&context.key, |current| mutation.commit(current, context, &server));
                }
                mutation.on_success(&self.store, &input, &server);
                self.invalidate(mutation, &input);
                if let Some(notification) = mutation.success_notification(&input, &server) {
                    self.notifier.notify(notification);
                }
                debug!("{} settled after {} attempts", mutation.name(), stats.attempts);
                state.send_replace(MutationState::SettledSuccess);
                Ok(server)
            }
            Err(error) => {
                warn!("{} failed: {}", mutation.name(), error);
                if let Some(context) = &context {
                    self.rollback(context);
                }
                mutation.on_error(&self.store, &input, &error);
                self.invalidate(mutation, &input);
                if let Some(notification) = mutation.error_notification(&input, &error) {
                    self.notifier.notify(notification);
                }
                state.send_replace(MutationState::SettledRolledBack);
                Err(error)
            }
        }
    }

    fn apply<M: Mutation>(&self, mutation: &M, input: &M::Input) -> Option<MutationContext> {
        let key = mutation.target(input)?;
        let (previous_snapshot, optimistic_value) = self
            .store
            .replace_with(&key, |current| mutation.optimistic(current, input));
        debug!(
            "{} applied optimistic value to {}: {}",
            mutation.name(),
            key,
            optimistic_value.is_some()
        );
        Some(MutationContext {
            key,
            previous_snapshot,
            optimistic_value,
        })
    }

    /// Restore the snapshot. Cannot fail: without a snapshot the key is removed.
    fn rollback(&self, context: &MutationContext) {
        if context.optimistic_value.is_none() {
            return;
        }
        match &context.previous_snapshot {
            Some(previous) => {
                info!("Rolling back {}", context.key);
                self.store.set(&context.key, previous.clone());
            }
            None => {
                info!("Rolling back {} by removal", context.key);
                self.store.remove(&context.key);
            }
        }
    }

    fn invalidate<M: Mutation>(&self, mutation: &M, input: &M::Input) {
        for invalidation in mutation.invalidations(input) {
            match invalidation {
                Invalidation::Key(key) => {
                    self.store.invalidate(&key, true);
                }
                Invalidation::Prefix(prefix) => {
                    self.store.invalidate_prefix(&prefix);
                }
            }
        }
    }
}

/// A mutation bound to a coordinator, with its pending state observable.
pub struct MutationHandle<M: Mutation> {
    coordinator: MutationCoordinator,
    mutation: M,
    state: watch::Sender<MutationState>,
}

impl<M: Mutation> MutationHandle<M> {
    pub fn new(coordinator: MutationCoordinator, mutation: M) -> Self {
        let (state, _) = watch::channel(MutationState::Idle);
        Self {
            coordinator,
            mutation,
            state,
        }
    }

    pub async fn run(&self, input: M::Input) -> Result<Value> {
        self.coordinator
            .run_tracked(&self.mutation, input, &self.state)
            .await
    }

    pub fn state(&self) -> MutationState {
        *self.state.borrow()
    }

    pub fn is_pending(&self) -> bool {
        self.state().is_pending()
    }

    /// Receiver observing every state transition.
    pub fn watch(&self) -> watch::Receiver<MutationState> {
        self.state.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::keys::KeyFamily;
    use crate::notify::{ChannelNotifier, NoopNotifier};
    use crate::store::StoreConfig;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};

    const ITEMS: KeyFamily = KeyFamily::new("items");

    struct Rename {
        outcome: std::result::Result<Value, u16>,
        calls: AtomicUsize,
    }

    impl Rename {
        fn ok(server: Value) -> Self {
            Self {
                outcome: Ok(server),
                calls: AtomicUsize::new(0),
            }
        }

        fn failing(status: u16) -> Self {
            Self {
                outcome: Err(status),
                calls: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl Mutation for Rename {
        type Input = String;

        fn name(&self) -> &'static str {
            "rename"
        }

        fn target(&self, _input: &String) -> Option<CacheKey> {
            Some(ITEMS.detail("1"))
        }

        fn optimistic(&self, current: Option<&Value>, input: &String) -> Option<Value> {
            crate::mutation::optimistic::replace_value(current, &json!({ "name": input }))
        }

        async fn execute(&self, _input: &String) -> Result<Value> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            match &self.outcome {
                Ok(value) => Ok(value.clone()),
                Err(status) => Err(ResyncError::from_status(*status, "rejected")),
            }
        }

        fn commit(&self, _current: Option<&Value>, _context: &MutationContext, server: &Value) -> Option<Value> {
            Some(server.clone())
        }

        fn invalidations(&self, _input: &String) -> Vec<Invalidation> {
            vec![ITEMS.lists().into()]
        }

        fn error_notification(&self, _input: &String, error: &ResyncError) -> Option<Notification> {
            Some(Notification::error("Rename failed", error.to_string()))
        }
    }

    fn coordinator() -> MutationCoordinator {
        MutationCoordinator::new(CacheStore::shared(StoreConfig::default()), Arc::new(NoopNotifier))
    }

    #[tokio::test]
    async fn test_server_value_wins() {
        let coordinator = coordinator();
        let store = coordinator.store().clone();
        store.set(&ITEMS.detail("1"), json!({"id": "1", "name": "old"}));
        store.set(&ITEMS.list(None), json!([]));

        let mutation = Rename::ok(json!({"id": "1", "name": "server"}));
        coordinator.run(&mutation, "guess".into()).await.unwrap();

        assert_eq!(store.get_data(&ITEMS.detail("1")), Some(json!({"id": "1", "name": "server"})));
        assert!(store.get(&ITEMS.list(None)).unwrap().invalidated);
    }

    #[tokio::test]
    async fn test_failure_restores_snapshot_and_still_invalidates() {
        let (notifier, mut notifications) = ChannelNotifier::new();
        let coordinator =
            MutationCoordinator::new(CacheStore::shared(StoreConfig::default()), Arc::new(notifier));
        let store = coordinator.store().clone();
        let before = json!({"id": "1", "name": "old", "nested": {"a": [1, 2]}});
        store.set(&ITEMS.detail("1"), before.clone());
        store.set(&ITEMS.list(None), json!([]));

        let mutation = Rename::failing(422);
        let err = coordinator.run(&mutation, "new".into()).await.unwrap_err();

        assert_eq!(err.status(), Some(422));
        assert_eq!(mutation.calls.load(Ordering::SeqCst), 1);
        assert_eq!(store.get_data(&ITEMS.detail("1")), Some(before));
        assert!(store.get(&ITEMS.list(None)).unwrap().invalidated);
        assert_eq!(notifications.try_recv().unwrap().title, "Rename failed");
    }

    #[tokio::test]
    async fn test_nothing_cached_means_nothing_to_roll_back() {
        let coordinator = coordinator();
        let store = coordinator.store().clone();

        let mutation = Rename::failing(400);
        assert!(coordinator.run(&mutation, "new".into()).await.is_err());
        assert_eq!(store.get_data(&ITEMS.detail("1")), None);
    }

    #[tokio::test]
    async fn test_handle_tracks_state() {
        let handle = MutationHandle::new(coordinator(), Rename::ok(json!({"id": "1"})));
        let mut states = handle.watch();
        assert_eq!(handle.state(), MutationState::Idle);
        assert!(!handle.is_pending());

        handle.run("x".into()).await.unwrap();

        assert_eq!(handle.state(), MutationState::SettledSuccess);
        assert!(states.has_changed().unwrap());
        assert_eq!(*states.borrow_and_update(), MutationState::SettledSuccess);
    }
}
