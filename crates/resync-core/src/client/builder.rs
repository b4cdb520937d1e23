//! Builder for configuring ResyncClient initialization.

use std::path::Path;
use std::sync::Arc;

use crate::config::ClientConfig;
use crate::error::Result;
use crate::mutation::MutationCoordinator;
use crate::network::{FileTokenStore, HttpTransport, MemoryTokenStore, RetryPolicy, TokenStore, Transport};
use crate::notify::{NoopNotifier, Notifier};
use crate::query::QueryClient;
use crate::services::{AuthService, TodoService};
use crate::store::{CacheStore, StoreConfig};
use super::ResyncClient;

/// Builder for configuring ResyncClient initialization.
///
/// # Example
///
/// ```rust,ignore
/// use resync_core::{ClientConfig, ResyncClient};
///
/// let client = ResyncClient::builder(ClientConfig::from_env()?)
///     .with_origin("https://app.example.com")
///     .with_csrf_token(csrf)
///     .build()?;
/// ```
pub struct ResyncClientBuilder {
    config: ClientConfig,
    transport: Option<Arc<dyn Transport>>,
    tokens: Option<Arc<dyn TokenStore>>,
    notifier: Option<Arc<dyn Notifier>>,
    origin: Option<String>,
    csrf_token: Option<String>,
}

impl ResyncClientBuilder {
    pub fn new(config: ClientConfig) -> Self {
        Self {
            config,
            transport: None,
            tokens: None,
            notifier: None,
            origin: None,
            csrf_token: None,
        }
    }

    /// Use a custom transport instead of the reqwest one.
    ///
    /// When set, `with_origin` and `with_csrf_token` have no effect.
    pub fn with_transport(mut self, transport: Arc<dyn Transport>) -> Self {
        self.transport = Some(transport);
        self
    }

    /// Token persistence.
    ///
    /// Default: in-memory, lost on restart.
    pub fn with_token_store(mut self, tokens: Arc<dyn TokenStore>) -> Self {
        self.tokens = Some(tokens);
        self
    }

    /// Persist tokens in a JSON file under the configured token key names.
    pub fn with_token_file(mut self, path: impl AsRef<Path>) -> Self {
        self.tokens = Some(Arc::new(FileTokenStore::with_keys(
            path,
            &self.config.token_key,
            &self.config.refresh_token_key,
        )));
        self
    }

    /// Where settled mutations report to.
    ///
    /// Default: discard.
    pub fn with_notifier(mut self, notifier: Arc<dyn Notifier>) -> Self {
        self.notifier = Some(notifier);
        self
    }

    /// Page origin to resolve a path-only base URL against (Django SPA mode).
    pub fn with_origin(mut self, origin: impl Into<String>) -> Self {
        self.origin = Some(origin.into());
        self
    }

    pub fn with_csrf_token(mut self, token: impl Into<String>) -> Self {
        self.csrf_token = Some(token.into());
        self
    }

    /// Build the ResyncClient instance.
    pub fn build(self) -> Result<ResyncClient> {
        let tokens = self
            .tokens
            .unwrap_or_else(|| Arc::new(MemoryTokenStore::new()));

        let transport: Arc<dyn Transport> = match self.transport {
            Some(transport) => transport,
            None => {
                let mut http = match &self.origin {
                    Some(origin) => HttpTransport::with_origin(&self.config, origin, tokens.clone())?,
                    None => HttpTransport::new(&self.config, tokens.clone())?,
                };
                if let Some(token) = self.csrf_token {
                    http = http.with_csrf_token(token);
                }
                tracing::debug!("Using HTTP transport at {}", http.base_url());
                Arc::new(http)
            }
        };

        let notifier = self.notifier.unwrap_or_else(|| Arc::new(NoopNotifier));

        let store = CacheStore::shared(StoreConfig {
            default_stale_time: self.config.stale_time,
            gc_grace: self.config.gc_grace,
        });
        let queries = QueryClient::new(store.clone())
            .with_retry_policy(RetryPolicy::query().with_max_retries(self.config.retries));
        let coordinator = MutationCoordinator::new(store.clone(), notifier);

        Ok(ResyncClient {
            todos: TodoService::new(transport.clone()),
            auth: AuthService::new(transport.clone()),
            config: self.config,
            store,
            transport,
            tokens,
            queries,
            coordinator,
        })
    }
}
