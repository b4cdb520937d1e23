//! Resync Core - Headless client-side resource cache with optimistic mutations.
//!
//! This crate keeps a normalized cache of REST resources, deduplicates
//! concurrent reads, applies writes optimistically and rolls them back when the
//! server rejects them. It talks to either a wrapped-envelope backend or a
//! Django Ninja backend and makes both look the same to callers.
//!
//! # Example
//!
//! ```rust,ignore
//! use resync_core::{ClientConfig, CreateTodo, QueryParams, ResyncClient};
//!
//! #[tokio::main]
//! async fn main() -> resync_core::Result<()> {
//!     let client = ResyncClient::new(ClientConfig::from_env()?)?;
//!
//!     // Subscribe to the first page of todos
//!     let todos = client.use_todos(QueryParams::new()).await;
//!     println!("{:?}", todos.state().data);
//!
//!     // Create one; the list updates before the server answers
//!     let create = client.use_mutate_resource(client.todo_mutations().create());
//!     create.run(CreateTodo::new("Buy milk")).await?;
//!
//!     Ok(())
//! }
//! ```

pub mod client;
pub mod config;
pub mod error;
pub mod keys;
pub mod models;
pub mod mutation;
pub mod network;
pub mod normalize;
pub mod notify;
pub mod query;
pub mod services;
pub mod store;
pub mod testing;

// Re-export commonly used types
pub use client::{ResyncClient, ResyncClientBuilder};
pub use config::{BackendMode, ClientConfig};
pub use error::{ErrorInfo, ResyncError, Result};
pub use keys::{CacheKey, KeyFamily, KeyPrefix};
pub use models::{CreateTodo, Paginated, Pagination, QueryParams, Todo, UpdateTodo};
pub use mutation::{Mutation, MutationHandle, MutationState};
pub use network::{FileTokenStore, HttpTransport, MemoryTokenStore, TokenStore, Transport};
pub use notify::{ChannelNotifier, NoopNotifier, Notification, NotificationKind, Notifier};
pub use query::{next_page_param, QueryClient, QueryOptions, QueryState, ResourceHandle};
pub use store::{CacheEntry, CacheEvent, CacheEventKind, CacheStore, EntryStatus, StoreConfig};
