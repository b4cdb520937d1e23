//! Normalized client cache.
//!
//! - [`CacheStore`]: the keyed map with single-flight fetching and observers
//! - [`CacheEntry`]: what a key holds, handed out as snapshots

mod cache;
mod entry;

pub use cache::{CacheStore, FetchResult, Observer, Subscription};
pub use entry::{CacheEntry, CacheEvent, CacheEventKind, EntryStatus, StoreConfig, StoreStats};
