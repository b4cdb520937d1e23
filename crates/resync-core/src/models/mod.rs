//! Data models for the resources the cache core knows about.
//!
//! Field names follow the JSON the backends speak (camelCase), so these types
//! deserialize straight out of a normalized payload.

mod api;
mod auth;
mod todo;

pub use api::*;
pub use auth::*;
pub use todo::*;
