//! Resource services: typed REST calls, normalized, with no cache interaction.

mod auth;
mod base;
mod todos;

pub use auth::{AuthKeys, AuthService, AUTH_KEYS};
pub use base::{Endpoint, ResourceService};
pub use todos::{TodoKeys, TodoService, TODO_KEYS};
