//! Network layer: transport, token storage and retry policy.

mod auth;
mod retry;
mod transport;

pub use auth::{FileTokenStore, MemoryTokenStore, TokenStore, Tokens};
pub use retry::{retry_with_policy, RetryDecision, RetryPolicy, RetryStats};
pub use transport::{HttpTransport, Method, Request, Transport};
