//! Shared helpers for integration tests.

#![allow(dead_code)]

use resync_core::network::Method;
use resync_core::testing::MockTransport;
use resync_core::{ChannelNotifier, ClientConfig, Notification, ResyncClient};
use serde_json::{json, Value};
use std::sync::Arc;
use tokio::sync::mpsc::UnboundedReceiver;
use tracing_subscriber::EnvFilter;

/// Surface crate logs in test output when `RUST_LOG` is set.
pub fn init_test_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

pub struct Harness {
    pub transport: Arc<MockTransport>,
    pub client: ResyncClient,
    pub notifications: UnboundedReceiver<Notification>,
}

pub fn harness(transport: MockTransport) -> Harness {
    init_test_tracing();
    let transport = Arc::new(transport);
    let (notifier, notifications) = ChannelNotifier::new();
    let client = ResyncClient::builder(ClientConfig::default())
        .with_transport(transport.clone())
        .with_notifier(Arc::new(notifier))
        .build()
        .expect("client builds with a custom transport");
    Harness {
        transport,
        client,
        notifications,
    }
}

pub fn todo(id: &str, title: &str, completed: bool) -> Value {
    json!({
        "id": id,
        "title": title,
        "completed": completed,
        "priority": "medium",
        "tags": [],
        "userId": "u1",
        "createdAt": "2024-01-01T00:00:00Z",
        "updatedAt": "2024-01-01T00:00:00Z"
    })
}

pub fn wrapped(data: Value) -> Value {
    json!({ "success": true, "data": data })
}

pub fn empty_page() -> Value {
    wrapped(json!({
        "data": [],
        "pagination": {"page": 1, "limit": 10, "total": 0, "totalPages": 0}
    }))
}

pub fn stats(total: u64) -> Value {
    wrapped(json!({"total": total, "completed": 0, "pending": total, "overdue": 0}))
}

pub fn script_stats(transport: &MockTransport, total: u64) {
    transport.respond(Method::Get, "/todos/stats", stats(total));
}
