//! Scripted in-memory transport for driving the cache core headlessly.
//!
//! ```no_run
//! use resync_core::network::Method;
//! use resync_core::testing::MockTransport;
//! use serde_json::json;
//!
//! let transport = MockTransport::new();
//! transport.respond(Method::Get, "/todos/stats", json!({"success": true, "data": {"total": 1}}));
//! transport.fail(Method::Patch, "/todos/1/toggle", 500, json!({"message": "boom"}));
//! ```

use crate::error::{ResyncError, Result};
use crate::network::{Method, Request, Transport};
use async_trait::async_trait;
use serde_json::Value;
use std::collections::{HashMap, VecDeque};
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

#[derive(Debug, Clone)]
enum Reply {
    Body(Value),
    Status(u16, Value),
    Network(String),
}

/// Transport returning scripted replies per `(method, path)`.
///
/// Replies queue up in order; the last one keeps repeating once the queue is
/// down to it. Requests without a script fail with a 404.
#[derive(Debug, Default)]
pub struct MockTransport {
    routes: Mutex<HashMap<(Method, String), VecDeque<Reply>>>,
    requests: Mutex<Vec<Request>>,
    latency: Option<Duration>,
}

impl MockTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Delay every reply, so concurrent callers overlap.
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = Some(latency);
        self
    }

    fn push(&self, method: Method, path: &str, reply: Reply) -> &Self {
        self.routes
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .entry((method, path.to_string()))
            .or_default()
            .push_back(reply);
        self
    }

    /// Queue a 2xx reply with a raw body.
    pub fn respond(&self, method: Method, path: &str, body: Value) -> &Self {
        self.push(method, path, Reply::Body(body))
    }

    /// Queue a non-2xx reply.
    pub fn fail(&self, method: Method, path: &str, status: u16, body: Value) -> &Self {
        self.push(method, path, Reply::Status(status, body))
    }

    /// Queue a transport-level failure.
    pub fn fail_network(&self, method: Method, path: &str, message: &str) -> &Self {
        self.push(method, path, Reply::Network(message.to_string()))
    }

    /// Every request received so far, in order.
    pub fn requests(&self) -> Vec<Request> {
        self.requests
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Number of requests received for one route.
    pub fn calls(&self, method: Method, path: &str) -> usize {
        self.requests
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .filter(|r| r.method == method && r.path == path)
            .count()
    }

    fn next_reply(&self, method: Method, path: &str) -> Option<Reply> {
        let mut routes = self.routes.lock().unwrap_or_else(PoisonError::into_inner);
        let queue = routes.get_mut(&(method, path.to_string()))?;
        if queue.len() > 1 {
            queue.pop_front()
        } else {
            queue.front().cloned()
        }
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn send(&self, request: Request) -> Result<Value> {
        let reply = self.next_reply(request.method, &request.path);
        self.requests
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(request.clone());

        if let Some(latency) = self.latency {
            tokio::time::sleep(latency).await;
        }

        match reply {
            Some(Reply::Body(body)) => Ok(body),
            Some(Reply::Status(status, body)) => {
                let message = crate::normalize::error_message(&body)
                    .unwrap_or_else(|| format!("Request failed with status {}", status));
                Err(ResyncError::from_status(status, message))
            }
            Some(Reply::Network(message)) => Err(ResyncError::Network { message }),
            None => Err(ResyncError::from_status(
                404,
                format!("No mock for {} {}", request.method, request.path),
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_replies_queue_then_repeat() {
        let transport = MockTransport::new();
        transport
            .fail(Method::Get, "/x", 503, json!({"message": "busy"}))
            .respond(Method::Get, "/x", json!(1));

        let first = transport.send(Request::get("/x")).await.unwrap_err();
        assert_eq!(first.status(), Some(503));
        assert_eq!(transport.send(Request::get("/x")).await.unwrap(), json!(1));
        assert_eq!(transport.send(Request::get("/x")).await.unwrap(), json!(1));
        assert_eq!(transport.calls(Method::Get, "/x"), 3);
    }

    #[tokio::test]
    async fn test_unscripted_route_is_404() {
        let transport = MockTransport::new();
        let err = transport.send(Request::delete("/nope")).await.unwrap_err();
        assert_eq!(err.status(), Some(404));
        assert_eq!(transport.requests().len(), 1);
    }
}
