//! HttpTransport against a live mock server: auth headers, token refresh,
//! Django SPA mode and response normalization.

mod common;

use common::{init_test_tracing, todo, wrapped};
use httpmock::prelude::*;
use resync_core::models::TodoStats;
use resync_core::network::Tokens;
use resync_core::services::TodoService;
use resync_core::{
    BackendMode, ClientConfig, CreateTodo, HttpTransport, MemoryTokenStore, QueryParams,
    ResyncError, TokenStore,
};
use serde_json::json;
use std::sync::Arc;

fn config(server: &MockServer) -> ClientConfig {
    ClientConfig {
        base_url: server.url("/api/v1"),
        ..Default::default()
    }
}

fn signed_in(access: &str, refresh: Option<&str>) -> Arc<MemoryTokenStore> {
    Arc::new(MemoryTokenStore::with_tokens(Tokens::new(
        access,
        refresh.map(str::to_string),
    )))
}

fn service(transport: HttpTransport) -> TodoService {
    TodoService::new(Arc::new(transport))
}

#[tokio::test]
async fn test_sends_bearer_token() {
    init_test_tracing();
    let server = MockServer::start();
    let mock = server.mock(|when, then| {
        when.method(GET)
            .path("/api/v1/todos/stats")
            .header("authorization", "Bearer t1");
        then.status(200).json_body(wrapped(json!({
            "total": 4, "completed": 1, "pending": 3, "overdue": 0
        })));
    });

    let transport = HttpTransport::new(&config(&server), signed_in("t1", None)).unwrap();
    let stats: TodoStats = service(transport).stats().await.unwrap();

    mock.assert();
    assert_eq!(stats.total, 4);
    assert_eq!(stats.pending, 3);
}

#[tokio::test]
async fn test_expired_token_is_refreshed_once() {
    init_test_tracing();
    let server = MockServer::start();
    let rejected = server.mock(|when, then| {
        when.method(GET)
            .path("/api/v1/todos/1")
            .header("authorization", "Bearer old");
        then.status(401).json_body(json!({"detail": "Token expired"}));
    });
    let refresh = server.mock(|when, then| {
        when.method(POST)
            .path("/api/v1/auth/refresh")
            .json_body(json!({"refreshToken": "r1"}));
        then.status(200)
            .json_body(wrapped(json!({"accessToken": "new"})));
    });
    let accepted = server.mock(|when, then| {
        when.method(GET)
            .path("/api/v1/todos/1")
            .header("authorization", "Bearer new");
        then.status(200).json_body(wrapped(todo("1", "Refreshed", false)));
    });

    let tokens = signed_in("old", Some("r1"));
    let transport = HttpTransport::new(&config(&server), tokens.clone()).unwrap();
    let fetched = service(transport).get("1").await.unwrap();

    rejected.assert_hits(1);
    refresh.assert_hits(1);
    accepted.assert_hits(1);
    assert_eq!(fetched.title, "Refreshed");
    assert_eq!(
        tokens.load().await.unwrap(),
        Tokens::new("new", Some("r1".to_string()))
    );
}

#[tokio::test]
async fn test_failed_refresh_clears_tokens() {
    init_test_tracing();
    let server = MockServer::start();
    let rejected = server.mock(|when, then| {
        when.method(GET).path("/api/v1/todos/1");
        then.status(401).json_body(json!({"detail": "Token expired"}));
    });
    let refresh = server.mock(|when, then| {
        when.method(POST).path("/api/v1/auth/refresh");
        then.status(401)
            .json_body(json!({"detail": "Refresh token revoked"}));
    });

    let tokens = signed_in("old", Some("r1"));
    let transport = HttpTransport::new(&config(&server), tokens.clone()).unwrap();
    let err = service(transport).get("1").await.unwrap_err();

    rejected.assert_hits(1);
    refresh.assert_hits(1);
    assert!(matches!(err, ResyncError::Unauthorized { .. }));
    assert_eq!(err.to_string(), "Token expired");
    assert_eq!(tokens.load().await.unwrap(), Tokens::default());
}

#[tokio::test]
async fn test_unauthorized_without_refresh_token() {
    let server = MockServer::start();
    let rejected = server.mock(|when, then| {
        when.method(GET).path("/api/v1/todos/stats");
        then.status(401).json_body(json!({"message": "Not signed in"}));
    });
    let refresh = server.mock(|when, then| {
        when.method(POST).path("/api/v1/auth/refresh");
        then.status(200).json_body(wrapped(json!({"accessToken": "x"})));
    });

    let transport = HttpTransport::new(&config(&server), signed_in("old", None)).unwrap();
    let err = service(transport).stats().await.unwrap_err();

    rejected.assert_hits(1);
    refresh.assert_hits(0);
    assert_eq!(err.status(), Some(401));
}

#[tokio::test]
async fn test_django_mode_sends_csrf_header() {
    init_test_tracing();
    let server = MockServer::start();
    let mock = server.mock(|when, then| {
        when.method(POST)
            .path("/api/v1/todos")
            .header("x-csrftoken", "csrf-123")
            .json_body_includes(r#"{"title":"A"}"#);
        then.status(201).json_body(todo("42", "A", false));
    });

    let config = ClientConfig {
        base_url: "/api/v1".to_string(),
        mode: BackendMode::DjangoSpa,
        ..Default::default()
    };
    let transport = HttpTransport::with_origin(
        &config,
        &server.base_url(),
        Arc::new(MemoryTokenStore::new()),
    )
    .unwrap()
    .with_csrf_token("csrf-123");

    let created = service(transport).create(&CreateTodo::new("A")).await.unwrap();

    mock.assert();
    assert_eq!(created.id, "42");
}

#[tokio::test]
async fn test_standalone_mode_omits_csrf_header() {
    let server = MockServer::start();
    let mock = server.mock(|when, then| {
        when.method(GET)
            .path("/api/v1/todos/stats")
            .header_missing("x-csrftoken");
        then.status(200).json_body(wrapped(json!({
            "total": 0, "completed": 0, "pending": 0, "overdue": 0
        })));
    });

    let transport = HttpTransport::new(&config(&server), Arc::new(MemoryTokenStore::new()))
        .unwrap()
        .with_csrf_token("csrf-123");
    service(transport).stats().await.unwrap();

    mock.assert();
}

#[tokio::test]
async fn test_django_page_is_normalized() {
    let server = MockServer::start();
    let mock = server.mock(|when, then| {
        when.method(GET)
            .path("/api/v1/todos")
            .query_param("page", "1")
            .query_param("page_size", "10");
        then.status(200).json_body(json!({
            "items": [todo("1", "Only", false)],
            "count": 1,
            "page": 1,
            "page_size": 10,
            "pages": 1
        }));
    });

    let transport = HttpTransport::new(&config(&server), Arc::new(MemoryTokenStore::new())).unwrap();
    let page = service(transport)
        .list(&QueryParams::new().page(1).page_size(10))
        .await
        .unwrap();

    mock.assert();
    assert_eq!(page.data.len(), 1);
    assert_eq!(page.data[0].title, "Only");
    assert_eq!(page.pagination.limit, 10);
    assert_eq!(page.pagination.total, 1);
    assert_eq!(page.pagination.total_pages, 1);
    assert_eq!(page.pagination.next_page(), None);
}

#[tokio::test]
async fn test_validation_errors_are_joined() {
    let server = MockServer::start();
    server.mock(|when, then| {
        when.method(POST).path("/api/v1/todos");
        then.status(422).json_body(json!({
            "detail": [{"msg": "title is required"}, {"msg": "priority is invalid"}]
        }));
    });

    let transport = HttpTransport::new(&config(&server), Arc::new(MemoryTokenStore::new())).unwrap();
    let err = service(transport)
        .create(&CreateTodo::new(""))
        .await
        .unwrap_err();

    assert_eq!(err.status(), Some(422));
    assert_eq!(err.to_string(), "title is required, priority is invalid");
    assert!(!err.is_retryable());
}

#[tokio::test]
async fn test_wrapped_failure_with_ok_status() {
    let server = MockServer::start();
    server.mock(|when, then| {
        when.method(GET).path("/api/v1/todos/stats");
        then.status(200)
            .json_body(json!({"success": false, "data": null, "message": "Stats unavailable"}));
    });

    let transport = HttpTransport::new(&config(&server), Arc::new(MemoryTokenStore::new())).unwrap();
    let err = service(transport).stats().await.unwrap_err();

    assert!(matches!(err, ResyncError::Api { .. }));
    assert_eq!(err.to_string(), "Stats unavailable");
}

#[test]
fn test_relative_base_url_needs_origin() {
    let config = ClientConfig {
        base_url: "/api/v1".to_string(),
        mode: BackendMode::DjangoSpa,
        ..Default::default()
    };
    let result = HttpTransport::new(&config, Arc::new(MemoryTokenStore::new()));
    assert!(matches!(result, Err(ResyncError::Config { .. })));
}
