//! End-to-end cache behavior through the ResyncClient facade.
//!
//! These tests drive reads and writes against a scripted transport and check
//! what subscribers observe in the shared store.

mod common;

use common::{empty_page, harness, script_stats, todo, wrapped};
use resync_core::network::Method;
use resync_core::services::TODO_KEYS;
use resync_core::testing::MockTransport;
use resync_core::{CreateTodo, EntryStatus, NotificationKind, QueryParams, ResyncError};
use serde_json::json;
use std::time::Duration;

#[tokio::test]
async fn test_create_shows_server_item_and_marks_stats_stale() {
    let mut h = harness(MockTransport::new());
    h.transport.respond(Method::Get, "/todos", empty_page());
    script_stats(&h.transport, 0);
    h.transport
        .respond(Method::Post, "/todos", wrapped(todo("42", "A", false)));

    let list = h.client.use_todos(QueryParams::new()).await;
    let stats = h.client.use_todo_stats().await;
    assert!(!stats.state().is_stale);

    let create = h.client.use_mutate_resource(h.client.todo_mutations().create());
    create.run(CreateTodo::new("A")).await.unwrap();

    let data = list.state().data.unwrap();
    let items = data["data"].as_array().unwrap();
    assert_eq!(items.len(), 1);
    assert_eq!(items[0]["id"], "42");
    assert_eq!(items[0]["title"], "A");
    assert!(stats.state().is_stale);

    let note = h.notifications.try_recv().unwrap();
    assert_eq!(note.title, "Todo created");
    assert_eq!(note.message, "\"A\" has been created successfully.");
}

#[tokio::test]
async fn test_create_failure_restores_empty_list() {
    let h = harness(MockTransport::new());
    h.transport.respond(Method::Get, "/todos", empty_page());
    h.transport
        .fail(Method::Post, "/todos", 422, json!({"detail": [{"msg": "title required"}]}));

    let list = h.client.use_todos(QueryParams::new()).await;
    let before = list.state().data;

    let create = h.client.use_mutate_resource(h.client.todo_mutations().create());
    let err = create.run(CreateTodo::new("")).await.unwrap_err();

    assert_eq!(err.status(), Some(422));
    assert_eq!(list.state().data, before);
    assert_eq!(h.transport.calls(Method::Post, "/todos"), 1);
}

#[tokio::test]
async fn test_failed_create_leaves_no_list_behind() {
    let h = harness(MockTransport::new());
    h.transport
        .fail(Method::Post, "/todos", 422, json!({"detail": [{"msg": "title required"}]}));
    let list_key = TODO_KEYS.list(&QueryParams::new());
    assert!(h.client.store().get(&list_key).is_none());

    let create = h.client.use_mutate_resource(h.client.todo_mutations().create());
    assert!(create.run(CreateTodo::new("")).await.is_err());

    assert!(h.client.store().get(&list_key).is_none());
}

#[tokio::test(start_paused = true)]
async fn test_overlapping_creates_keep_both_items() {
    let h = harness(MockTransport::new().with_latency(Duration::from_millis(50)));
    h.transport
        .respond(Method::Post, "/todos", wrapped(todo("1", "A", false)))
        .respond(Method::Post, "/todos", wrapped(todo("2", "B", false)));
    let list_key = TODO_KEYS.list(&QueryParams::new());
    h.client.store().set(&list_key, json!([]));

    let first = h.client.use_mutate_resource(h.client.todo_mutations().create());
    let second = h.client.use_mutate_resource(h.client.todo_mutations().create());
    let (a, b) = tokio::join!(first.run(CreateTodo::new("A")), second.run(CreateTodo::new("B")));
    a.unwrap();
    b.unwrap();

    let data = h.client.store().get_data(&list_key).unwrap();
    let mut ids: Vec<&str> = data
        .as_array()
        .unwrap()
        .iter()
        .map(|item| item["id"].as_str().unwrap())
        .collect();
    ids.sort_unstable();
    assert_eq!(ids, ["1", "2"]);
    assert_eq!(h.transport.calls(Method::Post, "/todos"), 2);
}

#[tokio::test(start_paused = true)]
async fn test_failed_toggle_keeps_cached_detail() {
    let mut h = harness(MockTransport::new());
    let key = TODO_KEYS.detail("1");
    h.client.store().set(&key, todo("1", "T", false));
    h.transport
        .fail(Method::Patch, "/todos/1/toggle", 500, json!({"message": "boom"}));

    let toggle = h.client.use_mutate_resource(h.client.todo_mutations().toggle());
    assert!(toggle.run("1".to_string()).await.is_err());

    let detail = h.client.store().get_data(&key).unwrap();
    assert_eq!(detail["completed"], false);
    assert_eq!(detail, todo("1", "T", false));

    let note = h.notifications.try_recv().unwrap();
    assert_eq!(note.kind, NotificationKind::Error);
    assert_eq!(note.title, "Failed to update todo");
    assert_eq!(note.message, "boom");
}

#[tokio::test(start_paused = true)]
async fn test_toggle_is_visible_before_server_answers() {
    let h = harness(MockTransport::new().with_latency(Duration::from_millis(100)));
    let key = TODO_KEYS.detail("1");
    h.client.store().set(&key, todo("1", "T", false));
    h.transport
        .respond(Method::Patch, "/todos/1/toggle", wrapped(todo("1", "T", true)));

    let toggle = h.client.use_mutate_resource(h.client.todo_mutations().toggle());
    let mut states = toggle.watch();
    let run = toggle.run("1".to_string());
    tokio::pin!(run);

    tokio::select! {
        _ = &mut run => panic!("toggle settled before latency elapsed"),
        _ = states.wait_for(|state| state.is_pending()) => {}
    }
    assert_eq!(h.client.store().get_data(&key).unwrap()["completed"], true);

    run.await.unwrap();
    assert!(!toggle.is_pending());
}

#[tokio::test(start_paused = true)]
async fn test_concurrent_reads_share_one_request() {
    let h = harness(MockTransport::new().with_latency(Duration::from_millis(50)));
    h.transport
        .respond(Method::Get, "/todos/7", wrapped(todo("7", "Shared", false)));

    let (a, b) = tokio::join!(h.client.use_todo("7"), h.client.use_todo("7"));

    assert_eq!(h.transport.calls(Method::Get, "/todos/7"), 1);
    assert_eq!(a.state().data, b.state().data);
    assert_eq!(a.state().data.unwrap()["title"], "Shared");
    assert_eq!(
        h.client.store().get(&TODO_KEYS.detail("7")).unwrap().subscriber_count,
        2
    );
}

#[tokio::test(start_paused = true)]
async fn test_throttled_read_retries_then_succeeds() {
    let h = harness(MockTransport::new());
    h.transport
        .fail(Method::Get, "/todos/stats", 429, json!({"message": "slow down"}))
        .fail(Method::Get, "/todos/stats", 429, json!({"message": "slow down"}));
    script_stats(&h.transport, 3);

    let stats = h.client.use_todo_stats().await;

    assert_eq!(h.transport.calls(Method::Get, "/todos/stats"), 3);
    let state = stats.state();
    assert_eq!(state.status, EntryStatus::Success);
    assert_eq!(state.data.unwrap()["total"], 3);
}

#[tokio::test(start_paused = true)]
async fn test_missing_resource_is_not_retried() {
    let h = harness(MockTransport::new());
    h.transport
        .fail(Method::Get, "/todos/404", 404, json!({"detail": "Not found"}));

    let detail = h.client.use_todo("404").await;

    assert_eq!(h.transport.calls(Method::Get, "/todos/404"), 1);
    let state = detail.state();
    assert_eq!(state.status, EntryStatus::Error);
    let error = state.error.unwrap();
    assert_eq!(error.message, "Not found");
    assert_eq!(error.status, Some(404));
    assert!(!error.retryable);
}

#[tokio::test]
async fn test_invalidated_list_refetches_on_next_load_only() {
    let h = harness(MockTransport::new());
    h.transport.respond(Method::Get, "/todos", empty_page());

    let list = h.client.use_todos(QueryParams::new()).await;
    assert_eq!(h.transport.calls(Method::Get, "/todos"), 1);

    h.client.store().invalidate_prefix(&TODO_KEYS.lists());
    assert_eq!(h.transport.calls(Method::Get, "/todos"), 1);

    let state = list.load().await;
    assert!(!state.is_stale);
    assert_eq!(h.transport.calls(Method::Get, "/todos"), 2);
}

#[tokio::test]
async fn test_one_shot_read_of_previously_watched_key_is_cached() {
    let h = harness(MockTransport::new());
    h.transport
        .respond(Method::Get, "/todos/7", wrapped(todo("7", "Old", false)))
        .respond(Method::Get, "/todos/7", wrapped(todo("7", "New", false)));
    let key = TODO_KEYS.detail("7");

    h.client.use_todo("7").await.unsubscribe();
    h.client.store().invalidate(&key, true);

    let service = h.client.todo_service().clone();
    let read = move || {
        let service = service.clone();
        async move { Ok::<_, ResyncError>(serde_json::to_value(service.get("7").await?)?) }
    };
    let fetched = h.client.queries().fetch_query(&key, read.clone()).await.unwrap();
    assert_eq!(fetched["title"], "New");

    let entry = h.client.store().get(&key).unwrap();
    assert_eq!(entry.status, EntryStatus::Success);
    assert!(!entry.is_stale());
    assert_eq!(entry.data.unwrap()["title"], "New");

    h.client.queries().fetch_query(&key, read).await.unwrap();
    assert_eq!(h.transport.calls(Method::Get, "/todos/7"), 2);
}

#[tokio::test]
async fn test_archive_invalidates_every_todo_key() {
    let h = harness(MockTransport::new());
    h.transport.respond(
        Method::Post,
        "/todos/archive-completed",
        wrapped(json!({"message": "Archived", "archivedCount": 2})),
    );
    h.client.store().set(&TODO_KEYS.detail("1"), todo("1", "a", true));
    h.client.store().set(&TODO_KEYS.overdue(), json!([]));

    let archive = h
        .client
        .use_mutate_resource(h.client.todo_mutations().archive_completed());
    archive.run(()).await.unwrap();

    assert!(h.client.store().get(&TODO_KEYS.detail("1")).unwrap().is_stale());
    assert!(h.client.store().get(&TODO_KEYS.overdue()).unwrap().is_stale());
}
