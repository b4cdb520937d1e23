//! Todo mutations.
//!
//! | mutation        | optimistic target | on success            | invalidates     |
//! |-----------------|-------------------|-----------------------|-----------------|
//! | create          | list              | placeholder swapped   | lists, stats    |
//! | update          | list              | detail written        | lists, stats    |
//! | delete          | list              | detail removed        | lists, stats    |
//! | toggle          | detail            | detail written        | lists, stats    |
//! | bulk update     | none              | each detail written   | lists, stats    |
//! | bulk delete     | none              | each detail removed   | lists, stats    |
//! | archive         | none              | none                  | every todo key  |

use super::coordinator::{Invalidation, Mutation, MutationContext};
use super::optimistic;
use crate::error::{ResyncError, Result};
use crate::keys::CacheKey;
use crate::models::{BulkDeleteResponse, CreateTodo, QueryParams, UpdateTodo};
use crate::notify::Notification;
use crate::services::{TodoService, TODO_KEYS};
use crate::store::CacheStore;
use async_trait::async_trait;
use serde_json::{json, Value};
use tracing::debug;

fn list_and_stats() -> Vec<Invalidation> {
    vec![TODO_KEYS.lists().into(), TODO_KEYS.stats().into()]
}

fn title_of(value: &Value) -> &str {
    value.get("title").and_then(Value::as_str).unwrap_or_default()
}

/// Factory for todo mutations sharing one service and list key.
#[derive(Clone)]
pub struct TodoMutations {
    service: TodoService,
    list_key: CacheKey,
}

impl TodoMutations {
    /// Optimistic list writes target the unfiltered list.
    pub fn new(service: TodoService) -> Self {
        Self {
            service,
            list_key: TODO_KEYS.list(&QueryParams::new()),
        }
    }

    /// Target a specific list key for optimistic writes.
    pub fn with_list_key(mut self, list_key: CacheKey) -> Self {
        self.list_key = list_key;
        self
    }

    pub fn create(&self) -> CreateTodoMutation {
        CreateTodoMutation {
            service: self.service.clone(),
            list_key: self.list_key.clone(),
        }
    }

    pub fn update(&self) -> UpdateTodoMutation {
        UpdateTodoMutation {
            service: self.service.clone(),
            list_key: self.list_key.clone(),
        }
    }

    pub fn delete(&self) -> DeleteTodoMutation {
        DeleteTodoMutation {
            service: self.service.clone(),
            list_key: self.list_key.clone(),
        }
    }

    pub fn toggle(&self) -> ToggleTodoMutation {
        ToggleTodoMutation {
            service: self.service.clone(),
        }
    }

    pub fn bulk_update(&self) -> BulkUpdateTodosMutation {
        BulkUpdateTodosMutation {
            service: self.service.clone(),
        }
    }

    pub fn bulk_delete(&self) -> BulkDeleteTodosMutation {
        BulkDeleteTodosMutation {
            service: self.service.clone(),
        }
    }

    pub fn archive_completed(&self) -> ArchiveCompletedMutation {
        ArchiveCompletedMutation {
            service: self.service.clone(),
        }
    }
}

pub struct CreateTodoMutation {
    service: TodoService,
    list_key: CacheKey,
}

#[async_trait]
impl Mutation for CreateTodoMutation {
    type Input = CreateTodo;

    fn name(&self) -> &'static str {
        "create todo"
    }

    fn target(&self, _input: &CreateTodo) -> Option<CacheKey> {
        Some(self.list_key.clone())
    }

    fn optimistic(&self, current: Option<&Value>, input: &CreateTodo) -> Option<Value> {
        let item = serde_json::to_value(input).ok()?;
        optimistic::add_to_collection(current, &item)
    }

    async fn execute(&self, input: &CreateTodo) -> Result<Value> {
        Ok(serde_json::to_value(self.service.create(input).await?)?)
    }

    fn commit(&self, current: Option<&Value>, context: &MutationContext, server: &Value) -> Option<Value> {
        let placeholder = optimistic::placeholder_id(context.optimistic_value.as_ref());
        optimistic::commit_added(current, placeholder.as_deref(), server)
    }

    fn invalidations(&self, _input: &CreateTodo) -> Vec<Invalidation> {
        list_and_stats()
    }

    fn success_notification(&self, _input: &CreateTodo, server: &Value) -> Option<Notification> {
        Some(Notification::success(
            "Todo created",
            format!("\"{}\" has been created successfully.", title_of(server)),
        ))
    }

    fn error_notification(&self, _input: &CreateTodo, error: &ResyncError) -> Option<Notification> {
        Some(Notification::error("Failed to create todo", error.to_string()))
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct UpdateTodoInput {
    pub id: String,
    pub updates: UpdateTodo,
}

pub struct UpdateTodoMutation {
    service: TodoService,
    list_key: CacheKey,
}

#[async_trait]
impl Mutation for UpdateTodoMutation {
    type Input = UpdateTodoInput;

    fn name(&self) -> &'static str {
        "update todo"
    }

    fn target(&self, _input: &UpdateTodoInput) -> Option<CacheKey> {
        Some(self.list_key.clone())
    }

    fn optimistic(&self, current: Option<&Value>, input: &UpdateTodoInput) -> Option<Value> {
        let patch = serde_json::to_value(&input.updates).ok()?;
        optimistic::update_in_collection(current, &input.id, &patch)
    }

    async fn execute(&self, input: &UpdateTodoInput) -> Result<Value> {
        Ok(serde_json::to_value(
            self.service.update(&input.id, &input.updates).await?,
        )?)
    }

    fn commit(&self, current: Option<&Value>, _context: &MutationContext, server: &Value) -> Option<Value> {
        let id = server.get("id").and_then(Value::as_str)?;
        optimistic::update_in_collection(current, id, server)
    }

    fn on_success(&self, store: &CacheStore, _input: &UpdateTodoInput, server: &Value) {
        if let Some(id) = server.get("id").and_then(Value::as_str) {
            store.set(&TODO_KEYS.detail(id), server.clone());
        }
    }

    fn invalidations(&self, _input: &UpdateTodoInput) -> Vec<Invalidation> {
        list_and_stats()
    }

    fn success_notification(&self, _input: &UpdateTodoInput, server: &Value) -> Option<Notification> {
        Some(Notification::success(
            "Todo updated",
            format!("\"{}\" has been updated successfully.", title_of(server)),
        ))
    }

    fn error_notification(&self, _input: &UpdateTodoInput, error: &ResyncError) -> Option<Notification> {
        Some(Notification::error("Failed to update todo", error.to_string()))
    }
}

pub struct DeleteTodoMutation {
    service: TodoService,
    list_key: CacheKey,
}

#[async_trait]
impl Mutation for DeleteTodoMutation {
    type Input = String;

    fn name(&self) -> &'static str {
        "delete todo"
    }

    fn target(&self, _id: &String) -> Option<CacheKey> {
        Some(self.list_key.clone())
    }

    fn optimistic(&self, current: Option<&Value>, id: &String) -> Option<Value> {
        optimistic::remove_from_collection(current, id)
    }

    async fn execute(&self, id: &String) -> Result<Value> {
        Ok(serde_json::to_value(self.service.remove(id).await?)?)
    }

    fn on_success(&self, store: &CacheStore, id: &String, _server: &Value) {
        store.remove(&TODO_KEYS.detail(id));
    }

    fn invalidations(&self, _id: &String) -> Vec<Invalidation> {
        list_and_stats()
    }

    fn success_notification(&self, _id: &String, _server: &Value) -> Option<Notification> {
        Some(Notification::success(
            "Todo deleted",
            "Todo has been deleted successfully.",
        ))
    }

    fn error_notification(&self, _id: &String, error: &ResyncError) -> Option<Notification> {
        Some(Notification::error("Failed to delete todo", error.to_string()))
    }
}

pub struct ToggleTodoMutation {
    service: TodoService,
}

#[async_trait]
impl Mutation for ToggleTodoMutation {
    type Input = String;

    fn name(&self) -> &'static str {
        "toggle todo"
    }

    fn target(&self, id: &String) -> Option<CacheKey> {
        Some(TODO_KEYS.detail(id))
    }

    fn optimistic(&self, current: Option<&Value>, _id: &String) -> Option<Value> {
        let completed = current?.get("completed").and_then(Value::as_bool)?;
        optimistic::replace_value(current, &json!({ "completed": !completed }))
    }

    async fn execute(&self, id: &String) -> Result<Value> {
        Ok(serde_json::to_value(self.service.toggle(id).await?)?)
    }

    fn commit(&self, _current: Option<&Value>, _context: &MutationContext, server: &Value) -> Option<Value> {
        Some(server.clone())
    }

    fn invalidations(&self, _id: &String) -> Vec<Invalidation> {
        list_and_stats()
    }

    fn success_notification(&self, _id: &String, server: &Value) -> Option<Notification> {
        Some(Notification::success(
            "Todo updated",
            format!("\"{}\" has been updated successfully.", title_of(server)),
        ))
    }

    fn error_notification(&self, _id: &String, error: &ResyncError) -> Option<Notification> {
        Some(Notification::error("Failed to update todo", error.to_string()))
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct BulkUpdateInput {
    pub ids: Vec<String>,
    pub updates: UpdateTodo,
}

pub struct BulkUpdateTodosMutation {
    service: TodoService,
}

#[async_trait]
impl Mutation for BulkUpdateTodosMutation {
    type Input = BulkUpdateInput;

    fn name(&self) -> &'static str {
        "bulk update todos"
    }

    async fn execute(&self, input: &BulkUpdateInput) -> Result<Value> {
        Ok(serde_json::to_value(
            self.service.bulk_update(&input.ids, &input.updates).await?,
        )?)
    }

    fn on_success(&self, store: &CacheStore, _input: &BulkUpdateInput, server: &Value) {
        let todos = server.as_array().map(Vec::as_slice).unwrap_or_default();
        for todo in todos {
            if let Some(id) = todo.get("id").and_then(Value::as_str) {
                store.set(&TODO_KEYS.detail(id), todo.clone());
            }
        }
        debug!("Wrote {} todo details after bulk update", todos.len());
    }

    fn invalidations(&self, _input: &BulkUpdateInput) -> Vec<Invalidation> {
        list_and_stats()
    }

    fn success_notification(&self, input: &BulkUpdateInput, _server: &Value) -> Option<Notification> {
        Some(Notification::success(
            "Todos updated",
            format!("{} todos have been updated.", input.ids.len()),
        ))
    }

    fn error_notification(&self, _input: &BulkUpdateInput, error: &ResyncError) -> Option<Notification> {
        Some(Notification::error("Bulk update failed", error.to_string()))
    }
}

pub struct BulkDeleteTodosMutation {
    service: TodoService,
}

#[async_trait]
impl Mutation for BulkDeleteTodosMutation {
    type Input = Vec<String>;

    fn name(&self) -> &'static str {
        "bulk delete todos"
    }

    async fn execute(&self, ids: &Vec<String>) -> Result<Value> {
        Ok(serde_json::to_value(self.service.bulk_delete(ids).await?)?)
    }

    fn on_success(&self, store: &CacheStore, ids: &Vec<String>, _server: &Value) {
        for id in ids {
            store.remove(&TODO_KEYS.detail(id));
        }
    }

    fn invalidations(&self, _ids: &Vec<String>) -> Vec<Invalidation> {
        list_and_stats()
    }

    fn success_notification(&self, _ids: &Vec<String>, server: &Value) -> Option<Notification> {
        let deleted = serde_json::from_value::<BulkDeleteResponse>(server.clone())
            .map(|r| r.deleted_count)
            .unwrap_or_default();
        Some(Notification::success(
            "Todos deleted",
            format!("{} todos have been deleted.", deleted),
        ))
    }

    fn error_notification(&self, _ids: &Vec<String>, error: &ResyncError) -> Option<Notification> {
        Some(Notification::error("Bulk delete failed", error.to_string()))
    }
}

pub struct ArchiveCompletedMutation {
    service: TodoService,
}

#[async_trait]
impl Mutation for ArchiveCompletedMutation {
    type Input = ();

    fn name(&self) -> &'static str {
        "archive completed todos"
    }

    async fn execute(&self, _input: &()) -> Result<Value> {
        Ok(serde_json::to_value(self.service.archive_completed().await?)?)
    }

    fn invalidations(&self, _input: &()) -> Vec<Invalidation> {
        vec![TODO_KEYS.everything().into()]
    }

    fn success_notification(&self, _input: &(), server: &Value) -> Option<Notification> {
        let archived = server
            .get("archivedCount")
            .and_then(Value::as_u64)
            .unwrap_or_default();
        Some(Notification::success(
            "Todos archived",
            format!("{} completed todos have been archived.", archived),
        ))
    }

    fn error_notification(&self, _input: &(), error: &ResyncError) -> Option<Notification> {
        Some(Notification::error("Archive failed", error.to_string()))
    }
}
