//! Todo resource service and its cache keys.

use super::base::ResourceService;
use crate::error::Result;
use crate::keys::{self, CacheKey, KeyFamily, KeyPrefix};
use crate::models::{
    ArchiveResponse, BulkDeleteResponse, CreateTodo, MessageResponse, Paginated, QueryParams,
    Todo, TodoPriority, TodoStats, UpdateTodo,
};
use crate::network::Transport;
use serde_json::{json, Value};
use std::sync::Arc;

/// Cache keys for the `todos` collection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TodoKeys {
    family: KeyFamily,
}

/// Key factory for todos.
pub const TODO_KEYS: TodoKeys = TodoKeys {
    family: KeyFamily::new("todos"),
};

impl TodoKeys {
    pub fn collection(&self) -> &'static str {
        self.family.collection()
    }

    pub fn all(&self) -> CacheKey {
        self.family.all()
    }

    /// Every todo key, lists, details and custom keys alike.
    pub fn everything(&self) -> KeyPrefix {
        self.family.everything()
    }

    pub fn lists(&self) -> KeyPrefix {
        self.family.lists()
    }

    pub fn list(&self, params: &QueryParams) -> CacheKey {
        let map = params.to_map();
        self.family.list((!map.is_empty()).then_some(&map))
    }

    /// Pages of an infinite list. The page number is not part of the key.
    pub fn infinite(&self, params: &QueryParams) -> CacheKey {
        let mut map = params.to_map();
        map.remove("page");
        keys::scoped_list(self.collection(), "infinite", (!map.is_empty()).then_some(&map))
    }

    pub fn details(&self) -> KeyPrefix {
        self.family.details()
    }

    pub fn detail(&self, id: &str) -> CacheKey {
        self.family.detail(id)
    }

    pub fn stats(&self) -> CacheKey {
        self.family.custom("stats", None)
    }

    pub fn priority(&self, priority: TodoPriority) -> CacheKey {
        self.family.custom("priority", Some(priority.as_str()))
    }

    pub fn status(&self, completed: bool) -> CacheKey {
        self.family
            .custom("status", Some(if completed { "true" } else { "false" }))
    }

    pub fn overdue(&self) -> CacheKey {
        self.family.custom("overdue", None)
    }

    pub fn due_today(&self) -> CacheKey {
        self.family.custom("due-today", None)
    }

    pub fn search(&self, query: &str) -> CacheKey {
        self.family.custom("search", Some(query))
    }
}

/// Typed access to `/todos`.
#[derive(Clone)]
pub struct TodoService {
    resource: ResourceService<Todo, CreateTodo, UpdateTodo>,
}

impl TodoService {
    pub const BASE_PATH: &'static str = "/todos";

    pub fn new(transport: Arc<dyn Transport>) -> Self {
        Self {
            resource: ResourceService::new(transport, Self::BASE_PATH),
        }
    }

    pub async fn list(&self, params: &QueryParams) -> Result<Paginated<Todo>> {
        self.resource.list(params).await
    }

    pub async fn get(&self, id: &str) -> Result<Todo> {
        self.resource.get(id).await
    }

    pub async fn create(&self, todo: &CreateTodo) -> Result<Todo> {
        self.resource.create(todo).await
    }

    pub async fn update(&self, id: &str, updates: &UpdateTodo) -> Result<Todo> {
        self.resource.update(id, updates).await
    }

    pub async fn replace(&self, id: &str, todo: &CreateTodo) -> Result<Todo> {
        self.resource.replace(id, todo).await
    }

    pub async fn remove(&self, id: &str) -> Result<MessageResponse> {
        self.resource.remove(id).await
    }

    /// Flip completion.
    pub async fn toggle(&self, id: &str) -> Result<Todo> {
        self.resource
            .endpoint()
            .patch(&format!("/{}/toggle", id), None)
            .await
    }

    pub async fn bulk_update(&self, ids: &[String], updates: &UpdateTodo) -> Result<Vec<Todo>> {
        self.resource
            .endpoint()
            .patch("/bulk", Some(json!({ "ids": ids, "updates": updates })))
            .await
    }

    pub async fn bulk_delete(&self, ids: &[String]) -> Result<BulkDeleteResponse> {
        self.resource
            .endpoint()
            .post("/bulk-delete", Some(json!({ "ids": ids })))
            .await
    }

    pub async fn stats(&self) -> Result<TodoStats> {
        self.resource.endpoint().get("/stats", Vec::new()).await
    }

    pub async fn overdue(&self) -> Result<Vec<Todo>> {
        self.resource.endpoint().get("/overdue", Vec::new()).await
    }

    pub async fn due_today(&self) -> Result<Vec<Todo>> {
        self.resource.endpoint().get("/due-today", Vec::new()).await
    }

    pub async fn archive_completed(&self) -> Result<ArchiveResponse> {
        self.resource
            .endpoint()
            .post("/archive-completed", None)
            .await
    }

    pub async fn by_priority(&self, priority: TodoPriority, params: &QueryParams) -> Result<Vec<Todo>> {
        let params = params.clone().filter("priority", priority.as_str());
        Ok(self.list(&params).await?.data)
    }

    pub async fn by_status(&self, completed: bool, params: &QueryParams) -> Result<Vec<Todo>> {
        let params = params.clone().filter("completed", Value::Bool(completed));
        Ok(self.list(&params).await?.data)
    }

    pub async fn search(&self, query: &str, params: &QueryParams) -> Result<Vec<Todo>> {
        let params = params.clone().search(query);
        Ok(self.list(&params).await?.data)
    }
}
