//! Shared request plumbing for resource services.

use crate::error::Result;
use crate::models::{MessageResponse, Paginated, QueryParams};
use crate::network::{Request, Transport};
use crate::normalize;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use std::marker::PhantomData;
use std::sync::Arc;

/// A base path on a transport. Every response is normalized before decoding.
#[derive(Clone)]
pub struct Endpoint {
    transport: Arc<dyn Transport>,
    base_path: String,
}

impl Endpoint {
    pub fn new(transport: Arc<dyn Transport>, base_path: impl Into<String>) -> Self {
        Self {
            transport,
            base_path: base_path.into(),
        }
    }

    pub fn base_path(&self) -> &str {
        &self.base_path
    }

    fn path(&self, sub_path: &str) -> String {
        format!("{}{}", self.base_path, sub_path)
    }

    /// Send a request and return the canonical (normalized) payload.
    pub async fn send_raw(&self, request: Request) -> Result<Value> {
        let raw = self.transport.send(request).await?;
        normalize::normalize(&raw)
    }

    async fn send<R: DeserializeOwned>(&self, request: Request) -> Result<R> {
        let raw = self.transport.send(request).await?;
        normalize::normalize_into(&raw)
    }

    pub async fn get<R: DeserializeOwned>(
        &self,
        sub_path: &str,
        query: Vec<(String, String)>,
    ) -> Result<R> {
        self.send(Request::get(self.path(sub_path)).with_query(query))
            .await
    }

    /// GET a page, failing if the response is not paginated.
    pub async fn get_page<R: DeserializeOwned>(
        &self,
        sub_path: &str,
        query: Vec<(String, String)>,
    ) -> Result<Paginated<R>> {
        let raw = self
            .transport
            .send(Request::get(self.path(sub_path)).with_query(query))
            .await?;
        Ok(serde_json::from_value(normalize::normalize_paginated(&raw)?)?)
    }

    pub async fn post<R: DeserializeOwned>(&self, sub_path: &str, body: Option<Value>) -> Result<R> {
        self.send(with_body(Request::post(self.path(sub_path)), body))
            .await
    }

    pub async fn patch<R: DeserializeOwned>(&self, sub_path: &str, body: Option<Value>) -> Result<R> {
        self.send(with_body(Request::patch(self.path(sub_path)), body))
            .await
    }

    pub async fn put<R: DeserializeOwned>(&self, sub_path: &str, body: Option<Value>) -> Result<R> {
        self.send(with_body(Request::put(self.path(sub_path)), body))
            .await
    }

    pub async fn delete<R: DeserializeOwned>(&self, sub_path: &str) -> Result<R> {
        self.send(Request::delete(self.path(sub_path))).await
    }
}

fn with_body(request: Request, body: Option<Value>) -> Request {
    match body {
        Some(body) => request.with_body(body),
        None => request,
    }
}

/// CRUD operations over one REST collection.
///
/// `T` is the entity, `C` the create payload and `U` the partial-update payload.
pub struct ResourceService<T, C = T, U = C> {
    endpoint: Endpoint,
    _marker: PhantomData<fn() -> (T, C, U)>,
}

impl<T, C, U> Clone for ResourceService<T, C, U> {
    fn clone(&self) -> Self {
        Self {
            endpoint: self.endpoint.clone(),
            _marker: PhantomData,
        }
    }
}

impl<T, C, U> ResourceService<T, C, U>
where
    T: DeserializeOwned,
    C: Serialize,
    U: Serialize,
{
    pub fn new(transport: Arc<dyn Transport>, base_path: impl Into<String>) -> Self {
        Self {
            endpoint: Endpoint::new(transport, base_path),
            _marker: PhantomData,
        }
    }

    pub fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }

    /// `GET {base}` with pagination and filters.
    pub async fn list(&self, params: &QueryParams) -> Result<Paginated<T>> {
        self.endpoint.get_page("", params.to_query_pairs()).await
    }

    /// `GET {base}/{id}`
    pub async fn get(&self, id: &str) -> Result<T> {
        self.endpoint.get(&format!("/{}", id), Vec::new()).await
    }

    /// `POST {base}`
    pub async fn create(&self, dto: &C) -> Result<T> {
        self.endpoint
            .post("", Some(serde_json::to_value(dto)?))
            .await
    }

    /// `PATCH {base}/{id}`
    pub async fn update(&self, id: &str, dto: &U) -> Result<T> {
        self.endpoint
            .patch(&format!("/{}", id), Some(serde_json::to_value(dto)?))
            .await
    }

    /// `PUT {base}/{id}`
    pub async fn replace(&self, id: &str, dto: &C) -> Result<T> {
        self.endpoint
            .put(&format!("/{}", id), Some(serde_json::to_value(dto)?))
            .await
    }

    /// `DELETE {base}/{id}`
    pub async fn remove(&self, id: &str) -> Result<MessageResponse> {
        self.endpoint.delete(&format!("/{}", id)).await
    }
}
