//! HTTP transport.
//!
//! [`Transport`] is the one seam through which resource services reach the
//! network. [`HttpTransport`] is the reqwest implementation; it attaches the
//! bearer token, refreshes it once on a 401 and converts non-2xx responses into
//! status errors carrying the server's message.

use super::auth::{TokenStore, Tokens};
use crate::config::{AuthConfig, ClientConfig, NetworkConfig};
use crate::error::{ResyncError, Result};
use crate::normalize;
use async_trait::async_trait;
use reqwest::{header, Client, StatusCode};
use serde_json::{json, Value};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};
use url::Url;

/// HTTP verbs used by resource services.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Method {
    Get,
    Post,
    Patch,
    Put,
    Delete,
}

impl Method {
    pub fn as_str(&self) -> &'static str {
        match self {
            Method::Get => "GET",
            Method::Post => "POST",
            Method::Patch => "PATCH",
            Method::Put => "PUT",
            Method::Delete => "DELETE",
        }
    }

    fn to_reqwest(self) -> reqwest::Method {
        match self {
            Method::Get => reqwest::Method::GET,
            Method::Post => reqwest::Method::POST,
            Method::Patch => reqwest::Method::PATCH,
            Method::Put => reqwest::Method::PUT,
            Method::Delete => reqwest::Method::DELETE,
        }
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One API request, relative to the transport's base URL.
#[derive(Debug, Clone, PartialEq)]
pub struct Request {
    pub method: Method,
    pub path: String,
    pub query: Vec<(String, String)>,
    pub body: Option<Value>,
}

impl Request {
    pub fn new(method: Method, path: impl Into<String>) -> Self {
        Self {
            method,
            path: path.into(),
            query: Vec::new(),
            body: None,
        }
    }

    pub fn get(path: impl Into<String>) -> Self {
        Self::new(Method::Get, path)
    }

    pub fn post(path: impl Into<String>) -> Self {
        Self::new(Method::Post, path)
    }

    pub fn patch(path: impl Into<String>) -> Self {
        Self::new(Method::Patch, path)
    }

    pub fn put(path: impl Into<String>) -> Self {
        Self::new(Method::Put, path)
    }

    pub fn delete(path: impl Into<String>) -> Self {
        Self::new(Method::Delete, path)
    }

    pub fn with_query(mut self, query: Vec<(String, String)>) -> Self {
        self.query = query;
        self
    }

    pub fn with_body(mut self, body: Value) -> Self {
        self.body = Some(body);
        self
    }
}

/// Sends requests and returns the raw (un-normalized) JSON body.
///
/// Implementations turn non-2xx responses into status errors. A response with
/// no body yields `Value::Null`.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn send(&self, request: Request) -> Result<Value>;
}

#[async_trait]
impl<T: Transport + ?Sized> Transport for Arc<T> {
    async fn send(&self, request: Request) -> Result<Value> {
        (**self).send(request).await
    }
}

/// reqwest-backed transport with bearer auth and one-shot token refresh.
pub struct HttpTransport {
    client: Client,
    base_url: Url,
    timeout: Duration,
    tokens: Arc<dyn TokenStore>,
    csrf_token: Option<String>,
    django_spa: bool,
    refresh_lock: tokio::sync::Mutex<()>,
}

impl HttpTransport {
    /// Create a transport from client configuration.
    ///
    /// The base URL must be absolute. In Django SPA mode with a bare prefix,
    /// resolve it against the page origin first (see [`HttpTransport::with_origin`]).
    pub fn new(config: &ClientConfig, tokens: Arc<dyn TokenStore>) -> Result<Self> {
        let base_url = Url::parse(&config.base_url).map_err(|e| ResyncError::Config {
            message: format!("Invalid API base URL {:?}: {}", config.base_url, e),
        })?;
        Self::build(config, base_url, tokens)
    }

    /// Create a transport whose base URL is a path resolved against `origin`.
    pub fn with_origin(
        config: &ClientConfig,
        origin: &str,
        tokens: Arc<dyn TokenStore>,
    ) -> Result<Self> {
        let origin = Url::parse(origin).map_err(|e| ResyncError::Config {
            message: format!("Invalid origin {:?}: {}", origin, e),
        })?;
        let base_url = origin.join(&config.base_url).map_err(|e| ResyncError::Config {
            message: format!("Cannot resolve {:?} against {}: {}", config.base_url, origin, e),
        })?;
        Self::build(config, base_url, tokens)
    }

    fn build(config: &ClientConfig, base_url: Url, tokens: Arc<dyn TokenStore>) -> Result<Self> {
        let client = Client::builder()
            .timeout(config.timeout)
            .user_agent(NetworkConfig::USER_AGENT)
            .build()
            .map_err(|e| ResyncError::Network {
                message: format!("Failed to create HTTP client: {}", e),
            })?;

        Ok(Self {
            client,
            base_url,
            timeout: config.timeout,
            tokens,
            csrf_token: None,
            django_spa: config.is_django_spa(),
            refresh_lock: tokio::sync::Mutex::new(()),
        })
    }

    /// CSRF token to send as `X-CSRFToken`. Only used in Django SPA mode.
    pub fn with_csrf_token(mut self, token: impl Into<String>) -> Self {
        self.csrf_token = Some(token.into());
        self
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    pub fn tokens(&self) -> &Arc<dyn TokenStore> {
        &self.tokens
    }

    fn url_for(&self, path: &str) -> Result<Url> {
        let joined = format!("{}{}", self.base_url.as_str().trim_end_matches('/'), path);
        Url::parse(&joined).map_err(|e| ResyncError::Config {
            message: format!("Invalid request URL {:?}: {}", joined, e),
        })
    }

    async fn dispatch(
        &self,
        request: &Request,
        bearer: Option<&str>,
    ) -> Result<(StatusCode, Value)> {
        let url = self.url_for(&request.path)?;
        let mut builder = self
            .client
            .request(request.method.to_reqwest(), url)
            .header(header::ACCEPT, "application/json");

        if !request.query.is_empty() {
            builder = builder.query(&request.query);
        }
        if let Some(body) = &request.body {
            builder = builder.json(body);
        }
        if let Some(token) = bearer {
            builder = builder.bearer_auth(token);
        }
        if self.django_spa {
            if let Some(csrf) = &self.csrf_token {
                builder = builder.header(AuthConfig::CSRF_HEADER, csrf);
            }
        }

        let response = builder.send().await.map_err(|e| {
            if e.is_timeout() {
                ResyncError::Timeout(self.timeout)
            } else {
                ResyncError::Network {
                    message: format!("{} {} failed: {}", request.method, request.path, e),
                }
            }
        })?;

        let status = response.status();
        let text = response.text().await?;
        let body = if text.trim().is_empty() {
            Value::Null
        } else {
            match serde_json::from_str(&text) {
                Ok(value) => value,
                Err(_) if !status.is_success() => Value::String(text),
                Err(e) => return Err(e.into()),
            }
        };
        Ok((status, body))
    }

    /// Exchange the refresh token for a new access token.
    ///
    /// `stale` is the access token that was rejected; if another request already
    /// replaced it, the refresh is skipped.
    async fn refresh(&self, stale: Option<&str>) -> Result<String> {
        let _guard = self.refresh_lock.lock().await;

        let current = self.tokens.load().await?;
        if let Some(token) = current.access_token.as_deref() {
            if Some(token) != stale {
                return Ok(token.to_string());
            }
        }

        let Some(refresh_token) = current.refresh_token.clone() else {
            return Err(ResyncError::Unauthorized {
                message: "No refresh token available".to_string(),
            });
        };

        info!("Refreshing access token");
        let request = Request::post(AuthConfig::REFRESH_PATH)
            .with_body(json!({ "refreshToken": refresh_token }));
        let (status, body) = self.dispatch(&request, None).await?;
        if !status.is_success() {
            return Err(status_error(status, &body));
        }

        let canonical = normalize::normalize(&body)?;
        let access_token = canonical
            .get("accessToken")
            .and_then(Value::as_str)
            .ok_or_else(|| ResyncError::Normalization("refresh response has no accessToken".into()))?
            .to_string();
        let refresh_token = canonical
            .get("refreshToken")
            .and_then(Value::as_str)
            .map(str::to_string)
            .or(current.refresh_token);

        self.tokens
            .save(&Tokens {
                access_token: Some(access_token.clone()),
                refresh_token,
            })
            .await?;
        Ok(access_token)
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn send(&self, request: Request) -> Result<Value> {
        let bearer = self.tokens.access_token().await?;
        debug!("{} {}", request.method, request.path);
        let (status, body) = self.dispatch(&request, bearer.as_deref()).await?;

        if status != StatusCode::UNAUTHORIZED || request.path == AuthConfig::REFRESH_PATH {
            return finish(status, body);
        }

        match self.refresh(bearer.as_deref()).await {
            Ok(token) => {
                let (status, body) = self.dispatch(&request, Some(&token)).await?;
                finish(status, body)
            }
            Err(e) => {
                warn!("Token refresh failed: {}", e);
                self.tokens.clear().await?;
                Err(ResyncError::Unauthorized {
                    message: normalize::error_message(&body)
                        .unwrap_or_else(|| "Session expired".to_string()),
                })
            }
        }
    }
}

fn finish(status: StatusCode, body: Value) -> Result<Value> {
    if status.is_success() {
        Ok(body)
    } else {
        Err(status_error(status, &body))
    }
}

fn status_error(status: StatusCode, body: &Value) -> ResyncError {
    let message = normalize::error_message(body)
        .or_else(|| body.as_str().filter(|s| !s.is_empty()).map(str::to_string))
        .unwrap_or_else(|| format!("Request failed with status {}", status.as_u16()));
    ResyncError::from_status(status.as_u16(), message)
}
