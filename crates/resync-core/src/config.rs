//! Centralized configuration for the resync core.
//!
//! Constant groups hold the fixed tuning values; [`ClientConfig`] is the runtime
//! configuration a host application builds once at startup, either from
//! defaults or from the environment.

use crate::error::{ResyncError, Result};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Network-related configuration.
pub struct NetworkConfig;

impl NetworkConfig {
    pub const DEFAULT_BASE_URL: &'static str = "http://localhost:8000/api/v1";
    pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);
    pub const MAX_RETRIES: u32 = 3;
    pub const RETRY_BASE_DELAY: Duration = Duration::from_secs(1);
    pub const RETRY_MAX_DELAY: Duration = Duration::from_secs(30);
    pub const USER_AGENT: &'static str = "resync/0.6";
}

/// Default cache timing.
pub struct CacheDefaults;

impl CacheDefaults {
    pub const STALE_TIME: Duration = Duration::from_secs(60);
    pub const LIST_STALE_TIME: Duration = Duration::from_secs(30);
    pub const DETAIL_STALE_TIME: Duration = Duration::from_secs(60);
    pub const STATS_STALE_TIME: Duration = Duration::from_secs(60);
    pub const PROFILE_STALE_TIME: Duration = Duration::from_secs(300);
    pub const GC_GRACE: Duration = Duration::from_secs(300);
}

/// Authentication storage keys and endpoints.
pub struct AuthConfig;

impl AuthConfig {
    pub const TOKEN_KEY: &'static str = "access_token";
    pub const REFRESH_TOKEN_KEY: &'static str = "refresh_token";
    pub const REFRESH_PATH: &'static str = "/auth/refresh";
    pub const CSRF_HEADER: &'static str = "X-CSRFToken";
}

/// Which backend convention the client talks to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum BackendMode {
    #[default]
    Standalone,
    DjangoSpa,
}

impl BackendMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            BackendMode::Standalone => "standalone",
            BackendMode::DjangoSpa => "django-spa",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "standalone" => Some(BackendMode::Standalone),
            "django-spa" => Some(BackendMode::DjangoSpa),
            _ => None,
        }
    }
}

impl std::fmt::Display for BackendMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Runtime configuration for a resync client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "snake_case")]
pub struct ClientConfig {
    /// Base URL every service path is appended to.
    pub base_url: String,
    /// Per-request timeout.
    #[serde(with = "duration_ms")]
    pub timeout: Duration,
    /// Retry budget for reads.
    pub retries: u32,
    /// Storage key for the access token.
    pub token_key: String,
    /// Storage key for the refresh token.
    pub refresh_token_key: String,
    pub mode: BackendMode,
    /// Default staleness window for cache entries.
    #[serde(with = "duration_ms")]
    pub stale_time: Duration,
    /// How long an unobserved entry survives before garbage collection.
    #[serde(with = "duration_ms")]
    pub gc_grace: Duration,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            base_url: NetworkConfig::DEFAULT_BASE_URL.to_string(),
            timeout: NetworkConfig::REQUEST_TIMEOUT,
            retries: NetworkConfig::MAX_RETRIES,
            token_key: AuthConfig::TOKEN_KEY.to_string(),
            refresh_token_key: AuthConfig::REFRESH_TOKEN_KEY.to_string(),
            mode: BackendMode::Standalone,
            stale_time: CacheDefaults::STALE_TIME,
            gc_grace: CacheDefaults::GC_GRACE,
        }
    }
}

impl ClientConfig {
    pub const ENV_BASE_URL: &'static str = "RESYNC_API_BASE_URL";
    pub const ENV_TIMEOUT_MS: &'static str = "RESYNC_API_TIMEOUT_MS";
    pub const ENV_RETRIES: &'static str = "RESYNC_API_RETRIES";
    pub const ENV_TOKEN_KEY: &'static str = "RESYNC_AUTH_TOKEN_KEY";
    pub const ENV_REFRESH_TOKEN_KEY: &'static str = "RESYNC_AUTH_REFRESH_TOKEN_KEY";
    pub const ENV_MODE: &'static str = "RESYNC_MODE";
    pub const ENV_DJANGO_API_PREFIX: &'static str = "RESYNC_DJANGO_API_PREFIX";

    /// Django SPA deployments serve the API from the same origin.
    pub const DJANGO_API_PREFIX: &'static str = "/api/v1";

    /// Build a configuration from the process environment.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build a configuration from an arbitrary key lookup.
    ///
    /// Unset keys fall back to defaults; set-but-invalid values are errors.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let mut config = Self::default();

        if let Some(mode) = lookup(Self::ENV_MODE) {
            config.mode = BackendMode::parse(&mode).ok_or_else(|| ResyncError::Config {
                message: format!("{} must be standalone or django-spa, got {:?}", Self::ENV_MODE, mode),
            })?;
        }

        config.base_url = match lookup(Self::ENV_BASE_URL) {
            Some(url) => url,
            None if config.mode == BackendMode::DjangoSpa => lookup(Self::ENV_DJANGO_API_PREFIX)
                .unwrap_or_else(|| Self::DJANGO_API_PREFIX.to_string()),
            None => config.base_url,
        };

        if let Some(ms) = lookup(Self::ENV_TIMEOUT_MS) {
            config.timeout = Duration::from_millis(parse_number(Self::ENV_TIMEOUT_MS, &ms)?);
        }
        if let Some(retries) = lookup(Self::ENV_RETRIES) {
            config.retries = u32::try_from(parse_number(Self::ENV_RETRIES, &retries)?).map_err(|_| {
                ResyncError::Config {
                    message: format!("{} is out of range: {}", Self::ENV_RETRIES, retries),
                }
            })?;
        }
        if let Some(key) = lookup(Self::ENV_TOKEN_KEY) {
            config.token_key = key;
        }
        if let Some(key) = lookup(Self::ENV_REFRESH_TOKEN_KEY) {
            config.refresh_token_key = key;
        }

        Ok(config)
    }

    pub fn is_django_spa(&self) -> bool {
        self.mode == BackendMode::DjangoSpa
    }
}

fn parse_number(key: &str, value: &str) -> Result<u64> {
    value.trim().parse::<u64>().map_err(|e| ResyncError::Config {
        message: format!("{} must be a non-negative integer: {}", key, e),
    })
}

mod duration_ms {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_millis)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_defaults() {
        let config = ClientConfig::from_lookup(lookup(&[])).unwrap();
        assert_eq!(config, ClientConfig::default());
        assert_eq!(config.base_url, "http://localhost:8000/api/v1");
        assert_eq!(config.timeout, Duration::from_secs(10));
        assert_eq!(config.token_key, "access_token");
    }

    #[test]
    fn test_django_mode_uses_prefix() {
        let config = ClientConfig::from_lookup(lookup(&[("RESYNC_MODE", "django-spa")])).unwrap();
        assert!(config.is_django_spa());
        assert_eq!(config.base_url, "/api/v1");
    }

    #[test]
    fn test_explicit_base_url_wins() {
        let config = ClientConfig::from_lookup(lookup(&[
            ("RESYNC_MODE", "django-spa"),
            ("RESYNC_API_BASE_URL", "https://api.example.com/v2"),
            ("RESYNC_API_TIMEOUT_MS", "2500"),
        ]))
        .unwrap();
        assert_eq!(config.base_url, "https://api.example.com/v2");
        assert_eq!(config.timeout, Duration::from_millis(2500));
    }

    #[test]
    fn test_invalid_values_are_rejected() {
        assert!(ClientConfig::from_lookup(lookup(&[("RESYNC_MODE", "spa")])).is_err());
        assert!(ClientConfig::from_lookup(lookup(&[("RESYNC_API_RETRIES", "many")])).is_err());
    }

    #[test]
    fn test_retries_beyond_u32_are_rejected() {
        let config = ClientConfig::from_lookup(lookup(&[("RESYNC_API_RETRIES", "7")])).unwrap();
        assert_eq!(config.retries, 7);

        let result = ClientConfig::from_lookup(lookup(&[("RESYNC_API_RETRIES", "4294967297")]));
        assert!(matches!(result, Err(ResyncError::Config { .. })));
    }

    #[test]
    fn test_config_serde_roundtrip_uses_millis() {
        let json = serde_json::to_value(ClientConfig::default()).unwrap();
        assert_eq!(json["timeout"], 10_000);
        let parsed: ClientConfig = serde_json::from_value(json).unwrap();
        assert_eq!(parsed, ClientConfig::default());
    }
}
