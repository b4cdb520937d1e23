//! Token persistence for authenticated requests.

use crate::config::AuthConfig;
use crate::error::{ResyncError, Result};
use async_trait::async_trait;
use serde_json::{Map, Value};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};
use tracing::debug;

/// Access and refresh token pair.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Tokens {
    pub access_token: Option<String>,
    pub refresh_token: Option<String>,
}

impl Tokens {
    pub fn new(access_token: impl Into<String>, refresh_token: Option<String>) -> Self {
        Self {
            access_token: Some(access_token.into()),
            refresh_token,
        }
    }
}

/// Where bearer tokens live between requests.
#[async_trait]
pub trait TokenStore: Send + Sync {
    async fn load(&self) -> Result<Tokens>;

    async fn save(&self, tokens: &Tokens) -> Result<()>;

    async fn clear(&self) -> Result<()>;

    async fn access_token(&self) -> Result<Option<String>> {
        Ok(self.load().await?.access_token)
    }

    async fn refresh_token(&self) -> Result<Option<String>> {
        Ok(self.load().await?.refresh_token)
    }
}

/// Process-local token storage.
#[derive(Debug, Default)]
pub struct MemoryTokenStore {
    tokens: Mutex<Tokens>,
}

impl MemoryTokenStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_tokens(tokens: Tokens) -> Self {
        Self {
            tokens: Mutex::new(tokens),
        }
    }
}

#[async_trait]
impl TokenStore for MemoryTokenStore {
    async fn load(&self) -> Result<Tokens> {
        Ok(self
            .tokens
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone())
    }

    async fn save(&self, tokens: &Tokens) -> Result<()> {
        *self.tokens.lock().unwrap_or_else(PoisonError::into_inner) = tokens.clone();
        Ok(())
    }

    async fn clear(&self) -> Result<()> {
        self.save(&Tokens::default()).await
    }
}

/// Tokens persisted as a JSON object in a file, keyed by configurable names.
#[derive(Debug, Clone)]
pub struct FileTokenStore {
    path: PathBuf,
    token_key: String,
    refresh_token_key: String,
}

impl FileTokenStore {
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self::with_keys(path, AuthConfig::TOKEN_KEY, AuthConfig::REFRESH_TOKEN_KEY)
    }

    pub fn with_keys(
        path: impl AsRef<Path>,
        token_key: impl Into<String>,
        refresh_token_key: impl Into<String>,
    ) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            token_key: token_key.into(),
            refresh_token_key: refresh_token_key.into(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn read_map(&self) -> Result<Map<String, Value>> {
        match tokio::fs::read_to_string(&self.path).await {
            Ok(contents) if contents.trim().is_empty() => Ok(Map::new()),
            Ok(contents) => match serde_json::from_str(&contents)? {
                Value::Object(map) => Ok(map),
                _ => Err(ResyncError::Storage {
                    message: format!("{} does not hold a JSON object", self.path.display()),
                }),
            },
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Map::new()),
            Err(e) => Err(e.into()),
        }
    }
}

#[async_trait]
impl TokenStore for FileTokenStore {
    async fn load(&self) -> Result<Tokens> {
        let map = self.read_map().await?;
        let text = |key: &str| map.get(key).and_then(Value::as_str).map(str::to_string);
        Ok(Tokens {
            access_token: text(&self.token_key),
            refresh_token: text(&self.refresh_token_key),
        })
    }

    async fn save(&self, tokens: &Tokens) -> Result<()> {
        let mut map = self.read_map().await?;
        for (key, value) in [
            (&self.token_key, &tokens.access_token),
            (&self.refresh_token_key, &tokens.refresh_token),
        ] {
            match value {
                Some(token) => map.insert(key.clone(), Value::String(token.clone())),
                None => map.remove(key),
            };
        }

        let contents = serde_json::to_string_pretty(&Value::Object(map))?;
        let path = self.path.clone();
        tokio::task::spawn_blocking(move || write_private(&path, &contents))
            .await
            .map_err(|e| ResyncError::Storage {
                message: format!("token write task failed: {}", e),
            })??;
        debug!("Saved tokens to {}", self.path.display());
        Ok(())
    }

    async fn clear(&self) -> Result<()> {
        self.save(&Tokens::default()).await
    }
}

/// Replace `path` with `contents` in one rename, readable by the owner only.
fn write_private(path: &Path, contents: &str) -> Result<()> {
    let dir = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    std::fs::create_dir_all(dir)?;

    let mut file = tempfile::NamedTempFile::new_in(dir)?;
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        file.as_file()
            .set_permissions(std::fs::Permissions::from_mode(0o600))?;
    }
    file.write_all(contents.as_bytes())?;
    file.as_file().sync_all()?;
    file.persist(path).map_err(|e| e.error)?;
    Ok(())
}
