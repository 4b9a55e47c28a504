//! # Token Storage Module
//!
//! The access token is the only state the client persists. It is stored under the
//! `auth_token` key, read once at startup and rewritten on every successful
//! authentication.
//!
//! In memory the token lives in a shared cell split into a [`TokenWriter`] (held
//! only by the auth session) and any number of [`TokenReader`]s (held by the HTTP
//! client), so a logout is visible on the very next outbound request.

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use tracing::{debug, warn};

use crate::api_errors::{ApiError, ApiResult};

pub const TOKEN_KEY: &str = "auth_token";

/// Durable storage for the access token
pub trait TokenStore: Send + Sync {
    fn load(&self) -> ApiResult<Option<String>>;
    fn save(&self, token: &str) -> ApiResult<()>;
    fn clear(&self) -> ApiResult<()>;
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct TokenFile {
    #[serde(rename = "auth_token", default, skip_serializing_if = "Option::is_none")]
    auth_token: Option<String>,
}

/// JSON file holding `{"auth_token": "..."}`
#[derive(Debug, Clone)]
pub struct FileTokenStore {
    path: PathBuf,
}

impl FileTokenStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Store for one Telegram chat under `data_dir`
    pub fn for_chat(data_dir: &Path, chat_id: i64) -> Self {
        Self::new(data_dir.join(format!("session-{chat_id}.json")))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl TokenStore for FileTokenStore {
    fn load(&self) -> ApiResult<Option<String>> {
        let content = match fs::read_to_string(&self.path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };

        match serde_json::from_str::<TokenFile>(&content) {
            Ok(file) => Ok(file.auth_token.filter(|token| !token.is_empty())),
            Err(e) => {
                // A corrupt file is treated as "no token": the session re-authenticates
                warn!(path = %self.path.display(), error = %e, "Ignoring unreadable token file");
                Ok(None)
            }
        }
    }

    fn save(&self, token: &str) -> ApiResult<()> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }

        let body = serde_json::to_string(&TokenFile {
            auth_token: Some(token.to_string()),
        })
        .map_err(|e| ApiError::Storage(e.to_string()))?;
        fs::write(&self.path, body)?;
        debug!(path = %self.path.display(), "Persisted {TOKEN_KEY}");
        Ok(())
    }

    fn clear(&self) -> ApiResult<()> {
        match fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

/// Volatile store, used by tests and hosts without a writable disk
#[derive(Debug, Default)]
pub struct MemoryTokenStore {
    token: Mutex<Option<String>>,
}

impl MemoryTokenStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_token(token: impl Into<String>) -> Self {
        Self {
            token: Mutex::new(Some(token.into())),
        }
    }
}

impl TokenStore for MemoryTokenStore {
    fn load(&self) -> ApiResult<Option<String>> {
        Ok(self.token.lock().unwrap_or_else(PoisonError::into_inner).clone())
    }

    fn save(&self, token: &str) -> ApiResult<()> {
        *self.token.lock().unwrap_or_else(PoisonError::into_inner) = Some(token.to_string());
        Ok(())
    }

    fn clear(&self) -> ApiResult<()> {
        *self.token.lock().unwrap_or_else(PoisonError::into_inner) = None;
        Ok(())
    }
}

/// Create a fresh, empty token cell
pub fn token_cell() -> (TokenWriter, TokenReader) {
    let cell = Arc::new(RwLock::new(None));
    (TokenWriter(Arc::clone(&cell)), TokenReader(cell))
}

/// Write half of the token cell
#[derive(Debug)]
pub struct TokenWriter(Arc<RwLock<Option<String>>>);

impl TokenWriter {
    pub fn set(&self, token: impl Into<String>) {
        *self.0.write().unwrap_or_else(PoisonError::into_inner) = Some(token.into());
    }

    pub fn clear(&self) {
        *self.0.write().unwrap_or_else(PoisonError::into_inner) = None;
    }

    pub fn reader(&self) -> TokenReader {
        TokenReader(Arc::clone(&self.0))
    }
}

/// Read half of the token cell
#[derive(Debug, Clone)]
pub struct TokenReader(Arc<RwLock<Option<String>>>);

impl TokenReader {
    /// Reader that never yields a token
    pub fn anonymous() -> Self {
        Self(Arc::new(RwLock::new(None)))
    }

    pub fn current(&self) -> Option<String> {
        self.0.read().unwrap_or_else(PoisonError::into_inner).clone()
    }

    pub fn is_present(&self) -> bool {
        self.0.read().unwrap_or_else(PoisonError::into_inner).is_some()
    }
}
