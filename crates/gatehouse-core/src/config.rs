//! Application configuration management.
//!
//! This module handles loading and saving the client configuration: backend
//! URL, request timeout, and which secure storage backend holds the session.
//!
//! Configuration is stored at `~/.config/gatehouse/config.json`. Environment
//! variables override the file:
//! - `GATEHOUSE_API_URL`: backend base URL
//! - `GATEHOUSE_TIMEOUT_SECS`: request timeout
//! - `GATEHOUSE_STORAGE`: `keyring`, `file` or `memory`
//! - `GATEHOUSE_STORAGE_KEY`: passphrase for the `file` backend (never saved)

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::api::AuthClient;
use crate::auth::SessionManager;
use crate::storage::{EncryptedFileStorage, KeyringStorage, MemoryStorage, SecureStorage};

/// Application name used for config/cache directory paths
const APP_NAME: &str = "gatehouse";

/// Config file name
const CONFIG_FILE: &str = "config.json";

/// Subdirectory of the cache dir used by the encrypted file backend
const SESSION_DIR: &str = "session";

const DEFAULT_API_BASE_URL: &str = "http://localhost:5000";

/// Requests that take longer than this count as network failures.
const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 10;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageBackend {
    #[default]
    Keyring,
    File,
    Memory,
}

impl std::str::FromStr for StorageBackend {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "keyring" => Ok(StorageBackend::Keyring),
            "file" => Ok(StorageBackend::File),
            "memory" => Ok(StorageBackend::Memory),
            other => Err(anyhow::anyhow!("Unknown storage backend: {}", other)),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub api_base_url: String,
    pub request_timeout_secs: u64,
    pub storage: StorageBackend,
    pub last_email: Option<String>,
    #[serde(skip)]
    pub storage_key: Option<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            api_base_url: DEFAULT_API_BASE_URL.to_string(),
            request_timeout_secs: DEFAULT_REQUEST_TIMEOUT_SECS,
            storage: StorageBackend::default(),
            last_email: None,
            storage_key: None,
        }
    }
}

impl Config {
    /// Load from the default path, then apply environment overrides
    pub fn load() -> Result<Self> {
        let mut config = Self::load_from(&Self::config_path()?)?;
        config.apply_overrides(|name| std::env::var(name).ok());
        Ok(config)
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        if path.exists() {
            let contents = std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read config from {}", path.display()))?;
            serde_json::from_str(&contents)
                .with_context(|| format!("Failed to parse config from {}", path.display()))
        } else {
            Ok(Self::default())
        }
    }

    pub fn save(&self) -> Result<()> {
        self.save_to(&Self::config_path()?)
    }

    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let contents = serde_json::to_string_pretty(self)?;
        std::fs::write(path, contents)?;
        Ok(())
    }

    /// Apply overrides from a variable lookup (the process environment in
    /// `load`). Unparseable values are ignored with a warning.
    pub fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(url) = lookup("GATEHOUSE_API_URL").filter(|u| !u.trim().is_empty()) {
            self.api_base_url = url.trim().to_string();
        }
        if let Some(raw) = lookup("GATEHOUSE_TIMEOUT_SECS") {
            match raw.trim().parse::<u64>() {
                Ok(secs) if secs > 0 => self.request_timeout_secs = secs,
                _ => warn!(value = %raw, "Ignoring invalid GATEHOUSE_TIMEOUT_SECS"),
            }
        }
        if let Some(raw) = lookup("GATEHOUSE_STORAGE") {
            match raw.parse() {
                Ok(backend) => self.storage = backend,
                Err(e) => warn!(error = %e, "Ignoring invalid GATEHOUSE_STORAGE"),
            }
        }
        if let Some(key) = lookup("GATEHOUSE_STORAGE_KEY").filter(|k| !k.is_empty()) {
            self.storage_key = Some(key);
        }
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs.max(1))
    }

    fn config_path() -> Result<PathBuf> {
        let config_dir = dirs::config_dir()
            .ok_or_else(|| anyhow::anyhow!("Could not find config directory"))?;
        Ok(config_dir.join(APP_NAME).join(CONFIG_FILE))
    }

    pub fn cache_dir(&self) -> Result<PathBuf> {
        let cache_dir = dirs::cache_dir()
            .ok_or_else(|| anyhow::anyhow!("Could not find cache directory"))?;
        Ok(cache_dir.join(APP_NAME))
    }

    /// Open the configured secure storage backend
    pub fn open_storage(&self) -> Result<Arc<dyn SecureStorage>> {
        let storage: Arc<dyn SecureStorage> = match self.storage {
            StorageBackend::Keyring => Arc::new(KeyringStorage::new()),
            StorageBackend::File => {
                let passphrase = self.storage_key.as_deref().ok_or_else(|| {
                    anyhow::anyhow!("GATEHOUSE_STORAGE_KEY must be set for file storage")
                })?;
                let dir = self.cache_dir()?.join(SESSION_DIR);
                Arc::new(
                    EncryptedFileStorage::open(&dir, passphrase)
                        .with_context(|| format!("Failed to open session storage in {}", dir.display()))?,
                )
            }
            StorageBackend::Memory => Arc::new(MemoryStorage::new()),
        };
        debug!(backend = ?self.storage, "Opened session storage");
        Ok(storage)
    }

    /// Build the session manager for this configuration
    pub fn build_session(&self) -> Result<SessionManager> {
        let storage = self.open_storage()?;
        let auth = AuthClient::new(&self.api_base_url, self.request_timeout())
            .context("Failed to create HTTP client")?;
        Ok(SessionManager::new(storage, auth))
    }
}
