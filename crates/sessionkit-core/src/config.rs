//! Application configuration management.
//!
//! Configuration is read from `~/.config/sessionkit/config.json` when it
//! exists, then overridden by environment variables:
//!
//! | Variable                                  | Field          |
//! |-------------------------------------------|----------------|
//! | `SESSIONKIT_API_URL` / `PUBLIC_API_URL`   | `api_base_url` |
//! | `SESSIONKIT_ENV` / `PUBLIC_ENV`           | `environment`  |
//! | `SESSIONKIT_MAX_ATTEMPTS`                 | `max_attempts` |
//! | `SESSIONKIT_BACKOFF_MS`                   | `backoff_ms`   |
//! | `SESSIONKIT_STORAGE`                      | `storage`      |

use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::retry::RetryPolicy;

/// Application name used for config/data directory paths
const APP_NAME: &str = "sessionkit";

/// Config file name
const CONFIG_FILE: &str = "config.json";

/// Credential file name inside the data directory
const SESSION_FILE: &str = "session.json";

pub const DEFAULT_API_BASE_URL: &str = "http://localhost:8000";
pub const DEFAULT_MAX_ATTEMPTS: u32 = 4;
pub const DEFAULT_BACKOFF_MS: u64 = 5000;
pub const DEFAULT_ENVIRONMENT: &str = "development";

/// Where the session token is persisted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageBackend {
    #[default]
    File,
    Keyring,
    Memory,
}

impl FromStr for StorageBackend {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "file" => Ok(StorageBackend::File),
            "keyring" => Ok(StorageBackend::Keyring),
            "memory" => Ok(StorageBackend::Memory),
            other => Err(format!(
                "unknown storage backend '{}' (expected file, keyring or memory)",
                other
            )),
        }
    }
}

impl fmt::Display for StorageBackend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StorageBackend::File => write!(f, "file"),
            StorageBackend::Keyring => write!(f, "keyring"),
            StorageBackend::Memory => write!(f, "memory"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub api_base_url: String,
    pub max_attempts: u32,
    pub backoff_ms: u64,
    /// Sent as `X-Environment` with tracking events.
    pub environment: String,
    pub storage: StorageBackend,
    /// False for server-side rendering contexts, where session bootstrap is skipped.
    pub interactive: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            api_base_url: DEFAULT_API_BASE_URL.to_string(),
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            backoff_ms: DEFAULT_BACKOFF_MS,
            environment: DEFAULT_ENVIRONMENT.to_string(),
            storage: StorageBackend::default(),
            interactive: true,
        }
    }
}

impl Config {
    /// Load the config file (if any) and apply environment overrides.
    pub fn load() -> Result<Self> {
        let mut config = match Self::config_path() {
            Ok(path) => Self::load_from(&path)?,
            Err(e) => {
                warn!(error = %e, "No config directory, using defaults");
                Self::default()
            }
        };
        config.apply_overrides(|name| std::env::var(name).ok());
        Ok(config)
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        if path.exists() {
            let contents = std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read config file {}", path.display()))?;
            serde_json::from_str(&contents)
                .with_context(|| format!("Failed to parse config file {}", path.display()))
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

    /// Apply overrides from a variable lookup (the process environment in `load`).
    pub fn apply_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(url) = first_set(&lookup, &["SESSIONKIT_API_URL", "PUBLIC_API_URL"]) {
            self.api_base_url = url;
        }
        if let Some(env) = first_set(&lookup, &["SESSIONKIT_ENV", "PUBLIC_ENV"]) {
            self.environment = env;
        }
        if let Some(raw) = first_set(&lookup, &["SESSIONKIT_MAX_ATTEMPTS"]) {
            match raw.trim().parse() {
                Ok(n) => self.max_attempts = n,
                Err(_) => warn!(value = %raw, "Ignoring invalid SESSIONKIT_MAX_ATTEMPTS"),
            }
        }
        if let Some(raw) = first_set(&lookup, &["SESSIONKIT_BACKOFF_MS"]) {
            match raw.trim().parse() {
                Ok(ms) => self.backoff_ms = ms,
                Err(_) => warn!(value = %raw, "Ignoring invalid SESSIONKIT_BACKOFF_MS"),
            }
        }
        if let Some(raw) = first_set(&lookup, &["SESSIONKIT_STORAGE"]) {
            match raw.parse() {
                Ok(backend) => self.storage = backend,
                Err(e) => warn!(error = %e, "Ignoring invalid SESSIONKIT_STORAGE"),
            }
        }
    }

    pub fn backoff(&self) -> Duration {
        Duration::from_millis(self.backoff_ms)
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(self.max_attempts, self.backoff())
    }

    fn config_path() -> Result<PathBuf> {
        let config_dir = dirs::config_dir()
            .ok_or_else(|| anyhow::anyhow!("Could not find config directory"))?;
        Ok(config_dir.join(APP_NAME).join(CONFIG_FILE))
    }

    /// Location of the file-backed credential store, if a data directory exists.
    pub fn session_file(&self) -> Option<PathBuf> {
        dirs::data_dir().map(|dir| dir.join(APP_NAME).join(SESSION_FILE))
    }
}

/// First non-blank value among `names`.
fn first_set<F>(lookup: &F, names: &[&str]) -> Option<String>
where
    F: Fn(&str) -> Option<String>,
{
    names
        .iter()
        .find_map(|name| lookup(*name).filter(|v| !v.trim().is_empty()))
}
