//! Key/value persistence for the session token.
//!
//! Three backends implement `CredentialStore`:
//! - `FileStore`: a JSON map on disk, the durable default
//! - `KeyringStore`: one OS keychain entry per key
//! - `MemoryStore`: process-local, used when nothing durable is reachable
//!
//! `open_store` picks one at construction time. Durable backends are wrapped
//! in a `FallbackStore` so a backend that breaks mid-process degrades to
//! memory instead of failing the caller.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use keyring::Entry;
use thiserror::Error;
use tracing::{debug, warn};

use crate::config::StorageBackend;

/// Keychain service name for keyring entries
const SERVICE_NAME: &str = "sessionkit";

/// Key holding the bearer token.
pub const SESSION_TOKEN_KEY: &str = "session_token";

/// Key for cached user data. Only ever cleared.
pub const USER_DATA_KEY: &str = "user_data";

#[derive(Error, Debug)]
pub enum StorageError {
    #[error("Storage unavailable: {0}")]
    Unavailable(String),

    #[error("Storage I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Corrupt storage file: {0}")]
    Corrupt(#[from] serde_json::Error),

    #[error("Keychain error: {0}")]
    Keyring(#[from] keyring::Error),
}

#[async_trait]
pub trait CredentialStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<String>, StorageError>;

    async fn set(&self, key: &str, value: &str) -> Result<(), StorageError>;

    /// Removing a missing key is not an error.
    async fn remove(&self, key: &str) -> Result<(), StorageError>;

    /// Short name for log lines.
    fn name(&self) -> &'static str;
}

// ============================================================================
// Memory
// ============================================================================

#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: Mutex<HashMap<String, String>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn entries(&self) -> std::sync::MutexGuard<'_, HashMap<String, String>> {
        // A poisoned map is still a valid map
        self.entries.lock().unwrap_or_else(|e| e.into_inner())
    }
}

#[async_trait]
impl CredentialStore for MemoryStore {
    async fn get(&self, key: &str) -> Result<Option<String>, StorageError> {
        Ok(self.entries().get(key).cloned())
    }

    async fn set(&self, key: &str, value: &str) -> Result<(), StorageError> {
        self.entries().insert(key.to_string(), value.to_string());
        Ok(())
    }

    async fn remove(&self, key: &str) -> Result<(), StorageError> {
        self.entries().remove(key);
        Ok(())
    }

    fn name(&self) -> &'static str {
        "memory"
    }
}

// ============================================================================
// File
// ============================================================================

/// All keys live in one pretty-printed JSON object.
pub struct FileStore {
    path: PathBuf,
    // Serializes read-modify-write cycles within this process
    write_lock: tokio::sync::Mutex<()>,
}

impl FileStore {
    pub fn new(path: PathBuf) -> Self {
        Self {
            path,
            write_lock: tokio::sync::Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn read_all(&self) -> Result<HashMap<String, String>, StorageError> {
        match tokio::fs::read_to_string(&self.path).await {
            Ok(contents) if contents.trim().is_empty() => Ok(HashMap::new()),
            Ok(contents) => Ok(serde_json::from_str(&contents)?),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(HashMap::new()),
            Err(e) => Err(e.into()),
        }
    }

    async fn write_all(&self, entries: &HashMap<String, String>) -> Result<(), StorageError> {
        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let contents = serde_json::to_string_pretty(entries)?;
        // Readers take no lock, so they must only ever see a complete file
        let staging = self.staging_path();
        tokio::fs::write(&staging, contents).await?;
        if let Err(e) = tokio::fs::rename(&staging, &self.path).await {
            let _ = tokio::fs::remove_file(&staging).await;
            return Err(e.into());
        }
        Ok(())
    }

    fn staging_path(&self) -> PathBuf {
        let mut name = self
            .path
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_else(|| "session".into());
        name.push(".tmp");
        self.path.with_file_name(name)
    }
}

#[async_trait]
impl CredentialStore for FileStore {
    async fn get(&self, key: &str) -> Result<Option<String>, StorageError> {
        Ok(self.read_all().await?.remove(key))
    }

    async fn set(&self, key: &str, value: &str) -> Result<(), StorageError> {
        let _guard = self.write_lock.lock().await;
        let mut entries = self.read_all().await?;
        entries.insert(key.to_string(), value.to_string());
        self.write_all(&entries).await
    }

    async fn remove(&self, key: &str) -> Result<(), StorageError> {
        let _guard = self.write_lock.lock().await;
        let mut entries = self.read_all().await?;
        if entries.remove(key).is_some() {
            self.write_all(&entries).await?;
        }
        Ok(())
    }

    fn name(&self) -> &'static str {
        "file"
    }
}

// ============================================================================
// Keyring
// ============================================================================

pub struct KeyringStore {
    service: String,
}

impl KeyringStore {
    pub fn new(service: impl Into<String>) -> Self {
        Self {
            service: service.into(),
        }
    }

    /// Run a keychain call off the async runtime.
    async fn with_entry<T, F>(&self, key: &str, f: F) -> Result<T, StorageError>
    where
        T: Send + 'static,
        F: FnOnce(Entry) -> Result<T, keyring::Error> + Send + 'static,
    {
        let service = self.service.clone();
        let key = key.to_string();
        tokio::task::spawn_blocking(move || {
            let entry = Entry::new(&service, &key)?;
            f(entry)
        })
        .await
        .map_err(|e| StorageError::Unavailable(format!("keychain task failed: {}", e)))?
        .map_err(StorageError::from)
    }
}

#[async_trait]
impl CredentialStore for KeyringStore {
    async fn get(&self, key: &str) -> Result<Option<String>, StorageError> {
        self.with_entry(key, |entry| match entry.get_password() {
            Ok(value) => Ok(Some(value)),
            Err(keyring::Error::NoEntry) => Ok(None),
            Err(e) => Err(e),
        })
        .await
    }

    async fn set(&self, key: &str, value: &str) -> Result<(), StorageError> {
        let value = value.to_string();
        self.with_entry(key, move |entry| entry.set_password(&value))
            .await
    }

    async fn remove(&self, key: &str) -> Result<(), StorageError> {
        self.with_entry(key, |entry| match entry.delete_credential() {
            Ok(()) | Err(keyring::Error::NoEntry) => Ok(()),
            Err(e) => Err(e),
        })
        .await
    }

    fn name(&self) -> &'static str {
        "keyring"
    }
}

// ============================================================================
// Fallback
// ============================================================================

/// Durable store that switches to memory for good after its first failure.
pub struct FallbackStore {
    primary: Box<dyn CredentialStore>,
    memory: MemoryStore,
    degraded: AtomicBool,
}

impl FallbackStore {
    pub fn new(primary: Box<dyn CredentialStore>) -> Self {
        Self {
            primary,
            memory: MemoryStore::new(),
            degraded: AtomicBool::new(false),
        }
    }

    pub fn is_degraded(&self) -> bool {
        self.degraded.load(Ordering::SeqCst)
    }

    fn degrade(&self, op: &str, error: &StorageError) {
        if !self.degraded.swap(true, Ordering::SeqCst) {
            warn!(
                backend = self.primary.name(),
                op,
                error = %error,
                "Credential storage failed, using in-memory storage for the rest of this process"
            );
        }
    }
}

#[async_trait]
impl CredentialStore for FallbackStore {
    async fn get(&self, key: &str) -> Result<Option<String>, StorageError> {
        if !self.is_degraded() {
            match self.primary.get(key).await {
                Ok(value) => return Ok(value),
                Err(e) => self.degrade("get", &e),
            }
        }
        self.memory.get(key).await
    }

    async fn set(&self, key: &str, value: &str) -> Result<(), StorageError> {
        if !self.is_degraded() {
            match self.primary.set(key, value).await {
                Ok(()) => return Ok(()),
                Err(e) => self.degrade("set", &e),
            }
        }
        self.memory.set(key, value).await
    }

    async fn remove(&self, key: &str) -> Result<(), StorageError> {
        if !self.is_degraded() {
            match self.primary.remove(key).await {
                Ok(()) => return Ok(()),
                Err(e) => self.degrade("remove", &e),
            }
        }
        self.memory.remove(key).await
    }

    fn name(&self) -> &'static str {
        if self.is_degraded() {
            self.memory.name()
        } else {
            self.primary.name()
        }
    }
}

// ============================================================================
// Selection
// ============================================================================

/// Build the credential store for `backend`.
///
/// `file_path` is where `FileStore` keeps its data; `None` means no data
/// directory could be found. A durable backend that fails its first read is
/// replaced by `MemoryStore`.
pub async fn open_store(
    backend: StorageBackend,
    file_path: Option<PathBuf>,
) -> Arc<dyn CredentialStore> {
    let durable: Box<dyn CredentialStore> = match (backend, file_path) {
        (StorageBackend::Memory, _) => return Arc::new(MemoryStore::new()),
        (StorageBackend::File, Some(path)) => Box::new(FileStore::new(path)),
        (StorageBackend::File, None) => {
            warn!("No data directory available, using in-memory credential storage");
            return Arc::new(MemoryStore::new());
        }
        (StorageBackend::Keyring, _) => Box::new(KeyringStore::new(SERVICE_NAME)),
    };

    match durable.get(SESSION_TOKEN_KEY).await {
        Ok(_) => {
            debug!(backend = durable.name(), "Credential storage ready");
            Arc::new(FallbackStore::new(durable))
        }
        Err(e) => {
            warn!(
                backend = durable.name(),
                error = %e,
                "Credential storage unavailable, using in-memory storage"
            );
            Arc::new(MemoryStore::new())
        }
    }
}
