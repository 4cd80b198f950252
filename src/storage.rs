//! # Persistent Store Module
//!
//! Key/value persistence for serialized session collections. The store
//! holds opaque JSON strings under plain identifier keys; all I/O failures
//! are caught and logged at this boundary so the core can treat "not
//! found" and "store error" identically as "no data".

use async_trait::async_trait;
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use crate::error::StoreError;
use crate::telemetry::Session;

/// Pending sessions finalized during the current login.
pub const LOCAL_SESSIONS_KEY: &str = "local_sessions";
/// Long-term merged session history.
pub const HISTORICAL_SESSIONS_KEY: &str = "historical_sessions";

/// Key/value persistence boundary.
///
/// `get` swallows errors (a failed read is "no data"); `set` and `remove`
/// surface them so callers can keep in-memory state for a later retry.
#[async_trait]
pub trait Store: Send + Sync {
    async fn get(&self, key: &str) -> Option<String>;
    async fn set(&self, key: &str, value: &str) -> Result<(), StoreError>;
    async fn remove(&self, key: &str) -> Result<(), StoreError>;
}

/// One JSON file per key under a data directory.
pub struct FileStore {
    dir: PathBuf,
}

impl FileStore {
    /// Open (creating if needed) a store rooted at `dir`.
    pub fn open(dir: impl AsRef<Path>) -> Result<Self, StoreError> {
        let dir = dir.as_ref().to_path_buf();
        fs::create_dir_all(&dir).map_err(StoreError::Io)?;
        Ok(Self { dir })
    }

    fn key_path(&self, key: &str) -> PathBuf {
        self.dir.join(format!("{}.json", key))
    }
}

#[async_trait]
impl Store for FileStore {
    async fn get(&self, key: &str) -> Option<String> {
        match fs::read_to_string(self.key_path(key)) {
            Ok(value) => Some(value),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => None,
            Err(e) => {
                log::error!("Error reading stored item {}: {}", key, e);
                None
            }
        }
    }

    async fn set(&self, key: &str, value: &str) -> Result<(), StoreError> {
        fs::write(self.key_path(key), value).map_err(|e| {
            log::error!("Error writing stored item {}: {}", key, e);
            StoreError::Io(e)
        })
    }

    async fn remove(&self, key: &str) -> Result<(), StoreError> {
        match fs::remove_file(self.key_path(key)) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => {
                log::error!("Error removing stored item {}: {}", key, e);
                Err(StoreError::Io(e))
            }
        }
    }
}

/// Volatile store used when no writable data directory exists, and by
/// tests. Sessions kept here do not survive a restart.
#[derive(Default)]
pub struct MemoryStore {
    items: Mutex<HashMap<String, String>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn get(&self, key: &str) -> Option<String> {
        self.items.lock().unwrap().get(key).cloned()
    }

    async fn set(&self, key: &str, value: &str) -> Result<(), StoreError> {
        self.items.lock().unwrap().insert(key.to_string(), value.to_string());
        Ok(())
    }

    async fn remove(&self, key: &str) -> Result<(), StoreError> {
        self.items.lock().unwrap().remove(key);
        Ok(())
    }
}

/// Read a session collection, treating missing or unreadable data as empty.
pub async fn read_sessions(store: &dyn Store, key: &str) -> Vec<Session> {
    match store.get(key).await {
        Some(raw) => match serde_json::from_str(&raw) {
            Ok(sessions) => sessions,
            Err(e) => {
                log::warn!("Discarding unreadable session collection {}: {}", key, e);
                Vec::new()
            }
        },
        None => Vec::new(),
    }
}

/// Serialize and persist a session collection under `key`.
pub async fn write_sessions(
    store: &dyn Store,
    key: &str,
    sessions: &[Session],
) -> Result<(), StoreError> {
    let raw = serde_json::to_string(sessions).map_err(StoreError::Serialize)?;
    store.set(key, &raw).await
}
