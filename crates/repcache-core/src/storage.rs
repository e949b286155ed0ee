//! Durable client storage and the persistence adapter built on top of it.
//!
//! `StateStorage` is a synchronous, string-keyed key/value store that survives
//! process restart. `Persisted<T>` serializes a declared snapshot type into one
//! key and hydrates it back, treating anything unreadable as absent.

use std::collections::HashMap;
use std::marker::PhantomData;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};

use anyhow::{Context, Result};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use tracing::{debug, warn};

pub trait StateStorage: Send + Sync {
    fn get(&self, key: &str) -> Option<String>;
    fn set(&self, key: &str, value: &str) -> Result<()>;
    fn remove(&self, key: &str) -> Result<()>;
    fn clear(&self) -> Result<()>;
}

// ============================================================================
// File-backed storage
// ============================================================================

/// One JSON file per key inside a directory.
pub struct FileStorage {
    dir: PathBuf,
}

impl FileStorage {
    pub fn new(dir: PathBuf) -> Result<Self> {
        std::fs::create_dir_all(&dir)
            .with_context(|| format!("Failed to create storage directory: {}", dir.display()))?;
        Ok(Self { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn key_path(&self, key: &str) -> PathBuf {
        // Keys are internal identifiers, but keep them from escaping the directory
        let safe: String = key
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() || c == '.' || c == '_' || c == '-' { c } else { '_' })
            .collect();
        self.dir.join(format!("{}.json", safe))
    }
}

impl StateStorage for FileStorage {
    fn get(&self, key: &str) -> Option<String> {
        let path = self.key_path(key);
        match std::fs::read_to_string(&path) {
            Ok(contents) => Some(contents),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => None,
            Err(e) => {
                warn!(key, error = %e, "Failed to read storage file");
                None
            }
        }
    }

    fn set(&self, key: &str, value: &str) -> Result<()> {
        let path = self.key_path(key);
        // Readers never observe a partially written payload
        let tmp = path.with_extension("json.tmp");
        std::fs::write(&tmp, value)
            .with_context(|| format!("Failed to write storage file: {}", key))?;
        std::fs::rename(&tmp, &path)
            .with_context(|| format!("Failed to commit storage file: {}", key))?;
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<()> {
        let path = self.key_path(key);
        if path.exists() {
            std::fs::remove_file(&path)
                .with_context(|| format!("Failed to remove storage file: {}", key))?;
        }
        Ok(())
    }

    fn clear(&self) -> Result<()> {
        for entry in std::fs::read_dir(&self.dir)? {
            let path = entry?.path();
            if path.extension().is_some_and(|ext| ext == "json") {
                std::fs::remove_file(&path)?;
            }
        }
        Ok(())
    }
}

// ============================================================================
// In-memory storage
// ============================================================================

#[derive(Default)]
pub struct MemoryStorage {
    entries: Mutex<HashMap<String, String>>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    fn entries(&self) -> std::sync::MutexGuard<'_, HashMap<String, String>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl StateStorage for MemoryStorage {
    fn get(&self, key: &str) -> Option<String> {
        self.entries().get(key).cloned()
    }

    fn set(&self, key: &str, value: &str) -> Result<()> {
        self.entries().insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<()> {
        self.entries().remove(key);
        Ok(())
    }

    fn clear(&self) -> Result<()> {
        self.entries().clear();
        Ok(())
    }
}

// ============================================================================
// Persistence adapter
// ============================================================================

#[derive(Serialize, Deserialize)]
struct Envelope<T> {
    version: u32,
    state: T,
}

/// Serializes one snapshot type under a fixed key.
///
/// The payload is wrapped in a versioned envelope. A payload that fails to
/// parse, or carries a different version, hydrates as `None` so callers fall
/// back to their initial state instead of propagating the error.
pub struct Persisted<T> {
    storage: Arc<dyn StateStorage>,
    key: String,
    version: u32,
    _marker: PhantomData<fn() -> T>,
}

impl<T: Serialize + DeserializeOwned> Persisted<T> {
    pub fn new(storage: Arc<dyn StateStorage>, key: impl Into<String>, version: u32) -> Self {
        Self {
            storage,
            key: key.into(),
            version,
            _marker: PhantomData,
        }
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn hydrate(&self) -> Option<T> {
        let raw = self.storage.get(&self.key)?;
        match serde_json::from_str::<Envelope<T>>(&raw) {
            Ok(envelope) if envelope.version == self.version => Some(envelope.state),
            Ok(envelope) => {
                debug!(
                    key = %self.key,
                    found = envelope.version,
                    expected = self.version,
                    "Discarding persisted state with mismatched version"
                );
                None
            }
            Err(e) => {
                warn!(key = %self.key, error = %e, "Discarding corrupted persisted state");
                None
            }
        }
    }

    pub fn write(&self, state: &T) -> Result<()> {
        let envelope = Envelope {
            version: self.version,
            state,
        };
        let contents = serde_json::to_string(&envelope)
            .with_context(|| format!("Failed to serialize persisted state: {}", self.key))?;
        self.storage.set(&self.key, &contents)
    }

    /// Write, logging instead of failing. Used after in-memory mutations that
    /// must not be rolled back because storage is unavailable.
    pub fn write_or_log(&self, state: &T) {
        if let Err(e) = self.write(state) {
            warn!(key = %self.key, error = %e, "Failed to persist state");
        }
    }

    pub fn remove(&self) -> Result<()> {
        self.storage.remove(&self.key)
    }
}
