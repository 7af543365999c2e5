//! Persistence collaborator trait and implementations

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use dashmap::DashMap;
use serde_json::Value;
use tokio::fs;

use crate::error::{Result, StoreError};

/// How deleted conversations are handled by the persistence layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DeletionMode {
    /// Remove the conversation from the persisted document.
    #[default]
    Physical,
    /// Keep the conversation with a `deletedAt` tombstone.
    Soft,
}

/// Opaque key/value persistence of JSON documents
#[async_trait]
pub trait KeyValueStore: Send + Sync {
    /// Read a value; `None` when the key was never written
    async fn get(&self, key: &str) -> Result<Option<Value>>;

    /// Write a value, replacing any previous one
    async fn set(&self, key: &str, value: Value) -> Result<()>;

    /// Whether deletions must be kept as tombstones
    fn deletion_mode(&self) -> DeletionMode {
        DeletionMode::Physical
    }
}

/// In-memory store, useful for embedding and tests
#[derive(Debug, Default)]
pub struct MemoryKeyValueStore {
    values: DashMap<String, Value>,
    deletion_mode: DeletionMode,
}

impl MemoryKeyValueStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_deletion_mode(mut self, mode: DeletionMode) -> Self {
        self.deletion_mode = mode;
        self
    }

    /// Seed a raw value, e.g. to simulate previously persisted state
    pub fn insert(&self, key: impl Into<String>, value: Value) {
        self.values.insert(key.into(), value);
    }

    pub fn snapshot(&self, key: &str) -> Option<Value> {
        self.values.get(key).map(|v| v.value().clone())
    }
}

#[async_trait]
impl KeyValueStore for MemoryKeyValueStore {
    async fn get(&self, key: &str) -> Result<Option<Value>> {
        Ok(self.snapshot(key))
    }

    async fn set(&self, key: &str, value: Value) -> Result<()> {
        self.values.insert(key.to_string(), value);
        Ok(())
    }

    fn deletion_mode(&self) -> DeletionMode {
        self.deletion_mode
    }
}

/// File-based store: one `<key>.json` file per key
#[derive(Debug, Clone)]
pub struct FileKeyValueStore {
    base_path: PathBuf,
    deletion_mode: DeletionMode,
}

impl FileKeyValueStore {
    pub fn new<P: AsRef<Path>>(base_path: P) -> Self {
        Self {
            base_path: base_path.as_ref().to_path_buf(),
            deletion_mode: DeletionMode::Physical,
        }
    }

    pub fn with_deletion_mode(mut self, mode: DeletionMode) -> Self {
        self.deletion_mode = mode;
        self
    }

    fn key_path(&self, key: &str) -> Result<PathBuf> {
        let valid = !key.is_empty()
            && key
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_' || c == '.')
            && !key.starts_with('.');
        if !valid {
            return Err(StoreError::Persistence(format!("invalid key: {:?}", key)));
        }
        Ok(self.base_path.join(format!("{}.json", key)))
    }
}

/// Stores under the application's conversations directory
impl Default for FileKeyValueStore {
    fn default() -> Self {
        Self::new(chat_core::paths::conversations_dir())
    }
}

#[async_trait]
impl KeyValueStore for FileKeyValueStore {
    async fn get(&self, key: &str) -> Result<Option<Value>> {
        let path = self.key_path(key)?;

        let contents = match fs::read_to_string(&path).await {
            Ok(contents) => contents,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };

        Ok(Some(serde_json::from_str(&contents)?))
    }

    async fn set(&self, key: &str, value: Value) -> Result<()> {
        let path = self.key_path(key)?;
        fs::create_dir_all(&self.base_path).await?;

        // Write to a sibling temp file, then rename over the target.
        let tmp_path = path.with_extension("json.tmp");
        let contents = serde_json::to_string_pretty(&value)?;
        fs::write(&tmp_path, contents).await?;
        fs::rename(&tmp_path, &path).await?;

        Ok(())
    }

    fn deletion_mode(&self) -> DeletionMode {
        self.deletion_mode
    }
}
