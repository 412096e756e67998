//! Key-value persistence for configuration documents.

use super::ConfigError;
use serde_json::Value;
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};

/// Load/save of whole JSON documents by key.
pub trait ConfigStore: Send + Sync {
    /// `Ok(None)` when nothing was ever saved under `key`.
    fn load(&self, key: &str) -> Result<Option<Value>, ConfigError>;
    fn save(&self, key: &str, value: &Value) -> Result<(), ConfigError>;
}

/// One `<key>.json` file per document, readable by the owner only.
#[derive(Debug, Clone)]
pub struct FileStore {
    dir: PathBuf,
}

impl FileStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn path_for(&self, key: &str) -> PathBuf {
        self.dir.join(format!("{key}.json"))
    }
}

impl ConfigStore for FileStore {
    fn load(&self, key: &str) -> Result<Option<Value>, ConfigError> {
        let path = self.path_for(key);
        if !path.exists() {
            return Ok(None);
        }
        let content = fs::read_to_string(&path).map_err(|source| ConfigError::Read {
            path: path.clone(),
            source,
        })?;
        serde_json::from_str(&content)
            .map(Some)
            .map_err(|source| ConfigError::Document {
                key: key.to_string(),
                source,
            })
    }

    fn save(&self, key: &str, value: &Value) -> Result<(), ConfigError> {
        let path = self.path_for(key);
        let write_err = |source| ConfigError::Write {
            path: path.clone(),
            source,
        };
        fs::create_dir_all(&self.dir).map_err(write_err)?;

        let content = serde_json::to_string_pretty(value).map_err(|source| {
            ConfigError::Document {
                key: key.to_string(),
                source,
            }
        })?;
        fs::write(&path, content).map_err(write_err)?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            fs::set_permissions(&path, fs::Permissions::from_mode(0o600)).map_err(write_err)?;
        }

        Ok(())
    }
}

/// In-process store for tests and embedding.
#[derive(Debug, Default)]
pub struct MemoryStore {
    docs: Mutex<HashMap<String, Value>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(key: &str, value: Value) -> Self {
        let store = Self::new();
        store
            .docs
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(key.to_string(), value);
        store
    }

    pub fn get(&self, key: &str) -> Option<Value> {
        self.docs
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(key)
            .cloned()
    }
}

impl ConfigStore for MemoryStore {
    fn load(&self, key: &str) -> Result<Option<Value>, ConfigError> {
        Ok(self.get(key))
    }

    fn save(&self, key: &str, value: &Value) -> Result<(), ConfigError> {
        self.docs
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(key.to_string(), value.clone());
        Ok(())
    }
}
