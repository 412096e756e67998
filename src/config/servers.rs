//! The tool-server document and its operations.

use super::{ConfigError, ConfigStore};
use crate::mcp::{ToolServerConfig, ToolServerDraft};
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

pub const SERVERS_KEY: &str = "mcp";

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ToolServerDocument {
    #[serde(default)]
    pub servers: Vec<ToolServerConfig>,
}

/// Cached tool-server document backed by a [`ConfigStore`].
#[derive(Clone)]
pub struct ToolServerStore {
    store: Arc<dyn ConfigStore>,
    doc: Arc<Mutex<ToolServerDocument>>,
}

impl ToolServerStore {
    pub fn new(store: Arc<dyn ConfigStore>) -> Self {
        let doc = load_document(store.as_ref());
        Self {
            store,
            doc: Arc::new(Mutex::new(doc)),
        }
    }

    pub fn reload(&self) {
        *self.lock() = load_document(self.store.as_ref());
    }

    pub fn servers(&self) -> Vec<ToolServerConfig> {
        self.lock().servers.clone()
    }

    pub fn enabled_servers(&self) -> Vec<ToolServerConfig> {
        self.lock()
            .servers
            .iter()
            .filter(|s| s.enabled)
            .cloned()
            .collect()
    }

    pub fn server(&self, id: &str) -> Option<ToolServerConfig> {
        self.lock().servers.iter().find(|s| s.id == id).cloned()
    }

    pub fn add(&self, draft: ToolServerDraft) -> Result<ToolServerConfig, ConfigError> {
        self.mutate(|doc| {
            let config = draft.into_config(uuid::Uuid::new_v4().to_string());
            doc.servers.push(config.clone());
            Ok(config)
        })
    }

    pub fn update(
        &self,
        id: &str,
        draft: ToolServerDraft,
    ) -> Result<ToolServerConfig, ConfigError> {
        self.mutate(|doc| {
            let slot = find_mut(doc, id)?;
            *slot = draft.into_config(slot.id.clone());
            Ok(slot.clone())
        })
    }

    pub fn delete(&self, id: &str) -> Result<(), ConfigError> {
        self.mutate(|doc| {
            let before = doc.servers.len();
            doc.servers.retain(|s| s.id != id);
            if doc.servers.len() == before {
                return Err(ConfigError::NotFound(id.to_string()));
            }
            Ok(())
        })
    }

    /// Flip `enabled` and return the new value.
    pub fn toggle(&self, id: &str) -> Result<bool, ConfigError> {
        self.mutate(|doc| {
            let slot = find_mut(doc, id)?;
            slot.enabled = !slot.enabled;
            Ok(slot.enabled)
        })
    }

    fn lock(&self) -> MutexGuard<'_, ToolServerDocument> {
        self.doc.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn mutate<T>(
        &self,
        f: impl FnOnce(&mut ToolServerDocument) -> Result<T, ConfigError>,
    ) -> Result<T, ConfigError> {
        let mut guard = self.lock();
        let mut next = guard.clone();
        let out = f(&mut next)?;

        let value = serde_json::to_value(&next).map_err(|source| ConfigError::Document {
            key: SERVERS_KEY.to_string(),
            source,
        })?;
        self.store.save(SERVERS_KEY, &value)?;
        *guard = next;
        Ok(out)
    }
}

fn find_mut<'a>(
    doc: &'a mut ToolServerDocument,
    id: &str,
) -> Result<&'a mut ToolServerConfig, ConfigError> {
    doc.servers
        .iter_mut()
        .find(|s| s.id == id)
        .ok_or_else(|| ConfigError::NotFound(id.to_string()))
}

fn load_document(store: &dyn ConfigStore) -> ToolServerDocument {
    match store.load(SERVERS_KEY) {
        Ok(Some(value)) => serde_json::from_value(value).unwrap_or_else(|e| {
            tracing::warn!("Ignoring malformed tool-server document: {e}");
            ToolServerDocument::default()
        }),
        Ok(None) => ToolServerDocument::default(),
        Err(e) => {
            tracing::warn!("Ignoring tool-server document: {e}");
            ToolServerDocument::default()
        }
    }
}
