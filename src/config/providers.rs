//! The provider document and its operations.

use super::{ConfigError, ConfigStore};
use crate::provider::{ProviderConfig, ProviderDraft};
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

pub const PROVIDERS_KEY: &str = "providers";
const DOCUMENT_VERSION: &str = "1.0";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProviderDocument {
    #[serde(default = "document_version")]
    pub version: String,
    #[serde(default)]
    pub providers: Vec<ProviderConfig>,
}

fn document_version() -> String {
    DOCUMENT_VERSION.to_string()
}

impl Default for ProviderDocument {
    fn default() -> Self {
        Self {
            version: document_version(),
            providers: Vec::new(),
        }
    }
}

/// Cached provider document backed by a [`ConfigStore`].
///
/// Clones share the same cache. Every mutation is saved before it becomes
/// visible; a failed save leaves the cache untouched.
#[derive(Clone)]
pub struct ProviderStore {
    store: Arc<dyn ConfigStore>,
    doc: Arc<Mutex<ProviderDocument>>,
}

impl ProviderStore {
    pub fn new(store: Arc<dyn ConfigStore>) -> Self {
        let doc = load_document(store.as_ref());
        Self {
            store,
            doc: Arc::new(Mutex::new(doc)),
        }
    }

    /// Re-read the document from the store.
    pub fn reload(&self) {
        *self.lock() = load_document(self.store.as_ref());
    }

    pub fn document(&self) -> ProviderDocument {
        self.lock().clone()
    }

    pub fn providers(&self) -> Vec<ProviderConfig> {
        self.lock().providers.clone()
    }

    pub fn enabled_providers(&self) -> Vec<ProviderConfig> {
        self.lock()
            .providers
            .iter()
            .filter(|p| p.enabled)
            .cloned()
            .collect()
    }

    pub fn provider(&self, id: &str) -> Option<ProviderConfig> {
        self.lock().providers.iter().find(|p| p.id == id).cloned()
    }

    /// Add a provider under a fresh id. The first provider ever added becomes
    /// the default.
    pub fn add(&self, draft: ProviderDraft) -> Result<ProviderConfig, ConfigError> {
        self.mutate(|doc| {
            let is_default = doc.providers.is_empty();
            let config = draft.into_config(uuid::Uuid::new_v4().to_string(), is_default);
            doc.providers.push(config.clone());
            Ok(config)
        })
    }

    /// Replace a provider's fields, keeping its id and default flag.
    pub fn update(&self, id: &str, draft: ProviderDraft) -> Result<ProviderConfig, ConfigError> {
        self.mutate(|doc| {
            let slot = find_mut(doc, id)?;
            *slot = draft.into_config(slot.id.clone(), slot.is_default);
            Ok(slot.clone())
        })
    }

    /// Remove a provider. Removing the default promotes the first enabled one.
    pub fn delete(&self, id: &str) -> Result<(), ConfigError> {
        self.mutate(|doc| {
            let index = doc
                .providers
                .iter()
                .position(|p| p.id == id)
                .ok_or_else(|| ConfigError::NotFound(id.to_string()))?;
            let removed = doc.providers.remove(index);
            if removed.is_default
                && let Some(next) = doc.providers.iter_mut().find(|p| p.enabled)
            {
                next.is_default = true;
            }
            Ok(())
        })
    }

    /// Flip `enabled` and return the new value. Disabling the default moves
    /// the flag to the first other enabled provider.
    pub fn toggle(&self, id: &str) -> Result<bool, ConfigError> {
        self.mutate(|doc| {
            let slot = find_mut(doc, id)?;
            slot.enabled = !slot.enabled;
            let enabled = slot.enabled;

            if !enabled && slot.is_default {
                slot.is_default = false;
                if let Some(next) = doc.providers.iter_mut().find(|p| p.enabled && p.id != id) {
                    next.is_default = true;
                }
            }
            Ok(enabled)
        })
    }

    /// Make an enabled provider the default and clear the flag everywhere else.
    pub fn set_default(&self, id: &str) -> Result<(), ConfigError> {
        self.mutate(|doc| {
            let target = find_mut(doc, id)?;
            if !target.enabled {
                return Err(ConfigError::Disabled(id.to_string()));
            }
            for p in &mut doc.providers {
                p.is_default = p.id == id;
            }
            Ok(())
        })
    }

    fn lock(&self) -> MutexGuard<'_, ProviderDocument> {
        self.doc.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn mutate<T>(
        &self,
        f: impl FnOnce(&mut ProviderDocument) -> Result<T, ConfigError>,
    ) -> Result<T, ConfigError> {
        let mut guard = self.lock();
        let mut next = guard.clone();
        let out = f(&mut next)?;
        next.version = document_version();

        let value = serde_json::to_value(&next).map_err(|source| ConfigError::Document {
            key: PROVIDERS_KEY.to_string(),
            source,
        })?;
        self.store.save(PROVIDERS_KEY, &value)?;
        *guard = next;
        Ok(out)
    }
}

fn find_mut<'a>(
    doc: &'a mut ProviderDocument,
    id: &str,
) -> Result<&'a mut ProviderConfig, ConfigError> {
    doc.providers
        .iter_mut()
        .find(|p| p.id == id)
        .ok_or_else(|| ConfigError::NotFound(id.to_string()))
}

/// Load the document, starting fresh when it is missing or unreadable.
fn load_document(store: &dyn ConfigStore) -> ProviderDocument {
    let value = match store.load(PROVIDERS_KEY) {
        Ok(Some(value)) => value,
        Ok(None) => return ProviderDocument::default(),
        Err(e) => {
            tracing::warn!("Ignoring provider document: {e}");
            return ProviderDocument::default();
        }
    };
    serde_json::from_value(value).unwrap_or_else(|e| {
        tracing::warn!("Ignoring malformed provider document: {e}");
        ProviderDocument::default()
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{FileStore, MemoryStore};
    use crate::provider::ProviderKind;

    fn draft(name: &str) -> ProviderDraft {
        ProviderDraft {
            api_key: "k".into(),
            ..ProviderDraft::new(name, ProviderKind::OpenAI, "gpt-4o")
        }
    }

    fn store() -> (Arc<MemoryStore>, ProviderStore) {
        let backing = Arc::new(MemoryStore::new());
        let providers = ProviderStore::new(backing.clone());
        (backing, providers)
    }

    fn default_id(store: &ProviderStore) -> Option<String> {
        store
            .providers()
            .into_iter()
            .find(|p| p.is_default)
            .map(|p| p.id)
    }

    #[test]
    fn test_first_added_becomes_default() {
        let (backing, providers) = store();
        let a = providers.add(draft("A")).unwrap();
        let b = providers.add(draft("B")).unwrap();
        assert!(a.is_default);
        assert!(!b.is_default);
        assert_ne!(a.id, b.id);

        let saved = backing.get(PROVIDERS_KEY).unwrap();
        assert_eq!(saved["version"], "1.0");
        assert_eq!(saved["providers"].as_array().unwrap().len(), 2);
    }

    #[test]
    fn test_delete_default_promotes_first_enabled() {
        let (_, providers) = store();
        let a = providers.add(draft("A")).unwrap();
        let b = providers.add(draft("B")).unwrap();
        let c = providers.add(draft("C")).unwrap();
        providers.toggle(&b.id).unwrap();

        providers.delete(&a.id).unwrap();
        assert_eq!(default_id(&providers), Some(c.id));
        assert!(matches!(
            providers.delete(&a.id),
            Err(ConfigError::NotFound(_))
        ));
    }

    #[test]
    fn test_disabling_default_moves_flag() {
        let (_, providers) = store();
        let a = providers.add(draft("A")).unwrap();
        let b = providers.add(draft("B")).unwrap();

        assert!(!providers.toggle(&a.id).unwrap());
        assert_eq!(default_id(&providers), Some(b.id.clone()));
        assert!(!providers.provider(&a.id).unwrap().is_default);

        assert!(providers.toggle(&a.id).unwrap());
        assert_eq!(default_id(&providers), Some(b.id));
        assert_eq!(providers.enabled_providers().len(), 2);
    }

    #[test]
    fn test_set_default_requires_enabled() {
        let (_, providers) = store();
        let a = providers.add(draft("A")).unwrap();
        let b = providers.add(draft("B")).unwrap();

        providers.set_default(&b.id).unwrap();
        assert_eq!(default_id(&providers), Some(b.id.clone()));
        assert_eq!(
            providers.providers().iter().filter(|p| p.is_default).count(),
            1
        );

        providers.toggle(&a.id).unwrap();
        assert!(matches!(
            providers.set_default(&a.id),
            Err(ConfigError::Disabled(_))
        ));
    }

    #[test]
    fn test_update_keeps_identity() {
        let (_, providers) = store();
        let a = providers.add(draft("A")).unwrap();
        let updated = providers
            .update(
                &a.id,
                ProviderDraft {
                    model: "gpt-4.1".into(),
                    ..draft("Renamed")
                },
            )
            .unwrap();
        assert_eq!(updated.id, a.id);
        assert!(updated.is_default);
        assert_eq!(updated.name, "Renamed");
        assert_eq!(providers.provider(&a.id).unwrap().model, "gpt-4.1");
    }

    #[test]
    fn test_document_round_trip_through_files() {
        let dir = tempfile::tempdir().unwrap();
        let providers = ProviderStore::new(Arc::new(FileStore::new(dir.path())));
        providers.add(draft("A")).unwrap();
        providers
            .add(ProviderDraft {
                base_url: Some("http://localhost:1234/v1".into()),
                temperature: Some(0.5),
                ..draft("B")
            })
            .unwrap();

        let reopened = ProviderStore::new(Arc::new(FileStore::new(dir.path())));
        assert_eq!(reopened.document(), providers.document());
    }

    #[test]
    fn test_corrupt_document_starts_fresh() {
        let backing = Arc::new(MemoryStore::with(
            PROVIDERS_KEY,
            serde_json::json!({"providers": "nope"}),
        ));
        let providers = ProviderStore::new(backing.clone());
        assert!(providers.providers().is_empty());
        assert_eq!(backing.get(PROVIDERS_KEY).unwrap()["providers"], "nope");

        let a = providers.add(draft("A")).unwrap();
        assert!(a.is_default);
    }
}
