//! Persisted configuration: the provider and tool-server documents, and the
//! `config.toml` runtime settings.

mod providers;
mod servers;
mod store;

pub use providers::{PROVIDERS_KEY, ProviderDocument, ProviderStore};
pub use servers::{SERVERS_KEY, ToolServerDocument, ToolServerStore};
pub use store::{ConfigStore, FileStore, MemoryStore};

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("failed to write {path}: {source}")]
    Write {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("invalid {key} document: {source}")]
    Document {
        key: String,
        source: serde_json::Error,
    },

    #[error("invalid settings in {path}: {source}")]
    Settings {
        path: PathBuf,
        source: toml::de::Error,
    },

    #[error("{0}")]
    Invalid(FieldErrors),

    #[error("no entry with id {0}")]
    NotFound(String),

    #[error("provider {0} is disabled")]
    Disabled(String),
}

/// Validation failures keyed by field name.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FieldErrors(BTreeMap<&'static str, String>);

impl FieldErrors {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, field: &'static str, message: impl Into<String>) {
        self.0.entry(field).or_insert_with(|| message.into());
    }

    pub fn get(&self, field: &str) -> Option<&str> {
        self.0.get(field).map(String::as_str)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&'static str, &str)> {
        self.0.iter().map(|(k, v)| (*k, v.as_str()))
    }

    pub fn into_result(self) -> Result<(), ConfigError> {
        if self.is_empty() {
            Ok(())
        } else {
            Err(ConfigError::Invalid(self))
        }
    }
}

impl fmt::Display for FieldErrors {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let parts: Vec<String> = self.iter().map(|(k, v)| format!("{k}: {v}")).collect();
        write!(f, "{}", parts.join("; "))
    }
}

/// `<platform config dir>/agentlite`, or `.agentlite` when the platform has none.
pub fn default_config_dir() -> PathBuf {
    dirs::config_dir()
        .map(|d| d.join("agentlite"))
        .unwrap_or_else(|| PathBuf::from(".agentlite"))
}

/// Runtime knobs read from `config.toml`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Where the provider and tool-server documents live.
    pub config_dir: PathBuf,
    /// Upper bound for connecting to all tool servers.
    pub handshake_timeout_secs: u64,
    /// A stream that produces nothing for this long is abandoned.
    pub stream_stale_timeout_secs: u64,
    /// Model round trips allowed per run.
    pub max_turns: usize,
    pub system_prompt: Option<String>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            config_dir: default_config_dir(),
            handshake_timeout_secs: 30,
            stream_stale_timeout_secs: 120,
            max_turns: 25,
            system_prompt: None,
        }
    }
}

impl Settings {
    /// Load `config.toml` from the default config directory.
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from(&default_config_dir().join("config.toml"))
    }

    /// Load settings from `path`; a missing file yields the defaults.
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        toml::from_str(&content).map_err(|source| ConfigError::Settings {
            path: path.to_path_buf(),
            source,
        })
    }

    pub fn handshake_timeout(&self) -> Duration {
        Duration::from_secs(self.handshake_timeout_secs)
    }

    pub fn stream_stale_timeout(&self) -> Duration {
        Duration::from_secs(self.stream_stale_timeout_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_settings_file_uses_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let settings = Settings::load_from(&dir.path().join("config.toml")).unwrap();
        assert_eq!(settings.handshake_timeout(), Duration::from_secs(30));
        assert_eq!(settings.stream_stale_timeout(), Duration::from_secs(120));
        assert_eq!(settings.max_turns, 25);
    }

    #[test]
    fn test_partial_settings_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "max_turns = 5\nsystem_prompt = \"Be terse.\"\n").unwrap();
        let settings = Settings::load_from(&path).unwrap();
        assert_eq!(settings.max_turns, 5);
        assert_eq!(settings.system_prompt.as_deref(), Some("Be terse."));
        assert_eq!(settings.handshake_timeout_secs, 30);
    }

    #[test]
    fn test_malformed_settings_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "max_turns = \"many\"").unwrap();
        assert!(matches!(
            Settings::load_from(&path),
            Err(ConfigError::Settings { .. })
        ));
    }

    #[test]
    fn test_field_errors_display() {
        let mut errors = FieldErrors::new();
        errors.add("name", "Name is required");
        errors.add("model", "Model is required");
        errors.add("name", "ignored second message");
        assert_eq!(errors.get("name"), Some("Name is required"));
        assert_eq!(
            errors.to_string(),
            "model: Model is required; name: Name is required"
        );
        assert!(errors.into_result().is_err());
    }
}
