//! Provider entries as stored in the provider document.

use super::resolver::Env;
use crate::config::{ConfigError, FieldErrors};
use serde::{Deserialize, Serialize};

/// Wire dialect a `custom` provider speaks. Entries without one speak OpenAI.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Protocol {
    #[default]
    OpenAI,
    Anthropic,
}

/// Provider family, stored as the `type` field (plus `protocol` for `custom`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ProviderKind {
    OpenAI,
    Anthropic,
    Custom {
        #[serde(default)]
        protocol: Protocol,
    },
    /// A `type` this build does not know. Kept so the rest of the document loads.
    #[serde(other)]
    Unsupported,
}

impl ProviderKind {
    pub fn type_name(&self) -> &'static str {
        match self {
            Self::OpenAI => "openai",
            Self::Anthropic => "anthropic",
            Self::Custom { .. } => "custom",
            Self::Unsupported => "unsupported",
        }
    }

    /// Prefix of the `{TYPE}_API_KEY` / `{TYPE}_BASE_URL` variables.
    pub fn env_prefix(&self) -> String {
        self.type_name().to_ascii_uppercase()
    }

    /// The dialect to speak, or `None` when the kind is unsupported.
    pub fn protocol(&self) -> Option<Protocol> {
        match self {
            Self::OpenAI => Some(Protocol::OpenAI),
            Self::Anthropic => Some(Protocol::Anthropic),
            Self::Custom { protocol } => Some(*protocol),
            Self::Unsupported => None,
        }
    }

    pub fn is_custom(&self) -> bool {
        matches!(self, Self::Custom { .. })
    }
}

/// A persisted provider.
///
/// Field names follow the document format (`apiKey`, `baseURL`, `isDefault`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProviderConfig {
    pub id: String,
    pub name: String,
    #[serde(flatten)]
    pub kind: ProviderKind,
    pub enabled: bool,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub is_default: bool,
    pub model: String,
    #[serde(default)]
    pub api_key: String,
    #[serde(rename = "baseURL", default, skip_serializing_if = "Option::is_none")]
    pub base_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
}

impl ProviderConfig {
    /// Base URL, treating an empty string as unset.
    pub fn base_url(&self) -> Option<&str> {
        self.base_url.as_deref().filter(|u| !u.trim().is_empty())
    }
}

/// User-supplied fields for creating or updating a provider.
#[derive(Debug, Clone, PartialEq)]
pub struct ProviderDraft {
    pub name: String,
    pub kind: ProviderKind,
    pub enabled: bool,
    pub model: String,
    pub api_key: String,
    pub base_url: Option<String>,
    pub temperature: Option<f32>,
    pub max_tokens: Option<u32>,
}

impl ProviderDraft {
    pub fn new(name: impl Into<String>, kind: ProviderKind, model: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            kind,
            enabled: true,
            model: model.into(),
            api_key: String::new(),
            base_url: None,
            temperature: None,
            max_tokens: None,
        }
    }

    /// Check every field and report all problems at once.
    ///
    /// An empty API key is accepted when `{TYPE}_API_KEY` is set in `env`.
    pub fn validate(&self, env: &dyn Env) -> Result<(), ConfigError> {
        let mut errors = FieldErrors::new();

        if self.name.trim().is_empty() {
            errors.add("name", "Name is required");
        }
        if self.model.trim().is_empty() {
            errors.add("model", "Model is required");
        }
        if self.kind == ProviderKind::Unsupported {
            errors.add("type", "Unsupported provider type");
        }
        if self.api_key.trim().is_empty() {
            let var = format!("{}_API_KEY", self.kind.env_prefix());
            if env.var(&var).is_none() {
                errors.add("apiKey", format!("API key is required (or set {var})"));
            }
        }

        let base_url = self.base_url.as_deref().map(str::trim).filter(|u| !u.is_empty());
        match base_url {
            None if self.kind.is_custom() => {
                errors.add("baseURL", "Base URL is required for custom providers");
            }
            Some(url) if url::Url::parse(url).is_err() => {
                errors.add("baseURL", "Invalid URL format");
            }
            _ => {}
        }

        if let Some(t) = self.temperature
            && !(0.0..=2.0).contains(&t)
        {
            errors.add("temperature", "Temperature must be between 0 and 2");
        }
        if self.max_tokens == Some(0) {
            errors.add("maxTokens", "Max tokens must be a positive number");
        }

        errors.into_result()
    }

    pub(crate) fn into_config(self, id: String, is_default: bool) -> ProviderConfig {
        ProviderConfig {
            id,
            name: self.name.trim().to_string(),
            kind: self.kind,
            enabled: self.enabled,
            is_default,
            model: self.model.trim().to_string(),
            api_key: self.api_key.trim().to_string(),
            base_url: self
                .base_url
                .map(|u| u.trim().to_string())
                .filter(|u| !u.is_empty()),
            temperature: self.temperature,
            max_tokens: self.max_tokens,
        }
    }
}

impl From<&ProviderConfig> for ProviderDraft {
    fn from(config: &ProviderConfig) -> Self {
        Self {
            name: config.name.clone(),
            kind: config.kind,
            enabled: config.enabled,
            model: config.model.clone(),
            api_key: config.api_key.clone(),
            base_url: config.base_url.clone(),
            temperature: config.temperature,
            max_tokens: config.max_tokens,
        }
    }
}
