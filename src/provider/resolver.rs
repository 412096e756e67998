//! Picks the provider a session talks to.
//!
//! Precedence: the enabled provider flagged default, then the first enabled
//! provider, then one synthesized from `OPENAI_*` / `ANTHROPIC_*` variables.

use super::config::{ProviderConfig, ProviderKind};
use crate::config::ProviderStore;
use crate::error::{Error, Result};
use std::collections::HashMap;
use std::sync::Arc;

pub const DEFAULT_OPENAI_MODEL: &str = "gpt-4o";
pub const DEFAULT_ANTHROPIC_MODEL: &str = "claude-sonnet-4-20250514";

/// Read access to environment variables.
pub trait Env: Send + Sync {
    /// Value of `key`; empty values count as unset.
    fn var(&self, key: &str) -> Option<String>;
}

/// The process environment.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemEnv;

impl Env for SystemEnv {
    fn var(&self, key: &str) -> Option<String> {
        std::env::var(key).ok().filter(|v| !v.is_empty())
    }
}

/// A fixed set of variables.
#[derive(Debug, Clone, Default)]
pub struct MapEnv(HashMap<String, String>);

impl MapEnv {
    pub fn set(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.0.insert(key.into(), value.into());
    }
}

impl<K: Into<String>, V: Into<String>, const N: usize> From<[(K, V); N]> for MapEnv {
    fn from(pairs: [(K, V); N]) -> Self {
        Self(pairs.into_iter().map(|(k, v)| (k.into(), v.into())).collect())
    }
}

impl Env for MapEnv {
    fn var(&self, key: &str) -> Option<String> {
        self.0.get(key).filter(|v| !v.is_empty()).cloned()
    }
}

/// The default among `providers`: the enabled one flagged default, else the
/// first enabled one.
pub fn select_default(providers: &[ProviderConfig]) -> Option<&ProviderConfig> {
    let mut enabled = providers.iter().filter(|p| p.enabled);
    let first = enabled.clone().next();
    enabled.find(|p| p.is_default).or(first)
}

#[derive(Clone)]
pub struct ProviderResolver {
    providers: ProviderStore,
    env: Arc<dyn Env>,
}

impl ProviderResolver {
    pub fn new(providers: ProviderStore, env: Arc<dyn Env>) -> Self {
        Self { providers, env }
    }

    #[must_use]
    pub fn with_env(self, env: Arc<dyn Env>) -> Self {
        Self { env, ..self }
    }

    pub fn providers(&self) -> &ProviderStore {
        &self.providers
    }

    pub fn default_provider(&self) -> Option<ProviderConfig> {
        select_default(&self.providers.providers()).cloned()
    }

    /// Synthesize a provider from the environment, OpenAI first.
    pub fn provider_from_env(&self) -> Option<ProviderConfig> {
        let candidates = [
            (ProviderKind::OpenAI, "env-openai", "OpenAI (from env)", DEFAULT_OPENAI_MODEL),
            (
                ProviderKind::Anthropic,
                "env-anthropic",
                "Anthropic (from env)",
                DEFAULT_ANTHROPIC_MODEL,
            ),
        ];

        candidates.into_iter().find_map(|(kind, id, name, model)| {
            let prefix = kind.env_prefix();
            let api_key = self.env.var(&format!("{prefix}_API_KEY"))?;
            Some(ProviderConfig {
                id: id.to_string(),
                name: name.to_string(),
                kind,
                enabled: true,
                is_default: true,
                model: self
                    .env
                    .var(&format!("{prefix}_MODEL"))
                    .unwrap_or_else(|| model.to_string()),
                api_key,
                base_url: self.env.var(&format!("{prefix}_BASE_URL")),
                temperature: None,
                max_tokens: None,
            })
        })
    }

    /// Fill an empty API key and base URL from `{TYPE}_API_KEY` / `{TYPE}_BASE_URL`.
    ///
    /// Values present in `config` always win. `custom` providers never take a
    /// base URL from the environment.
    pub fn resolve_provider_settings(&self, config: &ProviderConfig) -> ProviderConfig {
        let mut resolved = config.clone();
        let prefix = config.kind.env_prefix();

        if resolved.api_key.trim().is_empty()
            && let Some(key) = self.env.var(&format!("{prefix}_API_KEY"))
        {
            resolved.api_key = key;
        }
        if resolved.base_url().is_none()
            && !config.kind.is_custom()
            && let Some(url) = self.env.var(&format!("{prefix}_BASE_URL"))
        {
            resolved.base_url = Some(url);
        }

        resolved
    }

    pub fn has_valid_provider(&self) -> bool {
        self.default_provider().is_some() || self.provider_from_env().is_some()
    }

    /// The provider to use, fully resolved.
    pub fn resolve(&self) -> Result<ProviderConfig> {
        if let Some(config) = self.default_provider() {
            tracing::debug!(provider = %config.id, "Using configured provider");
            return Ok(self.resolve_provider_settings(&config));
        }
        if let Some(config) = self.provider_from_env() {
            tracing::debug!(provider = %config.id, "Using provider from environment");
            return Ok(config);
        }
        Err(Error::NoProviderConfigured)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{MemoryStore, PROVIDERS_KEY};
    use crate::provider::Protocol;
    use serde_json::json;

    fn provider(id: &str, enabled: bool, is_default: bool) -> ProviderConfig {
        ProviderConfig {
            id: id.into(),
            name: id.into(),
            kind: ProviderKind::OpenAI,
            enabled,
            is_default,
            model: "gpt-4o-mini".into(),
            api_key: String::new(),
            base_url: None,
            temperature: None,
            max_tokens: None,
        }
    }

    fn resolver(providers: &[ProviderConfig], env: MapEnv) -> ProviderResolver {
        let store = MemoryStore::with(
            PROVIDERS_KEY,
            json!({"version": "1.0", "providers": providers}),
        );
        ProviderResolver::new(ProviderStore::new(Arc::new(store)), Arc::new(env))
    }

    #[test]
    fn test_select_default_prefers_flag() {
        let providers = [provider("a", true, false), provider("b", true, true)];
        assert_eq!(select_default(&providers).unwrap().id, "b");
    }

    #[test]
    fn test_select_default_ignores_disabled() {
        let providers = [
            provider("a", false, true),
            provider("b", true, false),
            provider("c", true, false),
        ];
        assert_eq!(select_default(&providers).unwrap().id, "b");
        assert!(select_default(&[provider("x", false, true)]).is_none());
        assert!(select_default(&[]).is_none());
    }

    #[test]
    fn test_env_prefers_openai() {
        let env = MapEnv::from([
            ("OPENAI_API_KEY", "sk-o"),
            ("ANTHROPIC_API_KEY", "sk-a"),
            ("OPENAI_BASE_URL", "http://proxy/v1"),
        ]);
        let config = resolver(&[], env).provider_from_env().unwrap();
        assert_eq!(config.id, "env-openai");
        assert_eq!(config.name, "OpenAI (from env)");
        assert_eq!(config.model, DEFAULT_OPENAI_MODEL);
        assert_eq!(config.base_url.as_deref(), Some("http://proxy/v1"));
    }

    #[test]
    fn test_env_anthropic_with_model_override() {
        let env = MapEnv::from([("ANTHROPIC_API_KEY", "sk-a"), ("ANTHROPIC_MODEL", "claude-x")]);
        let config = resolver(&[], env).provider_from_env().unwrap();
        assert_eq!(config.id, "env-anthropic");
        assert_eq!(config.kind, ProviderKind::Anthropic);
        assert_eq!(config.model, "claude-x");
        assert!(config.base_url.is_none());
    }

    #[test]
    fn test_backfill_never_overwrites() {
        let env = MapEnv::from([("OPENAI_API_KEY", "from-env"), ("OPENAI_BASE_URL", "http://env")]);
        let r = resolver(&[], env);

        let mut set = provider("a", true, true);
        set.api_key = "sk-file".into();
        set.base_url = Some("http://file".into());
        let resolved = r.resolve_provider_settings(&set);
        assert_eq!(resolved.api_key, "sk-file");
        assert_eq!(resolved.base_url.as_deref(), Some("http://file"));

        let resolved = r.resolve_provider_settings(&provider("b", true, true));
        assert_eq!(resolved.api_key, "from-env");
        assert_eq!(resolved.base_url.as_deref(), Some("http://env"));
    }

    #[test]
    fn test_custom_takes_key_but_not_base_url_from_env() {
        let env = MapEnv::from([("CUSTOM_API_KEY", "k"), ("CUSTOM_BASE_URL", "http://env")]);
        let mut custom = provider("c", true, true);
        custom.kind = ProviderKind::Custom {
            protocol: Protocol::OpenAI,
        };
        let resolved = resolver(&[], env).resolve_provider_settings(&custom);
        assert_eq!(resolved.api_key, "k");
        assert!(resolved.base_url.is_none());
    }

    #[test]
    fn test_resolve_precedence() {
        let env = MapEnv::from([("OPENAI_API_KEY", "sk-env")]);
        let r = resolver(&[provider("file", true, false)], env.clone());
        assert_eq!(r.resolve().unwrap().id, "file");

        let r = resolver(&[provider("off", false, true)], env);
        assert_eq!(r.resolve().unwrap().id, "env-openai");
        assert!(r.has_valid_provider());

        let r = resolver(&[], MapEnv::default());
        assert!(!r.has_valid_provider());
        assert!(r.resolve().unwrap_err().is_setup_required());
    }
}
