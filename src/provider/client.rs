//! Model handle built from a resolved provider.

use super::anthropic::AnthropicClient;
use super::config::{Protocol, ProviderConfig};
use super::error::Error;
use super::openai::OpenAIClient;
use super::types::{ChatRequest, CompletionResponse, StreamEvent};
use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::mpsc;

/// A chat model that can stream or complete.
#[async_trait]
pub trait LlmApi: Send + Sync {
    /// Id of the provider behind this model.
    fn id(&self) -> &str;
    fn model(&self) -> &str;

    /// Stream a completion into `tx`, ending with `StreamEvent::Done` on success.
    async fn stream(&self, request: ChatRequest, tx: mpsc::Sender<StreamEvent>)
    -> Result<(), Error>;

    async fn complete(&self, request: ChatRequest) -> Result<CompletionResponse, Error>;
}

#[derive(Debug, Clone)]
enum Backend {
    OpenAI(OpenAIClient),
    Anthropic(AnthropicClient),
}

/// A provider's model with its request defaults.
#[derive(Debug, Clone)]
pub struct Client {
    id: String,
    model: String,
    temperature: Option<f32>,
    max_tokens: Option<u32>,
    backend: Backend,
}

impl Client {
    pub fn from_config(config: &ProviderConfig) -> crate::Result<Self> {
        let base_url = config.base_url();
        let backend = match config.kind.protocol() {
            Some(Protocol::OpenAI) => Backend::OpenAI(OpenAIClient::new(&config.api_key, base_url)),
            Some(Protocol::Anthropic) => {
                Backend::Anthropic(AnthropicClient::new(&config.api_key, base_url)?)
            }
            None => return Err(crate::Error::ProviderUnsupported(config.name.clone())),
        };
        if config.kind.is_custom() && base_url.is_none() {
            return Err(crate::Error::Provider(Error::Build(format!(
                "custom provider {} has no base URL",
                config.name
            ))));
        }

        Ok(Self {
            id: config.id.clone(),
            model: config.model.clone(),
            temperature: config.temperature,
            max_tokens: config.max_tokens,
            backend,
        })
    }

    fn prepare(&self, mut request: ChatRequest) -> ChatRequest {
        if request.model.is_empty() {
            request.model = self.model.clone();
        }
        request.temperature = request.temperature.or(self.temperature);
        request.max_tokens = request.max_tokens.or(self.max_tokens);
        request
    }
}

#[async_trait]
impl LlmApi for Client {
    fn id(&self) -> &str {
        &self.id
    }

    fn model(&self) -> &str {
        &self.model
    }

    async fn stream(
        &self,
        request: ChatRequest,
        tx: mpsc::Sender<StreamEvent>,
    ) -> Result<(), Error> {
        let request = self.prepare(request);
        match &self.backend {
            Backend::OpenAI(client) => client.stream(request, tx).await,
            Backend::Anthropic(client) => client.stream(request, tx).await,
        }
    }

    async fn complete(&self, request: ChatRequest) -> Result<CompletionResponse, Error> {
        let request = self.prepare(request);
        match &self.backend {
            Backend::OpenAI(client) => client.complete(request).await,
            Backend::Anthropic(client) => client.complete(request).await,
        }
    }
}

/// Build the model for a resolved provider, dispatching on type and, for
/// `custom`, on protocol.
pub fn create_model(config: &ProviderConfig) -> crate::Result<Arc<dyn LlmApi>> {
    tracing::debug!(
        provider = %config.id,
        kind = config.kind.type_name(),
        model = %config.model,
        "Creating model client"
    );
    Ok(Arc::new(Client::from_config(config)?))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::{ProviderDraft, ProviderKind};

    fn config(kind: ProviderKind, base_url: Option<&str>) -> ProviderConfig {
        ProviderDraft {
            api_key: "k".into(),
            base_url: base_url.map(str::to_string),
            temperature: Some(0.2),
            ..ProviderDraft::new("P", kind, "m-1")
        }
        .into_config("p".into(), true)
    }

    #[test]
    fn test_dispatch_on_protocol() {
        let openai = Client::from_config(&config(ProviderKind::OpenAI, None)).unwrap();
        assert!(matches!(openai.backend, Backend::OpenAI(_)));

        let custom = Client::from_config(&config(
            ProviderKind::Custom {
                protocol: Protocol::Anthropic,
            },
            Some("http://localhost:9000"),
        ))
        .unwrap();
        assert!(matches!(custom.backend, Backend::Anthropic(_)));
        assert_eq!(custom.model(), "m-1");
    }

    #[test]
    fn test_unsupported_kind() {
        let err = create_model(&config(ProviderKind::Unsupported, None)).err().unwrap();
        assert!(matches!(err, crate::Error::ProviderUnsupported(_)));
    }

    #[test]
    fn test_custom_without_base_url() {
        let err = create_model(&config(
            ProviderKind::Custom {
                protocol: Protocol::OpenAI,
            },
            None,
        ))
        .err()
        .unwrap();
        assert!(matches!(err, crate::Error::Provider(Error::Build(_))));
    }

    #[test]
    fn test_prepare_fills_defaults() {
        let client = Client::from_config(&config(ProviderKind::OpenAI, None)).unwrap();
        let mut request = ChatRequest::new(vec![]);
        request.max_tokens = Some(64);
        let request = client.prepare(request);
        assert_eq!(request.model, "m-1");
        assert_eq!(request.temperature, Some(0.2));
        assert_eq!(request.max_tokens, Some(64));
    }
}
