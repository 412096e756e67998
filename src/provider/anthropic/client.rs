//! Messages API HTTP client.

use super::convert;
use super::response::AnthropicResponse;
use super::stream::StreamEvent as AnthropicStreamEvent;
use crate::provider::error::Error;
use crate::provider::http::{AuthConfig, HttpClient, SseParser};
use crate::provider::stream::ToolCallAccumulator;
use crate::provider::types::{ChatRequest, CompletionResponse, StreamEvent};
use futures::StreamExt;
use tokio::sync::mpsc;

pub const DEFAULT_BASE_URL: &str = "https://api.anthropic.com";
const API_VERSION: &str = "2023-06-01";

#[derive(Debug, Clone)]
pub struct AnthropicClient {
    http: HttpClient,
}

impl AnthropicClient {
    /// `base_url` is the API root without the `/v1` suffix.
    pub fn new(api_key: impl Into<String>, base_url: Option<&str>) -> Result<Self, Error> {
        let base = base_url
            .map(|u| u.trim_end_matches('/').trim_end_matches("/v1"))
            .unwrap_or(DEFAULT_BASE_URL);
        let http = HttpClient::new(
            base,
            AuthConfig::ApiKey {
                header: "x-api-key".to_string(),
                key: api_key.into(),
            },
        )
        .with_header("anthropic-version", API_VERSION)?;
        Ok(Self { http })
    }

    pub async fn complete(&self, request: ChatRequest) -> Result<CompletionResponse, Error> {
        let api_request = convert::build_request(&request, false);

        tracing::debug!(
            base_url = %self.http.base_url(),
            model = %api_request.model,
            messages = api_request.messages.len(),
            tools = api_request.tools.as_ref().map_or(0, Vec::len),
            "Anthropic request"
        );

        let response: AnthropicResponse =
            self.http.post_json("/v1/messages", &api_request).await?;
        let (message, usage) = convert::convert_response(response);
        Ok(CompletionResponse { message, usage })
    }

    pub async fn stream(
        &self,
        request: ChatRequest,
        tx: mpsc::Sender<StreamEvent>,
    ) -> Result<(), Error> {
        let api_request = convert::build_request(&request, true);

        tracing::debug!(
            base_url = %self.http.base_url(),
            model = %api_request.model,
            messages = api_request.messages.len(),
            tools = api_request.tools.as_ref().map_or(0, Vec::len),
            "Anthropic stream request"
        );

        let stream = self.http.post_stream("/v1/messages", &api_request).await?;
        futures::pin_mut!(stream);

        let mut parser = SseParser::new();
        let mut tools = ToolCallAccumulator::new();

        while let Some(chunk) = stream.next().await {
            let chunk = chunk.map_err(|e| Error::Stream(e.to_string()))?;
            for event in parser.feed(&chunk) {
                if event.data.is_empty() {
                    continue;
                }
                match serde_json::from_str::<AnthropicStreamEvent>(&event.data) {
                    Ok(event) => {
                        if let Err(e) = convert::handle_stream_event(event, &tx, &mut tools).await
                        {
                            let _ = tx.send(StreamEvent::Error(e.to_string())).await;
                            return Err(e);
                        }
                    }
                    Err(e) => tracing::debug!("Skipping unparseable Anthropic event: {e}"),
                }
            }
        }

        let _ = tx.send(StreamEvent::Done).await;
        Ok(())
    }
}
