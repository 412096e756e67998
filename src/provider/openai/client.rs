//! Chat-completions HTTP client.

use super::convert;
use super::response::OpenAIResponse;
use super::stream::StreamChunk;
use crate::provider::error::Error;
use crate::provider::http::{AuthConfig, HttpClient, SseParser};
use crate::provider::stream::ToolCallAccumulator;
use crate::provider::types::{ChatRequest, CompletionResponse, StreamEvent};
use futures::StreamExt;
use tokio::sync::mpsc;

pub const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";

#[derive(Debug, Clone)]
pub struct OpenAIClient {
    http: HttpClient,
}

impl OpenAIClient {
    pub fn new(api_key: impl Into<String>, base_url: Option<&str>) -> Self {
        let http = HttpClient::new(
            base_url.unwrap_or(DEFAULT_BASE_URL),
            AuthConfig::Bearer(api_key.into()),
        );
        Self { http }
    }

    pub async fn complete(&self, request: ChatRequest) -> Result<CompletionResponse, Error> {
        let api_request = convert::build_request(&request, false);

        tracing::debug!(
            base_url = %self.http.base_url(),
            model = %api_request.model,
            messages = api_request.messages.len(),
            tools = api_request.tools.as_ref().map_or(0, Vec::len),
            "OpenAI request"
        );

        let response: OpenAIResponse = self
            .http
            .post_json("/chat/completions", &api_request)
            .await?;
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
            "OpenAI stream request"
        );

        let stream = self
            .http
            .post_stream("/chat/completions", &api_request)
            .await?;
        futures::pin_mut!(stream);

        let mut parser = SseParser::new();
        let mut tools = ToolCallAccumulator::new();

        'outer: while let Some(chunk) = stream.next().await {
            let chunk = chunk.map_err(|e| Error::Stream(e.to_string()))?;
            for event in parser.feed(&chunk) {
                if event.data == "[DONE]" {
                    break 'outer;
                }
                if event.data.is_empty() {
                    continue;
                }
                match serde_json::from_str::<StreamChunk>(&event.data) {
                    Ok(chunk) => convert::handle_chunk(chunk, &tx, &mut tools).await,
                    Err(e) => tracing::debug!("Skipping unparseable chunk: {e}"),
                }
            }
        }

        // Some compatible servers close the stream without a finish_reason.
        tools.drain_into(&tx).await;
        let _ = tx.send(StreamEvent::Done).await;
        Ok(())
    }
}
