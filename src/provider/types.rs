//! Wire-neutral request, message and stream types shared by the model clients.

use serde::{Deserialize, Serialize};
use std::borrow::Cow;
use std::sync::Arc;

/// Incremental output of a streaming completion.
#[derive(Debug, Clone)]
pub enum StreamEvent {
    TextDelta(String),
    ToolCall(ToolCallEvent),
    Usage(Usage),
    Done,
    Error(String),
}

#[derive(Debug, Clone, PartialEq)]
pub struct ToolCallEvent {
    pub id: String,
    pub name: String,
    pub arguments: serde_json::Value,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Usage {
    pub input_tokens: u32,
    pub output_tokens: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: Arc<Vec<ContentBlock>>,
}

impl Message {
    pub fn user(text: impl Into<String>) -> Self {
        Self::text(Role::User, text)
    }

    pub fn assistant(text: impl Into<String>) -> Self {
        Self::text(Role::Assistant, text)
    }

    pub fn system(text: impl Into<String>) -> Self {
        Self::text(Role::System, text)
    }

    fn text(role: Role, text: impl Into<String>) -> Self {
        Self {
            role,
            content: Arc::new(vec![ContentBlock::Text { text: text.into() }]),
        }
    }

    /// Concatenated text blocks of the message.
    pub fn text_content(&self) -> String {
        self.content
            .iter()
            .filter_map(|b| match b {
                ContentBlock::Text { text } => Some(text.as_str()),
                _ => None,
            })
            .collect::<Vec<_>>()
            .join("")
    }

    pub fn tool_calls(&self) -> impl Iterator<Item = (&str, &str, &serde_json::Value)> {
        self.content.iter().filter_map(|b| match b {
            ContentBlock::ToolCall {
                id,
                name,
                arguments,
            } => Some((id.as_str(), name.as_str(), arguments)),
            _ => None,
        })
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    System,
    User,
    Assistant,
    ToolResult,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ContentBlock {
    #[serde(rename = "text")]
    Text { text: String },
    #[serde(rename = "tool_call")]
    ToolCall {
        id: String,
        name: String,
        arguments: serde_json::Value,
    },
    #[serde(rename = "tool_result")]
    ToolResult {
        tool_call_id: String,
        content: String,
        is_error: bool,
    },
}

#[derive(Debug, Clone)]
pub struct ChatRequest {
    pub model: String,
    pub messages: Arc<Vec<Message>>,
    pub system: Option<Cow<'static, str>>,
    pub tools: Arc<Vec<ToolDefinition>>,
    pub max_tokens: Option<u32>,
    pub temperature: Option<f32>,
}

impl ChatRequest {
    pub fn new(messages: impl Into<Arc<Vec<Message>>>) -> Self {
        Self {
            model: String::new(),
            messages: messages.into(),
            system: None,
            tools: Arc::new(Vec::new()),
            max_tokens: None,
            temperature: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ToolDefinition {
    pub name: String,
    pub description: String,
    pub parameters: serde_json::Value,
}

/// Result of a non-streaming completion.
#[derive(Debug, Clone)]
pub struct CompletionResponse {
    pub message: Message,
    pub usage: Usage,
}

/// Collects a tool call whose arguments arrive as JSON fragments.
#[derive(Debug, Default)]
pub struct ToolBuilder {
    pub id: Option<String>,
    pub name: Option<String>,
    pub argument_parts: Vec<String>,
}

impl ToolBuilder {
    pub fn with_id_name(id: String, name: String) -> Self {
        Self {
            id: Some(id),
            name: Some(name),
            argument_parts: Vec::new(),
        }
    }

    pub fn push(&mut self, part: impl Into<String>) {
        self.argument_parts.push(part.into());
    }

    /// Assemble the call. A missing id is left empty for the caller to assign;
    /// a missing name drops the call.
    pub fn finish(self) -> Option<ToolCallEvent> {
        let name = self.name?;
        let raw = self.argument_parts.concat();
        let arguments = if raw.trim().is_empty() {
            serde_json::Value::Object(serde_json::Map::new())
        } else {
            serde_json::from_str(&raw)
                .inspect_err(|e| tracing::warn!(tool = %name, "Malformed tool arguments: {e}"))
                .unwrap_or(serde_json::Value::Null)
        };
        Some(ToolCallEvent {
            id: self.id.unwrap_or_default(),
            name,
            arguments,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builder_joins_fragments() {
        let mut builder = ToolBuilder::with_id_name("call_1".into(), "search".into());
        builder.push("{\"q\":");
        builder.push("\"rust\"}");
        let call = builder.finish().unwrap();
        assert_eq!(call.id, "call_1");
        assert_eq!(call.arguments, serde_json::json!({"q": "rust"}));
    }

    #[test]
    fn test_builder_without_arguments() {
        let builder = ToolBuilder::with_id_name("call_1".into(), "now".into());
        let call = builder.finish().unwrap();
        assert_eq!(call.arguments, serde_json::json!({}));
    }

    #[test]
    fn test_builder_without_name() {
        let builder = ToolBuilder {
            id: Some("x".into()),
            ..Default::default()
        };
        assert!(builder.finish().is_none());
    }

    #[test]
    fn test_text_content_skips_tool_blocks() {
        let message = Message {
            role: Role::Assistant,
            content: Arc::new(vec![
                ContentBlock::Text { text: "a".into() },
                ContentBlock::ToolCall {
                    id: "1".into(),
                    name: "t".into(),
                    arguments: serde_json::Value::Null,
                },
                ContentBlock::Text { text: "b".into() },
            ]),
        };
        assert_eq!(message.text_content(), "ab");
        assert_eq!(message.tool_calls().count(), 1);
    }
}
