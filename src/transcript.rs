//! Caller-side conversation model that agent events are applied to.

use crate::agent::AgentEvent;
use crate::provider::{self, ContentBlock};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use uuid::Uuid;

/// Milliseconds since the Unix epoch.
pub fn now_millis() -> i64 {
    Utc::now().timestamp_millis()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
    System,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ToolStatus {
    Running,
    Success,
    Error,
}

/// One tool invocation as shown to the user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolCallRecord {
    pub id: String,
    pub name: String,
    pub status: ToolStatus,
    pub start_time: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end_time: Option<i64>,
    /// Arguments as sent by the model, stringified.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub input: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<String>,
}

impl ToolCallRecord {
    pub fn running(id: impl Into<String>, name: impl Into<String>, input: Option<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            status: ToolStatus::Running,
            start_time: now_millis(),
            end_time: None,
            input,
            output: None,
        }
    }

    fn finish(&mut self, status: ToolStatus, output: &str) {
        self.status = status;
        self.end_time = Some(now_millis());
        self.output = Some(output.to_string());
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum MessagePart {
    Text { content: String },
    ToolCall { tool_call: ToolCallRecord },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    pub id: String,
    pub role: Role,
    pub parts: Vec<MessagePart>,
    pub timestamp: i64,
    #[serde(default)]
    pub is_streaming: bool,
}

impl Message {
    fn new(role: Role, parts: Vec<MessagePart>, is_streaming: bool) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            role,
            parts,
            timestamp: now_millis(),
            is_streaming,
        }
    }

    /// Text parts joined in order.
    pub fn text(&self) -> String {
        self.parts
            .iter()
            .filter_map(|p| match p {
                MessagePart::Text { content } => Some(content.as_str()),
                MessagePart::ToolCall { .. } => None,
            })
            .collect()
    }

    pub fn tool_call(&self, id: &str) -> Option<&ToolCallRecord> {
        self.parts.iter().find_map(|p| match p {
            MessagePart::ToolCall { tool_call } if tool_call.id == id => Some(tool_call),
            _ => None,
        })
    }

    fn tool_call_mut(&mut self, id: &str) -> Option<&mut ToolCallRecord> {
        self.parts.iter_mut().find_map(|p| match p {
            MessagePart::ToolCall { tool_call } if tool_call.id == id => Some(tool_call),
            _ => None,
        })
    }
}

/// An ordered conversation. Streaming messages only grow or mutate in place.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Transcript {
    messages: Vec<Message>,
}

impl Transcript {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    pub fn message(&self, id: &str) -> Option<&Message> {
        self.messages.iter().find(|m| m.id == id)
    }

    pub fn push_user(&mut self, text: impl Into<String>) -> &Message {
        self.push(Role::User, text.into())
    }

    pub fn push_system(&mut self, text: impl Into<String>) -> &Message {
        self.push(Role::System, text.into())
    }

    fn push(&mut self, role: Role, content: String) -> &Message {
        let parts = vec![MessagePart::Text { content }];
        self.messages.push(Message::new(role, parts, false));
        let idx = self.messages.len() - 1;
        &self.messages[idx]
    }

    /// Open an empty streaming assistant message and return its id.
    pub fn start_assistant(&mut self) -> String {
        let message = Message::new(Role::Assistant, Vec::new(), true);
        let id = message.id.clone();
        self.messages.push(message);
        id
    }

    /// Apply one agent event to the message `id`.
    ///
    /// Returns false when the message is unknown or the event named a tool
    /// call the message does not hold.
    pub fn apply(&mut self, id: &str, event: &AgentEvent) -> bool {
        let Some(message) = self.messages.iter_mut().find(|m| m.id == id) else {
            return false;
        };
        match event {
            AgentEvent::TextDelta(delta) => {
                if let Some(MessagePart::Text { content }) = message.parts.last_mut() {
                    content.push_str(delta);
                } else {
                    message.parts.push(MessagePart::Text {
                        content: delta.clone(),
                    });
                }
                true
            }
            AgentEvent::ToolCallStart(record) => {
                message.parts.push(MessagePart::ToolCall {
                    tool_call: record.clone(),
                });
                true
            }
            AgentEvent::ToolCallComplete { id, result } => match message.tool_call_mut(id) {
                Some(record) => {
                    record.finish(ToolStatus::Success, result);
                    true
                }
                None => false,
            },
            AgentEvent::ToolCallError { id, error } => match message.tool_call_mut(id) {
                Some(record) => {
                    record.finish(ToolStatus::Error, error);
                    true
                }
                None => false,
            },
        }
    }

    pub fn finish_streaming(&mut self, id: &str) {
        if let Some(message) = self.messages.iter_mut().find(|m| m.id == id) {
            message.is_streaming = false;
        }
    }

    /// Convert to the engine's message form.
    ///
    /// Finished tool calls are replayed as a call on the assistant turn followed
    /// by a tool-result message. Calls still running are dropped.
    pub fn to_chat_history(&self) -> Vec<provider::Message> {
        let mut history = Vec::new();
        for message in &self.messages {
            match message.role {
                Role::User => history.push(provider::Message::user(message.text())),
                Role::System => history.push(provider::Message::system(message.text())),
                Role::Assistant => replay_assistant(message, &mut history),
            }
        }
        history
    }
}

fn replay_assistant(message: &Message, history: &mut Vec<provider::Message>) {
    let mut blocks = Vec::new();
    let mut results = Vec::new();

    for part in &message.parts {
        match part {
            MessagePart::Text { content } if !content.is_empty() => {
                if !results.is_empty() {
                    flush(history, &mut blocks, &mut results);
                }
                blocks.push(ContentBlock::Text {
                    text: content.clone(),
                });
            }
            MessagePart::Text { .. } => {}
            MessagePart::ToolCall { tool_call } if tool_call.status != ToolStatus::Running => {
                blocks.push(ContentBlock::ToolCall {
                    id: tool_call.id.clone(),
                    name: tool_call.name.clone(),
                    arguments: parse_input(tool_call.input.as_deref()),
                });
                results.push(ContentBlock::ToolResult {
                    tool_call_id: tool_call.id.clone(),
                    content: tool_call.output.clone().unwrap_or_default(),
                    is_error: tool_call.status == ToolStatus::Error,
                });
            }
            MessagePart::ToolCall { .. } => {}
        }
    }
    flush(history, &mut blocks, &mut results);
}

fn flush(
    history: &mut Vec<provider::Message>,
    blocks: &mut Vec<ContentBlock>,
    results: &mut Vec<ContentBlock>,
) {
    if !blocks.is_empty() {
        history.push(provider::Message {
            role: provider::Role::Assistant,
            content: Arc::new(std::mem::take(blocks)),
        });
    }
    if !results.is_empty() {
        history.push(provider::Message {
            role: provider::Role::ToolResult,
            content: Arc::new(std::mem::take(results)),
        });
    }
}

fn parse_input(input: Option<&str>) -> serde_json::Value {
    match input {
        None => serde_json::json!({}),
        Some(raw) => serde_json::from_str(raw)
            .unwrap_or_else(|_| serde_json::Value::String(raw.to_string())),
    }
}
