//! The execution engine seam: what runs the agent and how it reports progress.

use crate::config::Settings;
use crate::provider::{LlmApi, Message, Usage};
use crate::tool::Tool;
use async_trait::async_trait;
use futures::stream::BoxStream;
use serde_json::Value;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Output of one node within a step.
///
/// `update` is loosely shaped: a node that produced messages carries
/// `{"messages": [...]}`. Each message is an object that may hold `content`,
/// `tool_calls` (`[{id?, name, args?}]`), or `tool_call_id` with an optional
/// `status` of `"success"` or `"error"`.
#[derive(Debug, Clone, PartialEq)]
pub struct NodeOutput {
    pub node: String,
    pub update: Value,
}

impl NodeOutput {
    pub fn new(node: impl Into<String>, update: Value) -> Self {
        Self {
            node: node.into(),
            update,
        }
    }
}

/// One step of execution. May carry several node outputs, or none.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StepEvent {
    pub nodes: Vec<NodeOutput>,
}

impl StepEvent {
    pub fn single(node: impl Into<String>, update: Value) -> Self {
        Self {
            nodes: vec![NodeOutput::new(node, update)],
        }
    }
}

pub type StepStream = BoxStream<'static, crate::Result<StepEvent>>;

/// Final state of a non-streaming invocation.
#[derive(Debug, Clone, Default)]
pub struct EngineResult {
    /// Messages produced by the run, in order, excluding the input history.
    pub messages: Vec<Message>,
    pub usage: Usage,
}

impl EngineResult {
    /// Text of the last assistant message.
    pub fn final_text(&self) -> String {
        self.messages
            .iter()
            .rev()
            .find(|m| m.role == crate::provider::Role::Assistant)
            .map(Message::text_content)
            .unwrap_or_default()
    }
}

#[async_trait]
pub trait ExecutionEngine: Send + Sync {
    async fn invoke(&self, history: Vec<Message>) -> crate::Result<EngineResult>;

    /// Start a run and return its steps. Stops early once `cancel` fires.
    async fn stream(
        &self,
        history: Vec<Message>,
        cancel: CancellationToken,
    ) -> crate::Result<StepStream>;
}

/// Builds an engine once the session knows its model and tools.
pub trait EngineFactory: Send + Sync {
    fn build(
        &self,
        model: Arc<dyn LlmApi>,
        tools: Vec<Arc<dyn Tool>>,
        settings: &Settings,
    ) -> Arc<dyn ExecutionEngine>;
}
