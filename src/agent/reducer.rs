//! Turns raw execution steps into ordered, de-duplicated agent events.

use super::AgentEvent;
use super::engine::StepEvent;
use crate::transcript::ToolCallRecord;
use serde_json::Value;
use std::collections::{BTreeSet, HashSet};
use tracing::debug;
use uuid::Uuid;

/// Node whose messages carry model text and tool-call requests.
pub const MODEL_NODE: &str = "model_request";

/// State of one streaming run: calls awaiting a result and the last text seen.
///
/// A call id starts at most once per run, even after its result arrived.
#[derive(Debug, Default)]
pub struct EventStreamReducer {
    pending: BTreeSet<String>,
    started: HashSet<String>,
    last_content: String,
}

impl EventStreamReducer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_pending(&self, id: &str) -> bool {
        self.pending.contains(id)
    }

    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    pub fn apply(&mut self, step: &StepEvent) -> Vec<AgentEvent> {
        let mut events = Vec::new();
        for output in &step.nodes {
            let Some(messages) = output.update.get("messages").and_then(Value::as_array) else {
                debug!(node = %output.node, "Skipping node output without messages");
                continue;
            };
            let from_model = output.node == MODEL_NODE;
            for message in messages {
                if message.is_object() {
                    self.apply_message(message, from_model, &mut events);
                } else {
                    debug!(node = %output.node, "Skipping non-object message");
                }
            }
        }
        events
    }

    /// Report every pending call as failed with `error` and forget them.
    pub fn fail_pending(&mut self, error: &str) -> Vec<AgentEvent> {
        std::mem::take(&mut self.pending)
            .into_iter()
            .map(|id| AgentEvent::ToolCallError {
                id,
                error: error.to_string(),
            })
            .collect()
    }

    fn apply_message(&mut self, message: &Value, from_model: bool, events: &mut Vec<AgentEvent>) {
        if let Some(id) = message
            .get("tool_call_id")
            .and_then(Value::as_str)
            .filter(|id| !id.is_empty())
        {
            if self.pending.remove(id) {
                let content = stringify_content(message.get("content"));
                let failed = message.get("status").and_then(Value::as_str) == Some("error");
                events.push(if failed {
                    AgentEvent::ToolCallError {
                        id: id.to_string(),
                        error: content,
                    }
                } else {
                    AgentEvent::ToolCallComplete {
                        id: id.to_string(),
                        result: content,
                    }
                });
            } else {
                debug!(id, "Ignoring result for untracked tool call");
            }
            return;
        }

        if !from_model {
            return;
        }

        if let Some(content) = message.get("content").filter(|c| !is_empty(c)) {
            let content = stringify_content(Some(content));
            if content != self.last_content {
                match content.strip_prefix(self.last_content.as_str()) {
                    Some(suffix) => {
                        if !suffix.is_empty() {
                            events.push(AgentEvent::TextDelta(suffix.to_string()));
                        }
                    }
                    None => events.push(AgentEvent::TextDelta(content.clone())),
                }
                self.last_content = content;
            }
        }

        if let Some(calls) = message.get("tool_calls").and_then(Value::as_array) {
            for call in calls {
                self.start_call(call, events);
            }
        }
    }

    fn start_call(&mut self, call: &Value, events: &mut Vec<AgentEvent>) {
        let Some(name) = call.get("name").and_then(Value::as_str) else {
            debug!("Skipping tool call without a name");
            return;
        };
        let id = call
            .get("id")
            .and_then(Value::as_str)
            .filter(|id| !id.is_empty())
            .map_or_else(|| format!("call_{}", Uuid::new_v4()), str::to_string);
        if !self.started.insert(id.clone()) {
            return;
        }
        self.pending.insert(id.clone());
        let input = call.get("args").map(|args| match args {
            Value::String(s) => s.clone(),
            other => other.to_string(),
        });
        events.push(AgentEvent::ToolCallStart(ToolCallRecord::running(
            id, name, input,
        )));
    }
}

fn is_empty(content: &Value) -> bool {
    match content {
        Value::Null => true,
        Value::String(s) => s.is_empty(),
        Value::Array(items) => items.is_empty(),
        _ => false,
    }
}

/// Strings pass through, block arrays join their text, anything else is JSON.
fn stringify_content(content: Option<&Value>) -> String {
    match content {
        None | Some(Value::Null) => String::new(),
        Some(Value::String(s)) => s.clone(),
        Some(Value::Array(items)) if items.iter().all(|i| i.get("text").is_some()) => items
            .iter()
            .filter_map(|i| i.get("text").and_then(Value::as_str))
            .collect(),
        Some(other) => other.to_string(),
    }
}
