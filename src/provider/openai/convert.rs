//! Conversion between the shared types and the chat-completions wire format.

use super::request::{
    FunctionCall, FunctionDefinition, OpenAIMessage, OpenAIRequest, OpenAITool, StreamOptions,
    ToolCall,
};
use super::response::OpenAIResponse;
use super::stream::StreamChunk;
use crate::provider::stream::ToolCallAccumulator;
use crate::provider::types::{
    ChatRequest, ContentBlock, Message, Role, StreamEvent, ToolBuilder, ToolDefinition, Usage,
};
use std::sync::Arc;
use tokio::sync::mpsc;

pub(crate) fn build_request(request: &ChatRequest, stream: bool) -> OpenAIRequest {
    let mut messages = Vec::with_capacity(request.messages.len() + 1);

    if let Some(system) = &request.system {
        messages.push(OpenAIMessage {
            role: "system",
            content: Some(system.to_string()),
            tool_calls: None,
            tool_call_id: None,
        });
    }

    for msg in request.messages.iter() {
        match msg.role {
            Role::System | Role::User => messages.push(OpenAIMessage {
                role: if msg.role == Role::System { "system" } else { "user" },
                content: Some(msg.text_content()),
                tool_calls: None,
                tool_call_id: None,
            }),
            Role::Assistant => {
                let text = msg.text_content();
                let tool_calls: Vec<ToolCall> = msg
                    .tool_calls()
                    .map(|(id, name, arguments)| ToolCall {
                        id: id.to_string(),
                        call_type: "function",
                        function: FunctionCall {
                            name: name.to_string(),
                            arguments: arguments.to_string(),
                        },
                    })
                    .collect();
                messages.push(OpenAIMessage {
                    role: "assistant",
                    content: (!text.is_empty() || tool_calls.is_empty()).then_some(text),
                    tool_calls: (!tool_calls.is_empty()).then_some(tool_calls),
                    tool_call_id: None,
                });
            }
            Role::ToolResult => {
                for block in msg.content.iter() {
                    if let ContentBlock::ToolResult {
                        tool_call_id,
                        content,
                        ..
                    } = block
                    {
                        messages.push(OpenAIMessage {
                            role: "tool",
                            content: Some(content.clone()),
                            tool_calls: None,
                            tool_call_id: Some(tool_call_id.clone()),
                        });
                    }
                }
            }
        }
    }

    let tools = (!request.tools.is_empty())
        .then(|| request.tools.iter().map(convert_tool).collect());

    OpenAIRequest {
        model: request.model.clone(),
        messages,
        tools,
        max_tokens: request.max_tokens,
        temperature: request.temperature,
        stream,
        stream_options: stream.then_some(StreamOptions {
            include_usage: true,
        }),
    }
}

fn convert_tool(tool: &ToolDefinition) -> OpenAITool {
    OpenAITool {
        tool_type: "function",
        function: FunctionDefinition {
            name: tool.name.clone(),
            description: tool.description.clone(),
            parameters: tool.parameters.clone(),
        },
    }
}

pub(crate) fn convert_response(response: OpenAIResponse) -> (Message, Usage) {
    let mut blocks = Vec::new();

    if let Some(choice) = response.choices.into_iter().next() {
        if let Some(text) = choice.message.content
            && !text.is_empty()
        {
            blocks.push(ContentBlock::Text { text });
        }
        for tc in choice.message.tool_calls.unwrap_or_default() {
            let mut builder = ToolBuilder::with_id_name(tc.id, tc.function.name);
            builder.push(tc.function.arguments);
            if let Some(call) = builder.finish() {
                blocks.push(ContentBlock::ToolCall {
                    id: call.id,
                    name: call.name,
                    arguments: call.arguments,
                });
            }
        }
    }

    let usage = response
        .usage
        .map(|u| Usage {
            input_tokens: u.prompt_tokens,
            output_tokens: u.completion_tokens,
        })
        .unwrap_or_default();

    (
        Message {
            role: Role::Assistant,
            content: Arc::new(blocks),
        },
        usage,
    )
}

/// Forward one chunk, flushing assembled tool calls when the choice finishes.
pub(crate) async fn handle_chunk(
    chunk: StreamChunk,
    tx: &mpsc::Sender<StreamEvent>,
    tools: &mut ToolCallAccumulator,
) {
    for choice in chunk.choices {
        if let Some(text) = choice.delta.content
            && !text.is_empty()
        {
            let _ = tx.send(StreamEvent::TextDelta(text)).await;
        }

        for tc in choice.delta.tool_calls.unwrap_or_default() {
            let builder = tools.get_or_insert(tc.index);
            if let Some(id) = tc.id {
                builder.id = Some(id);
            }
            if let Some(function) = tc.function {
                if let Some(name) = function.name {
                    builder.name = Some(name);
                }
                if let Some(args) = function.arguments {
                    builder.push(args);
                }
            }
        }

        if choice.finish_reason.is_some() {
            tools.drain_into(tx).await;
        }
    }

    if let Some(usage) = chunk.usage {
        let _ = tx
            .send(StreamEvent::Usage(Usage {
                input_tokens: usage.prompt_tokens,
                output_tokens: usage.completion_tokens,
            }))
            .await;
    }
}
