//! Conversion between the shared types and the Messages API wire format.

use super::request::{AnthropicMessage, AnthropicRequest, AnthropicTool, ContentBlock};
use super::response::{AnthropicResponse, ResponseBlock};
use super::stream::{ContentBlockInfo, ContentDelta, StreamEvent as AnthropicStreamEvent};
use crate::provider::error::Error;
use crate::provider::stream::ToolCallAccumulator;
use crate::provider::types::{
    ChatRequest, ContentBlock as SharedBlock, Message, Role, StreamEvent, ToolBuilder, Usage,
};
use std::sync::Arc;
use tokio::sync::mpsc;

/// Used when neither the request nor the provider sets a limit; the API requires one.
pub(crate) const DEFAULT_MAX_TOKENS: u32 = 8192;

pub(crate) fn build_request(request: &ChatRequest, stream: bool) -> AnthropicRequest {
    let mut system = Vec::new();
    let mut messages = Vec::new();

    for msg in request.messages.iter() {
        let (role, content): (&'static str, Vec<ContentBlock>) = match msg.role {
            Role::System => {
                system.push(msg.text_content());
                continue;
            }
            Role::User => ("user", text_blocks(&msg.content)),
            Role::Assistant => {
                let mut blocks = text_blocks(&msg.content);
                blocks.extend(msg.tool_calls().map(|(id, name, input)| ContentBlock::ToolUse {
                    id: id.to_string(),
                    name: name.to_string(),
                    input: input.clone(),
                }));
                ("assistant", blocks)
            }
            Role::ToolResult => {
                let blocks = msg
                    .content
                    .iter()
                    .filter_map(|b| match b {
                        SharedBlock::ToolResult {
                            tool_call_id,
                            content,
                            is_error,
                        } => Some(ContentBlock::ToolResult {
                            tool_use_id: tool_call_id.clone(),
                            content: content.clone(),
                            is_error: *is_error,
                        }),
                        _ => None,
                    })
                    .collect();
                ("user", blocks)
            }
        };
        if !content.is_empty() {
            messages.push(AnthropicMessage { role, content });
        }
    }

    if let Some(sys) = &request.system {
        system.push(sys.to_string());
    }

    let tools = (!request.tools.is_empty()).then(|| {
        request
            .tools
            .iter()
            .map(|t| AnthropicTool {
                name: t.name.clone(),
                description: t.description.clone(),
                input_schema: t.parameters.clone(),
            })
            .collect()
    });

    AnthropicRequest {
        model: request.model.clone(),
        max_tokens: request.max_tokens.unwrap_or(DEFAULT_MAX_TOKENS),
        system: (!system.is_empty()).then(|| system.join("\n\n")),
        messages,
        tools,
        temperature: request.temperature,
        stream,
    }
}

fn text_blocks(content: &[SharedBlock]) -> Vec<ContentBlock> {
    content
        .iter()
        .filter_map(|b| match b {
            SharedBlock::Text { text } if !text.is_empty() => {
                Some(ContentBlock::Text { text: text.clone() })
            }
            _ => None,
        })
        .collect()
}

pub(crate) fn convert_response(response: AnthropicResponse) -> (Message, Usage) {
    let blocks = response
        .content
        .into_iter()
        .filter_map(|block| match block {
            ResponseBlock::Text { text } => Some(SharedBlock::Text { text }),
            ResponseBlock::ToolUse { id, name, input } => Some(SharedBlock::ToolCall {
                id,
                name,
                arguments: input,
            }),
            ResponseBlock::Other => None,
        })
        .collect();

    let usage = Usage {
        input_tokens: response.usage.input_tokens,
        output_tokens: response.usage.output_tokens,
    };
    (
        Message {
            role: Role::Assistant,
            content: Arc::new(blocks),
        },
        usage,
    )
}

pub(crate) async fn handle_stream_event(
    event: AnthropicStreamEvent,
    tx: &mpsc::Sender<StreamEvent>,
    tools: &mut ToolCallAccumulator,
) -> Result<(), Error> {
    match event {
        AnthropicStreamEvent::MessageStart { message } => {
            let _ = tx
                .send(StreamEvent::Usage(Usage {
                    input_tokens: message.usage.input_tokens,
                    output_tokens: message.usage.output_tokens,
                }))
                .await;
        }
        AnthropicStreamEvent::ContentBlockStart {
            index,
            content_block: ContentBlockInfo::ToolUse { id, name },
        } => tools.insert(index, ToolBuilder::with_id_name(id, name)),
        AnthropicStreamEvent::ContentBlockDelta { index, delta } => match delta {
            ContentDelta::Text { text } => {
                let _ = tx.send(StreamEvent::TextDelta(text)).await;
            }
            ContentDelta::InputJson { partial_json } => {
                tools.get_or_insert(index).push(partial_json);
            }
            ContentDelta::Other => {}
        },
        AnthropicStreamEvent::ContentBlockStop { index } => {
            if let Some(call) = tools.remove(index).and_then(ToolBuilder::finish) {
                let _ = tx.send(StreamEvent::ToolCall(call)).await;
            }
        }
        AnthropicStreamEvent::MessageDelta { usage } => {
            let _ = tx
                .send(StreamEvent::Usage(Usage {
                    input_tokens: usage.input_tokens,
                    output_tokens: usage.output_tokens,
                }))
                .await;
        }
        AnthropicStreamEvent::ContentBlockStart { .. }
        | AnthropicStreamEvent::MessageStop
        | AnthropicStreamEvent::Ping => {}
        AnthropicStreamEvent::Error { error } => {
            return Err(Error::Api(format!("{}: {}", error.error_type, error.message)));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::types::ToolDefinition;

    #[test]
    fn test_system_messages_are_lifted() {
        let mut request = ChatRequest::new(vec![Message::system("rules"), Message::user("hi")]);
        request.model = "claude-sonnet-4-20250514".into();
        request.system = Some("extra".into());
        let api = build_request(&request, false);
        assert_eq!(api.system.as_deref(), Some("rules\n\nextra"));
        assert_eq!(api.messages.len(), 1);
        assert_eq!(api.messages[0].role, "user");
        assert_eq!(api.max_tokens, DEFAULT_MAX_TOKENS);
    }

    #[test]
    fn test_tool_round_trip_shapes() {
        let mut request = ChatRequest::new(vec![
            Message::user("list"),
            Message {
                role: Role::Assistant,
                content: Arc::new(vec![SharedBlock::ToolCall {
                    id: "toolu_1".into(),
                    name: "ls".into(),
                    arguments: serde_json::json!({}),
                }]),
            },
            Message {
                role: Role::ToolResult,
                content: Arc::new(vec![SharedBlock::ToolResult {
                    tool_call_id: "toolu_1".into(),
                    content: "a.txt".into(),
                    is_error: false,
                }]),
            },
        ]);
        request.tools = Arc::new(vec![ToolDefinition {
            name: "ls".into(),
            description: "List files".into(),
            parameters: serde_json::json!({"type": "object"}),
        }]);
        let api = build_request(&request, true);
        let json = serde_json::to_value(&api).unwrap();
        assert_eq!(json["messages"][1]["content"][0]["type"], "tool_use");
        assert_eq!(json["messages"][2]["role"], "user");
        assert_eq!(json["messages"][2]["content"][0]["tool_use_id"], "toolu_1");
        assert_eq!(json["tools"][0]["input_schema"]["type"], "object");
        assert_eq!(json["stream"], true);
    }

    #[tokio::test]
    async fn test_stream_events_assemble_tool_call() {
        let events = [
            r#"{"type":"content_block_start","index":0,"content_block":{"type":"text","text":""}}"#,
            r#"{"type":"content_block_delta","index":0,"delta":{"type":"text_delta","text":"Let me look."}}"#,
            r#"{"type":"content_block_stop","index":0}"#,
            r#"{"type":"content_block_start","index":1,"content_block":{"type":"tool_use","id":"toolu_2","name":"read","input":{}}}"#,
            r#"{"type":"content_block_delta","index":1,"delta":{"type":"input_json_delta","partial_json":"{\"path\":"}}"#,
            r#"{"type":"content_block_delta","index":1,"delta":{"type":"input_json_delta","partial_json":"\"a.rs\"}"}}"#,
            r#"{"type":"content_block_stop","index":1}"#,
        ];
        let (tx, mut rx) = mpsc::channel(16);
        let mut tools = ToolCallAccumulator::new();
        for raw in events {
            handle_stream_event(serde_json::from_str(raw).unwrap(), &tx, &mut tools)
                .await
                .unwrap();
        }
        drop(tx);

        assert!(matches!(rx.recv().await, Some(StreamEvent::TextDelta(t)) if t == "Let me look."));
        match rx.recv().await {
            Some(StreamEvent::ToolCall(call)) => {
                assert_eq!(call.id, "toolu_2");
                assert_eq!(call.arguments, serde_json::json!({"path": "a.rs"}));
            }
            other => panic!("expected tool call, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_error_event_fails() {
        let (tx, _rx) = mpsc::channel(1);
        let mut tools = ToolCallAccumulator::new();
        let event = serde_json::from_str(
            r#"{"type":"error","error":{"type":"overloaded_error","message":"Overloaded"}}"#,
        )
        .unwrap();
        let err = handle_stream_event(event, &tx, &mut tools).await.unwrap_err();
        assert!(err.to_string().contains("overloaded_error"));
    }
}
