//! One connected tool server and the tools it exposes.

use super::McpError;
use super::config::{ToolServerConfig, Transport};
use super::http::HttpConnection;
use super::stdio::StdioConnection;
use crate::tool::{Tool, ToolContext, ToolError, ToolResult};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use std::sync::Arc;

/// A live, initialized session with a tool server.
#[async_trait]
pub trait McpConnection: Send + Sync {
    /// The `tools/list` result object.
    async fn list_tools(&self) -> Result<Value, McpError>;

    /// The `tools/call` result object.
    async fn call_tool(&self, name: &str, arguments: Value) -> Result<Value, McpError>;
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct McpToolDef {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(rename = "inputSchema", default = "empty_schema")]
    pub input_schema: Value,
}

fn empty_schema() -> Value {
    json!({"type": "object", "properties": {}})
}

pub struct McpClient {
    server_id: String,
    conn: Box<dyn McpConnection>,
}

impl McpClient {
    /// Open the configured transport and complete its handshake.
    pub async fn connect(config: &ToolServerConfig) -> Result<Self, McpError> {
        let conn: Box<dyn McpConnection> = match &config.transport {
            Transport::Stdio {
                command,
                args,
                env,
                cwd,
            } => Box::new(
                StdioConnection::connect(command, args, env.as_ref(), cwd.as_deref()).await?,
            ),
            Transport::Http { url, headers } => {
                Box::new(HttpConnection::connect(url, headers.as_ref()).await?)
            }
        };
        tracing::debug!(server = %config.id, "Tool server initialized");
        Ok(Self::new(config.id.clone(), conn))
    }

    pub fn new(server_id: String, conn: Box<dyn McpConnection>) -> Self {
        Self { server_id, conn }
    }

    pub fn server_id(&self) -> &str {
        &self.server_id
    }

    pub async fn list_tools(&self) -> Result<Vec<McpToolDef>, McpError> {
        let mut response = self.conn.list_tools().await?;
        let tools = response
            .get_mut("tools")
            .map(Value::take)
            .ok_or_else(|| McpError::Protocol("tools/list: missing tools".into()))?;
        serde_json::from_value(tools).map_err(|e| McpError::Protocol(format!("tools/list: {e}")))
    }

    pub async fn call_tool(&self, name: &str, arguments: Value) -> Result<ToolResult, McpError> {
        let response = self.conn.call_tool(name, arguments).await?;
        Ok(tool_result_from(response))
    }
}

/// Flatten a `tools/call` reply: text items are joined, other items kept as JSON.
fn tool_result_from(response: Value) -> ToolResult {
    let is_error = response
        .get("isError")
        .and_then(Value::as_bool)
        .unwrap_or(false);

    let content = match response.get("content") {
        Some(Value::Array(items)) => items
            .iter()
            .map(|item| match item.get("text").and_then(Value::as_str) {
                Some(text) => text.to_string(),
                None => item.to_string(),
            })
            .collect::<Vec<_>>()
            .join("\n"),
        Some(Value::String(text)) => text.clone(),
        Some(other) => other.to_string(),
        None => String::new(),
    };

    ToolResult {
        content,
        is_error,
        metadata: Some(response),
    }
}

/// A server tool exposed through the [`Tool`] trait.
pub struct McpTool {
    client: Arc<McpClient>,
    def: McpToolDef,
}

impl McpTool {
    pub fn new(client: Arc<McpClient>, def: McpToolDef) -> Self {
        Self { client, def }
    }
}

#[async_trait]
impl Tool for McpTool {
    fn name(&self) -> &str {
        &self.def.name
    }

    fn description(&self) -> &str {
        &self.def.description
    }

    fn parameters(&self) -> Value {
        self.def.input_schema.clone()
    }

    async fn execute(&self, args: Value, ctx: &ToolContext) -> Result<ToolResult, ToolError> {
        tokio::select! {
            biased;
            () = ctx.abort_signal.cancelled() => Err(ToolError::Cancelled),
            result = self.client.call_tool(&self.def.name, args) => result.map_err(|e| {
                ToolError::ExecutionFailed(format!("{} ({}): {e}", self.def.name, self.client.server_id()))
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Replays canned results.
    struct Scripted;

    #[async_trait]
    impl McpConnection for Scripted {
        async fn list_tools(&self) -> Result<Value, McpError> {
            Ok(json!({"tools": [
                {"name": "read", "description": "Read a file",
                 "inputSchema": {"type": "object", "properties": {"path": {"type": "string"}}}},
                {"name": "ping"}
            ]}))
        }

        async fn call_tool(&self, name: &str, arguments: Value) -> Result<Value, McpError> {
            Ok(json!({
                "content": [
                    {"type": "text", "text": format!("called {name}")},
                    {"type": "text", "text": arguments["path"]}
                ]
            }))
        }
    }

    #[tokio::test]
    async fn test_list_and_call() {
        let client = Arc::new(McpClient::new("s1".into(), Box::new(Scripted)));
        assert_eq!(client.server_id(), "s1");

        let defs = client.list_tools().await.unwrap();
        assert_eq!(defs.len(), 2);
        assert_eq!(defs[1].input_schema["type"], "object");

        let tool = McpTool::new(client, defs[0].clone());
        let result = tool
            .execute(json!({"path": "a.txt"}), &ToolContext::default())
            .await
            .unwrap();
        assert_eq!(result.content, "called read\na.txt");
        assert!(!result.is_error);
    }

    #[tokio::test]
    async fn test_cancelled_call() {
        let client = Arc::new(McpClient::new("s1".into(), Box::new(Scripted)));
        let tool = McpTool::new(
            client,
            McpToolDef {
                name: "read".into(),
                description: String::new(),
                input_schema: empty_schema(),
            },
        );
        let ctx = ToolContext::default();
        ctx.abort_signal.cancel();
        assert!(matches!(
            tool.execute(json!({}), &ctx).await,
            Err(ToolError::Cancelled)
        ));
    }

    #[test]
    fn test_error_result() {
        let result = tool_result_from(json!({
            "content": [{"type": "text", "text": "no such file"}],
            "isError": true
        }));
        assert!(result.is_error);
        assert_eq!(result.content, "no such file");
    }
}
