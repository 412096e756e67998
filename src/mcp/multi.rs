//! Connects to several tool servers in one aggregate handshake.

use super::McpError;
use super::client::{McpClient, McpTool};
use super::config::ToolServerConfig;
use crate::tool::Tool;
use async_trait::async_trait;
use futures::future::{join_all, try_join_all};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{Instant, timeout_at};

/// Tools per server id. A server missing from the map produced no tool list.
pub type ToolsByServer = HashMap<String, Vec<Arc<dyn Tool>>>;

/// Performs the aggregate handshake. Lets tests stand in for real servers.
#[async_trait]
pub trait ToolServerConnector: Send + Sync {
    /// Connect to every server. Any connection failure fails the whole call.
    async fn initialize_connections(
        &self,
        servers: &[ToolServerConfig],
    ) -> Result<ToolsByServer, McpError>;
}

/// Connects over the configured stdio/http transports.
#[derive(Debug, Clone)]
pub struct MultiServerClient {
    timeout: Duration,
}

impl MultiServerClient {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }
}

#[async_trait]
impl ToolServerConnector for MultiServerClient {
    async fn initialize_connections(
        &self,
        servers: &[ToolServerConfig],
    ) -> Result<ToolsByServer, McpError> {
        let deadline = Instant::now() + self.timeout;
        let connect_all = try_join_all(servers.iter().map(|server| async move {
            McpClient::connect(server).await.map_err(|e| {
                McpError::Connection(format!("{} ({}): {e}", server.name, server.id))
            })
        }));
        let clients = timeout_at(deadline, connect_all)
            .await
            .map_err(|_| McpError::Timeout(self.timeout))??;

        Ok(list_all(clients, deadline, self.timeout).await)
    }
}

/// List every client's tools. A server that fails or misses `deadline` is left out.
async fn list_all(clients: Vec<McpClient>, deadline: Instant, limit: Duration) -> ToolsByServer {
    let listed = join_all(clients.into_iter().map(|client| async move {
        let client = Arc::new(client);
        let tools = timeout_at(deadline, client.list_tools())
            .await
            .unwrap_or(Err(McpError::Timeout(limit)));
        (client, tools)
    }))
    .await;

    let mut by_server = ToolsByServer::new();
    for (client, tools) in listed {
        match tools {
            Ok(defs) => {
                let tools = defs
                    .into_iter()
                    .map(|def| Arc::new(McpTool::new(client.clone(), def)) as Arc<dyn Tool>)
                    .collect();
                by_server.insert(client.server_id().to_string(), tools);
            }
            Err(e) => {
                tracing::warn!(server = %client.server_id(), "Failed to list tools: {e}");
            }
        }
    }
    by_server
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mcp::McpConnection;
    use serde_json::{Value, json};

    struct Listing;

    #[async_trait]
    impl McpConnection for Listing {
        async fn list_tools(&self) -> Result<Value, McpError> {
            Ok(json!({"tools": [{"name": "echo"}]}))
        }

        async fn call_tool(&self, _name: &str, _arguments: Value) -> Result<Value, McpError> {
            Ok(json!({"content": []}))
        }
    }

    /// Never answers `tools/list`.
    struct Silent;

    #[async_trait]
    impl McpConnection for Silent {
        async fn list_tools(&self) -> Result<Value, McpError> {
            std::future::pending().await
        }

        async fn call_tool(&self, _name: &str, _arguments: Value) -> Result<Value, McpError> {
            std::future::pending().await
        }
    }

    #[tokio::test]
    async fn test_unanswered_listing_misses_deadline() {
        let limit = Duration::from_millis(50);
        let clients = vec![
            McpClient::new("quiet".into(), Box::new(Silent)),
            McpClient::new("fs".into(), Box::new(Listing)),
        ];
        let by_server = tokio::time::timeout(
            Duration::from_secs(5),
            list_all(clients, Instant::now() + limit, limit),
        )
        .await
        .expect("listing should stop at the deadline");

        assert!(!by_server.contains_key("quiet"));
        assert_eq!(by_server["fs"].len(), 1);
        assert_eq!(by_server["fs"][0].name(), "echo");
    }

    #[tokio::test]
    async fn test_no_servers() {
        let client = MultiServerClient::new(Duration::from_secs(1));
        assert!(client.initialize_connections(&[]).await.unwrap().is_empty());
    }
}
