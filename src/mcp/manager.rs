//! Per-session tool-server connections and their states.

use super::McpError;
use super::config::ToolServerConfig;
use super::multi::ToolServerConnector;
use crate::tool::Tool;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

pub const MISSING_TOOLS_MESSAGE: &str = "Failed to get tools from server";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ServerConnectionState {
    Disconnected,
    Connecting,
    Connected { tool_count: usize },
    Error { message: String },
}

impl fmt::Display for ServerConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Disconnected => write!(f, "disconnected"),
            Self::Connecting => write!(f, "connecting"),
            Self::Connected { tool_count } => write!(f, "connected ({tool_count} tools)"),
            Self::Error { message } => write!(f, "error: {message}"),
        }
    }
}

pub struct ToolServerConnectionManager {
    connector: Arc<dyn ToolServerConnector>,
    states: HashMap<String, ServerConnectionState>,
    tools: Vec<Arc<dyn Tool>>,
    connected: bool,
}

impl ToolServerConnectionManager {
    pub fn new(connector: Arc<dyn ToolServerConnector>) -> Self {
        Self {
            connector,
            states: HashMap::new(),
            tools: Vec::new(),
            connected: false,
        }
    }

    /// Replace all connections with the enabled entries of `servers`.
    ///
    /// A failed aggregate handshake marks every server still connecting as
    /// errored and returns the error.
    pub async fn connect(&mut self, servers: &[ToolServerConfig]) -> Result<(), McpError> {
        self.states.clear();
        self.tools.clear();
        self.connected = false;

        let servers: Vec<ToolServerConfig> =
            servers.iter().filter(|s| s.enabled).cloned().collect();
        if servers.is_empty() {
            return Ok(());
        }

        for server in &servers {
            self.states
                .insert(server.id.clone(), ServerConnectionState::Connecting);
        }

        let mut by_server = match self.connector.initialize_connections(&servers).await {
            Ok(by_server) => by_server,
            Err(e) => {
                let message = e.to_string();
                for state in self.states.values_mut() {
                    if *state == ServerConnectionState::Connecting {
                        *state = ServerConnectionState::Error {
                            message: message.clone(),
                        };
                    }
                }
                return Err(e);
            }
        };

        for server in &servers {
            let state = match by_server.remove(&server.id) {
                Some(tools) => {
                    tracing::info!(server = %server.name, tools = tools.len(), "Tool server connected");
                    let tool_count = tools.len();
                    self.tools.extend(tools);
                    ServerConnectionState::Connected { tool_count }
                }
                None => {
                    tracing::warn!(server = %server.name, "{MISSING_TOOLS_MESSAGE}");
                    ServerConnectionState::Error {
                        message: MISSING_TOOLS_MESSAGE.to_string(),
                    }
                }
            };
            self.states.insert(server.id.clone(), state);
        }
        self.connected = true;
        Ok(())
    }

    /// Mark every known server disconnected and drop their tools.
    pub fn disconnect(&mut self) {
        for state in self.states.values_mut() {
            *state = ServerConnectionState::Disconnected;
        }
        self.tools.clear();
        self.connected = false;
    }

    pub fn tools(&self) -> Vec<Arc<dyn Tool>> {
        self.tools.clone()
    }

    pub fn server_states(&self) -> HashMap<String, ServerConnectionState> {
        self.states.clone()
    }

    pub fn server_state(&self, id: &str) -> Option<ServerConnectionState> {
        self.states.get(id).cloned()
    }

    /// True after a successful handshake until the next disconnect.
    pub fn is_connected(&self) -> bool {
        self.connected
    }
}
