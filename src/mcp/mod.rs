//! Tool servers speaking the Model Context Protocol.

mod client;
mod config;
mod http;
mod manager;
mod multi;
mod stdio;

pub use client::{McpClient, McpConnection, McpTool, McpToolDef};
pub use config::{ToolServerConfig, ToolServerDraft, Transport};
pub use manager::{MISSING_TOOLS_MESSAGE, ServerConnectionState, ToolServerConnectionManager};
pub use multi::{MultiServerClient, ToolServerConnector, ToolsByServer};
pub use stdio::PROTOCOL_VERSION;

use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum McpError {
    #[error("Failed to spawn server: {0}")]
    SpawnFailed(String),

    #[error("Connection error: {0}")]
    Connection(String),

    #[error("Protocol error: {0}")]
    Protocol(String),

    #[error("Handshake timed out after {0:?}")]
    Timeout(Duration),
}
