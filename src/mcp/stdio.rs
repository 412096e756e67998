//! Child-process transport built on `mcp-sdk-rs`.

use super::McpError;
use super::client::McpConnection;
use async_trait::async_trait;
use mcp_sdk_rs::client::Client;
use mcp_sdk_rs::session::Session;
use mcp_sdk_rs::transport::Message;
use serde_json::{Value, json};
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use tokio::process::Command;
use tokio::sync::{Mutex, mpsc};

/// Protocol revision offered in the `initialize` request.
pub const PROTOCOL_VERSION: &str = "2024-11-05";

pub struct StdioConnection {
    client: Client,
    _to_session_tx: mpsc::UnboundedSender<Message>,
}

impl StdioConnection {
    /// Spawn the server and complete the `initialize` handshake.
    pub async fn connect(
        command: &str,
        args: &[String],
        env: Option<&HashMap<String, String>>,
        cwd: Option<&Path>,
    ) -> Result<Self, McpError> {
        let conn = Self::spawn(command, args, env, cwd).await?;
        conn.request(
            "initialize",
            Some(json!({
                "protocolVersion": PROTOCOL_VERSION,
                "capabilities": {},
                "clientInfo": {
                    "name": env!("CARGO_PKG_NAME"),
                    "version": env!("CARGO_PKG_VERSION")
                }
            })),
        )
        .await?;
        conn.client
            .notify("notifications/initialized", None)
            .await
            .map_err(|e| McpError::Protocol(format!("notifications/initialized: {e}")))?;
        Ok(conn)
    }

    async fn spawn(
        command: &str,
        args: &[String],
        env: Option<&HashMap<String, String>>,
        cwd: Option<&Path>,
    ) -> Result<Self, McpError> {
        let mut cmd = Command::new(command);
        cmd.args(args)
            .stdin(std::process::Stdio::piped())
            .stdout(std::process::Stdio::piped())
            .stderr(std::process::Stdio::null())
            .kill_on_drop(true);
        if let Some(env) = env {
            cmd.envs(env);
        }
        if let Some(cwd) = cwd {
            cmd.current_dir(cwd);
        }

        let (to_session_tx, to_session_rx) = mpsc::unbounded_channel::<Message>();
        let (from_session_tx, from_session_rx) = mpsc::unbounded_channel::<Message>();

        let session = Session::Local {
            handler: None,
            command: cmd,
            receiver: Arc::new(Mutex::new(to_session_rx)),
            sender: Arc::new(from_session_tx),
        };
        session
            .start()
            .await
            .map_err(|e| McpError::SpawnFailed(format!("{command}: {e}")))?;

        Ok(Self {
            client: Client::new(to_session_tx.clone(), from_session_rx),
            _to_session_tx: to_session_tx,
        })
    }

    async fn request(&self, method: &str, params: Option<Value>) -> Result<Value, McpError> {
        self.client
            .request(method, params)
            .await
            .map_err(|e| McpError::Protocol(format!("{method}: {e}")))
    }
}

#[async_trait]
impl McpConnection for StdioConnection {
    async fn list_tools(&self) -> Result<Value, McpError> {
        self.request("tools/list", None).await
    }

    async fn call_tool(&self, name: &str, arguments: Value) -> Result<Value, McpError> {
        self.request(
            "tools/call",
            Some(json!({"name": name, "arguments": arguments})),
        )
        .await
    }
}
