//! Tool-server entries as stored in the tool-server document.

use crate::config::{ConfigError, FieldErrors};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;

/// How to reach a tool server, stored as the `transport` field.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "transport", rename_all = "lowercase")]
pub enum Transport {
    /// A child process speaking JSON-RPC over stdin/stdout.
    Stdio {
        command: String,
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        args: Vec<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        env: Option<HashMap<String, String>>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        cwd: Option<PathBuf>,
    },
    /// A JSON-RPC endpoint reached with HTTP POST.
    Http {
        url: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        headers: Option<HashMap<String, String>>,
    },
}

impl Transport {
    pub fn stdio(command: impl Into<String>, args: &[&str]) -> Self {
        Self::Stdio {
            command: command.into(),
            args: args.iter().map(|a| a.to_string()).collect(),
            env: None,
            cwd: None,
        }
    }

    pub fn http(url: impl Into<String>) -> Self {
        Self::Http {
            url: url.into(),
            headers: None,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Self::Stdio { .. } => "stdio",
            Self::Http { .. } => "http",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolServerConfig {
    pub id: String,
    pub name: String,
    #[serde(flatten)]
    pub transport: Transport,
    pub enabled: bool,
}

/// User-supplied fields for creating or updating a tool server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolServerDraft {
    pub name: String,
    pub transport: Transport,
    pub enabled: bool,
}

impl ToolServerDraft {
    pub fn new(name: impl Into<String>, transport: Transport) -> Self {
        Self {
            name: name.into(),
            transport,
            enabled: true,
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let mut errors = FieldErrors::new();

        if self.name.trim().is_empty() {
            errors.add("name", "Name is required");
        }
        match &self.transport {
            Transport::Stdio { command, .. } => {
                if command.trim().is_empty() {
                    errors.add("command", "Command is required");
                }
            }
            Transport::Http { url, .. } => {
                if url.trim().is_empty() {
                    errors.add("url", "URL is required");
                } else if url::Url::parse(url.trim()).is_err() {
                    errors.add("url", "Invalid URL format");
                }
            }
        }

        errors.into_result()
    }

    pub(crate) fn into_config(self, id: String) -> ToolServerConfig {
        let transport = match self.transport {
            Transport::Stdio {
                command,
                args,
                env,
                cwd,
            } => Transport::Stdio {
                command: command.trim().to_string(),
                args,
                env,
                cwd,
            },
            Transport::Http { url, headers } => Transport::Http {
                url: url.trim().to_string(),
                headers,
            },
        };
        ToolServerConfig {
            id,
            name: self.name.trim().to_string(),
            transport,
            enabled: self.enabled,
        }
    }
}
