//! Streamable HTTP transport built on `rmcp`.

use super::McpError;
use super::client::McpConnection;
use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use rmcp::model::{CallToolRequestParams, ClientCapabilities, ClientInfo, Implementation};
use rmcp::service::RunningService;
use rmcp::transport::StreamableHttpClientTransport;
use rmcp::transport::streamable_http_client::StreamableHttpClientTransportConfig;
use rmcp::{RoleClient, ServiceExt};
use serde_json::Value;
use std::collections::HashMap;

pub struct HttpConnection {
    service: RunningService<RoleClient, ClientInfo>,
}

impl HttpConnection {
    /// Connect to `url`, sending `headers` on every request, and initialize.
    pub async fn connect(
        url: &str,
        headers: Option<&HashMap<String, String>>,
    ) -> Result<Self, McpError> {
        let client = reqwest::Client::builder()
            .default_headers(header_map(headers)?)
            .build()
            .map_err(|e| McpError::Connection(e.to_string()))?;
        let transport = StreamableHttpClientTransport::with_client(
            client,
            StreamableHttpClientTransportConfig::with_uri(url),
        );

        let service = client_info()
            .serve(transport)
            .await
            .map_err(|e| McpError::Connection(format!("{url}: {e}")))?;
        Ok(Self { service })
    }
}

#[async_trait]
impl McpConnection for HttpConnection {
    async fn list_tools(&self) -> Result<Value, McpError> {
        let result = self
            .service
            .list_tools(Default::default())
            .await
            .map_err(|e| McpError::Protocol(format!("tools/list: {e}")))?;
        serde_json::to_value(result).map_err(|e| McpError::Protocol(format!("tools/list: {e}")))
    }

    async fn call_tool(&self, name: &str, arguments: Value) -> Result<Value, McpError> {
        let params = CallToolRequestParams {
            meta: None,
            name: name.to_owned().into(),
            arguments: arguments.as_object().cloned(),
            task: None,
        };
        let result = self
            .service
            .call_tool(params)
            .await
            .map_err(|e| McpError::Protocol(format!("tools/call: {e}")))?;
        serde_json::to_value(result).map_err(|e| McpError::Protocol(format!("tools/call: {e}")))
    }
}

fn client_info() -> ClientInfo {
    ClientInfo {
        meta: None,
        protocol_version: Default::default(),
        capabilities: ClientCapabilities::default(),
        client_info: Implementation {
            name: env!("CARGO_PKG_NAME").to_string(),
            title: None,
            version: env!("CARGO_PKG_VERSION").to_string(),
            website_url: None,
            icons: None,
        },
    }
}

fn header_map(headers: Option<&HashMap<String, String>>) -> Result<HeaderMap, McpError> {
    let mut map = HeaderMap::new();
    for (name, value) in headers.into_iter().flatten() {
        let name = HeaderName::try_from(name.as_str())
            .map_err(|_| McpError::Connection(format!("invalid header name {name}")))?;
        let value = HeaderValue::from_str(value)
            .map_err(|_| McpError::Connection(format!("invalid value for header {name}")))?;
        map.insert(name, value);
    }
    Ok(map)
}
