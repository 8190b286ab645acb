//! MCP client: one initialized session over any transport.
//!
//! Handles the protocol handshake (initialize + initialized notification),
//! tool discovery (tools/list, following pagination cursors), and tool
//! invocation (tools/call).

use crate::error::McpError;
use crate::jsonrpc::JsonRpcResponse;
use crate::server::{ToolContent, ToolDescriptor, ToolResult, ToolServer};
use crate::transport::{BoxFuture, Transport};
use serde::Deserialize;
use std::time::Duration;

/// MCP protocol version we support.
pub const PROTOCOL_VERSION: &str = "2024-11-05";

/// Upper bound on `tools/list` pages, in case a server keeps handing out cursors.
const MAX_LIST_PAGES: usize = 100;

/// Client for a single MCP server.
pub struct McpClient {
    name: String,
    transport: Box<dyn Transport>,
    read_timeout: Duration,
}

#[derive(Deserialize)]
struct ToolsListResult {
    tools: Vec<ToolEntry>,
    #[serde(default, rename = "nextCursor")]
    next_cursor: Option<String>,
}

#[derive(Deserialize)]
struct ToolEntry {
    name: String,
    #[serde(default)]
    description: Option<String>,
    #[serde(default = "default_schema", rename = "inputSchema")]
    input_schema: serde_json::Value,
}

fn default_schema() -> serde_json::Value {
    serde_json::json!({"type": "object", "properties": {}})
}

#[derive(Deserialize)]
struct ToolCallResult {
    #[serde(default)]
    content: Vec<serde_json::Value>,
    #[serde(default, rename = "isError")]
    is_error: bool,
}

impl McpClient {
    /// Run the handshake over an already-open transport.
    ///
    /// `timeout` bounds the `initialize` request; `read_timeout` bounds every
    /// later request on this session.
    pub async fn initialize(
        name: &str,
        transport: Box<dyn Transport>,
        timeout: Duration,
        read_timeout: Duration,
    ) -> Result<Self, McpError> {
        let client = Self {
            name: name.to_string(),
            transport,
            read_timeout,
        };

        let init_params = serde_json::json!({
            "protocolVersion": PROTOCOL_VERSION,
            "capabilities": {},
            "clientInfo": {
                "name": "mcpchat",
                "version": env!("CARGO_PKG_VERSION")
            }
        });

        let resp = client
            .transport
            .request("initialize", Some(init_params), timeout)
            .await?;
        let result = client.unwrap_result(resp, "initialize")?;
        if let Some(version) = result.get("protocolVersion").and_then(|v| v.as_str()) {
            if version != PROTOCOL_VERSION {
                tracing::debug!("MCP server '{name}' negotiated protocol {version}");
            }
        }

        client
            .transport
            .notify("notifications/initialized", None)
            .await?;

        Ok(client)
    }

    fn unwrap_result(
        &self,
        resp: JsonRpcResponse,
        method: &str,
    ) -> Result<serde_json::Value, McpError> {
        if let Some(err) = resp.error {
            return Err(McpError::JsonRpc {
                server: self.name.clone(),
                code: err.code,
                message: err.message,
            });
        }
        resp.result.ok_or_else(|| {
            McpError::Protocol(format!("{method} response has neither result nor error"))
        })
    }

    async fn fetch_tools(&self) -> Result<Vec<ToolDescriptor>, McpError> {
        let mut tools = Vec::new();
        let mut cursor: Option<String> = None;

        for _ in 0..MAX_LIST_PAGES {
            let params = cursor
                .take()
                .map(|c| serde_json::json!({ "cursor": c }));
            let resp = self
                .transport
                .request("tools/list", params, self.read_timeout)
                .await?;
            let result = self.unwrap_result(resp, "tools/list")?;
            let page: ToolsListResult = serde_json::from_value(result).map_err(|e| {
                McpError::Protocol(format!("Failed to parse tools/list response: {e}"))
            })?;

            tools.extend(page.tools.into_iter().map(|t| ToolDescriptor {
                name: t.name,
                description: t.description.unwrap_or_default(),
                input_schema: t.input_schema,
            }));

            match page.next_cursor {
                Some(next) if !next.is_empty() => cursor = Some(next),
                _ => return Ok(tools),
            }
        }

        tracing::warn!(
            "MCP server '{}' returned more than {MAX_LIST_PAGES} tool pages; truncating",
            self.name
        );
        Ok(tools)
    }

    async fn call_tool(
        &self,
        tool_name: &str,
        arguments: serde_json::Value,
    ) -> Result<ToolResult, McpError> {
        let params = serde_json::json!({
            "name": tool_name,
            "arguments": arguments,
        });

        let resp = self
            .transport
            .request("tools/call", Some(params), self.read_timeout)
            .await?;
        let result = self.unwrap_result(resp, "tools/call")?;
        let call_result: ToolCallResult = serde_json::from_value(result)
            .map_err(|e| McpError::Protocol(format!("Failed to parse tools/call result: {e}")))?;

        Ok(ToolResult {
            content: call_result
                .content
                .into_iter()
                .map(ToolContent::from_value)
                .collect(),
            is_error: call_result.is_error,
        })
    }
}

impl ToolServer for McpClient {
    fn name(&self) -> &str {
        &self.name
    }

    fn list_tools(&self) -> BoxFuture<'_, Result<Vec<ToolDescriptor>, McpError>> {
        Box::pin(self.fetch_tools())
    }

    fn invoke<'a>(
        &'a self,
        tool: &'a str,
        arguments: serde_json::Value,
    ) -> BoxFuture<'a, Result<ToolResult, McpError>> {
        Box::pin(self.call_tool(tool, arguments))
    }

    fn close(&self) -> BoxFuture<'_, Result<(), McpError>> {
        self.transport.close()
    }
}
