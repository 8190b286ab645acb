//! ToolServerPool: the set of live tool servers backing one chat turn.
//!
//! Servers are connected concurrently, tools are exposed to the model under
//! namespaced names, and every member is closed exactly once when the turn
//! ends.

use crate::connector::ToolServerConnector;
use crate::error::McpError;
use crate::server::{ToolResult, ToolServer};
use futures_util::StreamExt;
use futures_util::future::join_all;
use mcpchat_types::{ServerRecord, ToolDefinition};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use thiserror::Error;

/// Upper bound on how long one member may take to close.
pub const CLOSE_GRACE: Duration = Duration::from_secs(5);

/// Model-facing tool names are limited to this many bytes.
const MAX_TOOL_NAME_LEN: usize = 64;

/// A server that could not be connected.
#[derive(Debug)]
pub struct PoolFailure {
    pub server: String,
    pub error: McpError,
}

#[derive(Debug, Error)]
pub enum PoolError {
    #[error("No tool server could be reached: {}", describe(.failures))]
    Unavailable { failures: Vec<PoolFailure> },
}

fn describe(failures: &[PoolFailure]) -> String {
    failures
        .iter()
        .map(|f| f.error.to_string())
        .collect::<Vec<_>>()
        .join("; ")
}

/// Build the model-facing name for a server's tool: `mcp__{server}__{tool}`,
/// restricted to `[A-Za-z0-9_-]` and 64 bytes.
pub fn namespaced_tool_name(server: &str, tool: &str) -> String {
    let mut name: String = format!("mcp__{server}__{tool}")
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '_' || c == '-' {
                c
            } else {
                '_'
            }
        })
        .collect();
    name.truncate(MAX_TOOL_NAME_LEN);
    name
}

/// Live tool servers for one turn, in record order.
pub struct ToolServerPool {
    members: Vec<Box<dyn ToolServer>>,
    failures: Vec<PoolFailure>,
    /// Namespaced tool name → (member index, server-side tool name).
    routes: HashMap<String, (usize, String)>,
    closed: AtomicBool,
}

impl ToolServerPool {
    /// Connect every record concurrently.
    ///
    /// Failed connects are logged and skipped. If records were requested but
    /// none connected, the pool is unusable and `PoolError::Unavailable`
    /// lists every failure.
    pub async fn open(
        connector: &dyn ToolServerConnector,
        records: &[ServerRecord],
        max_concurrency: Option<usize>,
    ) -> Result<Self, PoolError> {
        let limit = max_concurrency
            .filter(|n| *n > 0)
            .unwrap_or(records.len())
            .max(1);

        // Futures are built up front; a closure inside the stream adapter
        // would make the turn future non-Send.
        let attempts: Vec<_> = records
            .iter()
            .map(|record| async move { (record.name(), connector.connect(record).await) })
            .collect();
        let outcomes: Vec<_> = futures_util::stream::iter(attempts)
            .buffered(limit)
            .collect()
            .await;

        let mut members = Vec::new();
        let mut failures = Vec::new();
        for (server, outcome) in outcomes {
            match outcome {
                Ok(member) => members.push(member),
                Err(error) => {
                    tracing::warn!("MCP server '{server}' unavailable: {error}");
                    failures.push(PoolFailure {
                        server: server.to_string(),
                        error,
                    });
                }
            }
        }

        if !records.is_empty() && members.is_empty() {
            return Err(PoolError::Unavailable { failures });
        }

        tracing::info!(
            "Tool-server pool open: {} connected, {} failed",
            members.len(),
            failures.len()
        );
        Ok(Self {
            members,
            failures,
            routes: HashMap::new(),
            closed: AtomicBool::new(false),
        })
    }

    /// A pool with no members.
    #[cfg(test)]
    pub(crate) fn empty() -> Self {
        Self {
            members: Vec::new(),
            failures: Vec::new(),
            routes: HashMap::new(),
            closed: AtomicBool::new(false),
        }
    }

    /// Number of connected members.
    pub fn len(&self) -> usize {
        self.members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    /// Servers that failed to connect during `open`.
    pub fn failures(&self) -> &[PoolFailure] {
        &self.failures
    }

    /// List every member's tools and return model-facing definitions.
    ///
    /// A member whose listing fails contributes no tools. Also rebuilds the
    /// routing table used by [`invoke`](Self::invoke).
    pub async fn tools(&mut self) -> Vec<ToolDefinition> {
        let listings = join_all(self.members.iter().map(|m| m.list_tools())).await;

        self.routes.clear();
        let mut definitions = Vec::new();
        for (index, listing) in listings.into_iter().enumerate() {
            let server = self.members[index].name();
            let tools = match listing {
                Ok(tools) => tools,
                Err(e) => {
                    tracing::warn!("Failed to list tools of MCP server '{server}': {e}");
                    continue;
                }
            };
            tracing::debug!("MCP server '{server}' offers {} tools", tools.len());

            for tool in tools {
                let name = namespaced_tool_name(server, &tool.name);
                if self.routes.contains_key(&name) {
                    tracing::warn!(
                        "Skipping tool '{}' of '{server}': name clash on '{name}'",
                        tool.name
                    );
                    continue;
                }
                self.routes.insert(name.clone(), (index, tool.name));
                definitions.push(ToolDefinition {
                    name,
                    description: format!("[MCP: {server}] {}", tool.description),
                    input_schema: tool.input_schema,
                });
            }
        }
        definitions
    }

    /// Route a namespaced tool call to its owning member.
    pub async fn invoke(
        &self,
        namespaced_name: &str,
        arguments: serde_json::Value,
    ) -> Result<ToolResult, McpError> {
        let Some((index, tool)) = self.routes.get(namespaced_name) else {
            return Err(McpError::UnknownTool {
                name: namespaced_name.to_string(),
            });
        };
        if self.closed.load(Ordering::Acquire) {
            return Err(McpError::Closed {
                server: self.members[*index].name().to_string(),
            });
        }
        self.members[*index].invoke(tool, arguments).await
    }

    /// Close every member concurrently, each within [`CLOSE_GRACE`].
    ///
    /// Failures are logged and never block the other members. Calling it
    /// again is a no-op.
    pub async fn close(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }

        join_all(self.members.iter().map(|member| async move {
            match tokio::time::timeout(CLOSE_GRACE, member.close()).await {
                Ok(Ok(())) => tracing::debug!("MCP server '{}' closed", member.name()),
                Ok(Err(e)) => {
                    tracing::warn!("Failed to close MCP server '{}': {e}", member.name())
                }
                Err(_) => tracing::warn!(
                    "MCP server '{}' did not close within {}s",
                    member.name(),
                    CLOSE_GRACE.as_secs()
                ),
            }
        }))
        .await;

        if !self.members.is_empty() {
            tracing::info!("Tool-server pool closed ({} members)", self.members.len());
        }
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }
}
