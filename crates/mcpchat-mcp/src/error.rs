//! Error types for tool-server operations.

use thiserror::Error;

/// Errors from MCP tool-server configuration, transport and protocol.
#[derive(Debug, Error)]
pub enum McpError {
    #[error("Invalid configuration for MCP server '{server}': {message}")]
    Config { server: String, message: String },

    #[error("Failed to connect to MCP server '{server}': {message}")]
    Connection { server: String, message: String },

    #[error("MCP server '{server}' timed out after {timeout_ms}ms waiting for '{operation}'")]
    Timeout {
        server: String,
        operation: String,
        timeout_ms: u64,
    },

    #[error("JSON-RPC error from '{server}' (code {code}): {message}")]
    JsonRpc {
        server: String,
        code: i64,
        message: String,
    },

    #[error("MCP server '{server}' returned HTTP {status}: {message}")]
    Http {
        server: String,
        status: u16,
        message: String,
    },

    #[error("MCP server '{server}' closed the connection")]
    Closed { server: String },

    #[error("Unknown tool: {name}")]
    UnknownTool { name: String },

    #[error("MCP protocol error: {0}")]
    Protocol(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl McpError {
    /// Whether the error leaves the server connection usable.
    ///
    /// Timeouts, unknown tools and JSON-RPC errors affect one call only;
    /// everything else means the transport can no longer be trusted.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            McpError::Timeout { .. } | McpError::UnknownTool { .. } | McpError::JsonRpc { .. }
        )
    }

    /// Re-classify a handshake failure as a connection failure.
    pub(crate) fn into_connection_error(self, server: &str) -> McpError {
        match self {
            err @ (McpError::Config { .. } | McpError::Connection { .. }) => err,
            other => McpError::Connection {
                server: server.to_string(),
                message: other.to_string(),
            },
        }
    }
}
