//! MCP (Model Context Protocol) client side for mcpchat.
//!
//! Tool servers are reached over one of three transports: a subprocess
//! speaking newline-delimited JSON-RPC on stdio, the legacy HTTP+SSE
//! transport, or streamable HTTP. Each is wrapped in the same [`ToolServer`]
//! capability, created by a [`ToolServerConnector`] and grouped per chat turn
//! in a [`ToolServerPool`].

pub mod client;
pub mod connector;
pub mod error;
pub mod jsonrpc;
pub mod pool;
pub mod server;
pub mod transport;

pub use client::{McpClient, PROTOCOL_VERSION};
pub use connector::{McpConnector, ToolServerConnector};
pub use error::McpError;
pub use pool::{PoolError, PoolFailure, ToolServerPool, namespaced_tool_name};
pub use server::{ToolContent, ToolDescriptor, ToolResult, ToolServer};
pub use transport::{BoxFuture, Transport};
