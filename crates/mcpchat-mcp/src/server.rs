//! The tool-server abstraction the pool and orchestrator work against.

use crate::error::McpError;
use crate::transport::BoxFuture;
use serde::Deserialize;

/// A tool advertised by a server.
#[derive(Debug, Clone, PartialEq)]
pub struct ToolDescriptor {
    pub name: String,
    pub description: String,
    pub input_schema: serde_json::Value,
}

/// Result of one tool invocation.
#[derive(Debug, Clone, PartialEq)]
pub struct ToolResult {
    pub content: Vec<ToolContent>,
    pub is_error: bool,
}

impl ToolResult {
    /// A plain-text result.
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            content: vec![ToolContent::Text { text: text.into() }],
            is_error: false,
        }
    }

    /// Flatten the content into text suitable for feeding back to a model.
    ///
    /// Images are replaced with a placeholder naming their MIME type; other
    /// content kinds are rendered as JSON.
    pub fn to_text(&self) -> String {
        self.content
            .iter()
            .map(|c| match c {
                ToolContent::Text { text } => text.clone(),
                ToolContent::Image { mime_type, .. } => format!("[image: {mime_type}]"),
                ToolContent::Other(value) => value.to_string(),
            })
            .collect::<Vec<_>>()
            .join("\n")
    }
}

/// A content item in a tool result.
#[derive(Debug, Clone, PartialEq)]
pub enum ToolContent {
    Text { text: String },
    Image { mime_type: String, data: String },
    /// Resources, audio and anything newer than this client.
    Other(serde_json::Value),
}

impl ToolContent {
    pub(crate) fn from_value(value: serde_json::Value) -> Self {
        #[derive(Deserialize)]
        #[serde(tag = "type", rename_all = "lowercase")]
        enum Known {
            Text {
                text: String,
            },
            Image {
                data: String,
                #[serde(rename = "mimeType")]
                mime_type: String,
            },
        }

        match serde_json::from_value::<Known>(value.clone()) {
            Ok(Known::Text { text }) => ToolContent::Text { text },
            Ok(Known::Image { data, mime_type }) => ToolContent::Image { mime_type, data },
            Err(_) => ToolContent::Other(value),
        }
    }
}

/// A live, initialized connection to one tool server.
pub trait ToolServer: Send + Sync {
    /// The server's record name.
    fn name(&self) -> &str;

    /// Discover the server's tools.
    fn list_tools(&self) -> BoxFuture<'_, Result<Vec<ToolDescriptor>, McpError>>;

    /// Call one tool with JSON arguments.
    fn invoke<'a>(
        &'a self,
        tool: &'a str,
        arguments: serde_json::Value,
    ) -> BoxFuture<'a, Result<ToolResult, McpError>>;

    /// Release the connection. Calling it again is a no-op.
    fn close(&self) -> BoxFuture<'_, Result<(), McpError>>;
}
