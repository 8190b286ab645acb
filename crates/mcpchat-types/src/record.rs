//! Tool-server records as kept by the server registry.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Default connect/initialize deadline in seconds.
pub const DEFAULT_TIMEOUT_SECS: u64 = 5;

/// Default idle-read deadline in seconds.
pub const DEFAULT_READ_TIMEOUT_SECS: u64 = 300;

fn default_timeout() -> u64 {
    DEFAULT_TIMEOUT_SECS
}

fn default_read_timeout() -> u64 {
    DEFAULT_READ_TIMEOUT_SECS
}

/// Transport used to reach a tool server.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ServerType {
    /// Local subprocess speaking JSON-RPC over stdin/stdout.
    #[default]
    Stdio,
    /// HTTP Server-Sent-Events endpoint.
    Sse,
    /// Streamable HTTP endpoint.
    #[serde(alias = "streamable-http", alias = "http")]
    StreamableHttp,
}

impl ServerType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ServerType::Stdio => "stdio",
            ServerType::Sse => "sse",
            ServerType::StreamableHttp => "streamable_http",
        }
    }
}

impl std::fmt::Display for ServerType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Fields supplied when creating or updating a server record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewServerRecord {
    pub name: String,
    #[serde(default, rename = "type")]
    pub server_type: ServerType,
    #[serde(default)]
    pub description: Option<String>,
    /// Executable for stdio servers.
    #[serde(default)]
    pub command: Option<String>,
    /// Comma-separated argument list for stdio servers, e.g. `"-y,server"`.
    #[serde(default)]
    pub args: Option<String>,
    /// Environment overlay for stdio servers.
    #[serde(default)]
    pub env: HashMap<String, String>,
    /// Endpoint for HTTP-based servers.
    #[serde(default)]
    pub url: Option<String>,
    /// Extra request headers for HTTP-based servers.
    #[serde(default)]
    pub headers: HashMap<String, String>,
    /// Connect/initialize deadline in seconds.
    #[serde(default = "default_timeout")]
    pub timeout: u64,
    /// Idle-read deadline in seconds.
    #[serde(default = "default_read_timeout")]
    pub read_timeout: u64,
}

impl NewServerRecord {
    /// A stdio record with default timeouts.
    pub fn stdio(name: impl Into<String>, command: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            server_type: ServerType::Stdio,
            description: None,
            command: Some(command.into()),
            args: None,
            env: HashMap::new(),
            url: None,
            headers: HashMap::new(),
            timeout: DEFAULT_TIMEOUT_SECS,
            read_timeout: DEFAULT_READ_TIMEOUT_SECS,
        }
    }

    /// An HTTP-family record with default timeouts.
    pub fn http(name: impl Into<String>, server_type: ServerType, url: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            server_type,
            description: None,
            command: None,
            args: None,
            env: HashMap::new(),
            url: Some(url.into()),
            headers: HashMap::new(),
            timeout: DEFAULT_TIMEOUT_SECS,
            read_timeout: DEFAULT_READ_TIMEOUT_SECS,
        }
    }
}

/// A persisted tool-server record. Read-only to the chat core.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServerRecord {
    pub id: u64,
    #[serde(flatten)]
    pub fields: NewServerRecord,
    pub created_time: DateTime<Utc>,
    #[serde(default)]
    pub updated_time: Option<DateTime<Utc>>,
}

impl ServerRecord {
    pub fn name(&self) -> &str {
        &self.fields.name
    }

    pub fn server_type(&self) -> ServerType {
        self.fields.server_type
    }

    /// Decode the stored comma-separated argument string into an ordered list.
    ///
    /// Segments are trimmed and empty segments dropped, so `"a, b,,c"` yields
    /// `["a", "b", "c"]` and an absent value yields an empty list.
    pub fn arg_list(&self) -> Vec<String> {
        split_args(self.fields.args.as_deref())
    }
}

/// Split a comma-encoded argument string.
pub fn split_args(args: Option<&str>) -> Vec<String> {
    args.map(|s| {
        s.split(',')
            .map(str::trim)
            .filter(|a| !a.is_empty())
            .map(str::to_string)
            .collect()
    })
    .unwrap_or_default()
}
