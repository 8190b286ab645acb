//! Turns a stored server record into a live, initialized tool server.

use crate::client::McpClient;
use crate::error::McpError;
use crate::server::ToolServer;
use crate::transport::{
    BoxFuture, SseTransport, StdioTransport, StreamableHttpTransport, Transport, header_map,
    parse_url,
};
use mcpchat_types::{ServerRecord, ServerType};
use std::collections::HashMap;
use std::time::Duration;

/// Establishes tool-server connections from records.
///
/// The orchestrator only sees this trait, so tests can substitute servers
/// that never touch a process or socket.
pub trait ToolServerConnector: Send + Sync {
    fn connect<'a>(
        &'a self,
        record: &'a ServerRecord,
    ) -> BoxFuture<'a, Result<Box<dyn ToolServer>, McpError>>;

    /// Check a record's transport settings without connecting.
    fn validate(&self, record: &ServerRecord) -> Result<(), McpError> {
        let _ = record;
        Ok(())
    }
}

/// Production connector speaking MCP over the record's transport.
#[derive(Debug, Default, Clone, Copy)]
pub struct McpConnector;

impl McpConnector {
    pub fn new() -> Self {
        Self
    }

    async fn connect_record(
        &self,
        record: &ServerRecord,
    ) -> Result<Box<dyn ToolServer>, McpError> {
        let name = record.name();
        let endpoint = Endpoint::from_record(record)?;

        if record.fields.timeout == 0 {
            return Err(McpError::Connection {
                server: name.to_string(),
                message: "connect timeout is zero".to_string(),
            });
        }
        let timeout = Duration::from_secs(record.fields.timeout);
        let read_timeout = Duration::from_secs(record.fields.read_timeout);

        tracing::debug!(
            "Connecting to MCP server '{name}' over {} (timeout {}s)",
            record.server_type(),
            record.fields.timeout
        );

        let handshake = async {
            let transport = endpoint.open(name).await?;
            McpClient::initialize(name, transport, timeout, read_timeout).await
        };

        let client = match tokio::time::timeout(timeout, handshake).await {
            Ok(Ok(client)) => client,
            Ok(Err(e)) => return Err(e.into_connection_error(name)),
            Err(_) => {
                return Err(McpError::Connection {
                    server: name.to_string(),
                    message: format!("not ready within {}s", record.fields.timeout),
                });
            }
        };

        tracing::info!("MCP server '{name}' connected");
        Ok(Box::new(client))
    }
}

impl ToolServerConnector for McpConnector {
    fn connect<'a>(
        &'a self,
        record: &'a ServerRecord,
    ) -> BoxFuture<'a, Result<Box<dyn ToolServer>, McpError>> {
        Box::pin(self.connect_record(record))
    }

    fn validate(&self, record: &ServerRecord) -> Result<(), McpError> {
        Endpoint::from_record(record).map(|_| ())
    }
}

/// A record's transport settings, validated.
#[derive(Debug, Clone, PartialEq)]
enum Endpoint {
    Stdio {
        command: String,
        args: Vec<String>,
        env: HashMap<String, String>,
    },
    Sse {
        url: String,
        headers: HashMap<String, String>,
    },
    StreamableHttp {
        url: String,
        headers: HashMap<String, String>,
    },
}

impl Endpoint {
    fn from_record(record: &ServerRecord) -> Result<Self, McpError> {
        let name = record.name();
        let missing = |field: &str| McpError::Config {
            server: name.to_string(),
            message: format!("{} server requires '{field}'", record.server_type()),
        };
        let fields = &record.fields;

        match record.server_type() {
            ServerType::Stdio => {
                let command = fields
                    .command
                    .as_deref()
                    .map(str::trim)
                    .filter(|c| !c.is_empty())
                    .ok_or_else(|| missing("command"))?;
                Ok(Endpoint::Stdio {
                    command: command.to_string(),
                    args: record.arg_list(),
                    env: fields.env.clone(),
                })
            }
            server_type => {
                let url = fields
                    .url
                    .as_deref()
                    .map(str::trim)
                    .filter(|u| !u.is_empty())
                    .ok_or_else(|| missing("url"))?;
                parse_url(name, url)?;
                header_map(name, &fields.headers)?;

                let url = url.to_string();
                let headers = fields.headers.clone();
                Ok(if server_type == ServerType::Sse {
                    Endpoint::Sse { url, headers }
                } else {
                    Endpoint::StreamableHttp { url, headers }
                })
            }
        }
    }

    async fn open(&self, name: &str) -> Result<Box<dyn Transport>, McpError> {
        Ok(match self {
            Endpoint::Stdio { command, args, env } => {
                Box::new(StdioTransport::spawn(name, command, args, env)?)
            }
            Endpoint::Sse { url, headers } => {
                Box::new(SseTransport::connect(name, url, headers).await?)
            }
            Endpoint::StreamableHttp { url, headers } => {
                Box::new(StreamableHttpTransport::new(name, url, headers)?)
            }
        })
    }
}
