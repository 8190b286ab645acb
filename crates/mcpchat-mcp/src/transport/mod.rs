//! Message transports for tool-server communication.
//!
//! Each transport moves JSON-RPC messages over a different channel but
//! exposes the same request/notify/close surface, so the client layer never
//! branches on transport kind.

mod sse;
mod stdio;
mod streamable;

pub use sse::SseTransport;
pub use stdio::StdioTransport;
pub use streamable::StreamableHttpTransport;

use crate::error::McpError;
use crate::jsonrpc::JsonRpcResponse;
use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::time::Duration;
use tokio::sync::{Mutex, oneshot};
use tokio::task::JoinHandle;

/// A boxed, sendable future.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// A bidirectional JSON-RPC channel to one tool server.
pub trait Transport: Send + Sync {
    /// Send a request and wait up to `timeout` for its response.
    fn request<'a>(
        &'a self,
        method: &'a str,
        params: Option<serde_json::Value>,
        timeout: Duration,
    ) -> BoxFuture<'a, Result<JsonRpcResponse, McpError>>;

    /// Send a notification (no response expected).
    fn notify<'a>(
        &'a self,
        method: &'a str,
        params: Option<serde_json::Value>,
    ) -> BoxFuture<'a, Result<(), McpError>>;

    /// Release the underlying process or connection. Calling it again is a no-op.
    fn close(&self) -> BoxFuture<'_, Result<(), McpError>>;
}

/// Aborts a background reader or writer task when dropped.
pub(crate) struct AbortOnDrop(JoinHandle<()>);

impl AbortOnDrop {
    pub(crate) fn spawn<F>(future: F) -> Self
    where
        F: Future<Output = ()> + Send + 'static,
    {
        Self(tokio::spawn(future))
    }

    pub(crate) fn abort(&self) {
        self.0.abort();
    }
}

impl Drop for AbortOnDrop {
    fn drop(&mut self) {
        self.0.abort();
    }
}

/// Build a header map from a record's configured headers.
pub(crate) fn header_map(
    server: &str,
    headers: &HashMap<String, String>,
) -> Result<reqwest::header::HeaderMap, McpError> {
    let invalid = |message: String| McpError::Config {
        server: server.to_string(),
        message,
    };
    let mut map = reqwest::header::HeaderMap::new();
    for (key, value) in headers {
        let name = reqwest::header::HeaderName::from_bytes(key.as_bytes())
            .map_err(|_| invalid(format!("invalid header name '{key}'")))?;
        let value = reqwest::header::HeaderValue::from_str(value)
            .map_err(|_| invalid(format!("invalid value for header '{key}'")))?;
        map.insert(name, value);
    }
    Ok(map)
}

/// Parse and check an HTTP(S) endpoint URL.
pub(crate) fn parse_url(server: &str, url: &str) -> Result<reqwest::Url, McpError> {
    let parsed = reqwest::Url::parse(url).map_err(|e| McpError::Config {
        server: server.to_string(),
        message: format!("invalid url '{url}': {e}"),
    })?;
    match parsed.scheme() {
        "http" | "https" => Ok(parsed),
        other => Err(McpError::Config {
            server: server.to_string(),
            message: format!("unsupported url scheme '{other}'"),
        }),
    }
}

/// Turn a non-success HTTP response into an error, consuming its body.
pub(crate) async fn status_error(server: &str, response: reqwest::Response) -> McpError {
    let status = response.status().as_u16();
    let body = response.text().await.unwrap_or_default();
    McpError::Http {
        server: server.to_string(),
        status,
        message: body.chars().take(200).collect(),
    }
}

pub(crate) fn network_error(server: &str, err: reqwest::Error) -> McpError {
    McpError::Connection {
        server: server.to_string(),
        message: err.to_string(),
    }
}

/// In-flight requests awaiting a response from a background reader.
#[derive(Default)]
pub(crate) struct PendingRequests {
    state: Mutex<PendingState>,
}

#[derive(Default)]
struct PendingState {
    waiters: HashMap<u64, oneshot::Sender<JsonRpcResponse>>,
    closed: bool,
}

impl PendingRequests {
    /// Register interest in the response with `id`.
    ///
    /// Fails once the reader has observed the end of the stream.
    pub(crate) async fn register(
        &self,
        server: &str,
        id: u64,
    ) -> Result<oneshot::Receiver<JsonRpcResponse>, McpError> {
        let mut state = self.state.lock().await;
        if state.closed {
            return Err(McpError::Closed {
                server: server.to_string(),
            });
        }
        let (tx, rx) = oneshot::channel();
        state.waiters.insert(id, tx);
        Ok(rx)
    }

    /// Deliver a response to its waiter, if any.
    pub(crate) async fn complete(&self, response: JsonRpcResponse) {
        let Some(id) = response.id else {
            tracing::debug!("Dropping JSON-RPC response without id");
            return;
        };
        let waiter = self.state.lock().await.waiters.remove(&id);
        match waiter {
            Some(tx) => {
                let _ = tx.send(response);
            }
            None => tracing::debug!("No pending request for response id {id}"),
        }
    }

    pub(crate) async fn forget(&self, id: u64) {
        self.state.lock().await.waiters.remove(&id);
    }

    /// Fail every waiter and refuse new registrations.
    pub(crate) async fn close(&self) {
        let mut state = self.state.lock().await;
        state.closed = true;
        state.waiters.clear();
    }

    /// Wait for the response to `id`, bounded by `timeout`.
    pub(crate) async fn wait(
        &self,
        server: &str,
        method: &str,
        id: u64,
        rx: oneshot::Receiver<JsonRpcResponse>,
        timeout: Duration,
    ) -> Result<JsonRpcResponse, McpError> {
        match tokio::time::timeout(timeout, rx).await {
            Ok(Ok(resp)) => Ok(resp),
            Ok(Err(_)) => Err(McpError::Closed {
                server: server.to_string(),
            }),
            Err(_) => {
                self.forget(id).await;
                Err(McpError::Timeout {
                    server: server.to_string(),
                    operation: method.to_string(),
                    timeout_ms: timeout.as_millis() as u64,
                })
            }
        }
    }
}
