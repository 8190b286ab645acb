//! Stdio transport: a child process speaking newline-delimited JSON-RPC
//! over its stdin/stdout.

use super::{AbortOnDrop, BoxFuture, PendingRequests, Transport};
use crate::error::McpError;
use crate::jsonrpc::{
    Incoming, JsonRpcNotification, JsonRpcReply, JsonRpcRequest, JsonRpcResponse, classify,
};
use std::collections::HashMap;
use std::process::Stdio;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::{Mutex, mpsc};

/// How long a closing server gets to exit after stdin is closed.
const EXIT_GRACE: Duration = Duration::from_secs(2);

/// Async stdio transport for a tool-server subprocess.
pub struct StdioTransport {
    name: String,
    next_id: AtomicU64,
    write_tx: Mutex<Option<mpsc::Sender<String>>>,
    pending: Arc<PendingRequests>,
    reader_handle: AbortOnDrop,
    writer_handle: AbortOnDrop,
    child: Mutex<Option<Child>>,
}

impl StdioTransport {
    /// Spawn the server process and start background reader/writer tasks.
    pub fn spawn(
        name: &str,
        command: &str,
        args: &[String],
        env: &HashMap<String, String>,
    ) -> Result<Self, McpError> {
        let mut cmd = Command::new(command);
        cmd.args(args)
            .envs(env)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .kill_on_drop(true);

        let mut child = cmd.spawn().map_err(|e| McpError::Connection {
            server: name.to_string(),
            message: format!("failed to spawn '{command}': {e}"),
        })?;

        let (Some(stdin), Some(stdout)) = (child.stdin.take(), child.stdout.take()) else {
            return Err(McpError::Connection {
                server: name.to_string(),
                message: "child process has no stdio pipes".to_string(),
            });
        };

        let pending = Arc::new(PendingRequests::default());

        let (write_tx, mut write_rx) = mpsc::channel::<String>(64);
        let writer_handle = AbortOnDrop::spawn(async move {
            let mut stdin = stdin;
            while let Some(msg) = write_rx.recv().await {
                if stdin.write_all(msg.as_bytes()).await.is_err()
                    || stdin.write_all(b"\n").await.is_err()
                    || stdin.flush().await.is_err()
                {
                    break;
                }
            }
        });

        let reader_pending = Arc::clone(&pending);
        // weak, so closing the transport still closes the child's stdin
        let reply_tx = write_tx.downgrade();
        let server = name.to_string();
        let reader_handle = AbortOnDrop::spawn(async move {
            let mut lines = BufReader::new(stdout).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                if line.trim().is_empty() {
                    continue;
                }
                match classify(&line) {
                    Ok(Incoming::Response(resp)) => reader_pending.complete(resp).await,
                    Ok(Incoming::Request { id, method }) => {
                        let reply = JsonRpcReply::to_server_request(id, &method);
                        if let (Ok(serialized), Some(tx)) =
                            (serde_json::to_string(&reply), reply_tx.upgrade())
                        {
                            let _ = tx.send(serialized).await;
                        }
                    }
                    Ok(Incoming::Notification { method }) => {
                        tracing::debug!("MCP server '{server}' notification: {method}");
                    }
                    Err(e) => {
                        tracing::warn!("Failed to parse message from MCP server '{server}': {e}");
                    }
                }
            }
            tracing::debug!("MCP server '{server}' closed stdout");
            reader_pending.close().await;
        });

        Ok(Self {
            name: name.to_string(),
            next_id: AtomicU64::new(1),
            write_tx: Mutex::new(Some(write_tx)),
            pending,
            reader_handle,
            writer_handle,
            child: Mutex::new(Some(child)),
        })
    }

    async fn send_line(&self, line: String) -> Result<(), McpError> {
        let tx = self.write_tx.lock().await.clone();
        let closed = || McpError::Closed {
            server: self.name.clone(),
        };
        tx.ok_or_else(closed)?.send(line).await.map_err(|_| closed())
    }

    async fn send_request(
        &self,
        method: &str,
        params: Option<serde_json::Value>,
        timeout: Duration,
    ) -> Result<JsonRpcResponse, McpError> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let serialized = serde_json::to_string(&JsonRpcRequest::new(id, method, params))?;

        let rx = self.pending.register(&self.name, id).await?;
        if let Err(e) = self.send_line(serialized).await {
            self.pending.forget(id).await;
            return Err(e);
        }
        self.pending.wait(&self.name, method, id, rx, timeout).await
    }

    /// Close stdin, give the process a moment to exit, then kill it.
    async fn shutdown(&self) -> Result<(), McpError> {
        drop(self.write_tx.lock().await.take());

        let Some(mut child) = self.child.lock().await.take() else {
            return Ok(());
        };

        let result = match tokio::time::timeout(EXIT_GRACE, child.wait()).await {
            Ok(_) => Ok(()),
            Err(_) => {
                tracing::debug!("MCP server '{}' did not exit; killing", self.name);
                child.kill().await.map_err(McpError::from)
            }
        };

        self.reader_handle.abort();
        self.writer_handle.abort();
        self.pending.close().await;
        result
    }
}

impl Transport for StdioTransport {
    fn request<'a>(
        &'a self,
        method: &'a str,
        params: Option<serde_json::Value>,
        timeout: Duration,
    ) -> BoxFuture<'a, Result<JsonRpcResponse, McpError>> {
        Box::pin(self.send_request(method, params, timeout))
    }

    fn notify<'a>(
        &'a self,
        method: &'a str,
        params: Option<serde_json::Value>,
    ) -> BoxFuture<'a, Result<(), McpError>> {
        Box::pin(async move {
            let serialized = serde_json::to_string(&JsonRpcNotification::new(method, params))?;
            self.send_line(serialized).await
        })
    }

    fn close(&self) -> BoxFuture<'_, Result<(), McpError>> {
        Box::pin(self.shutdown())
    }
}
