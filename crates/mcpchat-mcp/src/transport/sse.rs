//! Legacy HTTP+SSE transport.
//!
//! The client opens a long-lived `GET` event stream. The server's first
//! `endpoint` event names the URL messages are `POST`ed to; responses come
//! back on the event stream as `message` events.

use super::{
    AbortOnDrop, BoxFuture, PendingRequests, Transport, header_map, network_error, parse_url,
    status_error,
};
use crate::error::McpError;
use crate::jsonrpc::{
    Incoming, JsonRpcNotification, JsonRpcReply, JsonRpcRequest, JsonRpcResponse, classify,
};
use futures_util::StreamExt;
use mcpchat_types::sse::SseParser;
use reqwest::header::{ACCEPT, CONTENT_TYPE, HeaderMap, HeaderValue};
use reqwest::{Client, Url};
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;
use tokio::sync::oneshot;

/// Client side of an SSE tool-server session.
pub struct SseTransport {
    name: String,
    http: Client,
    headers: HeaderMap,
    endpoint: Url,
    next_id: AtomicU64,
    pending: Arc<PendingRequests>,
    reader_handle: AbortOnDrop,
    closed: AtomicBool,
}

impl SseTransport {
    /// Open the event stream and wait for the server to announce its
    /// message endpoint. Callers bound this with their connect timeout.
    pub async fn connect(
        name: &str,
        url: &str,
        headers: &HashMap<String, String>,
    ) -> Result<Self, McpError> {
        let base = parse_url(name, url)?;
        let headers = header_map(name, headers)?;
        let http = Client::builder()
            .build()
            .map_err(|e| network_error(name, e))?;

        let response = http
            .get(base.clone())
            .headers(headers.clone())
            .header(ACCEPT, "text/event-stream")
            .send()
            .await
            .map_err(|e| network_error(name, e))?;
        if !response.status().is_success() {
            return Err(status_error(name, response).await);
        }

        let pending = Arc::new(PendingRequests::default());
        let (endpoint_tx, endpoint_rx) = oneshot::channel::<Url>();

        let reader = EventReader {
            server: name.to_string(),
            base,
            http: http.clone(),
            headers: headers.clone(),
            pending: Arc::clone(&pending),
            endpoint: None,
        };
        // dropping the guard (for example on connect timeout) stops the reader
        let reader_handle = AbortOnDrop::spawn(reader.run(response, endpoint_tx));

        let endpoint = match endpoint_rx.await {
            Ok(endpoint) => endpoint,
            Err(_) => {
                return Err(McpError::Connection {
                    server: name.to_string(),
                    message: "event stream ended before an endpoint was announced".to_string(),
                });
            }
        };
        tracing::debug!("MCP server '{name}' message endpoint: {endpoint}");

        Ok(Self {
            name: name.to_string(),
            http,
            headers,
            endpoint,
            next_id: AtomicU64::new(1),
            pending,
            reader_handle,
            closed: AtomicBool::new(false),
        })
    }

    async fn post(&self, body: String) -> Result<(), McpError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(McpError::Closed {
                server: self.name.clone(),
            });
        }
        post_message(&self.name, &self.http, &self.headers, &self.endpoint, body).await
    }

    async fn send_request(
        &self,
        method: &str,
        params: Option<serde_json::Value>,
        timeout: Duration,
    ) -> Result<JsonRpcResponse, McpError> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let body = serde_json::to_string(&JsonRpcRequest::new(id, method, params))?;

        let rx = self.pending.register(&self.name, id).await?;
        // One deadline covers the POST and the reply on the event stream.
        let exchange = async {
            self.post(body).await?;
            rx.await.map_err(|_| McpError::Closed {
                server: self.name.clone(),
            })
        };
        match tokio::time::timeout(timeout, exchange).await {
            Ok(Ok(response)) => Ok(response),
            Ok(Err(e)) => {
                self.pending.forget(id).await;
                Err(e)
            }
            Err(_) => {
                self.pending.forget(id).await;
                Err(McpError::Timeout {
                    server: self.name.clone(),
                    operation: method.to_string(),
                    timeout_ms: timeout.as_millis() as u64,
                })
            }
        }
    }
}

async fn post_message(
    server: &str,
    http: &Client,
    headers: &HeaderMap,
    endpoint: &Url,
    body: String,
) -> Result<(), McpError> {
    let response = http
        .post(endpoint.clone())
        .headers(headers.clone())
        .header(CONTENT_TYPE, HeaderValue::from_static("application/json"))
        .body(body)
        .send()
        .await
        .map_err(|e| network_error(server, e))?;
    if response.status().is_success() {
        Ok(())
    } else {
        Err(status_error(server, response).await)
    }
}

/// Background task draining the event stream.
struct EventReader {
    server: String,
    base: Url,
    http: Client,
    headers: HeaderMap,
    pending: Arc<PendingRequests>,
    endpoint: Option<Url>,
}

impl EventReader {
    async fn run(mut self, response: reqwest::Response, endpoint_tx: oneshot::Sender<Url>) {
        let mut endpoint_tx = Some(endpoint_tx);
        let mut parser = SseParser::new();
        let mut bytes = response.bytes_stream();

        while let Some(chunk) = bytes.next().await {
            let chunk = match chunk {
                Ok(chunk) => chunk,
                Err(e) => {
                    tracing::warn!("MCP server '{}' event stream failed: {e}", self.server);
                    break;
                }
            };
            for event in parser.feed_bytes(&chunk) {
                match event.kind() {
                    "endpoint" => match self.base.join(event.data.trim()) {
                        Ok(url) => {
                            self.endpoint = Some(url.clone());
                            if let Some(tx) = endpoint_tx.take() {
                                let _ = tx.send(url);
                            }
                        }
                        Err(e) => tracing::warn!(
                            "MCP server '{}' sent an invalid endpoint '{}': {e}",
                            self.server,
                            event.data
                        ),
                    },
                    "message" => self.dispatch(&event.data).await,
                    other => tracing::debug!("Ignoring SSE event '{other}' from '{}'", self.server),
                }
            }
        }

        tracing::debug!("MCP server '{}' event stream ended", self.server);
        self.pending.close().await;
    }

    async fn dispatch(&self, data: &str) {
        match classify(data) {
            Ok(Incoming::Response(resp)) => self.pending.complete(resp).await,
            Ok(Incoming::Request { id, method }) => {
                let Some(endpoint) = self.endpoint.as_ref() else {
                    return;
                };
                let reply = JsonRpcReply::to_server_request(id, &method);
                let Ok(body) = serde_json::to_string(&reply) else {
                    return;
                };
                if let Err(e) =
                    post_message(&self.server, &self.http, &self.headers, endpoint, body).await
                {
                    tracing::warn!("Failed to answer '{method}' from '{}': {e}", self.server);
                }
            }
            Ok(Incoming::Notification { method }) => {
                tracing::debug!("MCP server '{}' notification: {method}", self.server);
            }
            Err(e) => {
                tracing::warn!("Failed to parse message from MCP server '{}': {e}", self.server);
            }
        }
    }
}

impl Transport for SseTransport {
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
            let body = serde_json::to_string(&JsonRpcNotification::new(method, params))?;
            self.post(body).await
        })
    }

    fn close(&self) -> BoxFuture<'_, Result<(), McpError>> {
        Box::pin(async move {
            if self.closed.swap(true, Ordering::AcqRel) {
                return Ok(());
            }
            self.reader_handle.abort();
            self.pending.close().await;
            Ok(())
        })
    }
}
