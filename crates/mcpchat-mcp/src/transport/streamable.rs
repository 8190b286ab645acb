//! Streamable HTTP transport.
//!
//! Every client message is a `POST` to a single endpoint. A request's answer
//! arrives either as a plain JSON body or as an SSE stream that eventually
//! carries the matching response. The server may assign a session id on
//! `initialize`; it is echoed on every later message and released with a
//! `DELETE` on close.

use super::{BoxFuture, Transport, header_map, network_error, parse_url, status_error};
use crate::error::McpError;
use crate::jsonrpc::{
    Incoming, JsonRpcNotification, JsonRpcReply, JsonRpcRequest, JsonRpcResponse, classify,
};
use futures_util::StreamExt;
use mcpchat_types::sse::SseParser;
use reqwest::header::{ACCEPT, CONTENT_TYPE, HeaderMap, HeaderValue};
use reqwest::{Client, StatusCode, Url};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;
use tokio::sync::Mutex;

/// Header carrying the server-assigned session id.
pub const SESSION_HEADER: &str = "mcp-session-id";

const ACCEPT_BOTH: &str = "application/json, text/event-stream";

/// How long the session `DELETE` may take on close.
const CLOSE_TIMEOUT: Duration = Duration::from_secs(3);

/// Client side of a streamable-HTTP tool-server session.
pub struct StreamableHttpTransport {
    name: String,
    http: Client,
    url: Url,
    headers: HeaderMap,
    next_id: AtomicU64,
    session_id: Mutex<Option<String>>,
    closed: AtomicBool,
}

impl StreamableHttpTransport {
    /// Validate the endpoint and prepare a client. No traffic is sent until
    /// the first request.
    pub fn new(
        name: &str,
        url: &str,
        headers: &HashMap<String, String>,
    ) -> Result<Self, McpError> {
        let url = parse_url(name, url)?;
        let headers = header_map(name, headers)?;
        let http = Client::builder()
            .build()
            .map_err(|e| network_error(name, e))?;

        Ok(Self {
            name: name.to_string(),
            http,
            url,
            headers,
            next_id: AtomicU64::new(1),
            session_id: Mutex::new(None),
            closed: AtomicBool::new(false),
        })
    }

    /// The session id assigned by the server, if any.
    pub async fn session_id(&self) -> Option<String> {
        self.session_id.lock().await.clone()
    }

    fn closed_error(&self) -> McpError {
        McpError::Closed {
            server: self.name.clone(),
        }
    }

    async fn post(&self, body: String) -> Result<reqwest::Response, McpError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(self.closed_error());
        }

        let mut request = self
            .http
            .post(self.url.clone())
            .headers(self.headers.clone())
            .header(CONTENT_TYPE, HeaderValue::from_static("application/json"))
            .header(ACCEPT, HeaderValue::from_static(ACCEPT_BOTH));
        if let Some(session) = self.session_id.lock().await.as_deref() {
            request = request.header(SESSION_HEADER, session);
        }

        let response = request
            .body(body)
            .send()
            .await
            .map_err(|e| network_error(&self.name, e))?;

        if let Some(session) = response
            .headers()
            .get(SESSION_HEADER)
            .and_then(|v| v.to_str().ok())
        {
            let mut current = self.session_id.lock().await;
            if current.as_deref() != Some(session) {
                tracing::debug!("MCP server '{}' assigned session {session}", self.name);
                *current = Some(session.to_string());
            }
        }

        if response.status().is_success() {
            Ok(response)
        } else {
            Err(status_error(&self.name, response).await)
        }
    }

    async fn exchange(
        &self,
        id: u64,
        method: &str,
        params: Option<serde_json::Value>,
    ) -> Result<JsonRpcResponse, McpError> {
        let body = serde_json::to_string(&JsonRpcRequest::new(id, method, params))?;
        let response = self.post(body).await?;

        if response.status() == StatusCode::ACCEPTED {
            return Err(McpError::Protocol(format!(
                "'{}' accepted request '{method}' without answering it",
                self.name
            )));
        }

        let is_stream = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .is_some_and(|ct| ct.starts_with("text/event-stream"));

        if is_stream {
            self.read_stream(id, response).await
        } else {
            let text = response
                .text()
                .await
                .map_err(|e| network_error(&self.name, e))?;
            self.find_response(id, &text)?.ok_or_else(|| {
                McpError::Protocol(format!(
                    "'{}' returned no response for request '{method}'",
                    self.name
                ))
            })
        }
    }

    /// Pick the response for `id` out of a JSON body (single message or batch).
    fn find_response(&self, id: u64, text: &str) -> Result<Option<JsonRpcResponse>, McpError> {
        let value: serde_json::Value = serde_json::from_str(text)?;
        let messages = match value {
            serde_json::Value::Array(items) => items,
            single => vec![single],
        };
        for message in messages {
            if let Incoming::Response(resp) = classify(&message.to_string())? {
                if resp.id == Some(id) {
                    return Ok(Some(resp));
                }
            }
        }
        Ok(None)
    }

    /// Drain an SSE response until the message answering `id` arrives.
    async fn read_stream(
        &self,
        id: u64,
        response: reqwest::Response,
    ) -> Result<JsonRpcResponse, McpError> {
        let mut parser = SseParser::new();
        let mut bytes = response.bytes_stream();

        while let Some(chunk) = bytes.next().await {
            let chunk = chunk.map_err(|e| network_error(&self.name, e))?;
            for event in parser.feed_bytes(&chunk) {
                if event.kind() != "message" {
                    continue;
                }
                match classify(&event.data) {
                    Ok(Incoming::Response(resp)) if resp.id == Some(id) => return Ok(resp),
                    Ok(Incoming::Response(resp)) => {
                        tracing::debug!("Ignoring unrelated response {:?}", resp.id);
                    }
                    Ok(Incoming::Request { id, method }) => self.answer(id, &method).await,
                    Ok(Incoming::Notification { method }) => {
                        tracing::debug!("MCP server '{}' notification: {method}", self.name);
                    }
                    Err(e) => tracing::warn!(
                        "Failed to parse message from MCP server '{}': {e}",
                        self.name
                    ),
                }
            }
        }

        Err(self.closed_error())
    }

    async fn answer(&self, id: serde_json::Value, method: &str) {
        let reply = JsonRpcReply::to_server_request(id, method);
        let Ok(body) = serde_json::to_string(&reply) else {
            return;
        };
        if let Err(e) = self.post(body).await {
            tracing::warn!("Failed to answer '{method}' from '{}': {e}", self.name);
        }
    }

    async fn delete_session(&self) -> Result<(), McpError> {
        let Some(session) = self.session_id.lock().await.take() else {
            return Ok(());
        };
        let response = self
            .http
            .delete(self.url.clone())
            .headers(self.headers.clone())
            .header(SESSION_HEADER, session)
            .timeout(CLOSE_TIMEOUT)
            .send()
            .await
            .map_err(|e| network_error(&self.name, e))?;

        // servers that don't support explicit termination answer 405
        let status = response.status();
        if status.is_success() || status == StatusCode::METHOD_NOT_ALLOWED {
            Ok(())
        } else {
            Err(status_error(&self.name, response).await)
        }
    }
}

impl Transport for StreamableHttpTransport {
    fn request<'a>(
        &'a self,
        method: &'a str,
        params: Option<serde_json::Value>,
        timeout: Duration,
    ) -> BoxFuture<'a, Result<JsonRpcResponse, McpError>> {
        Box::pin(async move {
            let id = self.next_id.fetch_add(1, Ordering::Relaxed);
            match tokio::time::timeout(timeout, self.exchange(id, method, params)).await {
                Ok(result) => result,
                Err(_) => Err(McpError::Timeout {
                    server: self.name.clone(),
                    operation: method.to_string(),
                    timeout_ms: timeout.as_millis() as u64,
                }),
            }
        })
    }

    fn notify<'a>(
        &'a self,
        method: &'a str,
        params: Option<serde_json::Value>,
    ) -> BoxFuture<'a, Result<(), McpError>> {
        Box::pin(async move {
            let body = serde_json::to_string(&JsonRpcNotification::new(method, params))?;
            self.post(body).await.map(|_| ())
        })
    }

    fn close(&self) -> BoxFuture<'_, Result<(), McpError>> {
        Box::pin(async move {
            if self.closed.swap(true, Ordering::AcqRel) {
                return Ok(());
            }
            self.delete_session().await
        })
    }
}
