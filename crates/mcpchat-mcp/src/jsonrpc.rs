//! JSON-RPC 2.0 messages exchanged with tool servers.

use serde::{Deserialize, Serialize};

/// A JSON-RPC 2.0 request.
#[derive(Debug, Clone, Serialize)]
pub struct JsonRpcRequest {
    pub jsonrpc: &'static str,
    pub id: u64,
    pub method: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub params: Option<serde_json::Value>,
}

impl JsonRpcRequest {
    pub fn new(id: u64, method: impl Into<String>, params: Option<serde_json::Value>) -> Self {
        Self {
            jsonrpc: "2.0",
            id,
            method: method.into(),
            params,
        }
    }
}

/// A JSON-RPC 2.0 response.
#[derive(Debug, Clone, Deserialize)]
pub struct JsonRpcResponse {
    #[serde(default)]
    pub id: Option<u64>,
    pub result: Option<serde_json::Value>,
    pub error: Option<JsonRpcError>,
}

/// A JSON-RPC 2.0 error object.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonRpcError {
    pub code: i64,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
}

/// A JSON-RPC 2.0 notification (no id, no response expected).
#[derive(Debug, Clone, Serialize)]
pub struct JsonRpcNotification {
    pub jsonrpc: &'static str,
    pub method: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub params: Option<serde_json::Value>,
}

impl JsonRpcNotification {
    pub fn new(method: impl Into<String>, params: Option<serde_json::Value>) -> Self {
        Self {
            jsonrpc: "2.0",
            method: method.into(),
            params,
        }
    }
}

/// A reply the client sends to a server-initiated request.
#[derive(Debug, Clone, Serialize)]
pub struct JsonRpcReply {
    pub jsonrpc: &'static str,
    pub id: serde_json::Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<JsonRpcError>,
}

impl JsonRpcReply {
    /// Answer a server request. Only `ping` is supported; anything else is
    /// rejected with "method not found".
    pub fn to_server_request(id: serde_json::Value, method: &str) -> Self {
        if method == "ping" {
            Self {
                jsonrpc: "2.0",
                id,
                result: Some(serde_json::json!({})),
                error: None,
            }
        } else {
            Self {
                jsonrpc: "2.0",
                id,
                result: None,
                error: Some(JsonRpcError {
                    code: -32601,
                    message: format!("Method not found: {method}"),
                    data: None,
                }),
            }
        }
    }
}

/// A message received from a tool server.
#[derive(Debug, Clone)]
pub enum Incoming {
    Response(JsonRpcResponse),
    Request {
        id: serde_json::Value,
        method: String,
    },
    Notification {
        method: String,
    },
}

/// Classify a raw JSON-RPC message by its shape.
pub fn classify(raw: &str) -> Result<Incoming, serde_json::Error> {
    let value: serde_json::Value = serde_json::from_str(raw)?;
    let method = value
        .get("method")
        .and_then(|m| m.as_str())
        .map(str::to_string);

    match (method, value.get("id").cloned()) {
        (Some(method), Some(id)) if !id.is_null() => Ok(Incoming::Request { id, method }),
        (Some(method), _) => Ok(Incoming::Notification { method }),
        (None, _) => Ok(Incoming::Response(serde_json::from_value(value)?)),
    }
}
