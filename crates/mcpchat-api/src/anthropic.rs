//! Anthropic Messages API backend.

use crate::http::{HttpBackend, secret_header};
use crate::stream::{ModelEventStream, SseDecoder, parse_arguments, parse_data, truncated};
use mcpchat_types::sse::SseEvent;
use mcpchat_types::{
    ApiError, ChatModel, CompletionRequest, ContentBlock, EventStream, Message, ModelEvent, Role,
    StopReason,
};
use reqwest::header::{HeaderMap, HeaderValue};
use serde::Deserialize;
use serde_json::{Value, json};
use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;

pub const DEFAULT_BASE_URL: &str = "https://api.anthropic.com";

/// The Anthropic API version header value.
const ANTHROPIC_VERSION: &str = "2023-06-01";

/// Streaming chat model backed by the Anthropic Messages API.
#[derive(Clone)]
pub struct AnthropicModel {
    http: HttpBackend,
    api_key: String,
    base_url: String,
}

impl AnthropicModel {
    pub fn new(http: HttpBackend, api_key: impl Into<String>, base_url: impl Into<String>) -> Self {
        Self {
            http,
            api_key: api_key.into(),
            base_url: base_url.into(),
        }
    }

    fn headers(&self) -> Result<HeaderMap, ApiError> {
        let mut headers = HeaderMap::new();
        secret_header(&mut headers, "x-api-key", &self.api_key)?;
        headers.insert(
            "anthropic-version",
            HeaderValue::from_static(ANTHROPIC_VERSION),
        );
        Ok(headers)
    }
}

/// Build the Messages API request body.
pub(crate) fn request_body(request: &CompletionRequest) -> Value {
    let mut body = json!({
        "model": request.model,
        "max_tokens": request.max_tokens,
        "stream": true,
        "messages": request.messages.iter().map(wire_message).collect::<Vec<_>>(),
    });
    if let Some(system) = &request.system {
        body["system"] = json!(system);
    }
    if !request.tools.is_empty() {
        body["tools"] = request
            .tools
            .iter()
            .map(|t| {
                json!({
                    "name": t.name,
                    "description": t.description,
                    "input_schema": t.input_schema,
                })
            })
            .collect();
    }
    body
}

fn wire_message(message: &Message) -> Value {
    let role = match message.role {
        Role::User => "user",
        Role::Assistant => "assistant",
    };
    let content: Vec<Value> = message
        .content
        .iter()
        .map(|block| match block {
            ContentBlock::Text { text } => json!({"type": "text", "text": text}),
            ContentBlock::ToolUse { id, name, input } => {
                json!({"type": "tool_use", "id": id, "name": name, "input": input})
            }
            ContentBlock::ToolResult {
                tool_use_id,
                content,
                is_error,
                ..
            } => json!({
                "type": "tool_result",
                "tool_use_id": tool_use_id,
                "content": content,
                "is_error": is_error,
            }),
        })
        .collect();
    json!({"role": role, "content": content})
}

/// A tool_use block being assembled from `input_json_delta` fragments.
struct PendingToolUse {
    id: String,
    name: String,
    json: String,
}

/// Decodes Anthropic stream events.
#[derive(Default)]
pub(crate) struct AnthropicDecoder {
    tool_uses: HashMap<usize, PendingToolUse>,
    saw_message_stop: bool,
}

#[derive(Deserialize)]
struct BlockStart {
    index: usize,
    content_block: StartedBlock,
}

#[derive(Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum StartedBlock {
    ToolUse {
        id: String,
        name: String,
    },
    #[serde(other)]
    Other,
}

#[derive(Deserialize)]
struct BlockDelta {
    index: usize,
    delta: Delta,
}

#[derive(Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum Delta {
    TextDelta {
        text: String,
    },
    InputJsonDelta {
        partial_json: String,
    },
    #[serde(other)]
    Other,
}

#[derive(Deserialize)]
struct BlockStop {
    index: usize,
}

#[derive(Deserialize)]
struct MessageDelta {
    delta: MessageDeltaBody,
}

#[derive(Deserialize)]
struct MessageDeltaBody {
    stop_reason: Option<String>,
}

#[derive(Deserialize)]
struct ErrorEvent {
    error: ErrorBody,
}

#[derive(Deserialize)]
struct ErrorBody {
    #[serde(rename = "type")]
    error_type: String,
    message: String,
}

fn stop_reason(raw: &str) -> StopReason {
    match raw {
        "max_tokens" => StopReason::MaxTokens,
        "stop_sequence" => StopReason::StopSequence,
        "tool_use" => StopReason::ToolUse,
        _ => StopReason::EndTurn,
    }
}

impl SseDecoder for AnthropicDecoder {
    fn decode(&mut self, event: &SseEvent) -> Result<Vec<ModelEvent>, ApiError> {
        let data = event.data.as_str();
        match event.kind() {
            "content_block_start" => {
                let start: BlockStart = parse_data("anthropic", data)?;
                if let StartedBlock::ToolUse { id, name } = start.content_block {
                    self.tool_uses.insert(
                        start.index,
                        PendingToolUse {
                            id,
                            name,
                            json: String::new(),
                        },
                    );
                }
                Ok(Vec::new())
            }
            "content_block_delta" => {
                let delta: BlockDelta = parse_data("anthropic", data)?;
                match delta.delta {
                    Delta::TextDelta { text } => Ok(vec![ModelEvent::TextDelta(text)]),
                    Delta::InputJsonDelta { partial_json } => {
                        if let Some(pending) = self.tool_uses.get_mut(&delta.index) {
                            pending.json.push_str(&partial_json);
                        }
                        Ok(Vec::new())
                    }
                    Delta::Other => Ok(Vec::new()),
                }
            }
            "content_block_stop" => {
                let stop: BlockStop = parse_data("anthropic", data)?;
                match self.tool_uses.remove(&stop.index) {
                    Some(pending) => Ok(vec![ModelEvent::ToolUse {
                        input: parse_arguments(&pending.name, &pending.json)?,
                        id: pending.id,
                        name: pending.name,
                    }]),
                    None => Ok(Vec::new()),
                }
            }
            "message_delta" => {
                let delta: MessageDelta = parse_data("anthropic", data)?;
                Ok(delta
                    .delta
                    .stop_reason
                    .map(|r| vec![ModelEvent::Stop(stop_reason(&r))])
                    .unwrap_or_default())
            }
            "error" => {
                let event: ErrorEvent = parse_data("anthropic", data)?;
                Err(match event.error.error_type.as_str() {
                    "overloaded_error" => ApiError::Overloaded,
                    _ => ApiError::Server {
                        status: 500,
                        message: event.error.message,
                    },
                })
            }
            "message_stop" => {
                self.saw_message_stop = true;
                Ok(Vec::new())
            }
            "message_start" | "ping" => Ok(Vec::new()),
            other => {
                tracing::debug!("Unknown Anthropic SSE event type: {other}");
                Ok(Vec::new())
            }
        }
    }

    fn finish(&mut self) -> Result<Vec<ModelEvent>, ApiError> {
        if self.saw_message_stop {
            Ok(Vec::new())
        } else {
            Err(truncated("anthropic"))
        }
    }
}

impl ChatModel for AnthropicModel {
    fn stream_completion<'a>(
        &'a self,
        request: &'a CompletionRequest,
    ) -> Pin<Box<dyn Future<Output = Result<EventStream, ApiError>> + Send + 'a>> {
        Box::pin(async move {
            let url = format!("{}/v1/messages", self.base_url.trim_end_matches('/'));
            let response = self
                .http
                .post_json(&url, self.headers()?, &request_body(request))
                .await?;
            let stream =
                ModelEventStream::new(response.bytes_stream(), AnthropicDecoder::default());
            Ok(Box::pin(stream) as EventStream)
        })
    }

    fn name(&self) -> &str {
        "anthropic"
    }
}
