//! OpenAI chat-completions backend, also used for DeepSeek and any other
//! OpenAI-compatible endpoint.

use crate::http::{HttpBackend, secret_header};
use crate::stream::{ModelEventStream, SseDecoder, parse_arguments, parse_data, truncated};
use mcpchat_types::sse::SseEvent;
use mcpchat_types::{
    ApiError, ChatModel, CompletionRequest, ContentBlock, EventStream, Message, ModelEvent, Role,
    StopReason,
};
use reqwest::header::HeaderMap;
use serde::Deserialize;
use serde_json::{Value, json};
use std::collections::BTreeMap;
use std::future::Future;
use std::pin::Pin;

pub const OPENAI_BASE_URL: &str = "https://api.openai.com/v1";
pub const DEEPSEEK_BASE_URL: &str = "https://api.deepseek.com";

/// Streaming chat model for an OpenAI-compatible endpoint.
#[derive(Clone)]
pub struct OpenAiModel {
    http: HttpBackend,
    /// Provider name used in logs (`openai`, `deepseek`).
    provider: &'static str,
    api_key: String,
    base_url: String,
}

impl OpenAiModel {
    pub fn new(
        http: HttpBackend,
        provider: &'static str,
        api_key: impl Into<String>,
        base_url: impl Into<String>,
    ) -> Self {
        Self {
            http,
            provider,
            api_key: api_key.into(),
            base_url: base_url.into(),
        }
    }
}

/// Build the chat-completions request body.
pub(crate) fn request_body(request: &CompletionRequest) -> Value {
    let mut messages = Vec::new();
    if let Some(system) = &request.system {
        messages.push(json!({"role": "system", "content": system}));
    }
    for message in &request.messages {
        push_wire_messages(&mut messages, message);
    }

    let mut body = json!({
        "model": request.model,
        "max_tokens": request.max_tokens,
        "stream": true,
        "messages": messages,
    });
    if !request.tools.is_empty() {
        body["tools"] = request
            .tools
            .iter()
            .map(|t| {
                json!({
                    "type": "function",
                    "function": {
                        "name": t.name,
                        "description": t.description,
                        "parameters": t.input_schema,
                    }
                })
            })
            .collect();
    }
    body
}

/// One canonical message may become several wire messages: tool results
/// are separate `tool` role messages.
fn push_wire_messages(out: &mut Vec<Value>, message: &Message) {
    let mut text = String::new();
    let mut tool_calls = Vec::new();

    for block in &message.content {
        match block {
            ContentBlock::Text { text: t } => text.push_str(t),
            ContentBlock::ToolUse { id, name, input } => tool_calls.push(json!({
                "id": id,
                "type": "function",
                "function": {"name": name, "arguments": input.to_string()},
            })),
            ContentBlock::ToolResult {
                tool_use_id,
                content,
                ..
            } => out.push(json!({
                "role": "tool",
                "tool_call_id": tool_use_id,
                "content": content,
            })),
        }
    }

    match message.role {
        Role::User if !text.is_empty() => out.push(json!({"role": "user", "content": text})),
        Role::User => {}
        Role::Assistant => {
            let mut wire = json!({
                "role": "assistant",
                "content": if text.is_empty() { Value::Null } else { json!(text) },
            });
            if !tool_calls.is_empty() {
                wire["tool_calls"] = Value::Array(tool_calls);
            }
            out.push(wire);
        }
    }
}

#[derive(Deserialize)]
struct Chunk {
    #[serde(default)]
    choices: Vec<Choice>,
    error: Option<ChunkError>,
}

#[derive(Deserialize)]
struct ChunkError {
    message: String,
}

#[derive(Deserialize)]
struct Choice {
    #[serde(default)]
    delta: ChoiceDelta,
    finish_reason: Option<String>,
}

#[derive(Deserialize, Default)]
struct ChoiceDelta {
    content: Option<String>,
    #[serde(default)]
    tool_calls: Vec<ToolCallDelta>,
}

#[derive(Deserialize)]
struct ToolCallDelta {
    index: usize,
    id: Option<String>,
    function: Option<FunctionDelta>,
}

#[derive(Deserialize)]
struct FunctionDelta {
    name: Option<String>,
    arguments: Option<String>,
}

#[derive(Default)]
struct PendingCall {
    id: String,
    name: String,
    arguments: String,
}

/// Decodes chat-completion chunks. Tool calls arrive as fragments keyed by
/// index and are emitted once the choice finishes.
#[derive(Default)]
pub(crate) struct OpenAiDecoder {
    calls: BTreeMap<usize, PendingCall>,
    /// A `finish_reason` or `[DONE]` was seen.
    completed: bool,
}

impl OpenAiDecoder {
    fn flush_calls(&mut self) -> Result<Vec<ModelEvent>, ApiError> {
        std::mem::take(&mut self.calls)
            .into_values()
            .map(|call| {
                Ok(ModelEvent::ToolUse {
                    input: parse_arguments(&call.name, &call.arguments)?,
                    id: call.id,
                    name: call.name,
                })
            })
            .collect()
    }
}

fn stop_reason(raw: &str) -> StopReason {
    match raw {
        "length" => StopReason::MaxTokens,
        "tool_calls" | "function_call" => StopReason::ToolUse,
        _ => StopReason::EndTurn,
    }
}

impl SseDecoder for OpenAiDecoder {
    fn decode(&mut self, event: &SseEvent) -> Result<Vec<ModelEvent>, ApiError> {
        let data = event.data.trim();
        if data == "[DONE]" {
            self.completed = true;
            return Ok(Vec::new());
        }

        let chunk: Chunk = parse_data("openai", data)?;
        if let Some(error) = chunk.error {
            return Err(ApiError::Server {
                status: 500,
                message: error.message,
            });
        }

        let mut events = Vec::new();
        for choice in chunk.choices {
            if let Some(text) = choice.delta.content.filter(|t| !t.is_empty()) {
                events.push(ModelEvent::TextDelta(text));
            }
            for fragment in choice.delta.tool_calls {
                let call = self.calls.entry(fragment.index).or_default();
                if let Some(id) = fragment.id {
                    call.id = id;
                }
                if let Some(function) = fragment.function {
                    if let Some(name) = function.name {
                        call.name.push_str(&name);
                    }
                    if let Some(arguments) = function.arguments {
                        call.arguments.push_str(&arguments);
                    }
                }
            }
            if let Some(reason) = choice.finish_reason {
                self.completed = true;
                events.extend(self.flush_calls()?);
                events.push(ModelEvent::Stop(stop_reason(&reason)));
            }
        }
        Ok(events)
    }

    fn finish(&mut self) -> Result<Vec<ModelEvent>, ApiError> {
        if !self.completed {
            return Err(truncated("openai"));
        }
        self.flush_calls()
    }
}

impl ChatModel for OpenAiModel {
    fn stream_completion<'a>(
        &'a self,
        request: &'a CompletionRequest,
    ) -> Pin<Box<dyn Future<Output = Result<EventStream, ApiError>> + Send + 'a>> {
        Box::pin(async move {
            let url = format!("{}/chat/completions", self.base_url.trim_end_matches('/'));
            let mut headers = HeaderMap::new();
            secret_header(&mut headers, "authorization", &format!("Bearer {}", self.api_key))?;

            let response = self
                .http
                .post_json(&url, headers, &request_body(request))
                .await?;
            let stream = ModelEventStream::new(response.bytes_stream(), OpenAiDecoder::default());
            Ok(Box::pin(stream) as EventStream)
        })
    }

    fn name(&self) -> &str {
        self.provider
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn data(raw: &str) -> SseEvent {
        SseEvent {
            event_type: None,
            data: raw.to_string(),
        }
    }

    #[test]
    fn text_deltas_and_finish() {
        let mut decoder = OpenAiDecoder::default();
        let events = decoder
            .decode(&data(r#"{"choices":[{"index":0,"delta":{"role":"assistant","content":"Hi"},"finish_reason":null}]}"#))
            .unwrap();
        assert_eq!(events, vec![ModelEvent::TextDelta("Hi".into())]);

        let events = decoder
            .decode(&data(r#"{"choices":[{"index":0,"delta":{},"finish_reason":"stop"}]}"#))
            .unwrap();
        assert_eq!(events, vec![ModelEvent::Stop(StopReason::EndTurn)]);

        assert!(decoder.decode(&data("[DONE]")).unwrap().is_empty());
    }

    #[test]
    fn done_alone_completes_the_stream() {
        let mut decoder = OpenAiDecoder::default();
        decoder
            .decode(&data(r#"{"choices":[{"delta":{"content":"Hi"}}]}"#))
            .unwrap();
        assert!(matches!(decoder.finish(), Err(ApiError::Network(_))));

        decoder.decode(&data("[DONE]")).unwrap();
        assert!(decoder.finish().unwrap().is_empty());
    }

    #[test]
    fn fragmented_tool_calls_are_assembled_in_index_order() {
        let mut decoder = OpenAiDecoder::default();
        let fragments = [
            r#"{"choices":[{"delta":{"tool_calls":[{"index":0,"id":"call_a","type":"function","function":{"name":"mcp__fs__read","arguments":""}}]}}]}"#,
            r#"{"choices":[{"delta":{"tool_calls":[{"index":1,"id":"call_b","type":"function","function":{"name":"mcp__fs__list","arguments":"{}"}}]}}]}"#,
            r#"{"choices":[{"delta":{"tool_calls":[{"index":0,"function":{"arguments":"{\"path\":"}}]}}]}"#,
            r#"{"choices":[{"delta":{"tool_calls":[{"index":0,"function":{"arguments":"\"/a\"}"}}]}}]}"#,
        ];
        for fragment in fragments {
            assert!(decoder.decode(&data(fragment)).unwrap().is_empty());
        }

        let events = decoder
            .decode(&data(r#"{"choices":[{"delta":{},"finish_reason":"tool_calls"}]}"#))
            .unwrap();
        assert_eq!(
            events,
            vec![
                ModelEvent::ToolUse {
                    id: "call_a".into(),
                    name: "mcp__fs__read".into(),
                    input: json!({"path": "/a"}),
                },
                ModelEvent::ToolUse {
                    id: "call_b".into(),
                    name: "mcp__fs__list".into(),
                    input: json!({}),
                },
                ModelEvent::Stop(StopReason::ToolUse),
            ]
        );
    }

    #[test]
    fn in_band_error_is_reported() {
        let mut decoder = OpenAiDecoder::default();
        let err = decoder
            .decode(&data(r#"{"error":{"message":"context length exceeded"}}"#))
            .unwrap_err();
        match err {
            ApiError::Server { message, .. } => assert_eq!(message, "context length exceeded"),
            other => panic!("Expected Server, got {other:?}"),
        }
    }

    #[test]
    fn tool_round_trip_becomes_assistant_and_tool_messages() {
        let request = CompletionRequest {
            model: "gpt-4o".into(),
            max_tokens: 256,
            system: Some("sys".into()),
            messages: vec![
                Message::user_text("list files"),
                Message {
                    role: Role::Assistant,
                    content: vec![ContentBlock::ToolUse {
                        id: "call_a".into(),
                        name: "mcp__fs__list".into(),
                        input: json!({"dir": "/"}),
                    }],
                },
                Message {
                    role: Role::User,
                    content: vec![ContentBlock::ToolResult {
                        tool_use_id: "call_a".into(),
                        name: "mcp__fs__list".into(),
                        content: "a\nb".into(),
                        is_error: false,
                    }],
                },
            ],
            tools: Vec::new(),
        };

        let body = request_body(&request);
        let messages = body["messages"].as_array().unwrap();
        assert_eq!(messages.len(), 4);
        assert_eq!(messages[0]["role"], "system");
        assert_eq!(messages[1]["content"], "list files");
        assert!(messages[2]["content"].is_null());
        assert_eq!(
            messages[2]["tool_calls"][0]["function"]["arguments"],
            r#"{"dir":"/"}"#
        );
        assert_eq!(messages[3]["role"], "tool");
        assert_eq!(messages[3]["tool_call_id"], "call_a");
        assert!(body.get("tools").is_none());
    }
}
