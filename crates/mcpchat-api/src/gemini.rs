//! Google Gemini `streamGenerateContent` backend.

use crate::http::{HttpBackend, secret_header};
use crate::stream::{ModelEventStream, SseDecoder, parse_data, truncated};
use mcpchat_types::sse::SseEvent;
use mcpchat_types::{
    ApiError, ChatModel, CompletionRequest, ContentBlock, EventStream, Message, ModelEvent, Role,
    StopReason,
};
use reqwest::header::HeaderMap;
use serde::Deserialize;
use serde_json::{Map, Value, json};
use std::future::Future;
use std::pin::Pin;

pub const DEFAULT_BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta";

/// Schema keywords the Gemini function-declaration validator rejects.
const UNSUPPORTED_SCHEMA_KEYS: &[&str] = &["$schema", "additionalProperties"];

#[derive(Clone)]
pub struct GeminiModel {
    http: HttpBackend,
    api_key: String,
    base_url: String,
}

impl GeminiModel {
    pub fn new(http: HttpBackend, api_key: impl Into<String>, base_url: impl Into<String>) -> Self {
        Self {
            http,
            api_key: api_key.into(),
            base_url: base_url.into(),
        }
    }

    fn url(&self, model: &str) -> String {
        format!(
            "{}/models/{model}:streamGenerateContent?alt=sse",
            self.base_url.trim_end_matches('/')
        )
    }
}

/// Remove keywords Gemini does not accept, at every nesting level.
pub(crate) fn clean_schema(schema: &Value) -> Value {
    match schema {
        Value::Object(map) => Value::Object(
            map.iter()
                .filter(|(k, _)| !UNSUPPORTED_SCHEMA_KEYS.contains(&k.as_str()))
                .map(|(k, v)| (k.clone(), clean_schema(v)))
                .collect::<Map<_, _>>(),
        ),
        Value::Array(items) => Value::Array(items.iter().map(clean_schema).collect()),
        other => other.clone(),
    }
}

pub(crate) fn request_body(request: &CompletionRequest) -> Value {
    let mut body = json!({
        "contents": request.messages.iter().map(wire_content).collect::<Vec<_>>(),
        "generationConfig": {"maxOutputTokens": request.max_tokens},
    });
    if let Some(system) = &request.system {
        body["systemInstruction"] = json!({"parts": [{"text": system}]});
    }
    if !request.tools.is_empty() {
        let declarations: Vec<Value> = request
            .tools
            .iter()
            .map(|t| {
                json!({
                    "name": t.name,
                    "description": t.description,
                    "parameters": clean_schema(&t.input_schema),
                })
            })
            .collect();
        body["tools"] = json!([{"functionDeclarations": declarations}]);
    }
    body
}

fn wire_content(message: &Message) -> Value {
    let role = match message.role {
        Role::User => "user",
        Role::Assistant => "model",
    };
    let parts: Vec<Value> = message
        .content
        .iter()
        .map(|block| match block {
            ContentBlock::Text { text } => json!({"text": text}),
            ContentBlock::ToolUse { name, input, .. } => {
                json!({"functionCall": {"name": name, "args": input}})
            }
            // Gemini matches results to calls by function name.
            ContentBlock::ToolResult { name, content, .. } => json!({
                "functionResponse": {"name": name, "response": {"content": content}}
            }),
        })
        .collect();
    json!({"role": role, "parts": parts})
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct GenerateResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
    error: Option<GeminiError>,
}

#[derive(Deserialize)]
struct GeminiError {
    #[serde(default)]
    code: Option<u16>,
    message: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct Candidate {
    content: Option<CandidateContent>,
    finish_reason: Option<String>,
}

#[derive(Deserialize)]
struct CandidateContent {
    #[serde(default)]
    parts: Vec<Part>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct Part {
    text: Option<String>,
    function_call: Option<FunctionCall>,
}

#[derive(Deserialize)]
struct FunctionCall {
    name: String,
    #[serde(default)]
    args: Option<Value>,
}

/// Gemini sends complete function calls, without ids.
#[derive(Default)]
pub(crate) struct GeminiDecoder {
    saw_call: bool,
    saw_finish: bool,
}

impl SseDecoder for GeminiDecoder {
    fn decode(&mut self, event: &SseEvent) -> Result<Vec<ModelEvent>, ApiError> {
        let response: GenerateResponse = parse_data("gemini", &event.data)?;
        if let Some(error) = response.error {
            return Err(ApiError::Server {
                status: error.code.unwrap_or(500),
                message: error.message,
            });
        }

        let mut events = Vec::new();
        // Only the first candidate is used.
        let Some(candidate) = response.candidates.into_iter().next() else {
            return Ok(events);
        };
        for part in candidate.content.map(|c| c.parts).unwrap_or_default() {
            if let Some(text) = part.text.filter(|t| !t.is_empty()) {
                events.push(ModelEvent::TextDelta(text));
            }
            if let Some(call) = part.function_call {
                self.saw_call = true;
                events.push(ModelEvent::ToolUse {
                    id: format!("call_{}", uuid::Uuid::new_v4().simple()),
                    name: call.name,
                    input: call.args.unwrap_or_else(|| json!({})),
                });
            }
        }
        if let Some(reason) = candidate.finish_reason {
            self.saw_finish = true;
            let stop = match reason.as_str() {
                "MAX_TOKENS" => StopReason::MaxTokens,
                _ if self.saw_call => StopReason::ToolUse,
                _ => StopReason::EndTurn,
            };
            events.push(ModelEvent::Stop(stop));
        }
        Ok(events)
    }

    fn finish(&mut self) -> Result<Vec<ModelEvent>, ApiError> {
        if self.saw_finish {
            Ok(Vec::new())
        } else {
            Err(truncated("gemini"))
        }
    }
}

impl ChatModel for GeminiModel {
    fn stream_completion<'a>(
        &'a self,
        request: &'a CompletionRequest,
    ) -> Pin<Box<dyn Future<Output = Result<EventStream, ApiError>> + Send + 'a>> {
        Box::pin(async move {
            let mut headers = HeaderMap::new();
            secret_header(&mut headers, "x-goog-api-key", &self.api_key)?;
            let response = self
                .http
                .post_json(&self.url(&request.model), headers, &request_body(request))
                .await?;
            let stream = ModelEventStream::new(response.bytes_stream(), GeminiDecoder::default());
            Ok(Box::pin(stream) as EventStream)
        })
    }

    fn name(&self) -> &str {
        "gemini"
    }
}
