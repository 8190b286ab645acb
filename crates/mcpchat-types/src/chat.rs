//! Chat turn input and output types.

use serde::{Deserialize, Serialize};

/// Supported upstream LLM providers.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LlmProvider {
    #[default]
    Openai,
    Deepseek,
    Anthropic,
    Gemini,
}

impl LlmProvider {
    pub fn as_str(&self) -> &'static str {
        match self {
            LlmProvider::Openai => "openai",
            LlmProvider::Deepseek => "deepseek",
            LlmProvider::Anthropic => "anthropic",
            LlmProvider::Gemini => "gemini",
        }
    }

    /// Whether the provider speaks the OpenAI chat-completions protocol and
    /// therefore honours a custom base URL.
    pub fn is_openai_compatible(&self) -> bool {
        matches!(self, LlmProvider::Openai | LlmProvider::Deepseek)
    }
}

impl std::fmt::Display for LlmProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A caller-supplied chat turn request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatRequest {
    /// Ids of the tool servers to make available for this turn.
    #[serde(default, alias = "pk")]
    pub server_ids: Vec<u64>,
    #[serde(default)]
    pub provider: LlmProvider,
    pub model: String,
    /// Per-request credential; falls back to the configured provider key.
    #[serde(default)]
    pub key: Option<String>,
    /// Custom endpoint for OpenAI-compatible providers.
    #[serde(default)]
    pub base_url: Option<String>,
    pub prompt: String,
}

/// Everything needed to construct a chat model.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelSpec {
    pub provider: LlmProvider,
    pub model: String,
    pub credential: String,
    pub base_url: Option<String>,
}

/// One unit of chat output.
///
/// A stream of chunks never contains anything after an `Error`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum ChatChunk {
    Text(String),
    Error(String),
}

impl ChatChunk {
    pub fn is_error(&self) -> bool {
        matches!(self, ChatChunk::Error(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn provider_defaults_to_openai() {
        let req: ChatRequest =
            serde_json::from_str(r#"{"model": "gpt-x", "prompt": "hello"}"#).unwrap();
        assert_eq!(req.provider, LlmProvider::Openai);
        assert!(req.server_ids.is_empty());
        assert!(req.key.is_none());
    }

    #[test]
    fn request_accepts_legacy_pk_field() {
        let req: ChatRequest = serde_json::from_str(
            r#"{"pk": [1, 2], "provider": "gemini", "model": "g", "prompt": "p"}"#,
        )
        .unwrap();
        assert_eq!(req.server_ids, vec![1, 2]);
        assert_eq!(req.provider, LlmProvider::Gemini);
    }

    #[test]
    fn openai_compatibility() {
        assert!(LlmProvider::Openai.is_openai_compatible());
        assert!(LlmProvider::Deepseek.is_openai_compatible());
        assert!(!LlmProvider::Anthropic.is_openai_compatible());
        assert!(!LlmProvider::Gemini.is_openai_compatible());
    }

    #[test]
    fn chunk_serialization() {
        let json = serde_json::to_value(ChatChunk::Error("boom".into())).unwrap();
        assert_eq!(json, serde_json::json!({"type": "error", "data": "boom"}));
        assert!(ChatChunk::Error(String::new()).is_error());
        assert!(!ChatChunk::Text(String::new()).is_error());
    }
}
