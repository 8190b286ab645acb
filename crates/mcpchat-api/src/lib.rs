//! Streaming LLM backends for mcpchat.
//!
//! Every provider is exposed as a [`ChatModel`](mcpchat_types::ChatModel)
//! producing canonical [`ModelEvent`](mcpchat_types::ModelEvent)s.

mod anthropic;
mod factory;
mod gemini;
mod http;
mod openai;
mod retry;
mod stream;

pub use anthropic::AnthropicModel;
pub use factory::BackendFactory;
pub use gemini::GeminiModel;
pub use http::HttpBackend;
pub use openai::{DEEPSEEK_BASE_URL, OPENAI_BASE_URL, OpenAiModel};
pub use retry::RetryConfig;
pub use stream::{ModelEventStream, SseDecoder};
