//! Shared types and error hierarchy for mcpchat.

pub mod chat;
pub mod error;
pub mod message;
pub mod provider;
pub mod record;
pub mod sse;

pub use chat::{ChatChunk, ChatRequest, LlmProvider, ModelSpec};
pub use error::{ApiError, ConfigError};
pub use message::*;
pub use provider::{ChatModel, EventStream, ModelFactory};
pub use record::{NewServerRecord, ServerRecord, ServerType};
