//! Capability traits for LLM backends.

use crate::{ApiError, CompletionRequest, ConfigError, ModelEvent, ModelSpec};
use futures_core::Stream;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

/// A boxed async stream of canonical events from an LLM backend.
pub type EventStream = Pin<Box<dyn Stream<Item = Result<ModelEvent, ApiError>> + Send>>;

/// Uniform streaming chat-completion capability, one implementation per provider.
///
/// Dyn-compatible so the orchestrator works with `Arc<dyn ChatModel>`.
pub trait ChatModel: Send + Sync {
    /// Start a streaming completion, returning a stream of canonical events.
    fn stream_completion<'a>(
        &'a self,
        request: &'a CompletionRequest,
    ) -> Pin<Box<dyn Future<Output = Result<EventStream, ApiError>> + Send + 'a>>;

    /// Provider name for logging (e.g., "anthropic").
    fn name(&self) -> &str;
}

/// Builds a [`ChatModel`] from a resolved provider selection.
pub trait ModelFactory: Send + Sync {
    /// Construct the model. Must not perform network I/O.
    fn build(&self, spec: &ModelSpec) -> Result<Arc<dyn ChatModel>, ConfigError>;

    /// The credential configured at startup for the provider, if any.
    fn default_credential(&self, provider: crate::LlmProvider) -> Option<String> {
        let _ = provider;
        None
    }
}
