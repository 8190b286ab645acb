//! Error type for chat turns.

use crate::store::StoreError;
use mcpchat_mcp::{McpError, PoolError};
use mcpchat_types::{ApiError, ConfigError};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ChatError {
    #[error("Tool server {id} not found")]
    NotFound { id: u64 },

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("Server store error: {0}")]
    Store(#[from] StoreError),

    #[error(transparent)]
    Pool(#[from] PoolError),

    #[error(transparent)]
    Mcp(#[from] McpError),

    #[error("Model error: {0}")]
    Api(#[from] ApiError),

    #[error("Stopped after {limit} tool rounds without a final answer")]
    TooManyToolRounds { limit: usize },

    #[error("Chat turn cancelled")]
    Cancelled,
}

impl ChatError {
    /// Errors reported synchronously to the caller rather than as an error
    /// chunk inside the stream.
    pub fn is_structured(&self) -> bool {
        matches!(self, ChatError::NotFound { .. } | ChatError::Config(_))
    }
}
