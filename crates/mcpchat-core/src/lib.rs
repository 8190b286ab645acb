//! Server-record storage and chat-turn orchestration for mcpchat.

mod error;
mod orchestrator;
pub mod store;

pub use error::ChatError;
pub use orchestrator::{ChatOptions, ChatOrchestrator, ChatStream, MAX_TOOL_ROUNDS};
pub use store::{MemoryServerStore, RecordFilter, ServerStore, StoreError};
