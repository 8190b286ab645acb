//! HTTP surface for mcpchat: a registry of MCP tool servers and a streaming
//! chat endpoint that lets an LLM call their tools.

pub mod error;
pub mod routes;
pub mod sse;

use std::sync::Arc;

use axum::Router;
use axum::routing::{get, post};
use mcpchat_core::{ChatOrchestrator, ServerStore};

pub use error::HttpError;

/// Shared handler state.
#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn ServerStore>,
    pub orchestrator: Arc<ChatOrchestrator>,
}

impl AppState {
    pub fn new(store: Arc<dyn ServerStore>, orchestrator: ChatOrchestrator) -> Self {
        Self {
            store,
            orchestrator: Arc::new(orchestrator),
        }
    }
}

/// Build the application router.
pub fn router(state: AppState) -> Router {
    let mcp = Router::new()
        .route("/", get(routes::list).post(routes::create))
        .route("/chat", post(routes::chat))
        .route("/health", get(routes::health))
        .route(
            "/{id}",
            get(routes::get).put(routes::update).delete(routes::delete),
        );

    Router::new().nest("/api/v1/mcp", mcp).with_state(state)
}
