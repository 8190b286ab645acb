//! Route handlers for `/api/v1/mcp`.

use std::convert::Infallible;

use axum::Json;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::sse::{Event, Sse};
use futures_util::Stream;
use mcpchat_core::{RecordFilter, ServerStore};
use mcpchat_types::{ChatRequest, NewServerRecord, ServerRecord};

use crate::AppState;
use crate::error::HttpError;
use crate::sse::chat_sse;

fn not_found(id: u64) -> HttpError {
    HttpError::NotFound(format!("Tool server {id} not found"))
}

/// List records, optionally filtered by `?name=` and `?type=`.
pub async fn list(
    State(state): State<AppState>,
    Query(filter): Query<RecordFilter>,
) -> Result<Json<Vec<ServerRecord>>, HttpError> {
    Ok(Json(state.store.list(&filter).await?))
}

pub async fn get(
    State(state): State<AppState>,
    Path(id): Path<u64>,
) -> Result<Json<ServerRecord>, HttpError> {
    state
        .store
        .get(id)
        .await?
        .map(Json)
        .ok_or_else(|| not_found(id))
}

pub async fn create(
    State(state): State<AppState>,
    Json(record): Json<NewServerRecord>,
) -> Result<(StatusCode, Json<ServerRecord>), HttpError> {
    let created = state.store.create(record).await?;
    tracing::info!(id = created.id, name = %created.name(), "Registered tool server");
    Ok((StatusCode::CREATED, Json(created)))
}

pub async fn update(
    State(state): State<AppState>,
    Path(id): Path<u64>,
    Json(record): Json<NewServerRecord>,
) -> Result<Json<ServerRecord>, HttpError> {
    state
        .store
        .update(id, record)
        .await?
        .map(Json)
        .ok_or_else(|| not_found(id))
}

pub async fn delete(
    State(state): State<AppState>,
    Path(id): Path<u64>,
) -> Result<StatusCode, HttpError> {
    if state.store.delete(id).await? {
        tracing::info!(id, "Removed tool server");
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(not_found(id))
    }
}

/// Start a chat turn and stream it back as server-sent events.
///
/// Unknown server ids and model configuration errors are answered with a
/// JSON error body; once streaming starts, failures arrive as an `error`
/// event.
pub async fn chat(
    State(state): State<AppState>,
    Json(request): Json<ChatRequest>,
) -> Result<Sse<impl Stream<Item = Result<Event, Infallible>> + Send>, HttpError> {
    tracing::info!(
        provider = %request.provider,
        model = %request.model,
        servers = ?request.server_ids,
        "Chat request"
    );
    let stream = state.orchestrator.run(request).await?;
    Ok(chat_sse(stream))
}

pub async fn health() -> &'static str {
    "OK"
}
