//! Chat stream to `text/event-stream` adapter.

use std::convert::Infallible;
use std::time::Duration;

use axum::response::sse::{Event, KeepAlive, Sse};
use futures_util::{Stream, StreamExt};
use mcpchat_core::ChatStream;
use mcpchat_types::ChatChunk;
use serde_json::json;

/// Render one chunk as an SSE event.
///
/// Text becomes a plain `data:` event; the terminal error becomes an
/// `event: error` carrying `{"code":500,"msg":...,"data":...}`.
pub fn chunk_event(chunk: ChatChunk) -> Event {
    match chunk {
        ChatChunk::Text(text) => Event::default().data(text),
        ChatChunk::Error(message) => {
            tracing::debug!(%message, "Streaming error event");
            let body = json!({
                "code": 500,
                "msg": "Chat turn failed",
                "data": message,
            });
            Event::default().event("error").data(body.to_string())
        }
    }
}

/// Stream a chat turn to the client.
///
/// Dropping the response (client disconnect) drops the `ChatStream`,
/// which cancels the turn.
pub fn chat_sse(stream: ChatStream) -> Sse<impl Stream<Item = Result<Event, Infallible>> + Send> {
    let events = stream.map(|chunk| Ok::<_, Infallible>(chunk_event(chunk)));
    Sse::new(events).keep_alive(KeepAlive::new().interval(Duration::from_secs(15)))
}
