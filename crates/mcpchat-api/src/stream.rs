//! Async stream that turns an SSE response body into canonical
//! [`ModelEvent`]s through a provider-specific decoder.

use futures_core::Stream;
use mcpchat_types::sse::{SseEvent, SseParser};
use mcpchat_types::{ApiError, ModelEvent};
use pin_project_lite::pin_project;
use std::collections::VecDeque;
use std::pin::Pin;
use std::task::{Context, Poll};

/// Provider wire format → canonical events.
pub trait SseDecoder: Send + 'static {
    /// Decode one SSE event. May yield zero or more canonical events.
    fn decode(&mut self, event: &SseEvent) -> Result<Vec<ModelEvent>, ApiError>;

    /// Called once when the body ends, to flush any partially assembled state.
    ///
    /// Decoders fail here with [`truncated`] when the body closed before the
    /// provider's end-of-message marker.
    fn finish(&mut self) -> Result<Vec<ModelEvent>, ApiError> {
        Ok(Vec::new())
    }
}

type ByteStream = Pin<Box<dyn Stream<Item = Result<bytes::Bytes, reqwest::Error>> + Send>>;

pin_project! {
    /// A stream of [`ModelEvent`]s decoded from a streaming HTTP body.
    ///
    /// The first error ends the stream.
    pub struct ModelEventStream<D> {
        #[pin]
        inner: ByteStream,
        parser: SseParser,
        decoder: D,
        queued: VecDeque<Result<ModelEvent, ApiError>>,
        done: bool,
    }
}

impl<D: SseDecoder> ModelEventStream<D> {
    pub fn new(
        byte_stream: impl Stream<Item = Result<bytes::Bytes, reqwest::Error>> + Send + 'static,
        decoder: D,
    ) -> Self {
        Self {
            inner: Box::pin(byte_stream),
            parser: SseParser::new(),
            decoder,
            queued: VecDeque::new(),
            done: false,
        }
    }
}

fn enqueue(
    queued: &mut VecDeque<Result<ModelEvent, ApiError>>,
    done: &mut bool,
    decoded: Result<Vec<ModelEvent>, ApiError>,
) {
    match decoded {
        Ok(events) => queued.extend(events.into_iter().map(Ok)),
        Err(e) => {
            queued.push_back(Err(e));
            *done = true;
        }
    }
}

impl<D: SseDecoder> Stream for ModelEventStream<D> {
    type Item = Result<ModelEvent, ApiError>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let mut this = self.project();

        loop {
            if let Some(item) = this.queued.pop_front() {
                return Poll::Ready(Some(item));
            }
            if *this.done {
                return Poll::Ready(None);
            }

            match this.inner.as_mut().poll_next(cx) {
                Poll::Ready(Some(Ok(bytes))) => {
                    for sse_event in this.parser.feed_bytes(&bytes) {
                        let decoded = this.decoder.decode(&sse_event);
                        enqueue(this.queued, this.done, decoded);
                        if *this.done {
                            break;
                        }
                    }
                }
                Poll::Ready(Some(Err(e))) => {
                    *this.done = true;
                    let err = if e.is_timeout() {
                        ApiError::Timeout
                    } else {
                        ApiError::Network(e.to_string())
                    };
                    return Poll::Ready(Some(Err(err)));
                }
                Poll::Ready(None) => {
                    *this.done = true;
                    let flushed = this.decoder.finish();
                    enqueue(this.queued, this.done, flushed);
                }
                Poll::Pending => return Poll::Pending,
            }
        }
    }
}

/// The body ended without the provider's end-of-message marker.
pub(crate) fn truncated(provider: &str) -> ApiError {
    ApiError::Network(format!("{provider} stream ended before completion"))
}

/// Parse an event's JSON payload, naming the provider on failure.
pub(crate) fn parse_data<T: serde::de::DeserializeOwned>(
    provider: &str,
    data: &str,
) -> Result<T, ApiError> {
    serde_json::from_str(data).map_err(|e| ApiError::StreamParse(format!("{provider}: {e}")))
}

/// Parse accumulated tool-call arguments; an empty buffer means no arguments.
pub(crate) fn parse_arguments(name: &str, raw: &str) -> Result<serde_json::Value, ApiError> {
    if raw.trim().is_empty() {
        return Ok(serde_json::json!({}));
    }
    serde_json::from_str(raw)
        .map_err(|e| ApiError::StreamParse(format!("arguments of tool call '{name}': {e}")))
}
