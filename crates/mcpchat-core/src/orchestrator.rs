//! One chat turn: resolve tool servers, build the model, then stream text
//! while running the model's tool calls against a per-turn pool.

use crate::error::ChatError;
use crate::store::ServerStore;
use futures_core::Stream;
use futures_util::StreamExt;
use mcpchat_mcp::{McpError, ToolServerConnector, ToolServerPool};
use mcpchat_types::{
    ChatChunk, ChatModel, ChatRequest, CompletionRequest, ConfigError, ContentBlock, Message,
    ModelEvent, ModelFactory, ModelSpec, Role, ServerRecord,
};
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use tokio::sync::mpsc;
use tokio_util::sync::{CancellationToken, DropGuard};

/// Maximum number of model rounds that end in tool calls.
pub const MAX_TOOL_ROUNDS: usize = 50;

/// Chunks buffered between the turn task and the consumer.
const CHUNK_BUFFER: usize = 64;

/// Per-deployment settings for chat turns.
#[derive(Debug, Clone)]
pub struct ChatOptions {
    pub max_tokens: u32,
    /// Bound on concurrent tool-server connects; `None` connects all at once.
    pub max_concurrent_connects: Option<usize>,
    pub system_prompt: Option<String>,
}

impl Default for ChatOptions {
    fn default() -> Self {
        Self {
            max_tokens: 4096,
            max_concurrent_connects: None,
            system_prompt: None,
        }
    }
}

/// Runs chat turns against the configured store, connector and model factory.
pub struct ChatOrchestrator {
    store: Arc<dyn ServerStore>,
    connector: Arc<dyn ToolServerConnector>,
    factory: Arc<dyn ModelFactory>,
    options: ChatOptions,
}

impl ChatOrchestrator {
    pub fn new(
        store: Arc<dyn ServerStore>,
        connector: Arc<dyn ToolServerConnector>,
        factory: Arc<dyn ModelFactory>,
        options: ChatOptions,
    ) -> Self {
        Self {
            store,
            connector,
            factory,
            options,
        }
    }

    /// Start a chat turn.
    ///
    /// Unknown server ids, malformed server records and model configuration
    /// problems are returned here, before anything is connected. Everything after that is reported as the
    /// final chunk of the returned stream. Dropping the stream cancels the
    /// turn; its tool servers are still closed.
    pub async fn run(&self, request: ChatRequest) -> Result<ChatStream, ChatError> {
        let records = self.resolve(&request.server_ids).await?;
        for record in &records {
            self.connector
                .validate(record)
                .map_err(|e| ConfigError::InvalidValue {
                    key: record.name().to_string(),
                    message: match e {
                        McpError::Config { message, .. } => message,
                        other => other.to_string(),
                    },
                })?;
        }

        let credential = request
            .key
            .filter(|k| !k.trim().is_empty())
            .or_else(|| self.factory.default_credential(request.provider))
            .unwrap_or_default();
        let model = self.factory.build(&ModelSpec {
            provider: request.provider,
            model: request.model.clone(),
            credential,
            base_url: request.base_url,
        })?;

        tracing::info!(
            "Starting chat turn: provider={}, model={}, servers={}",
            request.provider,
            request.model,
            records.len()
        );

        let (tx, rx) = mpsc::channel(CHUNK_BUFFER);
        let cancel = CancellationToken::new();
        let turn = Turn {
            connector: Arc::clone(&self.connector),
            model,
            records,
            completion: CompletionRequest {
                model: request.model,
                max_tokens: self.options.max_tokens,
                system: self.options.system_prompt.clone(),
                messages: vec![Message::user_text(request.prompt)],
                tools: Vec::new(),
            },
            max_concurrent_connects: self.options.max_concurrent_connects,
            tx,
        };
        tokio::spawn(turn.run(cancel.clone()));

        Ok(ChatStream {
            rx,
            finished: false,
            _cancel_on_drop: cancel.drop_guard(),
        })
    }

    /// Look up every id, keeping the first occurrence of duplicates.
    async fn resolve(&self, ids: &[u64]) -> Result<Vec<ServerRecord>, ChatError> {
        let mut records: Vec<ServerRecord> = Vec::with_capacity(ids.len());
        for &id in ids {
            if records.iter().any(|r| r.id == id) {
                continue;
            }
            match self.store.get(id).await? {
                Some(record) => records.push(record),
                None => return Err(ChatError::NotFound { id }),
            }
        }
        Ok(records)
    }
}

/// The chunks of one chat turn, in model emission order.
///
/// At most one [`ChatChunk::Error`] is yielded, and it is always last.
pub struct ChatStream {
    rx: mpsc::Receiver<ChatChunk>,
    finished: bool,
    _cancel_on_drop: DropGuard,
}

impl Stream for ChatStream {
    type Item = ChatChunk;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();
        if this.finished {
            return Poll::Ready(None);
        }
        match this.rx.poll_recv(cx) {
            Poll::Ready(Some(chunk)) => {
                if chunk.is_error() {
                    this.finished = true;
                }
                Poll::Ready(Some(chunk))
            }
            Poll::Ready(None) => {
                this.finished = true;
                Poll::Ready(None)
            }
            Poll::Pending => Poll::Pending,
        }
    }
}

/// What a model round asked for.
struct Round {
    text: String,
    calls: Vec<(String, String, serde_json::Value)>,
}

/// State owned by the spawned turn task.
struct Turn {
    connector: Arc<dyn ToolServerConnector>,
    model: Arc<dyn ChatModel>,
    records: Vec<ServerRecord>,
    completion: CompletionRequest,
    max_concurrent_connects: Option<usize>,
    tx: mpsc::Sender<ChatChunk>,
}

impl Turn {
    async fn run(mut self, cancel: CancellationToken) {
        // Connects are bounded by each record's timeout, so they are not
        // raced against cancellation: whatever connected gets closed below.
        let opened = ToolServerPool::open(
            self.connector.as_ref(),
            &self.records,
            self.max_concurrent_connects,
        )
        .await;
        let mut pool = match opened {
            Ok(pool) => pool,
            Err(e) => {
                self.finish(Err(e.into())).await;
                return;
            }
        };

        let outcome = tokio::select! {
            _ = cancel.cancelled() => Err(ChatError::Cancelled),
            outcome = self.converse(&mut pool) => outcome,
        };
        pool.close().await;
        self.finish(outcome).await;
    }

    async fn finish(&self, outcome: Result<(), ChatError>) {
        match outcome {
            Ok(()) => tracing::info!("Chat turn complete"),
            Err(ChatError::Cancelled) => tracing::info!("Chat turn cancelled by the client"),
            Err(e) => {
                tracing::error!("Chat turn failed: {e}");
                let _ = self.tx.send(ChatChunk::Error(e.to_string())).await;
            }
        }
    }

    async fn converse(&mut self, pool: &mut ToolServerPool) -> Result<(), ChatError> {
        self.completion.tools = pool.tools().await;
        tracing::debug!("Offering {} tools to the model", self.completion.tools.len());

        for round in 1..=MAX_TOOL_ROUNDS {
            let Round { text, calls } = self.stream_round().await?;
            if calls.is_empty() {
                return Ok(());
            }
            tracing::debug!("Round {round}: {} tool calls", calls.len());

            let mut assistant = Vec::with_capacity(calls.len() + 1);
            if !text.is_empty() {
                assistant.push(ContentBlock::Text { text });
            }
            let mut results = Vec::with_capacity(calls.len());
            for (id, name, input) in calls {
                assistant.push(ContentBlock::ToolUse {
                    id: id.clone(),
                    name: name.clone(),
                    input: input.clone(),
                });
                results.push(invoke_tool(pool, id, name, input).await?);
            }

            self.completion.messages.push(Message {
                role: Role::Assistant,
                content: assistant,
            });
            self.completion.messages.push(Message {
                role: Role::User,
                content: results,
            });
        }

        Err(ChatError::TooManyToolRounds {
            limit: MAX_TOOL_ROUNDS,
        })
    }

    /// Stream one completion, forwarding text as it arrives.
    async fn stream_round(&self) -> Result<Round, ChatError> {
        let mut stream = self.model.stream_completion(&self.completion).await?;
        let mut round = Round {
            text: String::new(),
            calls: Vec::new(),
        };

        while let Some(event) = stream.next().await {
            match event? {
                ModelEvent::TextDelta(delta) => {
                    round.text.push_str(&delta);
                    self.tx
                        .send(ChatChunk::Text(delta))
                        .await
                        .map_err(|_| ChatError::Cancelled)?;
                }
                ModelEvent::ToolUse { id, name, input } => round.calls.push((id, name, input)),
                ModelEvent::Stop(reason) => tracing::debug!("Model stopped: {reason:?}"),
            }
        }
        Ok(round)
    }
}

/// Run one tool call. Failures that only affect this call are handed back to
/// the model as an error result; a broken connection ends the turn.
async fn invoke_tool(
    pool: &ToolServerPool,
    id: String,
    name: String,
    input: serde_json::Value,
) -> Result<ContentBlock, ChatError> {
    let (content, is_error) = match pool.invoke(&name, input).await {
        Ok(result) => (result.to_text(), result.is_error),
        Err(e) if e.is_recoverable() => {
            tracing::warn!("Tool call '{name}' failed: {e}");
            (e.to_string(), true)
        }
        Err(e) => return Err(e.into()),
    };
    Ok(ContentBlock::ToolResult {
        tool_use_id: id,
        name,
        content,
        is_error,
    })
}
