//! Test doubles for the orchestrator's ports.

#![allow(dead_code)]

use std::collections::{HashMap, VecDeque};
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures_util::StreamExt;
use futures_util::stream;
use mcpchat_core::{ChatOptions, ChatOrchestrator, ChatStream, MemoryServerStore, ServerStore};
use mcpchat_mcp::{BoxFuture, McpError, ToolDescriptor, ToolResult, ToolServer, ToolServerConnector};
use mcpchat_types::{
    ApiError, ChatChunk, ChatModel, ChatRequest, CompletionRequest, ConfigError, EventStream,
    LlmProvider, ModelEvent, ModelFactory, ModelSpec, NewServerRecord, ServerRecord, StopReason,
};

// ---------------------------------------------------------------------------
// MockModel
// ---------------------------------------------------------------------------

/// One scripted step of a model round.
pub enum Step {
    Event(ModelEvent),
    Fail(ApiError),
    Delay(u64),
    /// Never yields again.
    Hang,
}

pub fn text(t: &str) -> Step {
    Step::Event(ModelEvent::TextDelta(t.to_string()))
}

pub fn call(id: &str, name: &str, input: serde_json::Value) -> Step {
    Step::Event(ModelEvent::ToolUse {
        id: id.to_string(),
        name: name.to_string(),
        input,
    })
}

pub fn stop(reason: StopReason) -> Step {
    Step::Event(ModelEvent::Stop(reason))
}

/// A model that plays back one scripted round per completion request.
pub struct MockModel {
    rounds: Mutex<VecDeque<Vec<Step>>>,
    /// Played once the scripted rounds run out.
    repeat: Option<fn() -> Vec<Step>>,
    pub requests: Mutex<Vec<CompletionRequest>>,
}

impl MockModel {
    pub fn new(rounds: Vec<Vec<Step>>) -> Arc<Self> {
        Arc::new(Self {
            rounds: Mutex::new(rounds.into()),
            repeat: None,
            requests: Mutex::new(Vec::new()),
        })
    }

    pub fn repeating(round: fn() -> Vec<Step>) -> Arc<Self> {
        Arc::new(Self {
            rounds: Mutex::new(VecDeque::new()),
            repeat: Some(round),
            requests: Mutex::new(Vec::new()),
        })
    }

    pub fn request_count(&self) -> usize {
        self.requests.lock().unwrap().len()
    }

    pub fn request(&self, n: usize) -> CompletionRequest {
        self.requests.lock().unwrap()[n].clone()
    }
}

impl ChatModel for MockModel {
    fn stream_completion<'a>(
        &'a self,
        request: &'a CompletionRequest,
    ) -> Pin<Box<dyn Future<Output = Result<EventStream, ApiError>> + Send + 'a>> {
        self.requests.lock().unwrap().push(request.clone());
        let steps = self
            .rounds
            .lock()
            .unwrap()
            .pop_front()
            .or_else(|| self.repeat.map(|f| f()))
            .unwrap_or_default();

        Box::pin(async move {
            let stream = stream::unfold(steps.into_iter(), |mut steps| async move {
                loop {
                    match steps.next()? {
                        Step::Event(e) => return Some((Ok(e), steps)),
                        Step::Fail(e) => return Some((Err(e), steps)),
                        Step::Delay(ms) => tokio::time::sleep(Duration::from_millis(ms)).await,
                        Step::Hang => std::future::pending::<()>().await,
                    }
                }
            });
            Ok(Box::pin(stream) as EventStream)
        })
    }

    fn name(&self) -> &str {
        "mock"
    }
}

// ---------------------------------------------------------------------------
// MockFactory
// ---------------------------------------------------------------------------

pub struct MockFactory {
    model: Arc<MockModel>,
    default_key: Option<String>,
    pub specs: Mutex<Vec<ModelSpec>>,
}

impl MockFactory {
    pub fn new(model: Arc<MockModel>, default_key: Option<&str>) -> Arc<Self> {
        Arc::new(Self {
            model,
            default_key: default_key.map(str::to_string),
            specs: Mutex::new(Vec::new()),
        })
    }
}

impl ModelFactory for MockFactory {
    fn build(&self, spec: &ModelSpec) -> Result<Arc<dyn ChatModel>, ConfigError> {
        if spec.credential.is_empty() {
            return Err(ConfigError::MissingKey {
                key: format!("credential for provider '{}'", spec.provider),
            });
        }
        self.specs.lock().unwrap().push(spec.clone());
        Ok(self.model.clone())
    }

    fn default_credential(&self, _provider: LlmProvider) -> Option<String> {
        self.default_key.clone()
    }
}

// ---------------------------------------------------------------------------
// MockServer / MockConnector
// ---------------------------------------------------------------------------

/// How a mock server answers `invoke`.
#[derive(Clone, Copy)]
pub enum Behaviour {
    /// Text result echoing the arguments.
    Echo,
    /// A result flagged `isError`.
    ErrorResult,
    Timeout,
    /// The connection is gone.
    Broken,
    /// Sleeps this many milliseconds, then echoes.
    Slow(u64),
}

/// Observable state of one mock server, shared with the test.
#[derive(Default)]
pub struct ServerState {
    pub closed: AtomicBool,
    pub close_calls: AtomicUsize,
    pub invocations: Mutex<Vec<(String, serde_json::Value)>>,
}

impl ServerState {
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    pub fn invocation_count(&self) -> usize {
        self.invocations.lock().unwrap().len()
    }
}

struct MockServer {
    name: String,
    behaviour: Behaviour,
    state: Arc<ServerState>,
}

impl ToolServer for MockServer {
    fn name(&self) -> &str {
        &self.name
    }

    fn list_tools(&self) -> BoxFuture<'_, Result<Vec<ToolDescriptor>, McpError>> {
        Box::pin(async move {
            Ok(vec![ToolDescriptor {
                name: "run".into(),
                description: "Run something".into(),
                input_schema: serde_json::json!({"type": "object"}),
            }])
        })
    }

    fn invoke<'a>(
        &'a self,
        tool: &'a str,
        arguments: serde_json::Value,
    ) -> BoxFuture<'a, Result<ToolResult, McpError>> {
        Box::pin(async move {
            self.state
                .invocations
                .lock()
                .unwrap()
                .push((tool.to_string(), arguments.clone()));
            match self.behaviour {
                Behaviour::Echo => Ok(ToolResult::text(format!("{tool}: {arguments}"))),
                Behaviour::ErrorResult => {
                    let mut result = ToolResult::text("tool said no");
                    result.is_error = true;
                    Ok(result)
                }
                Behaviour::Timeout => Err(McpError::Timeout {
                    server: self.name.clone(),
                    operation: "tools/call".into(),
                    timeout_ms: 10,
                }),
                Behaviour::Broken => Err(McpError::Closed {
                    server: self.name.clone(),
                }),
                Behaviour::Slow(ms) => {
                    tokio::time::sleep(Duration::from_millis(ms)).await;
                    Ok(ToolResult::text("slow done"))
                }
            }
        })
    }

    fn close(&self) -> BoxFuture<'_, Result<(), McpError>> {
        Box::pin(async move {
            self.state.close_calls.fetch_add(1, Ordering::SeqCst);
            self.state.closed.store(true, Ordering::SeqCst);
            Ok(())
        })
    }
}

/// Connects records by name to mock servers; unknown names fail to connect.
#[derive(Default)]
pub struct MockConnector {
    servers: HashMap<String, (Behaviour, Arc<ServerState>)>,
    pub calls: AtomicUsize,
}

impl MockConnector {
    pub fn with(mut self, name: &str, behaviour: Behaviour) -> Self {
        self.servers
            .insert(name.to_string(), (behaviour, Arc::new(ServerState::default())));
        self
    }

    pub fn state(&self, name: &str) -> Arc<ServerState> {
        Arc::clone(&self.servers[name].1)
    }

    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl ToolServerConnector for MockConnector {
    fn connect<'a>(
        &'a self,
        record: &'a ServerRecord,
    ) -> BoxFuture<'a, Result<Box<dyn ToolServer>, McpError>> {
        Box::pin(async move {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let Some((behaviour, state)) = self.servers.get(record.name()) else {
                return Err(McpError::Connection {
                    server: record.name().to_string(),
                    message: "connection refused".into(),
                });
            };
            Ok(Box::new(MockServer {
                name: record.name().to_string(),
                behaviour: *behaviour,
                state: Arc::clone(state),
            }) as Box<dyn ToolServer>)
        })
    }
}

// ---------------------------------------------------------------------------
// Harness
// ---------------------------------------------------------------------------

/// Store with one stdio record per name, ids assigned from 1 in order.
pub async fn store_with(names: &[&str]) -> Arc<MemoryServerStore> {
    let store = Arc::new(MemoryServerStore::new());
    for name in names {
        store
            .create(NewServerRecord::stdio(*name, "unused"))
            .await
            .unwrap();
    }
    store
}

pub fn orchestrator(
    store: Arc<MemoryServerStore>,
    connector: Arc<dyn ToolServerConnector>,
    factory: Arc<dyn ModelFactory>,
) -> ChatOrchestrator {
    ChatOrchestrator::new(store, connector, factory, ChatOptions::default())
}

pub fn request(server_ids: Vec<u64>, prompt: &str) -> ChatRequest {
    ChatRequest {
        server_ids,
        provider: LlmProvider::Openai,
        model: "test-model".into(),
        key: Some("sk-test".into()),
        base_url: None,
        prompt: prompt.into(),
    }
}

pub async fn collect(stream: ChatStream) -> Vec<ChatChunk> {
    tokio::time::timeout(Duration::from_secs(10), stream.collect::<Vec<_>>())
        .await
        .expect("chat stream should finish")
}

/// Poll until `cond` holds or two seconds pass.
pub async fn eventually(cond: impl Fn() -> bool) -> bool {
    for _ in 0..200 {
        if cond() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    cond()
}
