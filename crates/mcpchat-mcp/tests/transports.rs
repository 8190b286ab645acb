//! End-to-end connector tests against mock MCP servers: an in-process axum
//! server for the two HTTP transports and a bash script for stdio.

use axum::Router;
use axum::body::Body;
use axum::extract::State;
use axum::http::{HeaderMap, StatusCode, header};
use axum::response::sse::{Event, Sse};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use chrono::Utc;
use futures_util::Stream;
use mcpchat_mcp::{McpConnector, McpError, ToolServer, ToolServerConnector, ToolServerPool};
use mcpchat_types::{NewServerRecord, ServerRecord, ServerType};
use serde_json::{Value, json};
use std::convert::Infallible;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::{Mutex, mpsc};

fn record(id: u64, fields: NewServerRecord) -> ServerRecord {
    ServerRecord {
        id,
        fields,
        created_time: Utc::now(),
        updated_time: None,
    }
}

/// The mock server's answer to a JSON-RPC request.
fn answer(message: &Value) -> Option<Value> {
    let id = message.get("id")?.clone();
    let result = match message["method"].as_str()? {
        "initialize" => json!({
            "protocolVersion": "2024-11-05",
            "capabilities": {"tools": {}},
            "serverInfo": {"name": "mock", "version": "0.0.0"}
        }),
        "tools/list" => json!({
            "tools": [{
                "name": "echo",
                "description": "Echo the text back",
                "inputSchema": {"type": "object", "properties": {"text": {"type": "string"}}}
            }]
        }),
        "tools/call" => {
            let text = message["params"]["arguments"]["text"]
                .as_str()
                .unwrap_or_default();
            json!({"content": [{"type": "text", "text": text}], "isError": false})
        }
        other => {
            return Some(json!({
                "jsonrpc": "2.0",
                "id": id,
                "error": {"code": -32601, "message": format!("Method not found: {other}")}
            }));
        }
    };
    Some(json!({"jsonrpc": "2.0", "id": id, "result": result}))
}

async fn serve(app: Router) -> String {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    format!("http://{addr}")
}

// ---------------------------------------------------------------------------
// Legacy SSE
// ---------------------------------------------------------------------------

#[derive(Clone, Default)]
struct SseState {
    events: Arc<Mutex<Option<mpsc::UnboundedSender<Event>>>>,
}

async fn sse_stream(
    State(state): State<SseState>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let (tx, rx) = mpsc::unbounded_channel();
    let _ = tx.send(Event::default().event("endpoint").data("/messages?session=1"));
    *state.events.lock().await = Some(tx);

    let stream = futures_util::stream::unfold(rx, |mut rx| async move {
        rx.recv().await.map(|event| (Ok(event), rx))
    });
    Sse::new(stream)
}

async fn sse_message(State(state): State<SseState>, body: String) -> StatusCode {
    let message: Value = serde_json::from_str(&body).unwrap();
    if let Some(reply) = answer(&message) {
        if let Some(tx) = state.events.lock().await.as_ref() {
            let _ = tx.send(Event::default().event("message").data(reply.to_string()));
        }
    }
    StatusCode::ACCEPTED
}

async fn sse_server() -> String {
    let app = Router::new()
        .route("/sse", get(sse_stream))
        .route("/messages", post(sse_message))
        .with_state(SseState::default());
    serve(app).await
}

#[tokio::test]
async fn sse_server_lists_and_invokes_tools() {
    let base = sse_server().await;
    let rec = record(
        1,
        NewServerRecord::http("sse-mock", ServerType::Sse, format!("{base}/sse")),
    );

    let server = McpConnector::new().connect(&rec).await.unwrap();
    assert_eq!(server.name(), "sse-mock");

    let tools = server.list_tools().await.unwrap();
    assert_eq!(tools.len(), 1);
    assert_eq!(tools[0].name, "echo");

    let result = server
        .invoke("echo", json!({"text": "over sse"}))
        .await
        .unwrap();
    assert!(!result.is_error);
    assert_eq!(result.to_text(), "over sse");

    server.close().await.unwrap();
    server.close().await.unwrap();
}

#[tokio::test]
async fn sse_server_without_endpoint_event_times_out() {
    async fn silent() -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
        Sse::new(futures_util::stream::pending::<Result<Event, Infallible>>())
    }
    let base = serve(Router::new().route("/sse", get(silent))).await;
    let mut fields = NewServerRecord::http("mute", ServerType::Sse, format!("{base}/sse"));
    fields.timeout = 1;

    let err = McpConnector::new()
        .connect(&record(1, fields))
        .await
        .err()
        .unwrap();
    assert!(matches!(err, McpError::Connection { .. }), "got {err:?}");
}

/// Answers everything except `tools/call`, whose POST is accepted slowly and
/// never answered.
async fn slow_sse_message(State(state): State<SseState>, body: String) -> StatusCode {
    let message: Value = serde_json::from_str(&body).unwrap();
    if message["method"] == "tools/call" {
        tokio::time::sleep(std::time::Duration::from_millis(700)).await;
        return StatusCode::ACCEPTED;
    }
    sse_message(State(state), body).await
}

#[tokio::test]
async fn sse_request_shares_one_deadline_between_post_and_reply() {
    let app = Router::new()
        .route("/sse", get(sse_stream))
        .route("/messages", post(slow_sse_message))
        .with_state(SseState::default());
    let base = serve(app).await;
    let mut fields = NewServerRecord::http("slow-sse", ServerType::Sse, format!("{base}/sse"));
    fields.read_timeout = 1;

    let server = McpConnector::new().connect(&record(1, fields)).await.unwrap();
    let started = std::time::Instant::now();
    let err = server.invoke("echo", json!({"text": "x"})).await.err().unwrap();
    let elapsed = started.elapsed();

    assert!(matches!(err, McpError::Timeout { .. }), "got {err:?}");
    assert!(
        elapsed < std::time::Duration::from_millis(1500),
        "took {elapsed:?}"
    );
    server.close().await.unwrap();
}

// ---------------------------------------------------------------------------
// Streamable HTTP
// ---------------------------------------------------------------------------

const SESSION: &str = "session-42";

#[derive(Clone, Default)]
struct StreamableState {
    deleted: Arc<AtomicBool>,
}

async fn streamable_post(headers: HeaderMap, body: String) -> Response {
    let message: Value = serde_json::from_str(&body).unwrap();
    let method = message["method"].as_str().unwrap_or_default().to_string();

    if method != "initialize"
        && headers.get("mcp-session-id").and_then(|v| v.to_str().ok()) != Some(SESSION)
    {
        return (StatusCode::BAD_REQUEST, "missing session").into_response();
    }

    let Some(reply) = answer(&message) else {
        return StatusCode::ACCEPTED.into_response();
    };

    match method.as_str() {
        "initialize" => (
            [("mcp-session-id", SESSION)],
            [(header::CONTENT_TYPE, "application/json")],
            reply.to_string(),
        )
            .into_response(),
        // answer listings on an event stream, preceded by a notification
        "tools/list" => {
            let body = format!(
                "event: message\ndata: {}\n\nevent: message\ndata: {}\n\n",
                json!({"jsonrpc": "2.0", "method": "notifications/progress"}),
                reply
            );
            Response::builder()
                .header(header::CONTENT_TYPE, "text/event-stream")
                .body(Body::from(body))
                .unwrap()
        }
        _ => (
            [(header::CONTENT_TYPE, "application/json")],
            reply.to_string(),
        )
            .into_response(),
    }
}

async fn streamable_delete(
    State(state): State<StreamableState>,
    headers: HeaderMap,
) -> StatusCode {
    if headers.get("mcp-session-id").and_then(|v| v.to_str().ok()) == Some(SESSION) {
        state.deleted.store(true, Ordering::SeqCst);
        StatusCode::OK
    } else {
        StatusCode::NOT_FOUND
    }
}

#[tokio::test]
async fn streamable_server_echoes_session_and_deletes_on_close() {
    let state = StreamableState::default();
    let app = Router::new()
        .route("/mcp", post(streamable_post).delete(streamable_delete))
        .with_state(state.clone());
    let base = serve(app).await;

    let rec = record(
        2,
        NewServerRecord::http("web", ServerType::StreamableHttp, format!("{base}/mcp")),
    );
    let server = McpConnector::new().connect(&rec).await.unwrap();

    let tools = server.list_tools().await.unwrap();
    assert_eq!(tools[0].name, "echo");

    let result = server
        .invoke("echo", json!({"text": "over http"}))
        .await
        .unwrap();
    assert_eq!(result.to_text(), "over http");

    server.close().await.unwrap();
    assert!(state.deleted.load(Ordering::SeqCst));
}

#[tokio::test]
async fn streamable_http_error_fails_connect() {
    async fn reject() -> StatusCode {
        StatusCode::UNAUTHORIZED
    }
    let base = serve(Router::new().route("/mcp", post(reject))).await;
    let rec = record(
        3,
        NewServerRecord::http("locked", ServerType::StreamableHttp, format!("{base}/mcp")),
    );

    let err = McpConnector::new().connect(&rec).await.err().unwrap();
    match err {
        McpError::Connection { message, .. } => assert!(message.contains("401"), "{message}"),
        other => panic!("Expected Connection, got {other:?}"),
    }
}

// ---------------------------------------------------------------------------
// Stdio
// ---------------------------------------------------------------------------

const MOCK_STDIO_SERVER: &str = r#"
while IFS= read -r line; do
  id=$(printf '%s' "$line" | sed -n 's/.*"id":\([0-9]*\).*/\1/p')
  method=$(printf '%s' "$line" | sed -n 's/.*"method":"\([^"]*\)".*/\1/p')
  case "$method" in
    initialize)
      echo "{\"jsonrpc\":\"2.0\",\"id\":$id,\"result\":{\"protocolVersion\":\"2024-11-05\",\"capabilities\":{\"tools\":{}},\"serverInfo\":{\"name\":\"bash\",\"version\":\"0\"}}}" ;;
    tools/list)
      echo "{\"jsonrpc\":\"2.0\",\"id\":$id,\"result\":{\"tools\":[{\"name\":\"pong\",\"description\":\"Answer pong\",\"inputSchema\":{\"type\":\"object\"}}]}}" ;;
    tools/call)
      echo "{\"jsonrpc\":\"2.0\",\"id\":$id,\"result\":{\"content\":[{\"type\":\"text\",\"text\":\"pong\"}],\"isError\":false}}" ;;
  esac
done
"#;

fn stdio_record(id: u64, name: &str) -> ServerRecord {
    let path = std::env::temp_dir().join(format!(
        "mcpchat-mock-{}-{name}.sh",
        std::process::id()
    ));
    std::fs::write(&path, MOCK_STDIO_SERVER).unwrap();
    let mut fields = NewServerRecord::stdio(name, "bash");
    fields.args = Some(path.display().to_string());
    record(id, fields)
}

#[tokio::test]
async fn stdio_server_lists_and_invokes_tools() {
    let rec = stdio_record(4, "bash-mock");
    let server = McpConnector::new().connect(&rec).await.unwrap();

    let tools = server.list_tools().await.unwrap();
    assert_eq!(tools[0].name, "pong");

    let result = server.invoke("pong", json!({})).await.unwrap();
    assert_eq!(result.to_text(), "pong");

    server.close().await.unwrap();
}

#[tokio::test]
async fn pool_keeps_healthy_members_and_routes_namespaced_calls() {
    let records = vec![
        stdio_record(1, "good"),
        record(
            2,
            NewServerRecord::stdio("broken", "this_command_does_not_exist_xyz123"),
        ),
    ];

    let mut pool = ToolServerPool::open(&McpConnector::new(), &records, None)
        .await
        .unwrap();
    assert_eq!(pool.len(), 1);
    assert_eq!(pool.failures().len(), 1);
    assert_eq!(pool.failures()[0].server, "broken");

    let tools = pool.tools().await;
    assert_eq!(tools.len(), 1);
    assert_eq!(tools[0].name, "mcp__good__pong");

    let result = pool.invoke("mcp__good__pong", json!({})).await.unwrap();
    assert_eq!(result.to_text(), "pong");

    pool.close().await;
    pool.close().await;
    assert!(pool.is_closed());
}

#[tokio::test]
async fn pool_with_no_reachable_server_is_unavailable() {
    let records = vec![record(
        1,
        NewServerRecord::stdio("ghost", "this_command_does_not_exist_xyz123"),
    )];
    let err = ToolServerPool::open(&McpConnector::new(), &records, Some(2))
        .await
        .err()
        .unwrap();
    let msg = err.to_string();
    assert!(msg.contains("ghost"), "{msg}");
    assert!(msg.contains("this_command_does_not_exist_xyz123"), "{msg}");
}
