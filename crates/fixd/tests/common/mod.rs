//! Shared fixtures: a mock completion API and a daemon config pointing at it.

#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::routing::post;
use axum::{Json, Router};
use fix_core::{BackendMode, Config};
use serde_json::{json, Value};
use std::path::PathBuf;
use tempfile::TempDir;

/// Scripted replies for the mock API. `None` makes the endpoint return 500.
#[derive(Debug, Default)]
pub struct MockState {
    pub agent_reply: Option<String>,
    pub chat_reply: Option<String>,
    /// When set, a fresh agent request is answered with this shell call.
    pub shell_command: Option<Vec<String>>,
    pub agent_calls: AtomicUsize,
    pub chat_calls: AtomicUsize,
    pub last_auth: Mutex<Option<String>>,
    pub last_chat_body: Mutex<Option<Value>>,
    pub agent_bodies: Mutex<Vec<Value>>,
    /// Tool outputs the agent endpoint received back.
    pub shell_outputs: Mutex<Vec<String>>,
}

impl MockState {
    pub fn agent_calls(&self) -> usize {
        self.agent_calls.load(Ordering::SeqCst)
    }

    pub fn chat_calls(&self) -> usize {
        self.chat_calls.load(Ordering::SeqCst)
    }
}

/// A running mock of the completion API.
#[derive(Debug)]
pub struct MockApi {
    /// Base URL including the `/v1` prefix.
    pub base: String,
    pub state: Arc<MockState>,
}

fn record_auth(state: &MockState, headers: &HeaderMap) {
    let auth = headers
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);
    *state.last_auth.lock().unwrap() = auth;
}

fn server_error(message: &str) -> (StatusCode, Json<Value>) {
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(json!({ "error": { "message": message } })),
    )
}

fn shell_call(command: &[String]) -> (StatusCode, Json<Value>) {
    (
        StatusCode::OK,
        Json(json!({
            "id": "resp_shell",
            "output": [{
                "type": "local_shell_call",
                "call_id": "call_1",
                "status": "completed",
                "action": { "type": "exec", "command": command, "env": {} }
            }]
        })),
    )
}

async fn responses(
    State(state): State<Arc<MockState>>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> (StatusCode, Json<Value>) {
    state.agent_calls.fetch_add(1, Ordering::SeqCst);
    record_auth(&state, &headers);
    state.agent_bodies.lock().unwrap().push(body.clone());

    if let Some(command) = &state.shell_command {
        if body.get("previous_response_id").is_none() {
            return shell_call(command);
        }
        let outputs = body["input"]
            .as_array()
            .into_iter()
            .flatten()
            .filter(|item| item["type"] == "local_shell_call_output")
            .filter_map(|item| item["output"].as_str().map(str::to_string));
        state.shell_outputs.lock().unwrap().extend(outputs);
    }

    match &state.agent_reply {
        Some(text) => (
            StatusCode::OK,
            Json(json!({
                "output": [
                    { "type": "reasoning", "content": [] },
                    {
                        "type": "message",
                        "content": [{ "type": "output_text", "text": text }]
                    }
                ]
            })),
        ),
        None => server_error("agent unavailable"),
    }
}

async fn chat_completions(
    State(state): State<Arc<MockState>>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> (StatusCode, Json<Value>) {
    state.chat_calls.fetch_add(1, Ordering::SeqCst);
    record_auth(&state, &headers);
    *state.last_chat_body.lock().unwrap() = Some(body);
    match &state.chat_reply {
        Some(text) => (
            StatusCode::OK,
            Json(json!({
                "choices": [{ "message": { "role": "assistant", "content": text } }]
            })),
        ),
        None => server_error("chat unavailable"),
    }
}

/// Start the mock API on an ephemeral local port.
pub async fn spawn_mock_api(agent_reply: Option<&str>, chat_reply: Option<&str>) -> MockApi {
    serve_mock(MockState {
        agent_reply: agent_reply.map(str::to_string),
        chat_reply: chat_reply.map(str::to_string),
        ..MockState::default()
    })
    .await
}

/// Mock whose agent first asks to run `command`, then answers `agent_reply`.
pub async fn spawn_shell_mock_api(
    command: &[&str],
    agent_reply: &str,
    chat_reply: Option<&str>,
) -> MockApi {
    serve_mock(MockState {
        agent_reply: Some(agent_reply.to_string()),
        chat_reply: chat_reply.map(str::to_string),
        shell_command: Some(command.iter().map(|s| s.to_string()).collect()),
        ..MockState::default()
    })
    .await
}

async fn serve_mock(state: MockState) -> MockApi {
    let state = Arc::new(state);

    let router = Router::new()
        .route("/v1/responses", post(responses))
        .route("/v1/chat/completions", post(chat_completions))
        .with_state(Arc::clone(&state));

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, router).await.unwrap();
    });

    MockApi {
        base: format!("http://{addr}/v1"),
        state,
    }
}

/// Pipeline config running scripts with `sh` inside `dir`.
pub fn test_config(dir: &TempDir, api_base: &str, backend: BackendMode) -> Config {
    Config {
        python_bin: PathBuf::from("sh"),
        script_timeout_sec: 10,
        backend,
        api_base: api_base.to_string(),
        work_dir: dir.path().join("work"),
        max_upload_bytes: 4096,
        ..Config::default()
    }
}

/// A script `sh` rejects with a syntax error.
pub const BROKEN_SCRIPT: &str = "echo \"Hello World\n";

/// The fenced reply a model would send for [`BROKEN_SCRIPT`].
pub const FENCED_FIX: &str = "```python\necho \"Hello World\"\n```";
