//! Completion backends for fix requests.
//!
//! Two implementations sit behind [`CompletionBackend`]:
//! - [`AgentBackend`]: an agent runtime call (model + instructions) through
//!   the OpenAI Responses API, optionally with a local shell tool that runs
//!   in the session directory for a bounded number of turns
//! - [`ChatBackend`]: a direct chat completion with a fixed message list
//!
//! [`FixBackend`] is chosen once from [`BackendConfig::mode`]. In `agent` mode
//! any agent failure falls back to the direct call; in `chat` mode only the
//! direct call is used.

use fix_core::prompt::{AGENT_INSTRUCTIONS, CHAT_SYSTEM_PROMPT};
use fix_core::{BackendMode, Config};
use futures_util::future::BoxFuture;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::shell::{ShellAction, ShellTool};

#[derive(Debug, Error)]
pub enum BackendError {
    #[error("an API key is required")]
    MissingCredential,
    #[error("failed to build HTTP client: {0}")]
    ClientBuild(String),
    #[error("request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("API error: {status} - {message}")]
    Api { status: u16, message: String },
    #[error("invalid response: {0}")]
    InvalidResponse(String),
    #[error("agent failed ({agent}); direct completion failed ({chat})")]
    Exhausted { agent: String, chat: String },
}

pub type Result<T> = std::result::Result<T, BackendError>;

/// API credential for one session. Never written to logs or the environment.
#[derive(Clone)]
pub struct Credential(String);

impl Credential {
    pub fn new(key: impl Into<String>) -> Self {
        Self(key.into())
    }

    pub fn is_empty(&self) -> bool {
        self.0.trim().is_empty()
    }

    fn bearer(&self) -> String {
        format!("Bearer {}", self.0.trim())
    }
}

impl std::fmt::Debug for Credential {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("Credential(<redacted>)")
    }
}

/// Something that turns a prompt into model text.
pub trait CompletionBackend: Send + Sync + std::fmt::Debug {
    /// Short name used in logs and reports.
    fn name(&self) -> &'static str;

    fn complete<'a>(&'a self, prompt: &'a str) -> BoxFuture<'a, Result<String>>;
}

/// Backend configuration.
#[derive(Debug, Clone)]
pub struct BackendConfig {
    pub mode: BackendMode,
    pub api_base: String,
    pub agent_model: String,
    pub chat_model: String,
    pub temperature: f32,
    /// Per-request timeout (None = wait forever).
    pub request_timeout: Option<Duration>,
    /// Offer the agent a local shell in the session directory.
    pub agent_shell_tool: bool,
    /// Request/tool-call round trips allowed per agent completion.
    pub agent_max_turns: u32,
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self::from_config(&Config::default())
    }
}

impl BackendConfig {
    /// Create from fix-core Config.
    pub fn from_config(config: &Config) -> Self {
        Self {
            mode: config.backend,
            api_base: config.api_base.trim_end_matches('/').to_string(),
            agent_model: config.agent_model.clone(),
            chat_model: config.chat_model.clone(),
            temperature: config.temperature,
            request_timeout: (config.request_timeout_sec > 0)
                .then(|| Duration::from_secs(u64::from(config.request_timeout_sec))),
            agent_shell_tool: config.agent_shell_tool,
            agent_max_turns: config.agent_max_turns.max(1),
        }
    }
}

/// Result of a completion, with the path that produced it.
#[derive(Debug, Clone)]
pub struct Completion {
    pub text: String,
    pub backend: &'static str,
    /// The agent was tried first and failed.
    pub fell_back: bool,
}

/// Session-scoped backend handle: optional primary plus mandatory fallback.
#[derive(Debug, Clone)]
pub struct FixBackend {
    primary: Option<Arc<dyn CompletionBackend>>,
    fallback: Arc<dyn CompletionBackend>,
}

impl FixBackend {
    /// Build the backend for one session from its credential.
    ///
    /// `session_dir` is where agent shell commands run when the tool is on.
    pub fn connect(config: &BackendConfig, credential: &Credential, session_dir: &Path) -> Result<Self> {
        if credential.is_empty() {
            return Err(BackendError::MissingCredential);
        }

        let mut builder = reqwest::Client::builder();
        if let Some(timeout) = config.request_timeout {
            builder = builder.timeout(timeout);
        }
        let http = builder
            .build()
            .map_err(|e| BackendError::ClientBuild(e.to_string()))?;

        let chat: Arc<dyn CompletionBackend> = Arc::new(ChatBackend {
            http: http.clone(),
            api_base: config.api_base.clone(),
            credential: credential.clone(),
            model: config.chat_model.clone(),
            temperature: config.temperature,
        });

        let primary: Option<Arc<dyn CompletionBackend>> = match config.mode {
            BackendMode::Agent => Some(Arc::new(AgentBackend {
                http,
                api_base: config.api_base.clone(),
                credential: credential.clone(),
                model: config.agent_model.clone(),
                instructions: AGENT_INSTRUCTIONS.to_string(),
                shell: config.agent_shell_tool.then(|| ShellTool::new(session_dir)),
                max_turns: config.agent_max_turns.max(1),
            })),
            BackendMode::Chat => None,
        };

        info!(
            mode = config.mode.as_str(),
            shell_tool = config.agent_shell_tool,
            "completion backend created"
        );
        Ok(Self::from_parts(primary, chat))
    }

    /// Assemble a backend from explicit parts.
    pub fn from_parts(
        primary: Option<Arc<dyn CompletionBackend>>,
        fallback: Arc<dyn CompletionBackend>,
    ) -> Self {
        Self { primary, fallback }
    }

    pub fn mode(&self) -> BackendMode {
        if self.primary.is_some() {
            BackendMode::Agent
        } else {
            BackendMode::Chat
        }
    }

    /// Complete `prompt`, falling back to the direct call if the agent fails.
    pub async fn complete(&self, prompt: &str) -> Result<Completion> {
        let Some(primary) = &self.primary else {
            let text = self.fallback.complete(prompt).await?;
            return Ok(Completion {
                text,
                backend: self.fallback.name(),
                fell_back: false,
            });
        };

        let agent_err = match primary.complete(prompt).await {
            Ok(text) => {
                return Ok(Completion {
                    text,
                    backend: primary.name(),
                    fell_back: false,
                })
            }
            Err(e) => e,
        };

        warn!(
            backend = primary.name(),
            error = %agent_err,
            "agent request failed; falling back to direct completion"
        );

        match self.fallback.complete(prompt).await {
            Ok(text) => Ok(Completion {
                text,
                backend: self.fallback.name(),
                fell_back: true,
            }),
            Err(chat_err) => Err(BackendError::Exhausted {
                agent: agent_err.to_string(),
                chat: chat_err.to_string(),
            }),
        }
    }
}

// --- Wire types ---

#[derive(Debug, Serialize)]
struct ResponsesRequest<'a> {
    model: &'a str,
    instructions: &'a str,
    /// The prompt string on the first turn, tool outputs after that.
    input: &'a Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    tools: Option<&'a [ToolSpec]>,
    #[serde(skip_serializing_if = "Option::is_none")]
    previous_response_id: Option<&'a str>,
}

#[derive(Debug, Serialize)]
struct ToolSpec {
    #[serde(rename = "type")]
    kind: &'static str,
}

static LOCAL_SHELL_TOOL: [ToolSpec; 1] = [ToolSpec { kind: "local_shell" }];

#[derive(Debug, Deserialize)]
struct ResponsesResponse {
    #[serde(default)]
    id: Option<String>,
    #[serde(default)]
    output_text: Option<String>,
    #[serde(default)]
    output: Vec<OutputItem>,
}

#[derive(Debug, Deserialize)]
struct OutputItem {
    #[serde(rename = "type")]
    item_type: String,
    #[serde(default)]
    content: Vec<OutputContent>,
    #[serde(default)]
    call_id: Option<String>,
    #[serde(default)]
    action: Option<ShellAction>,
}

/// A shell command the agent asked for.
#[derive(Debug)]
struct ShellCall {
    call_id: String,
    action: ShellAction,
}

#[derive(Debug, Deserialize)]
struct OutputContent {
    #[serde(rename = "type")]
    content_type: String,
    #[serde(default)]
    text: Option<String>,
}

impl ResponsesResponse {
    /// Take the `local_shell_call` items out of the output.
    fn take_shell_calls(&mut self) -> Vec<ShellCall> {
        let (calls, rest): (Vec<_>, Vec<_>) = std::mem::take(&mut self.output)
            .into_iter()
            .partition(|item| item.item_type == "local_shell_call");
        self.output = rest;
        calls
            .into_iter()
            .filter_map(|item| {
                Some(ShellCall {
                    call_id: item.call_id?,
                    action: item.action.unwrap_or_default(),
                })
            })
            .collect()
    }

    /// Concatenated `output_text` parts of all message items.
    fn final_output(self) -> Option<String> {
        if let Some(text) = self.output_text {
            return Some(text);
        }
        let text: String = self
            .output
            .into_iter()
            .filter(|item| item.item_type == "message")
            .flat_map(|item| item.content)
            .filter(|c| c.content_type == "output_text")
            .filter_map(|c| c.text)
            .collect();
        (!text.is_empty()).then_some(text)
    }
}

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    temperature: f32,
}

#[derive(Debug, Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatChoiceMessage,
}

#[derive(Debug, Deserialize)]
struct ChatChoiceMessage {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ApiErrorBody {
    error: ApiErrorDetail,
}

#[derive(Debug, Deserialize)]
struct ApiErrorDetail {
    message: String,
}

/// POST `body` as JSON and decode a successful response.
async fn post_json<B: Serialize + ?Sized, T: DeserializeOwned>(
    http: &reqwest::Client,
    url: &str,
    credential: &Credential,
    body: &B,
) -> Result<T> {
    let response = http
        .post(url)
        .header(reqwest::header::AUTHORIZATION, credential.bearer())
        .json(body)
        .send()
        .await?;

    let status = response.status();
    let text = response.text().await?;

    if !status.is_success() {
        let message = serde_json::from_str::<ApiErrorBody>(&text)
            .map(|body| body.error.message)
            .unwrap_or(text);
        return Err(BackendError::Api {
            status: status.as_u16(),
            message,
        });
    }

    serde_json::from_str(&text)
        .map_err(|e| BackendError::InvalidResponse(format!("{e}: {text}")))
}

/// Agent runtime backed by the Responses API.
#[derive(Debug)]
pub struct AgentBackend {
    http: reqwest::Client,
    api_base: String,
    credential: Credential,
    model: String,
    instructions: String,
    shell: Option<ShellTool>,
    max_turns: u32,
}

impl AgentBackend {
    /// Run the agent's shell calls and package the results as the next input.
    async fn run_shell_calls(shell: &ShellTool, calls: Vec<ShellCall>) -> Value {
        let mut outputs = Vec::with_capacity(calls.len());
        for call in calls {
            let output = shell.exec(&call.action).await;
            outputs.push(json!({
                "type": "local_shell_call_output",
                "call_id": call.call_id,
                "output": output,
            }));
        }
        Value::Array(outputs)
    }
}

impl CompletionBackend for AgentBackend {
    fn name(&self) -> &'static str {
        "agent"
    }

    fn complete<'a>(&'a self, prompt: &'a str) -> BoxFuture<'a, Result<String>> {
        Box::pin(async move {
            let url = format!("{}/responses", self.api_base);
            debug!(model = %self.model, url = %url, "sending agent request");

            let tools = self.shell.as_ref().map(|_| &LOCAL_SHELL_TOOL[..]);
            let mut input = Value::String(prompt.to_string());
            let mut previous_response_id: Option<String> = None;

            for turn in 1..=self.max_turns {
                let request = ResponsesRequest {
                    model: &self.model,
                    instructions: &self.instructions,
                    input: &input,
                    tools,
                    previous_response_id: previous_response_id.as_deref(),
                };
                let mut response: ResponsesResponse =
                    post_json(&self.http, &url, &self.credential, &request).await?;

                let calls = response.take_shell_calls();
                let Some(shell) = self.shell.as_ref().filter(|_| !calls.is_empty()) else {
                    return response.final_output().ok_or_else(|| {
                        BackendError::InvalidResponse("agent returned no output".into())
                    });
                };

                if turn == self.max_turns {
                    break;
                }
                let Some(id) = response.id.take() else {
                    return Err(BackendError::InvalidResponse(
                        "tool call response has no id".into(),
                    ));
                };
                debug!(turn, calls = calls.len(), "agent requested shell commands");
                input = Self::run_shell_calls(shell, calls).await;
                previous_response_id = Some(id);
            }

            Err(BackendError::InvalidResponse(format!(
                "agent did not finish within {} turns",
                self.max_turns
            )))
        })
    }
}

/// Direct chat completion with a fixed system message.
#[derive(Debug)]
pub struct ChatBackend {
    http: reqwest::Client,
    api_base: String,
    credential: Credential,
    model: String,
    temperature: f32,
}

impl CompletionBackend for ChatBackend {
    fn name(&self) -> &'static str {
        "chat"
    }

    fn complete<'a>(&'a self, prompt: &'a str) -> BoxFuture<'a, Result<String>> {
        Box::pin(async move {
            let url = format!("{}/chat/completions", self.api_base);
            debug!(model = %self.model, url = %url, "sending chat completion request");

            let request = ChatRequest {
                model: &self.model,
                messages: vec![
                    ChatMessage {
                        role: "system",
                        content: CHAT_SYSTEM_PROMPT,
                    },
                    ChatMessage {
                        role: "user",
                        content: prompt,
                    },
                ],
                temperature: self.temperature,
            };
            let response: ChatResponse =
                post_json(&self.http, &url, &self.credential, &request).await?;

            response
                .choices
                .into_iter()
                .next()
                .and_then(|choice| choice.message.content)
                .map(|content| content.trim().to_string())
                .ok_or_else(|| BackendError::InvalidResponse("no choices in response".into()))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Debug)]
    struct Scripted {
        name: &'static str,
        reply: std::result::Result<&'static str, &'static str>,
        calls: AtomicUsize,
    }

    impl Scripted {
        fn ok(name: &'static str, text: &'static str) -> Arc<Self> {
            Arc::new(Self {
                name,
                reply: Ok(text),
                calls: AtomicUsize::new(0),
            })
        }

        fn failing(name: &'static str, message: &'static str) -> Arc<Self> {
            Arc::new(Self {
                name,
                reply: Err(message),
                calls: AtomicUsize::new(0),
            })
        }
    }

    impl CompletionBackend for Scripted {
        fn name(&self) -> &'static str {
            self.name
        }

        fn complete<'a>(&'a self, _prompt: &'a str) -> BoxFuture<'a, Result<String>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let reply = self.reply;
            Box::pin(async move {
                reply.map(str::to_string).map_err(|m| BackendError::Api {
                    status: 500,
                    message: m.to_string(),
                })
            })
        }
    }

    #[tokio::test]
    async fn agent_success_skips_fallback() {
        let agent = Scripted::ok("agent", "fixed");
        let chat = Scripted::ok("chat", "unused");
        let backend = FixBackend::from_parts(Some(agent.clone()), chat.clone());

        let completion = backend.complete("prompt").await.unwrap();
        assert_eq!(completion.text, "fixed");
        assert_eq!(completion.backend, "agent");
        assert!(!completion.fell_back);
        assert_eq!(chat.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn agent_failure_falls_back_to_chat() {
        let agent = Scripted::failing("agent", "agent exploded");
        let chat = Scripted::ok("chat", "fixed by chat");
        let backend = FixBackend::from_parts(Some(agent.clone()), chat.clone());

        let completion = backend.complete("prompt").await.unwrap();
        assert_eq!(completion.text, "fixed by chat");
        assert_eq!(completion.backend, "chat");
        assert!(completion.fell_back);
        assert_eq!(agent.calls.load(Ordering::SeqCst), 1);
        assert_eq!(chat.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn both_failing_reports_both_errors() {
        let agent = Scripted::failing("agent", "agent down");
        let chat = Scripted::failing("chat", "chat down");
        let backend = FixBackend::from_parts(Some(agent), chat.clone());

        let err = backend.complete("prompt").await.unwrap_err();
        assert_eq!(chat.calls.load(Ordering::SeqCst), 1);
        match err {
            BackendError::Exhausted { agent, chat } => {
                assert!(agent.contains("agent down"));
                assert!(chat.contains("chat down"));
            }
            e => panic!("expected Exhausted, got {e:?}"),
        }
    }

    #[tokio::test]
    async fn chat_mode_uses_direct_call_only() {
        let chat = Scripted::failing("chat", "chat down");
        let backend = FixBackend::from_parts(None, chat.clone());
        assert_eq!(backend.mode(), BackendMode::Chat);

        let err = backend.complete("prompt").await.unwrap_err();
        assert!(matches!(err, BackendError::Api { status: 500, .. }));
        assert_eq!(chat.calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn connect_requires_credential() {
        let err = FixBackend::connect(&BackendConfig::default(), &Credential::new("  "), Path::new(".")).unwrap_err();
        assert!(matches!(err, BackendError::MissingCredential));
    }

    #[test]
    fn connect_selects_mode_from_config() {
        let mut config = BackendConfig::default();
        let credential = Credential::new("sk-test");

        config.mode = BackendMode::Agent;
        assert_eq!(FixBackend::connect(&config, &credential, Path::new(".")).unwrap().mode(), BackendMode::Agent);

        config.mode = BackendMode::Chat;
        assert_eq!(FixBackend::connect(&config, &credential, Path::new(".")).unwrap().mode(), BackendMode::Chat);
    }

    #[test]
    fn credential_debug_is_redacted() {
        let credential = Credential::new("sk-secret");
        assert!(!format!("{credential:?}").contains("sk-secret"));
    }

    #[test]
    fn responses_output_text_is_collected_from_messages() {
        let body = serde_json::json!({
            "id": "resp_1",
            "output": [
                {"type": "reasoning", "content": []},
                {"type": "message", "role": "assistant", "content": [
                    {"type": "output_text", "text": "print(\"Hello"},
                    {"type": "output_text", "text": " World\")"}
                ]}
            ]
        });
        let parsed: ResponsesResponse = serde_json::from_value(body).unwrap();
        assert_eq!(parsed.final_output().as_deref(), Some("print(\"Hello World\")"));
    }

    #[test]
    fn responses_without_message_has_no_output() {
        let parsed: ResponsesResponse =
            serde_json::from_value(serde_json::json!({"output": []})).unwrap();
        assert!(parsed.final_output().is_none());
    }

    #[test]
    fn shell_calls_are_split_from_messages() {
        let body = serde_json::json!({
            "id": "resp_2",
            "output": [
                {"type": "local_shell_call", "call_id": "call_1", "status": "completed",
                 "action": {"type": "exec", "command": ["cat", "job.py"], "env": {}}},
                {"type": "message", "content": [{"type": "output_text", "text": "checking"}]}
            ]
        });
        let mut parsed: ResponsesResponse = serde_json::from_value(body).unwrap();
        let calls = parsed.take_shell_calls();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].call_id, "call_1");
        assert_eq!(calls[0].action.command, vec!["cat", "job.py"]);
        assert_eq!(parsed.final_output().as_deref(), Some("checking"));
    }

    #[test]
    fn responses_request_omits_tools_unless_enabled() {
        let input = Value::String("fix".to_string());
        let plain = ResponsesRequest {
            model: "gpt-4o",
            instructions: "be brief",
            input: &input,
            tools: None,
            previous_response_id: None,
        };
        let json = serde_json::to_value(&plain).unwrap();
        assert_eq!(json["input"], "fix");
        assert!(json.get("tools").is_none());
        assert!(json.get("previous_response_id").is_none());

        let with_tool = ResponsesRequest {
            tools: Some(&LOCAL_SHELL_TOOL),
            previous_response_id: Some("resp_1"),
            ..plain
        };
        let json = serde_json::to_value(&with_tool).unwrap();
        assert_eq!(json["tools"][0]["type"], "local_shell");
        assert_eq!(json["previous_response_id"], "resp_1");
    }

    #[test]
    fn chat_request_serializes_messages_and_temperature() {
        let request = ChatRequest {
            model: "gpt-4o",
            messages: vec![ChatMessage {
                role: "user",
                content: "fix",
            }],
            temperature: 0.1,
        };
        let json = serde_json::to_value(&request).unwrap();
        assert_eq!(json["model"], "gpt-4o");
        assert_eq!(json["messages"][0]["role"], "user");
        assert!((json["temperature"].as_f64().unwrap() - 0.1).abs() < 1e-6);
    }
}
