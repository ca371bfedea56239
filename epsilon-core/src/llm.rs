//! Language model boundary for Epsilon — tool-calling chat completion
//!
//! Provides a `ChatModel` trait with one implementation:
//! - **OpenAI-compatible** — `/chat/completions` with function tools
//!
//! A model turn is either a set of tool invocations or a final answer. The
//! query loop is written against the trait only, so any provider offering
//! structured tool calling can be slotted in.

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;
use tokio_retry::strategy::{jitter, ExponentialBackoff};
use tokio_retry::RetryIf;

use crate::config::LlmConfig;

pub const DEFAULT_OPENAI_BASE_URL: &str = "https://api.openai.com/v1";

// ============================================================================
// Conversation types
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
    Tool,
}

/// A tool call requested by the model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolInvocation {
    pub id: String,
    pub name: String,
    pub arguments: serde_json::Value,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tool_calls: Vec<ToolInvocation>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self::text(Role::System, content)
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::text(Role::User, content)
    }

    pub fn assistant_tool_calls(calls: Vec<ToolInvocation>) -> Self {
        Self {
            role: Role::Assistant,
            content: None,
            tool_calls: calls,
            tool_call_id: None,
        }
    }

    pub fn tool_result(call_id: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            role: Role::Tool,
            content: Some(content.into()),
            tool_calls: Vec::new(),
            tool_call_id: Some(call_id.into()),
        }
    }

    fn text(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: Some(content.into()),
            tool_calls: Vec::new(),
            tool_call_id: None,
        }
    }
}

/// A function the model may call, with a JSON-schema parameter object.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolSpec {
    pub name: String,
    pub description: String,
    pub parameters: serde_json::Value,
}

#[derive(Debug, Clone, Default)]
pub struct ChatRequest {
    pub messages: Vec<ChatMessage>,
    pub tools: Vec<ToolSpec>,
}

impl ChatRequest {
    pub fn new(messages: Vec<ChatMessage>) -> Self {
        Self {
            messages,
            tools: Vec::new(),
        }
    }

    pub fn with_tools(mut self, tools: Vec<ToolSpec>) -> Self {
        self.tools = tools;
        self
    }

    /// Content of the first system message, if any.
    pub fn system_prompt(&self) -> Option<&str> {
        self.messages
            .iter()
            .find(|m| m.role == Role::System)
            .and_then(|m| m.content.as_deref())
    }
}

/// What the model decided to do this turn.
#[derive(Debug, Clone, PartialEq)]
pub enum ModelTurn {
    ToolCalls(Vec<ToolInvocation>),
    Answer(String),
}

// ============================================================================
// ChatModel trait
// ============================================================================

#[async_trait]
pub trait ChatModel: Send + Sync {
    async fn complete(&self, request: &ChatRequest) -> Result<ModelTurn, LlmError>;

    /// Model name for logging.
    fn name(&self) -> &str;
}

// ============================================================================
// Error types
// ============================================================================

#[derive(Error, Debug)]
pub enum LlmError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("API error ({code}): {message}")]
    Api { code: u16, message: String },

    #[error("Model returned neither content nor tool calls")]
    EmptyResponse,

    #[error("Missing API key")]
    MissingApiKey,

    #[error("All {attempts} retry attempts failed: {last_error}")]
    RetryExhausted { attempts: usize, last_error: String },
}

impl LlmError {
    /// Network failures, rate limits and server errors are worth retrying.
    fn is_transient(&self) -> bool {
        match self {
            LlmError::Http(_) => true,
            LlmError::Api { code, .. } => *code == 429 || *code >= 500,
            _ => false,
        }
    }
}

// ============================================================================
// Config
// ============================================================================

#[derive(Debug, Clone)]
pub struct ChatClientConfig {
    pub api_key: String,
    pub model: String,
    pub temperature: f32,
    pub timeout: Duration,
    pub max_retries: usize,
    pub retry_delay_ms: u64,
}

impl ChatClientConfig {
    pub fn from_llm_config(config: &LlmConfig) -> Self {
        Self {
            api_key: std::env::var(&config.api_key_env).unwrap_or_default(),
            model: config.model.clone(),
            temperature: config.temperature,
            timeout: Duration::from_secs(config.timeout_seconds),
            max_retries: config.max_retries,
            retry_delay_ms: config.retry_delay_ms,
        }
    }
}

/// Build the configured model client.
pub fn create_model(config: &LlmConfig) -> Result<Box<dyn ChatModel>, LlmError> {
    let client_config = ChatClientConfig::from_llm_config(config);
    Ok(Box::new(OpenAiChatClient::with_base_url(
        client_config,
        config.base_url.clone(),
    )?))
}

// ============================================================================
// OpenAI wire structs (private)
// ============================================================================

#[derive(Debug, Serialize)]
struct CompletionRequest<'a> {
    model: &'a str,
    temperature: f32,
    messages: Vec<WireMessage<'a>>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    tools: Vec<WireTool<'a>>,
}

#[derive(Debug, Serialize)]
struct WireMessage<'a> {
    role: Role,
    content: Option<&'a str>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    tool_calls: Vec<WireToolCall>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_call_id: Option<&'a str>,
}

#[derive(Debug, Serialize, Deserialize)]
struct WireToolCall {
    id: String,
    #[serde(rename = "type", default = "function_type")]
    kind: String,
    function: WireFunctionCall,
}

fn function_type() -> String {
    "function".to_string()
}

#[derive(Debug, Serialize, Deserialize)]
struct WireFunctionCall {
    name: String,
    /// JSON-encoded argument object, as a string.
    arguments: String,
}

#[derive(Debug, Serialize)]
struct WireTool<'a> {
    #[serde(rename = "type")]
    kind: &'static str,
    function: WireFunction<'a>,
}

#[derive(Debug, Serialize)]
struct WireFunction<'a> {
    name: &'a str,
    description: &'a str,
    parameters: &'a serde_json::Value,
}

#[derive(Debug, Deserialize)]
struct CompletionResponse {
    choices: Vec<Choice>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ResponseMessage,
}

#[derive(Debug, Deserialize)]
struct ResponseMessage {
    content: Option<String>,
    tool_calls: Option<Vec<WireToolCall>>,
}

#[derive(Debug, Deserialize)]
struct ErrorResponse {
    error: Option<ErrorDetail>,
}

#[derive(Debug, Deserialize)]
struct ErrorDetail {
    message: String,
}

impl<'a> WireMessage<'a> {
    fn from_message(message: &'a ChatMessage) -> Self {
        Self {
            role: message.role,
            content: message.content.as_deref(),
            tool_calls: message
                .tool_calls
                .iter()
                .map(|call| WireToolCall {
                    id: call.id.clone(),
                    kind: function_type(),
                    function: WireFunctionCall {
                        name: call.name.clone(),
                        arguments: call.arguments.to_string(),
                    },
                })
                .collect(),
            tool_call_id: message.tool_call_id.as_deref(),
        }
    }
}

fn parse_turn(response: CompletionResponse) -> Result<ModelTurn, LlmError> {
    let message = response
        .choices
        .into_iter()
        .next()
        .map(|c| c.message)
        .ok_or(LlmError::EmptyResponse)?;

    let calls: Vec<ToolInvocation> = message
        .tool_calls
        .unwrap_or_default()
        .into_iter()
        .map(|tc| {
            // Keep unparseable argument strings; the dispatcher reports them back.
            let arguments = serde_json::from_str(&tc.function.arguments)
                .unwrap_or(serde_json::Value::String(tc.function.arguments));
            ToolInvocation {
                id: tc.id,
                name: tc.function.name,
                arguments,
            }
        })
        .collect();

    if !calls.is_empty() {
        return Ok(ModelTurn::ToolCalls(calls));
    }

    match message.content {
        Some(text) if !text.trim().is_empty() => Ok(ModelTurn::Answer(text)),
        _ => Err(LlmError::EmptyResponse),
    }
}

// ============================================================================
// OpenAiChatClient
// ============================================================================

/// Chat client for OpenAI-compatible `/chat/completions` endpoints.
#[derive(Debug, Clone)]
pub struct OpenAiChatClient {
    client: Client,
    config: ChatClientConfig,
    base_url: String,
}

impl OpenAiChatClient {
    pub fn new(config: ChatClientConfig) -> Result<Self, LlmError> {
        Self::with_base_url(config, DEFAULT_OPENAI_BASE_URL.to_string())
    }

    /// Create a client with a custom base URL (for testing / compatible providers)
    pub fn with_base_url(config: ChatClientConfig, base_url: String) -> Result<Self, LlmError> {
        if config.api_key.is_empty() {
            return Err(LlmError::MissingApiKey);
        }

        let client = Client::builder().timeout(config.timeout).build()?;

        Ok(Self {
            client,
            config,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    async fn complete_once(&self, request: &ChatRequest) -> Result<ModelTurn, LlmError> {
        let url = format!("{}/chat/completions", self.base_url);

        let body = CompletionRequest {
            model: &self.config.model,
            temperature: self.config.temperature,
            messages: request
                .messages
                .iter()
                .map(WireMessage::from_message)
                .collect(),
            tools: request
                .tools
                .iter()
                .map(|t| WireTool {
                    kind: "function",
                    function: WireFunction {
                        name: &t.name,
                        description: &t.description,
                        parameters: &t.parameters,
                    },
                })
                .collect(),
        };

        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.config.api_key)
            .json(&body)
            .send()
            .await?;

        let status = response.status();

        if !status.is_success() {
            let error_body = response.text().await.unwrap_or_default();
            let message = serde_json::from_str::<ErrorResponse>(&error_body)
                .ok()
                .and_then(|e| e.error)
                .map(|e| e.message)
                .unwrap_or(error_body);

            tracing::error!(code = status.as_u16(), message = %message, "Chat completion API error");

            return Err(LlmError::Api {
                code: status.as_u16(),
                message,
            });
        }

        let parsed: CompletionResponse = response.json().await?;
        parse_turn(parsed)
    }
}

#[async_trait]
impl ChatModel for OpenAiChatClient {
    async fn complete(&self, request: &ChatRequest) -> Result<ModelTurn, LlmError> {
        let retry_strategy = ExponentialBackoff::from_millis(self.config.retry_delay_ms)
            .max_delay(Duration::from_secs(10))
            .map(jitter)
            .take(self.config.max_retries);

        let result = RetryIf::spawn(
            retry_strategy,
            || self.complete_once(request),
            |e: &LlmError| e.is_transient(),
        )
        .await;

        match result {
            Ok(turn) => Ok(turn),
            Err(e) if e.is_transient() => {
                tracing::error!(
                    attempts = self.config.max_retries,
                    error = %e,
                    "All chat completion retry attempts failed"
                );
                Err(LlmError::RetryExhausted {
                    attempts: self.config.max_retries,
                    last_error: e.to_string(),
                })
            }
            Err(e) => Err(e),
        }
    }

    fn name(&self) -> &str {
        &self.config.model
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{body_partial_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn test_config(api_key: &str) -> ChatClientConfig {
        ChatClientConfig {
            api_key: api_key.to_string(),
            model: "gpt-4o".to_string(),
            temperature: 0.0,
            timeout: Duration::from_secs(5),
            max_retries: 2,
            retry_delay_ms: 10,
        }
    }

    fn answer_body(text: &str) -> serde_json::Value {
        serde_json::json!({
            "choices": [{
                "message": { "role": "assistant", "content": text },
                "finish_reason": "stop"
            }]
        })
    }

    fn sample_request() -> ChatRequest {
        ChatRequest::new(vec![
            ChatMessage::system("You are a SQL expert."),
            ChatMessage::user("How many tables are there?"),
        ])
        .with_tools(vec![ToolSpec {
            name: "list_tables".to_string(),
            description: "List tables".to_string(),
            parameters: serde_json::json!({"type": "object", "properties": {}}),
        }])
    }

    #[tokio::test]
    async fn test_complete_returns_final_answer() {
        let mock_server = MockServer::start().await;
        let client = OpenAiChatClient::with_base_url(test_config("test-key"), mock_server.uri())
            .expect("Failed to create client");

        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .and(header("authorization", "Bearer test-key"))
            .and(body_partial_json(serde_json::json!({
                "model": "gpt-4o",
                "tools": [{ "type": "function", "function": { "name": "list_tables" } }]
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(answer_body("Three tables.")))
            .mount(&mock_server)
            .await;

        let turn = client.complete(&sample_request()).await.unwrap();
        assert_eq!(turn, ModelTurn::Answer("Three tables.".to_string()));
    }

    #[tokio::test]
    async fn test_complete_parses_tool_calls() {
        let mock_server = MockServer::start().await;
        let client =
            OpenAiChatClient::with_base_url(test_config("test-key"), mock_server.uri()).unwrap();

        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "choices": [{
                    "message": {
                        "role": "assistant",
                        "content": null,
                        "tool_calls": [{
                            "id": "call_1",
                            "type": "function",
                            "function": {
                                "name": "execute_query",
                                "arguments": "{\"query\": \"SELECT 1\"}"
                            }
                        }]
                    },
                    "finish_reason": "tool_calls"
                }]
            })))
            .mount(&mock_server)
            .await;

        match client.complete(&sample_request()).await.unwrap() {
            ModelTurn::ToolCalls(calls) => {
                assert_eq!(calls.len(), 1);
                assert_eq!(calls[0].id, "call_1");
                assert_eq!(calls[0].name, "execute_query");
                assert_eq!(calls[0].arguments["query"], "SELECT 1");
            }
            other => panic!("Expected tool calls, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_unparseable_arguments_are_kept_as_string() {
        let mock_server = MockServer::start().await;
        let client =
            OpenAiChatClient::with_base_url(test_config("test-key"), mock_server.uri()).unwrap();

        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "choices": [{
                    "message": {
                        "tool_calls": [{
                            "id": "call_9",
                            "function": { "name": "validate_query", "arguments": "SELECT 2" }
                        }]
                    }
                }]
            })))
            .mount(&mock_server)
            .await;

        match client.complete(&sample_request()).await.unwrap() {
            ModelTurn::ToolCalls(calls) => {
                assert_eq!(calls[0].arguments, serde_json::json!("SELECT 2"));
            }
            other => panic!("Expected tool calls, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_retries_on_429_then_succeeds() {
        let mock_server = MockServer::start().await;
        let client =
            OpenAiChatClient::with_base_url(test_config("test-key"), mock_server.uri()).unwrap();

        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(429).set_body_json(serde_json::json!({
                "error": { "message": "Rate limit exceeded" }
            })))
            .up_to_n_times(1)
            .mount(&mock_server)
            .await;

        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(answer_body("ok")))
            .mount(&mock_server)
            .await;

        let turn = client.complete(&sample_request()).await;
        assert!(turn.is_ok(), "Expected success after retry: {:?}", turn.err());
    }

    #[tokio::test]
    async fn test_returns_retry_exhausted_on_500() {
        let mock_server = MockServer::start().await;
        let client =
            OpenAiChatClient::with_base_url(test_config("test-key"), mock_server.uri()).unwrap();

        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(500).set_body_json(serde_json::json!({
                "error": { "message": "Internal server error" }
            })))
            .mount(&mock_server)
            .await;

        match client.complete(&sample_request()).await {
            Err(LlmError::RetryExhausted { attempts, last_error }) => {
                assert_eq!(attempts, 2);
                assert!(last_error.contains("Internal server error"));
            }
            other => panic!("Expected RetryExhausted, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_does_not_retry_on_401() {
        let mock_server = MockServer::start().await;
        let client =
            OpenAiChatClient::with_base_url(test_config("bad-key"), mock_server.uri()).unwrap();

        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(401).set_body_json(serde_json::json!({
                "error": { "message": "Invalid API key" }
            })))
            .expect(1)
            .mount(&mock_server)
            .await;

        match client.complete(&sample_request()).await {
            Err(LlmError::Api { code, message }) => {
                assert_eq!(code, 401);
                assert_eq!(message, "Invalid API key");
            }
            other => panic!("Expected Api error, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_empty_choice_is_an_error() {
        let mock_server = MockServer::start().await;
        let client =
            OpenAiChatClient::with_base_url(test_config("test-key"), mock_server.uri()).unwrap();

        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(answer_body("   ")))
            .mount(&mock_server)
            .await;

        assert!(matches!(
            client.complete(&sample_request()).await,
            Err(LlmError::EmptyResponse)
        ));
    }

    #[test]
    fn test_missing_api_key_is_rejected() {
        let result = OpenAiChatClient::new(test_config(""));
        assert!(matches!(result, Err(LlmError::MissingApiKey)));
    }

    #[test]
    fn test_tool_messages_serialize_in_openai_shape() {
        let call = ToolInvocation {
            id: "call_1".to_string(),
            name: "get_schema".to_string(),
            arguments: serde_json::json!({"tables": ["main_metrics"]}),
        };
        let assistant = ChatMessage::assistant_tool_calls(vec![call]);
        let tool = ChatMessage::tool_result("call_1", "CREATE TABLE main_metrics (...)");

        let a = serde_json::to_value(WireMessage::from_message(&assistant)).unwrap();
        assert_eq!(a["role"], "assistant");
        assert!(a["content"].is_null());
        assert_eq!(a["tool_calls"][0]["type"], "function");
        assert_eq!(
            a["tool_calls"][0]["function"]["arguments"],
            "{\"tables\":[\"main_metrics\"]}"
        );

        let t = serde_json::to_value(WireMessage::from_message(&tool)).unwrap();
        assert_eq!(t["role"], "tool");
        assert_eq!(t["tool_call_id"], "call_1");
    }

    #[test]
    fn test_system_prompt_accessor() {
        let request = sample_request();
        assert_eq!(request.system_prompt(), Some("You are a SQL expert."));
        assert_eq!(ChatRequest::default().system_prompt(), None);
    }
}
