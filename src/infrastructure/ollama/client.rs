//! Ollama chat client for the local model pool.
//!
//! Speaks the `/api/chat` endpoint with streaming disabled. Tool
//! descriptors are advertised in the native function-call format, and
//! transient failures (connection refused, 5xx, throttling) are retried
//! with exponential backoff before the router's ladder takes over.

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::domain::errors::ModelError;
use crate::domain::models::{ChatRole, ModelResponse, TokenUsage, ToolCallRequest, ToolDescriptor};
use crate::domain::ports::{ChatRequest, ModelClient};

#[derive(Debug, Serialize)]
struct WireMessage<'a> {
    role: &'a str,
    content: &'a str,
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
    parameters: &'a Value,
}

#[derive(Debug, Serialize)]
struct WireOptions {
    temperature: f32,
    #[serde(skip_serializing_if = "Option::is_none")]
    num_predict: Option<u32>,
}

#[derive(Debug, Serialize)]
struct WireRequest<'a> {
    model: &'a str,
    messages: Vec<WireMessage<'a>>,
    stream: bool,
    options: WireOptions,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    tools: Vec<WireTool<'a>>,
}

#[derive(Debug, Deserialize)]
struct WireResponse {
    #[serde(default)]
    model: String,
    message: WireResponseMessage,
    #[serde(default)]
    prompt_eval_count: u64,
    #[serde(default)]
    eval_count: u64,
}

#[derive(Debug, Deserialize)]
struct WireResponseMessage {
    #[serde(default)]
    content: String,
    #[serde(default)]
    tool_calls: Vec<WireToolCall>,
}

#[derive(Debug, Deserialize)]
struct WireToolCall {
    function: WireToolCallFunction,
}

#[derive(Debug, Deserialize)]
struct WireToolCallFunction {
    name: String,
    #[serde(default)]
    arguments: Value,
}

/// Client for Ollama-compatible chat endpoints.
pub struct OllamaClient {
    http: reqwest::Client,
    base_url: String,
    /// Upper bound on transient-retry backoff.
    max_retry_elapsed: Duration,
}

impl OllamaClient {
    pub fn new(base_url: impl Into<String>) -> Self {
        let http = reqwest::Client::builder()
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());
        Self {
            http,
            base_url: trim_trailing_slash(base_url.into()),
            max_retry_elapsed: Duration::from_secs(10),
        }
    }

    pub fn with_max_retry_elapsed(mut self, elapsed: Duration) -> Self {
        self.max_retry_elapsed = elapsed;
        self
    }

    fn chat_url(&self, request: &ChatRequest) -> String {
        let base = request
            .endpoint
            .as_deref()
            .map_or_else(|| self.base_url.clone(), |e| trim_trailing_slash(e.to_string()));
        format!("{base}/api/chat")
    }

    async fn send_once(&self, request: &ChatRequest) -> Result<ModelResponse, ModelError> {
        let messages: Vec<WireMessage<'_>> = request
            .messages
            .iter()
            .map(|m| WireMessage { role: wire_role(m.role), content: &m.content })
            .collect();
        let tools: Vec<WireTool<'_>> = request.tools.iter().map(wire_tool).collect();

        let body = WireRequest {
            model: &request.model,
            messages,
            stream: false,
            options: WireOptions {
                temperature: request.temperature,
                num_predict: request.max_tokens,
            },
            tools,
        };

        let response = self
            .http
            .post(self.chat_url(request))
            .timeout(request.timeout)
            .json(&body)
            .send()
            .await
            .map_err(|e| classify_reqwest_error(&e, request.timeout))?;

        let status = response.status();
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            return Err(if status.as_u16() == 429 {
                ModelError::RateLimited
            } else {
                ModelError::Api { status: status.as_u16(), message }
            });
        }

        let wire: WireResponse = response
            .json()
            .await
            .map_err(|e| ModelError::InvalidResponse(e.to_string()))?;

        Ok(ModelResponse {
            content: wire.message.content,
            tool_calls: wire
                .message
                .tool_calls
                .into_iter()
                .map(|c| ToolCallRequest::new(c.function.name, c.function.arguments))
                .collect(),
            usage: Some(TokenUsage {
                input_tokens: wire.prompt_eval_count,
                output_tokens: wire.eval_count,
            }),
            model: if wire.model.is_empty() { request.model.clone() } else { wire.model },
        })
    }
}

fn trim_trailing_slash(mut url: String) -> String {
    while url.ends_with('/') {
        url.pop();
    }
    url
}

fn wire_role(role: ChatRole) -> &'static str {
    match role {
        ChatRole::System => "system",
        ChatRole::User => "user",
        ChatRole::Assistant => "assistant",
        ChatRole::Tool => "tool",
    }
}

fn wire_tool(tool: &ToolDescriptor) -> WireTool<'_> {
    WireTool {
        kind: "function",
        function: WireFunction {
            name: &tool.name,
            description: &tool.description,
            parameters: &tool.input_schema,
        },
    }
}

fn classify_reqwest_error(error: &reqwest::Error, timeout: Duration) -> ModelError {
    if error.is_timeout() {
        ModelError::Timeout(timeout.as_secs())
    } else {
        ModelError::Unavailable(error.to_string())
    }
}

#[async_trait]
impl ModelClient for OllamaClient {
    fn client_id(&self) -> &str {
        "ollama"
    }

    async fn chat(&self, request: ChatRequest) -> Result<ModelResponse, ModelError> {
        let backoff = backoff::ExponentialBackoffBuilder::new()
            .with_initial_interval(Duration::from_millis(250))
            .with_max_elapsed_time(Some(self.max_retry_elapsed))
            .build();

        backoff::future::retry(backoff, || async {
            self.send_once(&request).await.map_err(|e| {
                if e.is_transient() {
                    tracing::debug!(error = %e, "Transient model error, backing off");
                    backoff::Error::transient(e)
                } else {
                    backoff::Error::permanent(e)
                }
            })
        })
        .await
    }
}
