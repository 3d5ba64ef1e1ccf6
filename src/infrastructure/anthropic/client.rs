//! Anthropic Messages API client, used as the escalation provider and
//! for quality-validation critiques.

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::domain::errors::ModelError;
use crate::domain::models::{ChatRole, ModelResponse, TokenUsage, ToolCallRequest, ToolDescriptor};
use crate::domain::ports::{ChatRequest, ModelClient};

const DEFAULT_BASE_URL: &str = "https://api.anthropic.com";
const API_VERSION: &str = "2023-06-01";
const DEFAULT_MAX_TOKENS: u32 = 4096;

#[derive(Debug, Serialize)]
struct WireMessage {
    role: &'static str,
    content: String,
}

#[derive(Debug, Serialize)]
struct WireTool<'a> {
    name: &'a str,
    description: &'a str,
    input_schema: &'a Value,
}

#[derive(Debug, Serialize)]
struct WireRequest<'a> {
    model: &'a str,
    max_tokens: u32,
    temperature: f32,
    #[serde(skip_serializing_if = "Option::is_none")]
    system: Option<String>,
    messages: Vec<WireMessage>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    tools: Vec<WireTool<'a>>,
}

#[derive(Debug, Deserialize)]
struct WireResponse {
    #[serde(default)]
    model: String,
    #[serde(default)]
    content: Vec<WireContentBlock>,
    #[serde(default)]
    usage: Option<WireUsage>,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum WireContentBlock {
    Text {
        text: String,
    },
    ToolUse {
        name: String,
        #[serde(default)]
        input: Value,
    },
    #[serde(other)]
    Other,
}

#[derive(Debug, Deserialize)]
struct WireUsage {
    #[serde(default)]
    input_tokens: u64,
    #[serde(default)]
    output_tokens: u64,
}

/// Client for the Anthropic Messages API.
pub struct AnthropicClient {
    http: reqwest::Client,
    base_url: String,
    api_key: String,
}

impl AnthropicClient {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self::with_base_url(api_key, DEFAULT_BASE_URL)
    }

    /// Read the API key from `ANTHROPIC_API_KEY`.
    pub fn from_env() -> Result<Self, ModelError> {
        let key = std::env::var("ANTHROPIC_API_KEY").map_err(|_| {
            ModelError::NotConfigured("ANTHROPIC_API_KEY is not set".to_string())
        })?;
        Ok(Self::new(key))
    }

    pub fn with_base_url(api_key: impl Into<String>, base_url: impl Into<String>) -> Self {
        let http = reqwest::Client::builder()
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());
        let mut base_url = base_url.into();
        while base_url.ends_with('/') {
            base_url.pop();
        }
        Self { http, base_url, api_key: api_key.into() }
    }

    /// Fold chat messages into the Messages API shape: system turns
    /// join the top-level system field, tool results become user turns.
    fn wire_messages(request: &ChatRequest) -> (Option<String>, Vec<WireMessage>) {
        let mut system_parts = Vec::new();
        let mut messages = Vec::new();

        for message in &request.messages {
            match message.role {
                ChatRole::System => system_parts.push(message.content.clone()),
                ChatRole::User => messages.push(WireMessage {
                    role: "user",
                    content: message.content.clone(),
                }),
                ChatRole::Assistant => messages.push(WireMessage {
                    role: "assistant",
                    content: message.content.clone(),
                }),
                ChatRole::Tool => messages.push(WireMessage {
                    role: "user",
                    content: format!("[tool result]\n{}", message.content),
                }),
            }
        }

        let system = if system_parts.is_empty() {
            None
        } else {
            Some(system_parts.join("\n\n"))
        };
        (system, messages)
    }
}

#[async_trait]
impl ModelClient for AnthropicClient {
    fn client_id(&self) -> &str {
        "anthropic"
    }

    async fn chat(&self, request: ChatRequest) -> Result<ModelResponse, ModelError> {
        if self.api_key.is_empty() {
            return Err(ModelError::NotConfigured("empty API key".to_string()));
        }

        let (system, messages) = Self::wire_messages(&request);
        let tools: Vec<WireTool<'_>> = request
            .tools
            .iter()
            .map(|t: &ToolDescriptor| WireTool {
                name: &t.name,
                description: &t.description,
                input_schema: &t.input_schema,
            })
            .collect();

        let body = WireRequest {
            model: &request.model,
            max_tokens: request.max_tokens.unwrap_or(DEFAULT_MAX_TOKENS),
            temperature: request.temperature,
            system,
            messages,
            tools,
        };

        let response = self
            .http
            .post(format!("{}/v1/messages", self.base_url))
            .timeout(request.timeout)
            .header("content-type", "application/json")
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", API_VERSION)
            .json(&body)
            .send()
            .await
            .map_err(|e| classify(&e, request.timeout))?;

        let status = response.status();
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            return Err(match status.as_u16() {
                429 => ModelError::RateLimited,
                code => ModelError::Api { status: code, message },
            });
        }

        let wire: WireResponse = response
            .json()
            .await
            .map_err(|e| ModelError::InvalidResponse(e.to_string()))?;

        let mut content = String::new();
        let mut tool_calls = Vec::new();
        for block in wire.content {
            match block {
                WireContentBlock::Text { text } => {
                    if !content.is_empty() {
                        content.push('\n');
                    }
                    content.push_str(&text);
                }
                WireContentBlock::ToolUse { name, input } => {
                    tool_calls.push(ToolCallRequest::new(name, input));
                }
                WireContentBlock::Other => {}
            }
        }

        Ok(ModelResponse {
            content,
            tool_calls,
            usage: wire.usage.map(|u| TokenUsage {
                input_tokens: u.input_tokens,
                output_tokens: u.output_tokens,
            }),
            model: if wire.model.is_empty() { request.model.clone() } else { wire.model },
        })
    }
}

fn classify(error: &reqwest::Error, timeout: Duration) -> ModelError {
    if error.is_timeout() {
        ModelError::Timeout(timeout.as_secs())
    } else {
        ModelError::Unavailable(error.to_string())
    }
}
