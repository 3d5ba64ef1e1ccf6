//! Model client port.
//!
//! Abstracts over model endpoints (local Ollama pool, remote escalation
//! provider). The delegation engine only ever talks to this trait;
//! transports and wire formats live in `infrastructure`.

use std::time::Duration;

use async_trait::async_trait;

use crate::domain::errors::ModelError;
use crate::domain::models::{ChatMessage, ModelResponse, ToolDescriptor};

/// One chat completion request.
#[derive(Debug, Clone)]
pub struct ChatRequest {
    /// Model tag to serve the request.
    pub model: String,
    /// Endpoint URL override (routing decision); clients fall back to
    /// their configured base URL when absent.
    pub endpoint: Option<String>,
    pub messages: Vec<ChatMessage>,
    pub temperature: f32,
    pub max_tokens: Option<u32>,
    /// Tool surface advertised to the model (native function calling).
    pub tools: Vec<ToolDescriptor>,
    pub timeout: Duration,
}

impl ChatRequest {
    pub fn new(model: impl Into<String>, messages: Vec<ChatMessage>) -> Self {
        Self {
            model: model.into(),
            endpoint: None,
            messages,
            temperature: 0.7,
            max_tokens: None,
            tools: Vec::new(),
            timeout: Duration::from_secs(120),
        }
    }

    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = Some(endpoint.into());
        self
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature;
        self
    }

    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = Some(max_tokens);
        self
    }

    pub fn with_tools(mut self, tools: Vec<ToolDescriptor>) -> Self {
        self.tools = tools;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

/// Port trait for chat-completion backends.
///
/// Implementations must be `Send + Sync` for concurrent use across
/// scheduler tasks.
#[async_trait]
pub trait ModelClient: Send + Sync {
    /// Identifier for logging/tracing (e.g. `ollama`, `anthropic`).
    fn client_id(&self) -> &str;

    /// Execute one chat completion.
    async fn chat(&self, request: ChatRequest) -> Result<ModelResponse, ModelError>;
}
