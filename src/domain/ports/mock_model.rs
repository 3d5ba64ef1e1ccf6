//! Scripted model client for tests.

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::Mutex;

use crate::domain::errors::ModelError;
use crate::domain::models::{ModelResponse, TokenUsage, ToolCallRequest};

use super::model_client::{ChatRequest, ModelClient};

/// One scripted reply.
#[derive(Debug, Clone)]
pub struct MockReply {
    pub content: String,
    pub tool_calls: Vec<ToolCallRequest>,
    pub fail: Option<String>,
}

impl MockReply {
    pub fn text(content: impl Into<String>) -> Self {
        Self { content: content.into(), tool_calls: Vec::new(), fail: None }
    }

    pub fn tool_call(name: impl Into<String>, arguments: serde_json::Value) -> Self {
        Self {
            content: String::new(),
            tool_calls: vec![ToolCallRequest::new(name, arguments)],
            fail: None,
        }
    }

    pub fn failure(message: impl Into<String>) -> Self {
        Self { content: String::new(), tool_calls: Vec::new(), fail: Some(message.into()) }
    }
}

/// Model client that pops scripted replies in FIFO order.
///
/// When the script runs dry it keeps returning the last reply, so loops
/// that poll for a final answer terminate deterministically.
pub struct MockModelClient {
    replies: Arc<Mutex<Vec<MockReply>>>,
    requests: Arc<Mutex<Vec<ChatRequest>>>,
}

impl MockModelClient {
    pub fn new(replies: Vec<MockReply>) -> Self {
        Self {
            replies: Arc::new(Mutex::new(replies)),
            requests: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn always(reply: MockReply) -> Self {
        Self::new(vec![reply])
    }

    /// Requests observed so far, for assertions.
    pub async fn requests(&self) -> Vec<ChatRequest> {
        self.requests.lock().await.clone()
    }

    pub async fn request_count(&self) -> usize {
        self.requests.lock().await.len()
    }

    /// Append further scripted replies.
    pub async fn push_reply(&self, reply: MockReply) {
        self.replies.lock().await.push(reply);
    }
}

#[async_trait]
impl ModelClient for MockModelClient {
    fn client_id(&self) -> &str {
        "mock"
    }

    async fn chat(&self, request: ChatRequest) -> Result<ModelResponse, ModelError> {
        let model = request.model.clone();
        self.requests.lock().await.push(request);

        let mut replies = self.replies.lock().await;
        let reply = if replies.len() > 1 {
            replies.remove(0)
        } else {
            replies
                .first()
                .cloned()
                .ok_or_else(|| ModelError::Unavailable("mock script empty".to_string()))?
        };

        if let Some(message) = reply.fail {
            return Err(ModelError::Unavailable(message));
        }

        Ok(ModelResponse {
            content: reply.content,
            tool_calls: reply.tool_calls,
            usage: Some(TokenUsage { input_tokens: 100, output_tokens: 50 }),
            model,
        })
    }
}
