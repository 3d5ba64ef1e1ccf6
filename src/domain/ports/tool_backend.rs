//! Tool backend port.
//!
//! The MCP transport layer (stdio, SSE, streamable HTTP) lives behind
//! this trait; the delegation engine only sees descriptors and an
//! invoker. Builtin tools implement the same trait.

use async_trait::async_trait;

use crate::domain::errors::ToolError;
use crate::domain::models::{ToolDescriptor, ToolOutput};

/// Port trait for tool providers.
#[async_trait]
pub trait ToolBackend: Send + Sync {
    /// All tools currently exposed by this backend.
    fn list(&self) -> Vec<ToolDescriptor>;

    /// Lookup by fully-qualified name.
    fn get(&self, name: &str) -> Option<ToolDescriptor> {
        self.list().into_iter().find(|t| t.name == name)
    }

    /// Invoke a tool. Timeouts are enforced by the gateway, not here.
    async fn invoke(&self, name: &str, args: serde_json::Value) -> Result<ToolOutput, ToolError>;
}

/// Aggregates several backends into one tool surface.
///
/// First backend claiming a name wins; used to combine builtin tools
/// with one or more MCP-backed providers.
pub struct CompositeToolBackend {
    backends: Vec<std::sync::Arc<dyn ToolBackend>>,
}

impl CompositeToolBackend {
    pub fn new(backends: Vec<std::sync::Arc<dyn ToolBackend>>) -> Self {
        Self { backends }
    }
}

#[async_trait]
impl ToolBackend for CompositeToolBackend {
    fn list(&self) -> Vec<ToolDescriptor> {
        let mut seen = std::collections::HashSet::new();
        let mut tools = Vec::new();
        for backend in &self.backends {
            for tool in backend.list() {
                if seen.insert(tool.name.clone()) {
                    tools.push(tool);
                }
            }
        }
        tools
    }

    async fn invoke(&self, name: &str, args: serde_json::Value) -> Result<ToolOutput, ToolError> {
        for backend in &self.backends {
            if backend.get(name).is_some() {
                return backend.invoke(name, args).await;
            }
        }
        Err(ToolError::Unknown(name.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::models::ToolSource;
    use serde_json::json;
    use std::sync::Arc;

    struct FixedBackend {
        tool: ToolDescriptor,
        reply: String,
    }

    #[async_trait]
    impl ToolBackend for FixedBackend {
        fn list(&self) -> Vec<ToolDescriptor> {
            vec![self.tool.clone()]
        }

        async fn invoke(&self, name: &str, _args: serde_json::Value) -> Result<ToolOutput, ToolError> {
            if name == self.tool.name {
                Ok(ToolOutput::Text(self.reply.clone()))
            } else {
                Err(ToolError::Unknown(name.to_string()))
            }
        }
    }

    fn backend(name: &str, reply: &str) -> Arc<dyn ToolBackend> {
        Arc::new(FixedBackend {
            tool: ToolDescriptor::new(name, "", json!({"type": "object"}), "misc", ToolSource::Builtin),
            reply: reply.to_string(),
        })
    }

    #[tokio::test]
    async fn test_composite_first_backend_wins() {
        let composite = CompositeToolBackend::new(vec![
            backend("fs.read", "from-first"),
            backend("fs.read", "from-second"),
            backend("web.fetch", "page"),
        ]);

        assert_eq!(composite.list().len(), 2);
        let out = composite.invoke("fs.read", json!({})).await.unwrap();
        assert_eq!(out.as_str(), "from-first");
    }

    #[tokio::test]
    async fn test_composite_unknown_tool() {
        let composite = CompositeToolBackend::new(vec![backend("fs.read", "x")]);
        let err = composite.invoke("fs.write", json!({})).await.unwrap_err();
        assert!(matches!(err, ToolError::Unknown(_)));
    }
}
