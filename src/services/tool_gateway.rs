//! Tool gateway: the single access point for tool invocation.
//!
//! Captures a snapshot of enabled tools at plan start (freezing the
//! tool surface for the plan's duration), enforces per-agent permission
//! sets, validates and coerces arguments against the tool's schema, and
//! applies per-call timeouts.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;

use crate::domain::errors::ToolError;
use crate::domain::models::{AgentDef, ToolDescriptor, ToolOutput, ToolsConfig};
use crate::domain::ports::ToolBackend;

/// Gateway over a frozen tool snapshot.
pub struct ToolGateway {
    backend: Arc<dyn ToolBackend>,
    /// Snapshot taken at construction; lookups never consult the live
    /// backend again.
    snapshot: HashMap<String, ToolDescriptor>,
    config: ToolsConfig,
}

impl ToolGateway {
    /// Snapshot the backend's enabled tools.
    pub fn snapshot(backend: Arc<dyn ToolBackend>, config: ToolsConfig) -> Self {
        let snapshot = backend
            .list()
            .into_iter()
            .filter(|t| !config.disabled_tools.contains(&t.name))
            .map(|t| (t.name.clone(), t))
            .collect();
        Self { backend, snapshot, config }
    }

    /// All tools in the snapshot, sorted by name.
    pub fn list(&self) -> Vec<&ToolDescriptor> {
        let mut tools: Vec<&ToolDescriptor> = self.snapshot.values().collect();
        tools.sort_by(|a, b| a.name.cmp(&b.name));
        tools
    }

    pub fn get(&self, name: &str) -> Option<&ToolDescriptor> {
        self.snapshot.get(name)
    }

    /// The subset of the snapshot the given agent may call, for prompt
    /// assembly and native tool advertising.
    pub fn list_for_agent(&self, def: &AgentDef) -> Vec<ToolDescriptor> {
        self.list()
            .into_iter()
            .filter(|t| self.agent_may_call(def, t))
            .cloned()
            .collect()
    }

    fn agent_may_call(&self, def: &AgentDef, tool: &ToolDescriptor) -> bool {
        if def.forbidden_tools.iter().any(|t| t == &tool.name) {
            return false;
        }
        if def.default_tools.iter().any(|t| t == &tool.name) {
            return true;
        }
        let categories = if def.allowed_tool_categories.is_empty() {
            &self.config.allowed_categories_default
        } else {
            &def.allowed_tool_categories
        };
        categories.iter().any(|c| c == &tool.category)
    }

    fn timeout_for(&self, tool: &ToolDescriptor) -> Duration {
        if self.config.long_running_categories.contains(&tool.category) {
            Duration::from_secs(self.config.long_call_timeout_secs)
        } else {
            Duration::from_secs(self.config.call_timeout_secs)
        }
    }

    /// Invoke a tool on behalf of an agent.
    pub async fn invoke(
        &self,
        def: &AgentDef,
        name: &str,
        args: Value,
    ) -> Result<ToolOutput, ToolError> {
        let tool = self
            .get(name)
            .ok_or_else(|| ToolError::Unknown(name.to_string()))?;

        if !self.agent_may_call(def, tool) {
            return Err(ToolError::Forbidden {
                tool: name.to_string(),
                agent: def.agent_type.clone(),
            });
        }

        let coerced = coerce_arguments(&tool.input_schema, args).map_err(|reason| {
            ToolError::InvalidArgs { tool: name.to_string(), reason }
        })?;

        let timeout = self.timeout_for(tool);
        let result = tokio::time::timeout(timeout, self.backend.invoke(name, coerced)).await;
        match result {
            Ok(Ok(output)) => {
                // Re-tag in case the backend returned plain text carrying
                // an artifact block.
                Ok(match output {
                    ToolOutput::Text(text) => ToolOutput::from_text(text),
                    artifact => artifact,
                })
            }
            Ok(Err(e)) => Err(e),
            Err(_) => Err(ToolError::Timeout(timeout.as_secs())),
        }
    }
}

/// Validate arguments against a JSON-schema-shaped descriptor and coerce
/// tolerant input forms.
///
/// Array-typed parameters accept both JSON arrays and comma-separated
/// strings; empty strings collapse to the schema default or `[]`.
/// Numeric parameters accept numeric strings.
pub fn coerce_arguments(schema: &Value, args: Value) -> Result<Value, String> {
    let mut obj = match args {
        Value::Object(map) => map,
        Value::Null => serde_json::Map::new(),
        other => return Err(format!("arguments must be an object, got {other}")),
    };

    let properties = schema.get("properties").and_then(Value::as_object);

    if let Some(required) = schema.get("required").and_then(Value::as_array) {
        for req in required {
            if let Some(key) = req.as_str() {
                if !obj.contains_key(key) {
                    return Err(format!("missing required parameter '{key}'"));
                }
            }
        }
    }

    let Some(properties) = properties else {
        return Ok(Value::Object(obj));
    };

    for (key, prop_schema) in properties {
        let Some(value) = obj.get(key) else { continue };
        let Some(expected) = prop_schema.get("type").and_then(Value::as_str) else {
            continue;
        };
        let coerced = coerce_value(value, expected, prop_schema)
            .map_err(|e| format!("parameter '{key}': {e}"))?;
        obj.insert(key.clone(), coerced);
    }

    Ok(Value::Object(obj))
}

fn coerce_value(value: &Value, expected: &str, prop_schema: &Value) -> Result<Value, String> {
    match expected {
        "array" => match value {
            Value::Array(_) => Ok(value.clone()),
            Value::String(s) if s.trim().is_empty() => Ok(prop_schema
                .get("default")
                .cloned()
                .unwrap_or_else(|| Value::Array(vec![]))),
            Value::String(s) => Ok(Value::Array(
                s.split(',')
                    .map(str::trim)
                    .filter(|part| !part.is_empty())
                    .map(|part| Value::String(part.to_string()))
                    .collect(),
            )),
            other => Err(format!("expected array, got {other}")),
        },
        "string" => match value {
            Value::String(_) => Ok(value.clone()),
            Value::Number(n) => Ok(Value::String(n.to_string())),
            Value::Bool(b) => Ok(Value::String(b.to_string())),
            other => Err(format!("expected string, got {other}")),
        },
        "integer" | "number" => match value {
            Value::Number(_) => Ok(value.clone()),
            Value::String(s) => s
                .trim()
                .parse::<f64>()
                .ok()
                .and_then(serde_json::Number::from_f64)
                .map(Value::Number)
                .ok_or_else(|| format!("expected {expected}, got '{s}'")),
            other => Err(format!("expected {expected}, got {other}")),
        },
        "boolean" => match value {
            Value::Bool(_) => Ok(value.clone()),
            Value::String(s) => match s.trim().to_lowercase().as_str() {
                "true" => Ok(Value::Bool(true)),
                "false" => Ok(Value::Bool(false)),
                _ => Err(format!("expected boolean, got '{s}'")),
            },
            other => Err(format!("expected boolean, got {other}")),
        },
        "object" => match value {
            Value::Object(_) => Ok(value.clone()),
            other => Err(format!("expected object, got {other}")),
        },
        _ => Ok(value.clone()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::models::{artifact_block, ToolSource};
    use async_trait::async_trait;
    use serde_json::json;

    struct EchoBackend {
        tools: Vec<ToolDescriptor>,
        delay: Option<Duration>,
    }

    #[async_trait]
    impl ToolBackend for EchoBackend {
        fn list(&self) -> Vec<ToolDescriptor> {
            self.tools.clone()
        }

        async fn invoke(&self, name: &str, args: Value) -> Result<ToolOutput, ToolError> {
            if let Some(delay) = self.delay {
                tokio::time::sleep(delay).await;
            }
            if name == "builtin.generate_form" {
                return Ok(ToolOutput::Text(artifact_block("form", &args)));
            }
            Ok(ToolOutput::Text(format!("{name} <- {args}")))
        }
    }

    fn descriptor(name: &str, category: &str, schema: Value) -> ToolDescriptor {
        ToolDescriptor::new(name, "test tool", schema, category, ToolSource::Builtin)
    }

    fn gateway(tools: Vec<ToolDescriptor>, config: ToolsConfig) -> ToolGateway {
        ToolGateway::snapshot(Arc::new(EchoBackend { tools, delay: None }), config)
    }

    fn fs_agent() -> AgentDef {
        AgentDef::new("file_executor", "p").with_allowed_categories(vec!["filesystem".into()])
    }

    #[tokio::test]
    async fn test_unknown_tool() {
        let gw = gateway(vec![], ToolsConfig::default());
        let err = gw.invoke(&fs_agent(), "fs.read", json!({})).await.unwrap_err();
        assert!(matches!(err, ToolError::Unknown(_)));
    }

    #[tokio::test]
    async fn test_forbidden_by_category() {
        let tools = vec![descriptor("web.fetch", "network", json!({"type": "object"}))];
        let gw = gateway(tools, ToolsConfig::default());
        let err = gw.invoke(&fs_agent(), "web.fetch", json!({})).await.unwrap_err();
        assert!(matches!(err, ToolError::Forbidden { .. }));
    }

    #[tokio::test]
    async fn test_forbidden_list_beats_default_tools() {
        let tools = vec![descriptor("fs.delete", "filesystem", json!({"type": "object"}))];
        let gw = gateway(tools, ToolsConfig::default());
        let def = fs_agent().with_forbidden_tools(vec!["fs.delete".into()]);
        let err = gw.invoke(&def, "fs.delete", json!({})).await.unwrap_err();
        assert!(matches!(err, ToolError::Forbidden { .. }));
    }

    #[tokio::test]
    async fn test_default_categories_apply_when_agent_has_none() {
        let tools = vec![descriptor("fs.read", "filesystem", json!({"type": "object"}))];
        let config = ToolsConfig {
            allowed_categories_default: vec!["filesystem".into()],
            ..Default::default()
        };
        let gw = gateway(tools, config);
        let def = AgentDef::new("executor", "p");
        assert!(gw.invoke(&def, "fs.read", json!({})).await.is_ok());
    }

    #[tokio::test]
    async fn test_required_argument_enforced() {
        let schema = json!({
            "type": "object",
            "properties": {"path": {"type": "string"}},
            "required": ["path"]
        });
        let tools = vec![descriptor("fs.read", "filesystem", schema)];
        let gw = gateway(tools, ToolsConfig::default());
        let err = gw.invoke(&fs_agent(), "fs.read", json!({})).await.unwrap_err();
        assert!(matches!(err, ToolError::InvalidArgs { .. }));
    }

    #[tokio::test]
    async fn test_array_coercion_from_comma_string() {
        let schema = json!({
            "type": "object",
            "properties": {"names": {"type": "array"}}
        });
        let tools = vec![descriptor("fs.stat_many", "filesystem", schema)];
        let gw = gateway(tools, ToolsConfig::default());
        let out = gw
            .invoke(&fs_agent(), "fs.stat_many", json!({"names": "a.txt, b.txt"}))
            .await
            .unwrap();
        assert!(out.as_str().contains(r#"["a.txt","b.txt"]"#));
    }

    #[tokio::test]
    async fn test_empty_array_string_uses_schema_default() {
        let schema = json!({
            "type": "object",
            "properties": {"names": {"type": "array", "default": ["*.pdf"]}}
        });
        let tools = vec![descriptor("fs.glob", "filesystem", schema)];
        let gw = gateway(tools, ToolsConfig::default());
        let out = gw.invoke(&fs_agent(), "fs.glob", json!({"names": ""})).await.unwrap();
        assert!(out.as_str().contains(r#"["*.pdf"]"#));
    }

    #[tokio::test]
    async fn test_artifact_result_tagged() {
        let tools = vec![descriptor("builtin.generate_form", "artifacts", json!({"type": "object"}))];
        let def = AgentDef::new("artifact_agent", "p")
            .with_default_tools(vec!["builtin.generate_form".into()]);
        let gw = gateway(tools, ToolsConfig::default());
        let out = gw
            .invoke(&def, "builtin.generate_form", json!({"title": "Contact"}))
            .await
            .unwrap();
        assert!(out.is_artifact());
    }

    #[tokio::test]
    async fn test_tool_timeout() {
        let tools = vec![descriptor("slow.op", "filesystem", json!({"type": "object"}))];
        let backend = Arc::new(EchoBackend {
            tools,
            delay: Some(Duration::from_millis(200)),
        });
        let config = ToolsConfig { call_timeout_secs: 0, ..Default::default() };
        let gw = ToolGateway::snapshot(backend, config);
        let err = gw.invoke(&fs_agent(), "slow.op", json!({})).await.unwrap_err();
        assert!(matches!(err, ToolError::Timeout(_)));
    }

    #[tokio::test]
    async fn test_disabled_tools_removed_from_snapshot() {
        let tools = vec![
            descriptor("fs.read", "filesystem", json!({"type": "object"})),
            descriptor("fs.delete", "filesystem", json!({"type": "object"})),
        ];
        let config = ToolsConfig {
            disabled_tools: vec!["fs.delete".into()],
            ..Default::default()
        };
        let gw = gateway(tools, config);
        assert!(gw.get("fs.delete").is_none());
        assert!(gw.get("fs.read").is_some());
    }

    #[test]
    fn test_numeric_string_coercion() {
        let schema = json!({
            "type": "object",
            "properties": {"limit": {"type": "integer"}}
        });
        let out = coerce_arguments(&schema, json!({"limit": "25"})).unwrap();
        assert_eq!(out["limit"], json!(25.0));
    }
}
