//! Builtin tool backend.
//!
//! Compiled-in tools available without any MCP server: path validation
//! (the "locked path" contract for file-touching roles), a Python
//! runner for batch programs, artifact generators, and the memory ops
//! bridged to the [`MemoryStore`] port.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Value};

use crate::domain::errors::ToolError;
use crate::domain::models::{artifact_block, ToolDescriptor, ToolOutput, ToolSource};
use crate::domain::ports::{MemoryStore, ProgressEntry, ToolBackend};

/// Builtin tools rooted at the session working directory.
pub struct BuiltinToolBackend {
    cwd: PathBuf,
    memory: Arc<dyn MemoryStore>,
    python_bin: String,
}

impl BuiltinToolBackend {
    pub fn new(cwd: impl Into<PathBuf>, memory: Arc<dyn MemoryStore>) -> Self {
        Self {
            cwd: cwd.into(),
            memory,
            python_bin: "python3".to_string(),
        }
    }

    pub fn with_python_bin(mut self, bin: impl Into<String>) -> Self {
        self.python_bin = bin.into();
        self
    }

    /// Resolve a path against cwd and return the locked absolute form.
    ///
    /// Existing paths canonicalise; a missing path is accepted when its
    /// parent directory exists (create-on-write), otherwise rejected.
    fn validate_file_path(&self, raw: &str) -> Result<String, ToolError> {
        let candidate = Path::new(raw);
        let absolute = if candidate.is_absolute() {
            candidate.to_path_buf()
        } else {
            self.cwd.join(candidate)
        };

        if absolute.exists() {
            return absolute
                .canonicalize()
                .map(|p| p.to_string_lossy().into_owned())
                .map_err(|e| ToolError::Failed(format!("cannot canonicalise '{raw}': {e}")));
        }

        match absolute.parent() {
            Some(parent) if parent.exists() => Ok(absolute.to_string_lossy().into_owned()),
            _ => Err(ToolError::Failed(format!(
                "path '{raw}' does not exist and its parent directory is missing"
            ))),
        }
    }

    async fn execute_python(&self, code: &str) -> Result<String, ToolError> {
        let output = tokio::process::Command::new(&self.python_bin)
            .arg("-c")
            .arg(code)
            .current_dir(&self.cwd)
            .stdin(std::process::Stdio::null())
            .stdout(std::process::Stdio::piped())
            .stderr(std::process::Stdio::piped())
            .output()
            .await
            .map_err(|e| ToolError::Failed(format!("failed to spawn {}: {e}", self.python_bin)))?;

        let stdout = String::from_utf8_lossy(&output.stdout).into_owned();
        if output.status.success() {
            Ok(if stdout.is_empty() {
                "(no output)".to_string()
            } else {
                stdout
            })
        } else {
            let stderr = String::from_utf8_lossy(&output.stderr);
            Err(ToolError::Failed(format!("python exited with error:\n{stderr}")))
        }
    }

    async fn memory_op(&self, op: &str, args: &Value) -> Result<String, ToolError> {
        let str_arg = |key: &str| -> Result<String, ToolError> {
            args.get(key)
                .and_then(Value::as_str)
                .map(String::from)
                .ok_or_else(|| ToolError::InvalidArgs {
                    tool: format!("memory.{op}"),
                    reason: format!("missing '{key}'"),
                })
        };

        match op {
            "add_goal" => {
                self.memory
                    .add_goal(&str_arg("id")?, &str_arg("text")?)
                    .await
                    .map_err(|e| ToolError::Failed(e.to_string()))?;
                Ok("goal recorded".to_string())
            }
            "add_feature" => {
                self.memory
                    .add_feature(&str_arg("id")?, &str_arg("text")?)
                    .await
                    .map_err(|e| ToolError::Failed(e.to_string()))?;
                Ok("feature recorded".to_string())
            }
            "update_feature_status" => {
                self.memory
                    .update_feature_status(&str_arg("id")?, &str_arg("status")?)
                    .await
                    .map_err(|e| ToolError::Failed(e.to_string()))?;
                Ok("feature status updated".to_string())
            }
            "log_progress" => {
                self.memory
                    .log_progress(ProgressEntry::new(str_arg("id")?, str_arg("text")?))
                    .await
                    .map_err(|e| ToolError::Failed(e.to_string()))?;
                Ok("progress logged".to_string())
            }
            "get_memory_state" => {
                let snapshot = self.memory.snapshot().await;
                serde_json::to_string_pretty(&snapshot)
                    .map_err(|e| ToolError::Failed(e.to_string()))
            }
            other => Err(ToolError::Unknown(format!("memory.{other}"))),
        }
    }
}

fn descriptor(name: &str, description: &str, schema: Value, category: &str) -> ToolDescriptor {
    ToolDescriptor::new(name, description, schema, category, ToolSource::Builtin)
}

#[async_trait]
impl ToolBackend for BuiltinToolBackend {
    fn list(&self) -> Vec<ToolDescriptor> {
        vec![
            descriptor(
                "builtin.validate_file_path",
                "Resolve a path against the working directory and return the locked absolute path. \
                 Call this before any other file operation and reuse the returned path verbatim.",
                json!({
                    "type": "object",
                    "properties": {
                        "path": {"type": "string"},
                        "task_description": {"type": "string"}
                    },
                    "required": ["path"]
                }),
                "validation",
            ),
            descriptor(
                "builtin.execute_python_code",
                "Run a Python program and return its stdout. Use for batch operations that \
                 enumerate items and process each one.",
                json!({
                    "type": "object",
                    "properties": {"code": {"type": "string"}},
                    "required": ["code"]
                }),
                "code_execution",
            ),
            descriptor(
                "builtin.generate_form",
                "Produce a form artifact from a field specification.",
                json!({"type": "object"}),
                "artifacts",
            ),
            descriptor(
                "builtin.generate_chart",
                "Produce a chart artifact from series data.",
                json!({"type": "object"}),
                "artifacts",
            ),
            descriptor(
                "builtin.generate_spreadsheet",
                "Produce a spreadsheet artifact from rows and columns.",
                json!({"type": "object"}),
                "artifacts",
            ),
            descriptor(
                "memory.add_goal",
                "Record a goal in project memory under the given id.",
                json!({
                    "type": "object",
                    "properties": {"id": {"type": "string"}, "text": {"type": "string"}},
                    "required": ["id", "text"]
                }),
                "memory",
            ),
            descriptor(
                "memory.add_feature",
                "Record a feature in project memory under the given id.",
                json!({
                    "type": "object",
                    "properties": {"id": {"type": "string"}, "text": {"type": "string"}},
                    "required": ["id", "text"]
                }),
                "memory",
            ),
            descriptor(
                "memory.update_feature_status",
                "Update the status of a feature already in project memory.",
                json!({
                    "type": "object",
                    "properties": {"id": {"type": "string"}, "status": {"type": "string"}},
                    "required": ["id", "status"]
                }),
                "memory",
            ),
            descriptor(
                "memory.log_progress",
                "Append a progress entry to project memory.",
                json!({
                    "type": "object",
                    "properties": {"id": {"type": "string"}, "text": {"type": "string"}},
                    "required": ["id", "text"]
                }),
                "memory",
            ),
            descriptor(
                "memory.get_memory_state",
                "Return the current project memory snapshot as JSON.",
                json!({"type": "object"}),
                "memory",
            ),
        ]
    }

    async fn invoke(&self, name: &str, args: Value) -> Result<ToolOutput, ToolError> {
        match name {
            "builtin.validate_file_path" => {
                let path = args
                    .get("path")
                    .and_then(Value::as_str)
                    .ok_or_else(|| ToolError::InvalidArgs {
                        tool: name.to_string(),
                        reason: "missing 'path'".to_string(),
                    })?;
                self.validate_file_path(path).map(ToolOutput::Text)
            }
            "builtin.execute_python_code" => {
                let code = args
                    .get("code")
                    .and_then(Value::as_str)
                    .ok_or_else(|| ToolError::InvalidArgs {
                        tool: name.to_string(),
                        reason: "missing 'code'".to_string(),
                    })?;
                self.execute_python(code).await.map(ToolOutput::Text)
            }
            "builtin.generate_form" => Ok(ToolOutput::Artifact(artifact_block("form", &args))),
            "builtin.generate_chart" => Ok(ToolOutput::Artifact(artifact_block("chart", &args))),
            "builtin.generate_spreadsheet" => {
                Ok(ToolOutput::Artifact(artifact_block("spreadsheet", &args)))
            }
            _ => match name.strip_prefix("memory.") {
                Some(op) => self.memory_op(op, &args).await.map(ToolOutput::Text),
                None => Err(ToolError::Unknown(name.to_string())),
            },
        }
    }
}
