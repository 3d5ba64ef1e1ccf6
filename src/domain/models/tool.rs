//! Tool descriptors, tool outputs, and artifact block handling.
//!
//! Artifacts are fenced, typed JSON payloads carried as task results for
//! UI rendering rather than prose display. A block looks like
//! `` ```artifact:form `` followed by the JSON payload and a closing
//! fence; consumers tolerate whitespace between the fence and the
//! `artifact:` header.

use serde::{Deserialize, Serialize};

/// Where a tool comes from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolSource {
    /// Compiled-in tool.
    Builtin,
    /// Tool exposed by an MCP server, identified by server id.
    Mcp(String),
}

/// Descriptor for a single tool, snapshot at plan start.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolDescriptor {
    /// Fully-qualified name, `server.tool`.
    pub name: String,
    pub description: String,
    /// JSON Schema for the arguments object.
    #[serde(rename = "inputSchema")]
    pub input_schema: serde_json::Value,
    pub category: String,
    pub source: ToolSource,
}

impl ToolDescriptor {
    pub fn new(
        name: impl Into<String>,
        description: impl Into<String>,
        input_schema: serde_json::Value,
        category: impl Into<String>,
        source: ToolSource,
    ) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            input_schema,
            category: category.into(),
            source,
        }
    }

    /// The `server` half of the fully-qualified name.
    pub fn server(&self) -> &str {
        self.name.split('.').next().unwrap_or(&self.name)
    }

    /// The `tool` half of the fully-qualified name.
    pub fn short_name(&self) -> &str {
        self.name.split_once('.').map_or(self.name.as_str(), |(_, t)| t)
    }
}

/// Successful output of a tool invocation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolOutput {
    /// Plain text result.
    Text(String),
    /// An artifact block, passed through verbatim to the caller.
    Artifact(String),
}

impl ToolOutput {
    /// Wrap raw tool text, tagging it as an artifact when it contains an
    /// artifact block.
    pub fn from_text(text: String) -> Self {
        if contains_artifact_block(&text) {
            Self::Artifact(text)
        } else {
            Self::Text(text)
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            Self::Text(s) | Self::Artifact(s) => s,
        }
    }

    pub fn is_artifact(&self) -> bool {
        matches!(self, Self::Artifact(_))
    }
}

/// Journal entry for one tool call made during task execution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCallRecord {
    pub name: String,
    pub arguments: serde_json::Value,
    pub success: bool,
    pub duration_ms: u64,
}

/// Build an artifact block from a type tag and a JSON payload.
pub fn artifact_block(kind: &str, payload: &serde_json::Value) -> String {
    format!("```artifact:{kind}\n{payload}\n```")
}

/// Whether the text contains an artifact block anywhere.
///
/// Tolerates whitespace and newlines between the opening fence and the
/// `artifact:` header, which small models emit routinely.
pub fn contains_artifact_block(text: &str) -> bool {
    find_artifact_block(text).is_some()
}

/// Locate the first artifact block and return `(start, end)` byte offsets
/// covering the whole fenced block including both fences.
pub fn find_artifact_block(text: &str) -> Option<(usize, usize)> {
    let mut search_from = 0;
    while let Some(rel) = text[search_from..].find("```") {
        let fence_start = search_from + rel;
        let after_fence = fence_start + 3;
        let header = text[after_fence..].trim_start();
        if header.starts_with("artifact:") {
            // Closing fence is the next ``` after the header line.
            let body_offset = after_fence + (text[after_fence..].len() - header.len());
            if let Some(close_rel) = text[body_offset..].find("\n```") {
                let end = body_offset + close_rel + 4;
                return Some((fence_start, end));
            }
            // Unterminated block still counts as artifact-bearing.
            return Some((fence_start, text.len()));
        }
        search_from = after_fence;
    }
    None
}

/// Extract the first artifact block verbatim (both fences included).
pub fn extract_artifact_block(text: &str) -> Option<String> {
    find_artifact_block(text).map(|(start, end)| text[start..end].to_string())
}

/// The `<type>` tag of the first artifact block, if any.
pub fn artifact_type(text: &str) -> Option<String> {
    let (start, _) = find_artifact_block(text)?;
    let header = text[start + 3..].trim_start();
    let rest = header.strip_prefix("artifact:")?;
    let tag: String = rest
        .chars()
        .take_while(|c| c.is_ascii_alphanumeric() || *c == '_' || *c == '-')
        .collect();
    if tag.is_empty() { None } else { Some(tag) }
}

/// Repair the malformed fence shape `` ```\nartifact:type `` that some
/// models produce, folding the header back onto the fence line.
pub fn normalize_artifact_fences(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut rest = text;
    while let Some(pos) = rest.find("```") {
        let (before, after_fence) = rest.split_at(pos + 3);
        out.push_str(before);
        // Only fold when the fence is followed by blank space then `artifact:`.
        let trimmed = after_fence.trim_start_matches(['\n', '\r', ' ', '\t']);
        if trimmed.len() != after_fence.len() && trimmed.starts_with("artifact:") {
            rest = trimmed;
        } else {
            rest = after_fence;
        }
    }
    out.push_str(rest);
    out
}
