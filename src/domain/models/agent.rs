//! Agent role definitions.
//!
//! An [`AgentDef`] is a named configuration (prompt + tools + limits)
//! under which a model is invoked for a task. Definitions are loaded
//! from one YAML file per role and are immutable after load.

use serde::{Deserialize, Serialize};

use super::tool::ToolDescriptor;

/// Output format expected from an agent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutputFormat {
    Text,
    Json,
}

impl Default for OutputFormat {
    fn default() -> Self {
        Self::Text
    }
}

/// A role definition: identity, prompt, tool surface, and limits.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentDef {
    /// Role name, normalised to lowercase (e.g. `shell_executor`).
    pub agent_type: String,
    #[serde(default)]
    pub display_name: String,
    #[serde(default)]
    pub description: String,
    pub system_prompt: String,
    /// Fully-qualified tool names always available to this role.
    #[serde(default)]
    pub default_tools: Vec<String>,
    /// Tool categories this role may draw from.
    #[serde(default)]
    pub allowed_tool_categories: Vec<String>,
    /// Tools this role may never call, regardless of category.
    #[serde(default)]
    pub forbidden_tools: Vec<String>,
    #[serde(default = "default_max_context_tokens")]
    pub max_context_tokens: u32,
    /// Hard upper bound on agent loop iterations.
    #[serde(default = "default_loop_limit")]
    pub loop_limit: u32,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    #[serde(default)]
    pub output_format: OutputFormat,
    /// Free-text hints surfaced to the planner when assigning this role.
    #[serde(default)]
    pub planning_hints: String,
    /// Model tag tried first by the router, before the fallback ladder.
    #[serde(default)]
    pub preferred_model: Option<String>,
    /// Minimum pool capability score this role will accept.
    #[serde(default)]
    pub min_capability: u32,
}

fn default_max_context_tokens() -> u32 {
    16_384
}

fn default_loop_limit() -> u32 {
    5
}

fn default_temperature() -> f32 {
    0.7
}

impl AgentDef {
    /// Minimal definition used as a building block by the catalogue and tests.
    pub fn new(agent_type: impl Into<String>, system_prompt: impl Into<String>) -> Self {
        let agent_type = agent_type.into().to_lowercase();
        Self {
            display_name: agent_type.clone(),
            agent_type,
            description: String::new(),
            system_prompt: system_prompt.into(),
            default_tools: Vec::new(),
            allowed_tool_categories: Vec::new(),
            forbidden_tools: Vec::new(),
            max_context_tokens: default_max_context_tokens(),
            loop_limit: default_loop_limit(),
            temperature: default_temperature(),
            output_format: OutputFormat::default(),
            planning_hints: String::new(),
            preferred_model: None,
            min_capability: 0,
        }
    }

    pub fn with_loop_limit(mut self, limit: u32) -> Self {
        self.loop_limit = limit;
        self
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature;
        self
    }

    pub fn with_default_tools(mut self, tools: Vec<String>) -> Self {
        self.default_tools = tools;
        self
    }

    pub fn with_allowed_categories(mut self, categories: Vec<String>) -> Self {
        self.allowed_tool_categories = categories;
        self
    }

    pub fn with_forbidden_tools(mut self, tools: Vec<String>) -> Self {
        self.forbidden_tools = tools;
        self
    }

    pub fn with_preferred_model(mut self, model: impl Into<String>) -> Self {
        self.preferred_model = Some(model.into());
        self
    }

    pub fn with_planning_hints(mut self, hints: impl Into<String>) -> Self {
        self.planning_hints = hints.into();
        self
    }

    /// Parse a role definition from its YAML file content.
    pub fn parse_yaml(content: &str) -> Result<Self, String> {
        let mut def: AgentDef = serde_yaml::from_str(content)
            .map_err(|e| format!("Invalid agent definition: {e}"))?;
        def.agent_type = def.agent_type.to_lowercase();
        if def.display_name.is_empty() {
            def.display_name = def.agent_type.clone();
        }
        if def.system_prompt.trim().is_empty() {
            return Err("Agent definition must have a non-empty system_prompt".to_string());
        }
        Ok(def)
    }

    /// Permission check: a tool is callable when it is one of the role's
    /// default tools or its category is allowed, and it is never callable
    /// when listed as forbidden.
    pub fn allows_tool(&self, tool: &ToolDescriptor) -> bool {
        if self.forbidden_tools.iter().any(|t| t == &tool.name) {
            return false;
        }
        self.default_tools.iter().any(|t| t == &tool.name)
            || self.allowed_tool_categories.iter().any(|c| c == &tool.category)
    }
}
