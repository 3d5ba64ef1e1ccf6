//! Prompt context assembly.
//!
//! Builds the message list for one agent invocation: the role's system
//! prompt plus environmental context (cwd, memory snapshot, rolling
//! chat-history window, filtered tool catalogue), then the task
//! description as the user turn. Sections are individually truncated so
//! no single source can flood the context window.

use crate::domain::models::{AgentDef, ChatMessage, ToolDescriptor};
use crate::domain::ports::MemorySnapshot;

/// Default per-section character budget.
const DEFAULT_SECTION_BUDGET: usize = 8_000;

/// Truncate a section to a character budget, keeping the head.
pub fn truncate_section(text: &str, budget: usize) -> String {
    if text.len() <= budget {
        return text.to_string();
    }
    let mut cut = budget;
    while !text.is_char_boundary(cut) {
        cut -= 1;
    }
    format!("{}\n… [truncated]", &text[..cut])
}

/// Builder for agent prompt contexts.
#[derive(Debug, Clone)]
pub struct PromptContextBuilder {
    cwd: String,
    history_window: usize,
    section_budget: usize,
}

impl PromptContextBuilder {
    pub fn new(cwd: impl Into<String>, history_window: usize) -> Self {
        Self {
            cwd: cwd.into(),
            history_window,
            section_budget: DEFAULT_SECTION_BUDGET,
        }
    }

    pub fn with_section_budget(mut self, budget: usize) -> Self {
        self.section_budget = budget;
        self
    }

    pub fn cwd(&self) -> &str {
        &self.cwd
    }

    /// Assemble the message list for one agent invocation.
    pub fn build(
        &self,
        def: &AgentDef,
        task_description: &str,
        history: &[ChatMessage],
        memory: &MemorySnapshot,
        tools: &[ToolDescriptor],
    ) -> Vec<ChatMessage> {
        let mut system = String::with_capacity(def.system_prompt.len() + 1024);
        system.push_str(&def.system_prompt);

        system.push_str("\n\n## Environment\n\n");
        system.push_str(&format!("Working directory: {}\n", self.cwd));
        system.push_str("All file paths you emit must be absolute.\n");

        let memory_section = truncate_section(&memory.format_for_prompt(), self.section_budget);
        system.push_str(&memory_section);

        if !history.is_empty() {
            let window_start = history.len().saturating_sub(self.history_window);
            let mut section = String::from("\n\n## Recent Conversation\n\n");
            for message in &history[window_start..] {
                section.push_str(&format!("{}: {}\n", message.role.as_str(), message.content));
            }
            system.push_str(&truncate_section(&section, self.section_budget));
        }

        if !tools.is_empty() {
            let mut section = String::from("\n\n## Available Tools\n\n");
            for tool in tools {
                section.push_str(&format!("- `{}`: {}\n", tool.name, tool.description));
            }
            section.push_str(
                "\nTo call a tool, emit a JSON object on its own line:\n\
                 {\"name\": \"server.tool\", \"arguments\": {\"param\": \"value\"}}\n\
                 When you have the final answer, reply with plain text and no tool call.\n",
            );
            system.push_str(&truncate_section(&section, self.section_budget));
        }

        vec![
            ChatMessage::system(system),
            ChatMessage::user(task_description.to_string()),
        ]
    }

    /// Planner-specific context: the planner sees roles and tools as
    /// catalogue listings inside its user turn rather than a tool surface.
    pub fn planner_sections(
        &self,
        roles: &[&AgentDef],
        tools: &[ToolDescriptor],
        memory: &MemorySnapshot,
        history: &[ChatMessage],
    ) -> String {
        let mut out = String::new();

        out.push_str("## Working Directory\n\n");
        out.push_str(&self.cwd);
        out.push('\n');

        out.push_str("\n## Available Roles\n\n");
        for def in roles {
            let hints = if def.planning_hints.is_empty() {
                String::new()
            } else {
                format!(" ({})", def.planning_hints)
            };
            out.push_str(&format!("- {}: {}{}\n", def.agent_type, def.description_or_prompt(), hints));
        }

        if !tools.is_empty() {
            out.push_str("\n## Available Tools\n\n");
            let mut section = String::new();
            for tool in tools {
                section.push_str(&format!("- {} [{}]: {}\n", tool.name, tool.category, tool.description));
            }
            out.push_str(&truncate_section(&section, self.section_budget));
        }

        let memory_section = memory.format_for_prompt();
        if !memory_section.is_empty() {
            out.push_str(&truncate_section(&memory_section, self.section_budget));
            out.push('\n');
        }

        if !history.is_empty() {
            let window_start = history.len().saturating_sub(self.history_window);
            let mut section = String::from("\n## Recent Conversation\n\n");
            for message in &history[window_start..] {
                section.push_str(&format!("{}: {}\n", message.role.as_str(), message.content));
            }
            out.push_str(&truncate_section(&section, self.section_budget));
        }

        out
    }
}

impl AgentDef {
    /// First line of the description, falling back to the prompt, for
    /// compact catalogue listings.
    fn description_or_prompt(&self) -> &str {
        let source = if self.description.is_empty() {
            &self.system_prompt
        } else {
            &self.description
        };
        source.lines().next().unwrap_or_default()
    }
}
