//! Agent catalogue: source of truth for role definitions.
//!
//! Roles load from a directory of YAML definition files at startup and
//! are read-only afterwards. When no directory is configured the
//! compiled-in builtin catalogue is used.

use std::collections::HashMap;
use std::path::Path;

use crate::domain::errors::{DelegationError, DelegationResult};
use crate::domain::models::AgentDef;

/// Read-only lookup of role definitions.
#[derive(Debug, Clone)]
pub struct AgentCatalogue {
    defs: HashMap<String, AgentDef>,
}

impl AgentCatalogue {
    /// Catalogue with only the compiled-in roles.
    pub fn builtin() -> Self {
        let mut defs = HashMap::new();
        for def in builtin_defs() {
            defs.insert(def.agent_type.clone(), def);
        }
        Self { defs }
    }

    /// Load definitions from a directory of YAML files, layered over the
    /// builtin catalogue so file definitions override builtin roles of
    /// the same name. Unparseable files are skipped with a warning.
    pub fn load_from_directory(dir: &Path) -> DelegationResult<Self> {
        let mut catalogue = Self::builtin();
        if !dir.exists() {
            tracing::warn!(dir = %dir.display(), "Agent catalogue directory missing, using builtin roles");
            return Ok(catalogue);
        }

        for entry in std::fs::read_dir(dir)? {
            let path = entry?.path();
            let is_yaml = path
                .extension()
                .is_some_and(|ext| ext == "yaml" || ext == "yml");
            if !is_yaml {
                continue;
            }
            let content = std::fs::read_to_string(&path)?;
            match AgentDef::parse_yaml(&content) {
                Ok(def) => {
                    tracing::debug!(role = %def.agent_type, path = %path.display(), "Loaded agent definition");
                    catalogue.defs.insert(def.agent_type.clone(), def);
                }
                Err(e) => {
                    tracing::warn!(path = %path.display(), error = %e, "Skipping invalid agent definition");
                }
            }
        }
        Ok(catalogue)
    }

    /// Build a catalogue from explicit definitions (tests, embedding).
    pub fn from_defs(defs: Vec<AgentDef>) -> Self {
        Self {
            defs: defs.into_iter().map(|d| (d.agent_type.clone(), d)).collect(),
        }
    }

    /// Lookup a role definition.
    pub fn get(&self, role: &str) -> DelegationResult<&AgentDef> {
        self.defs
            .get(&role.to_lowercase())
            .ok_or_else(|| DelegationError::UnknownRole(role.to_string()))
    }

    pub fn contains(&self, role: &str) -> bool {
        self.defs.contains_key(&role.to_lowercase())
    }

    /// All definitions, sorted by role name for stable prompt rendering.
    pub fn all(&self) -> Vec<&AgentDef> {
        let mut defs: Vec<&AgentDef> = self.defs.values().collect();
        defs.sort_by(|a, b| a.agent_type.cmp(&b.agent_type));
        defs
    }

    /// Role names, sorted.
    pub fn role_names(&self) -> Vec<String> {
        self.all().iter().map(|d| d.agent_type.clone()).collect()
    }
}

/// The compiled-in role set.
fn builtin_defs() -> Vec<AgentDef> {
    vec![
        AgentDef::new(
            "planner",
            "You are the planning agent. Decompose the user's request into a \
             minimal set of executable tasks with explicit dependencies. Every \
             task description must be fully self-contained: repeat literal \
             paths, filenames, and ids instead of referring to other tasks. \
             All paths must be absolute. Create only the tasks the user asked \
             for.",
        )
        .with_temperature(0.1)
        .with_loop_limit(1)
        .with_planning_hints("never assigned to tasks; produces the plan itself"),
        AgentDef::new(
            "executor",
            "You are a general-purpose execution agent. Complete the task \
             described using the tools available to you. Call a tool when you \
             need external data; answer directly once you have what you need.",
        )
        .with_loop_limit(5)
        .with_allowed_categories(vec!["filesystem".into(), "search".into()]),
        AgentDef::new(
            "file_executor",
            "You operate on files. Before touching any file, call \
             builtin.validate_file_path with the path from the task \
             description and reuse the returned locked path verbatim in every \
             subsequent call.",
        )
        .with_loop_limit(8)
        .with_default_tools(vec!["builtin.validate_file_path".into()])
        .with_allowed_categories(vec!["filesystem".into(), "documents".into()]),
        AgentDef::new(
            "shell_executor",
            "You run batch operations. When a task enumerates items and \
             applies an operation to each, write one small Python program \
             that loops over the items and calls tools.call(name, **kwargs) \
             per item, then execute it with builtin.execute_python_code. Do \
             not split enumeration and processing.",
        )
        .with_loop_limit(5)
        .with_default_tools(vec![
            "builtin.execute_python_code".into(),
            "builtin.validate_file_path".into(),
        ])
        .with_allowed_categories(vec!["filesystem".into(), "code_execution".into()]),
        AgentDef::new(
            "coder",
            "You write and modify code. Keep changes minimal and idiomatic \
             for the surrounding codebase, and verify your work with the \
             available tools before finishing.",
        )
        .with_loop_limit(10)
        .with_allowed_categories(vec!["filesystem".into(), "code_execution".into()]),
        AgentDef::new(
            "reader",
            "You read and summarise documents. Quote paths and figures \
             exactly as they appear in the source material.",
        )
        .with_loop_limit(5)
        .with_allowed_categories(vec!["filesystem".into(), "documents".into()]),
        AgentDef::new(
            "debugger",
            "You diagnose failures. Reproduce the problem with the available \
             tools, narrow the cause, and report the specific fix.",
        )
        .with_loop_limit(8)
        .with_allowed_categories(vec!["filesystem".into(), "code_execution".into()]),
        AgentDef::new(
            "researcher",
            "You research and analyse. Gather evidence with the available \
             tools and synthesise findings with citations. Style and \
             authorship analysis belongs to you, never to a character role.",
        )
        .with_loop_limit(6)
        .with_allowed_categories(vec!["search".into(), "documents".into()]),
        AgentDef::new(
            "aggregator",
            "You synthesise a final answer from the results of completed \
             tasks. Preserve citations, paths, and figures verbatim. Do not \
             invent content beyond the task results.",
        )
        .with_temperature(0.2)
        .with_loop_limit(1),
        AgentDef::new(
            "artifact_agent",
            "You produce structured artifacts. Your final answer must be a \
             single fenced block of the form ```artifact:<type> containing \
             the JSON payload, with no surrounding prose.",
        )
        .with_loop_limit(4)
        .with_default_tools(vec![
            "builtin.generate_form".into(),
            "builtin.generate_chart".into(),
            "builtin.generate_spreadsheet".into(),
        ]),
        AgentDef::new(
            "tool_form_agent",
            "You build input forms for specific tools. Inspect the tool's \
             schema, then emit a ```artifact:toolform block whose fields \
             mirror the tool's parameters exactly.",
        )
        .with_loop_limit(4)
        .with_default_tools(vec!["builtin.generate_form".into()]),
        AgentDef::new(
            "critic",
            "You review completed work against its task description and \
             expected output. Verdict first, then the specific gaps.",
        )
        .with_temperature(0.1)
        .with_loop_limit(1),
        AgentDef::new(
            "memory_executor",
            "You maintain project memory. Use only the memory tools, honour \
             ids supplied in the task description, and never invent goals or \
             progress the user did not state.",
        )
        .with_loop_limit(4)
        .with_default_tools(vec![
            "memory.add_goal".into(),
            "memory.add_feature".into(),
            "memory.update_feature_status".into(),
            "memory.log_progress".into(),
            "memory.get_memory_state".into(),
        ]),
        AgentDef::new(
            "ghost_writer",
            "You draft prose in the voice the task describes. Match tone and \
             register; keep facts from the task description intact.",
        )
        .with_temperature(0.9)
        .with_loop_limit(3),
    ]
}
