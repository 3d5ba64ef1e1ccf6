//! Plan validation: reject bad plans before any task runs.
//!
//! Pure checks over a [`Plan`]; the planner re-runs with the error text
//! inlined into its prompt. Ordering matters: structural problems are
//! reported before content anti-patterns so the retry prompt fixes the
//! most fundamental issue first.

use std::collections::HashSet;

use crate::domain::errors::{ValidationError, ValidationErrorKind};
use crate::domain::models::{Plan, Task};

/// Placeholder fragments that must never appear in a task description.
const PLACEHOLDER_BLOCKLIST: &[&str] = &[
    "/path/to/",
    "/absolute/path/to/",
    "example.pdf",
    "<placeholder>",
];

/// Verbs that indicate an enumeration step.
const ENUMERATION_VERBS: &[&str] = &["list", "get", "find"];

/// Nouns that indicate the enumeration targets files.
const FILE_NOUNS: &[&str] = &["file", "files", "document", "documents", "pdf", "pdfs"];

/// Pronouns that indicate a per-item step without concrete items.
const EACH_WORDS: &[&str] = &["each", "every", "all"];

/// Memory tool names whose presence marks a task as a memory update.
const MEMORY_TOOL_MARKERS: &[&str] = &[
    "add_goal",
    "add_feature",
    "update_feature_status",
    "log_progress",
];

/// Validator over the role set of the active catalogue.
#[derive(Debug, Clone)]
pub struct PlanValidator {
    roles: HashSet<String>,
}

impl PlanValidator {
    pub fn new(roles: impl IntoIterator<Item = String>) -> Self {
        Self {
            roles: roles.into_iter().map(|r| r.to_lowercase()).collect(),
        }
    }

    /// Validate a plan. Returns the first violation found.
    pub fn validate(&self, plan: &Plan) -> Result<(), ValidationError> {
        self.check_structure(plan)?;
        self.check_roles(plan)?;
        check_placeholders(plan)?;
        check_undefined_parameters(plan)?;
        check_split_antipattern(plan)?;
        check_memory_tasks(plan)?;
        Ok(())
    }

    fn check_structure(&self, plan: &Plan) -> Result<(), ValidationError> {
        if plan.tasks.is_empty() {
            return Err(ValidationError::new(
                ValidationErrorKind::AggregateInvalid,
                "Plan contains no tasks",
                plan.query.clone(),
            ));
        }

        if let Some(dup) = plan.duplicate_ids().first() {
            return Err(ValidationError::new(
                ValidationErrorKind::AggregateInvalid,
                format!("Duplicate task id '{dup}'"),
                dup.clone(),
            ));
        }

        for task in &plan.tasks {
            if let Err(e) = task.validate() {
                return Err(ValidationError::new(
                    ValidationErrorKind::AggregateInvalid,
                    e,
                    task.id.clone(),
                ));
            }
        }

        if let Some((task, dep)) = plan.missing_dependencies().first() {
            return Err(ValidationError::new(
                ValidationErrorKind::CyclicDependency,
                format!("Task '{task}' depends on '{dep}', which does not exist in the plan"),
                dep.clone(),
            ));
        }

        // No task may depend on a later-indexed task.
        for (idx, task) in plan.tasks.iter().enumerate() {
            for dep in &task.dependencies {
                let dep_idx = plan.tasks.iter().position(|t| &t.id == dep);
                if dep_idx.is_some_and(|d| d >= idx) {
                    return Err(ValidationError::new(
                        ValidationErrorKind::CyclicDependency,
                        format!("Task '{}' depends on later task '{dep}'", task.id),
                        task.id.clone(),
                    ));
                }
            }
        }

        if plan.has_cycle() {
            return Err(ValidationError::new(
                ValidationErrorKind::CyclicDependency,
                "Dependency graph contains a cycle",
                String::new(),
            ));
        }

        Ok(())
    }

    fn check_roles(&self, plan: &Plan) -> Result<(), ValidationError> {
        for task in &plan.tasks {
            if !self.roles.contains(&task.agent_type) {
                return Err(ValidationError::new(
                    ValidationErrorKind::UnknownRole,
                    format!("Task '{}' is assigned to unknown role '{}'", task.id, task.agent_type),
                    task.agent_type.clone(),
                ));
            }
        }
        Ok(())
    }
}

/// Placeholder paths are always a planning failure; the retry must
/// resolve them against the real cwd.
fn check_placeholders(plan: &Plan) -> Result<(), ValidationError> {
    for task in &plan.tasks {
        for marker in PLACEHOLDER_BLOCKLIST {
            if task.description.contains(marker) {
                return Err(ValidationError::new(
                    ValidationErrorKind::PlaceholderPath,
                    format!(
                        "Task '{}' contains the placeholder '{marker}'. Replace it with the \
                         real absolute path derived from the working directory.",
                        task.id
                    ),
                    (*marker).to_string(),
                ));
            }
        }
    }
    Ok(())
}

/// Detect `tool_name(param_name)` tokens where the parameter is a bare
/// identifier with no bound value.
fn check_undefined_parameters(plan: &Plan) -> Result<(), ValidationError> {
    for task in &plan.tasks {
        if let Some(token) = find_unbound_call(&task.description) {
            return Err(ValidationError::new(
                ValidationErrorKind::UndefinedParameter,
                format!(
                    "Task '{}' references '{token}' with an unbound parameter. Supply the \
                     literal value, e.g. tool(name=\"value\").",
                    task.id
                ),
                token,
            ));
        }
    }
    Ok(())
}

fn find_unbound_call(text: &str) -> Option<String> {
    let bytes = text.as_bytes();
    let mut i = 0;
    while let Some(open_rel) = text[i..].find('(') {
        let open = i + open_rel;
        // Walk back over the call name.
        let name_start = text[..open]
            .rfind(|c: char| !(c.is_ascii_alphanumeric() || c == '_' || c == '.'))
            .map_or(0, |p| p + 1);
        let name = &text[name_start..open];
        let close = match text[open..].find(')') {
            Some(rel) => open + rel,
            None => return None,
        };
        let inner = text[open + 1..close].trim();

        let name_is_toolish = !name.is_empty()
            && name.chars().next().is_some_and(|c| c.is_ascii_alphabetic() || c == '_')
            && (name.contains('_') || name.contains('.'));
        let inner_is_bare_identifier = !inner.is_empty()
            && inner.chars().all(|c| c.is_ascii_alphanumeric() || c == '_')
            && inner.chars().next().is_some_and(|c| c.is_ascii_alphabetic() || c == '_')
            && !inner.contains('=');

        if name_is_toolish && inner_is_bare_identifier {
            return Some(format!("{name}({inner})"));
        }
        i = close + 1;
        if i >= bytes.len() {
            break;
        }
    }
    None
}

/// Detect the "enumerate, then process each" split across tasks when the
/// item set is only discoverable at runtime.
fn check_split_antipattern(plan: &Plan) -> Result<(), ValidationError> {
    for (i, first) in plan.tasks.iter().enumerate() {
        if !is_enumeration_task(first) {
            continue;
        }
        for second in plan.tasks.iter().skip(i + 1) {
            let related =
                second.dependencies.contains(&first.id) || adjacent(plan, &first.id, &second.id);
            if !related {
                continue;
            }
            let lower = second.description.to_lowercase();
            let has_each = EACH_WORDS.iter().any(|w| contains_word(&lower, w));
            if has_each && !has_absolute_path(&second.description)
                && !has_concrete_filename(&second.description)
            {
                return Err(ValidationError::new(
                    ValidationErrorKind::PlanAntipattern,
                    format!(
                        "Tasks '{}' and '{}' split enumeration and per-item processing, but \
                         the items are only known at runtime. Merge them into a single \
                         SHELL_EXECUTOR task whose description contains inline Python that \
                         enumerates the items and calls tools.call(...) for each one.",
                        first.id, second.id
                    ),
                    format!("{} -> {}", first.id, second.id),
                ));
            }
        }
    }
    Ok(())
}

fn adjacent(plan: &Plan, first_id: &str, second_id: &str) -> bool {
    let first = plan.tasks.iter().position(|t| t.id == first_id);
    let second = plan.tasks.iter().position(|t| t.id == second_id);
    matches!((first, second), (Some(a), Some(b)) if b == a + 1)
}

fn is_enumeration_task(task: &Task) -> bool {
    let lower = task.description.to_lowercase();
    let has_verb = ENUMERATION_VERBS.iter().any(|v| contains_word(&lower, v));
    let has_noun = FILE_NOUNS.iter().any(|n| contains_word(&lower, n));
    has_verb && has_noun
}

/// Memory-update tasks are only allowed when the user explicitly asked
/// for them.
fn check_memory_tasks(plan: &Plan) -> Result<(), ValidationError> {
    let query = plan.query.to_lowercase();
    let user_asked = query.contains("update memory")
        || query.contains("log progress")
        || query.contains("run tests")
        || (query.contains("mark") && query.contains("complete"));
    if user_asked {
        return Ok(());
    }

    for task in &plan.tasks {
        let lower = task.description.to_lowercase();
        let is_memory_task = task.agent_type == "memory_executor"
            || MEMORY_TOOL_MARKERS.iter().any(|m| lower.contains(m));
        if is_memory_task {
            return Err(ValidationError::new(
                ValidationErrorKind::ExcessMemoryTasks,
                format!(
                    "Task '{}' updates memory but the user did not ask for a memory update. \
                     Remove it and keep only the tasks the user requested.",
                    task.id
                ),
                task.id.clone(),
            ));
        }
    }
    Ok(())
}

/// Word-boundary containment (substring match bounded by non-word chars).
fn contains_word(haystack: &str, word: &str) -> bool {
    let mut start = 0;
    while let Some(rel) = haystack[start..].find(word) {
        let pos = start + rel;
        let before_ok = pos == 0
            || !haystack[..pos]
                .chars()
                .next_back()
                .is_some_and(|c| c.is_ascii_alphanumeric() || c == '_');
        let after = pos + word.len();
        let after_ok = after >= haystack.len()
            || !haystack[after..]
                .chars()
                .next()
                .is_some_and(|c| c.is_ascii_alphanumeric() || c == '_');
        if before_ok && after_ok {
            return true;
        }
        start = pos + word.len();
    }
    false
}

/// Whether the text contains an absolute filesystem path.
pub fn has_absolute_path(text: &str) -> bool {
    for (idx, _) in text.match_indices('/') {
        let at_start = idx == 0
            || text[..idx]
                .chars()
                .next_back()
                .is_some_and(|c| c.is_whitespace() || c == '"' || c == '\'' || c == '(' || c == '`');
        if at_start {
            // Require at least one path character after the slash.
            if text[idx + 1..]
                .chars()
                .next()
                .is_some_and(|c| c.is_ascii_alphanumeric() || c == '_' || c == '.')
            {
                return true;
            }
        }
    }
    false
}

/// Whether the text names a concrete file (word with an extension).
pub fn has_concrete_filename(text: &str) -> bool {
    for word in text.split(|c: char| c.is_whitespace() || c == ',' || c == ';') {
        let word = word.trim_matches(|c: char| !(c.is_ascii_alphanumeric() || c == '.' || c == '_'));
        if let Some((stem, ext)) = word.rsplit_once('.') {
            let ext_ok = (1..=5).contains(&ext.len()) && ext.chars().all(|c| c.is_ascii_alphanumeric());
            if !stem.is_empty() && ext_ok && ext.chars().any(|c| c.is_ascii_alphabetic()) {
                return true;
            }
        }
    }
    false
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::catalogue::AgentCatalogue;

    fn validator() -> PlanValidator {
        PlanValidator::new(AgentCatalogue::builtin().role_names())
    }

    fn plan(query: &str, tasks: Vec<Task>) -> Plan {
        Plan::new(query, tasks)
    }

    #[test]
    fn test_valid_single_task_plan() {
        let p = plan(
            "summarise the report",
            vec![Task::new("task_1", "reader", "Summarise /home/u/report.pdf in 5 bullet points")],
        );
        assert!(validator().validate(&p).is_ok());
    }

    #[test]
    fn test_unknown_role_rejected() {
        let p = plan("x", vec![Task::new("task_1", "wizard", "Do magic on /tmp/a")]);
        let err = validator().validate(&p).unwrap_err();
        assert_eq!(err.kind, ValidationErrorKind::UnknownRole);
    }

    #[test]
    fn test_empty_plan_rejected() {
        let err = validator().validate(&plan("x", vec![])).unwrap_err();
        assert_eq!(err.kind, ValidationErrorKind::AggregateInvalid);
    }

    #[test]
    fn test_duplicate_ids_rejected() {
        let p = plan(
            "x",
            vec![
                Task::new("task_1", "executor", "Read /tmp/a"),
                Task::new("task_1", "executor", "Read /tmp/b"),
            ],
        );
        let err = validator().validate(&p).unwrap_err();
        assert_eq!(err.kind, ValidationErrorKind::AggregateInvalid);
    }

    #[test]
    fn test_missing_dependency_rejected() {
        let p = plan(
            "x",
            vec![Task::new("task_1", "executor", "Read /tmp/a").with_dependency("task_9")],
        );
        let err = validator().validate(&p).unwrap_err();
        assert_eq!(err.kind, ValidationErrorKind::CyclicDependency);
    }

    #[test]
    fn test_forward_dependency_rejected() {
        let p = plan(
            "x",
            vec![
                Task::new("task_1", "executor", "Read /tmp/a").with_dependency("task_2"),
                Task::new("task_2", "executor", "Read /tmp/b"),
            ],
        );
        let err = validator().validate(&p).unwrap_err();
        assert_eq!(err.kind, ValidationErrorKind::CyclicDependency);
    }

    #[test]
    fn test_placeholder_rejected() {
        let p = plan(
            "import the pdf",
            vec![Task::new("task_1", "file_executor", "Import /path/to/file.pdf into the index")],
        );
        let err = validator().validate(&p).unwrap_err();
        assert_eq!(err.kind, ValidationErrorKind::PlaceholderPath);
        assert_eq!(err.evidence, "/path/to/");
    }

    #[test]
    fn test_example_pdf_placeholder_rejected() {
        let p = plan(
            "import",
            vec![Task::new("task_1", "file_executor", "Process /home/u/example.pdf")],
        );
        let err = validator().validate(&p).unwrap_err();
        assert_eq!(err.kind, ValidationErrorKind::PlaceholderPath);
    }

    #[test]
    fn test_undefined_parameter_rejected() {
        let p = plan(
            "x",
            vec![Task::new(
                "task_1",
                "file_executor",
                "Call validate_file_path(file_path) before reading /home/u/a.txt",
            )],
        );
        let err = validator().validate(&p).unwrap_err();
        assert_eq!(err.kind, ValidationErrorKind::UndefinedParameter);
        assert!(err.evidence.contains("validate_file_path(file_path)"));
    }

    #[test]
    fn test_bound_parameters_accepted() {
        let p = plan(
            "x",
            vec![Task::new(
                "task_1",
                "file_executor",
                "Call validate_file_path(path=\"/home/u/a.txt\") then read the locked path",
            )],
        );
        assert!(validator().validate(&p).is_ok());
    }

    #[test]
    fn test_split_antipattern_rejected() {
        let p = plan(
            "get the pdf files from Daily/January and process each",
            vec![
                Task::new("task_1", "executor", "List the pdf files in /u/p/Daily/January"),
                Task::new("task_2", "file_executor", "Process each document found in the previous step")
                    .with_dependency("task_1"),
            ],
        );
        let err = validator().validate(&p).unwrap_err();
        assert_eq!(err.kind, ValidationErrorKind::PlanAntipattern);
        assert!(err.message.contains("SHELL_EXECUTOR"));
        assert!(err.message.contains("tools.call"));
    }

    #[test]
    fn test_per_item_tasks_with_concrete_paths_accepted() {
        let p = plan(
            "process a.pdf and b.pdf",
            vec![
                Task::new("task_1", "executor", "List the pdf files in /u/p/Daily/January"),
                Task::new("task_2", "file_executor", "Process /u/p/Daily/January/a.pdf")
                    .with_dependency("task_1"),
            ],
        );
        assert!(validator().validate(&p).is_ok());
    }

    #[test]
    fn test_single_batch_task_accepted() {
        let p = plan(
            "get the pdf files and process each",
            vec![Task::new(
                "task_1",
                "shell_executor",
                "Run this Python program: files = tools.call(\"fs.list_files\", \
                 dir=\"/u/p/Daily/January\", pattern=\"*.pdf\")\nfor f in files:\n    \
                 tools.call(\"pdf_extract.process_document\", path=f)",
            )],
        );
        assert!(validator().validate(&p).is_ok());
    }

    #[test]
    fn test_unsolicited_memory_task_rejected() {
        let p = plan(
            "import the January reports",
            vec![
                Task::new("task_1", "file_executor", "Import /u/p/jan.pdf"),
                Task::new("task_2", "memory_executor", "Call log_progress with id p1")
                    .with_dependency("task_1"),
            ],
        );
        let err = validator().validate(&p).unwrap_err();
        assert_eq!(err.kind, ValidationErrorKind::ExcessMemoryTasks);
    }

    #[test]
    fn test_requested_memory_update_accepted() {
        let p = plan(
            "import the reports and log progress when done",
            vec![
                Task::new("task_1", "file_executor", "Import /u/p/jan.pdf"),
                Task::new("task_2", "memory_executor", "Call log_progress with id p1 and text 'Imported jan.pdf'")
                    .with_dependency("task_1"),
            ],
        );
        assert!(validator().validate(&p).is_ok());
    }

    #[test]
    fn test_helpers() {
        assert!(has_absolute_path("Read /home/u/a.txt now"));
        assert!(!has_absolute_path("divide 3/4 and simplify"));
        assert!(has_concrete_filename("process report.pdf today"));
        assert!(!has_concrete_filename("process every document"));
        assert!(contains_word("list the files", "list"));
        assert!(!contains_word("enlist the troops", "list"));
    }
}
