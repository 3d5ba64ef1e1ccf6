//! Task domain model.
//!
//! A task is one unit of delegated work inside a plan. Tasks are created
//! by the planner, owned by the scheduler, and executed once to a
//! terminal state. Execution state never survives the plan.

use serde::{Deserialize, Serialize};

use super::tool::{contains_artifact_block, ToolCallRecord};

/// Status of a task in the delegation pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    /// Defined, dependencies not yet satisfied or not yet picked up.
    Pending,
    /// Currently being executed by an agent.
    Running,
    /// Finished with a usable result.
    Completed,
    /// Exhausted attempts (and escalation, when enabled).
    Failed,
    /// Never ran because a dependency failed or the plan was cancelled.
    Skipped,
}

impl Default for TaskStatus {
    fn default() -> Self {
        Self::Pending
    }
}

impl TaskStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Skipped => "skipped",
        }
    }

    #[allow(clippy::should_implement_trait)]
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "pending" => Some(Self::Pending),
            "running" => Some(Self::Running),
            "completed" | "complete" => Some(Self::Completed),
            "failed" => Some(Self::Failed),
            "skipped" => Some(Self::Skipped),
            _ => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Skipped)
    }

    /// Valid transitions from this status.
    pub fn valid_transitions(&self) -> &'static [TaskStatus] {
        match self {
            Self::Pending => &[Self::Running, Self::Skipped],
            Self::Running => &[Self::Completed, Self::Failed],
            Self::Completed | Self::Failed | Self::Skipped => &[],
        }
    }

    pub fn can_transition_to(&self, new_status: Self) -> bool {
        self.valid_transitions().contains(&new_status)
    }
}

/// A discrete unit of work executed by one role-specialised agent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    /// Stable within the plan, e.g. `task_1`.
    pub id: String,
    /// Role from the agent catalogue.
    pub agent_type: String,
    /// Self-contained description carrying every literal value the
    /// executor needs (absolute paths, ids, parameters).
    pub description: String,
    /// Ids of tasks that must complete first.
    #[serde(default)]
    pub dependencies: Vec<String>,
    #[serde(default)]
    pub expected_output: String,
    #[serde(default)]
    pub status: TaskStatus,
    /// Final result text or artifact block.
    #[serde(default)]
    pub result: Option<String>,
    #[serde(default)]
    pub error: Option<String>,
    /// Model-level attempts consumed (ladder rungs tried).
    #[serde(default)]
    pub attempts: u32,
    #[serde(default)]
    pub duration_ms: u64,
    #[serde(default)]
    pub model_used: Option<String>,
    /// Agent loop iterations consumed on the successful attempt.
    #[serde(default)]
    pub loop_iterations: u32,
    /// Journal of every tool call made while executing this task.
    #[serde(default)]
    pub tool_calls: Vec<ToolCallRecord>,
}

impl Task {
    pub fn new(
        id: impl Into<String>,
        agent_type: impl Into<String>,
        description: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            agent_type: agent_type.into().to_lowercase(),
            description: description.into(),
            dependencies: Vec::new(),
            expected_output: String::new(),
            status: TaskStatus::default(),
            result: None,
            error: None,
            attempts: 0,
            duration_ms: 0,
            model_used: None,
            loop_iterations: 0,
            tool_calls: Vec::new(),
        }
    }

    pub fn with_dependency(mut self, id: impl Into<String>) -> Self {
        let id = id.into();
        if id != self.id && !self.dependencies.contains(&id) {
            self.dependencies.push(id);
        }
        self
    }

    pub fn with_expected_output(mut self, expected: impl Into<String>) -> Self {
        self.expected_output = expected.into();
        self
    }

    /// Transition to a new status, enforcing the state machine.
    pub fn transition_to(&mut self, new_status: TaskStatus) -> Result<(), String> {
        if !self.status.can_transition_to(new_status) {
            return Err(format!(
                "Cannot transition task '{}' from {} to {}",
                self.id,
                self.status.as_str(),
                new_status.as_str()
            ));
        }
        self.status = new_status;
        Ok(())
    }

    /// Mark completed with a result.
    pub fn complete(&mut self, result: String) -> Result<(), String> {
        self.transition_to(TaskStatus::Completed)?;
        self.result = Some(result);
        self.error = None;
        Ok(())
    }

    /// Mark failed with an error message.
    pub fn fail(&mut self, error: impl Into<String>) -> Result<(), String> {
        self.transition_to(TaskStatus::Failed)?;
        self.error = Some(error.into());
        Ok(())
    }

    /// Mark skipped (dependency failure or cancellation); valid only
    /// before the task started running.
    pub fn skip(&mut self, reason: impl Into<String>) -> Result<(), String> {
        self.transition_to(TaskStatus::Skipped)?;
        self.error = Some(reason.into());
        Ok(())
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// Whether the result carries an artifact block.
    pub fn has_artifact_result(&self) -> bool {
        self.result.as_deref().is_some_and(contains_artifact_block)
    }

    /// Basic structural validation.
    pub fn validate(&self) -> Result<(), String> {
        if self.id.trim().is_empty() {
            return Err("Task id cannot be empty".to_string());
        }
        if self.description.trim().is_empty() {
            return Err(format!("Task '{}' has an empty description", self.id));
        }
        if self.dependencies.contains(&self.id) {
            return Err(format!("Task '{}' depends on itself", self.id));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::models::tool::artifact_block;
    use serde_json::json;

    #[test]
    fn test_task_lifecycle() {
        let mut task = Task::new("task_1", "EXECUTOR", "List files in /home/user/docs");
        assert_eq!(task.agent_type, "executor");
        assert_eq!(task.status, TaskStatus::Pending);

        task.transition_to(TaskStatus::Running).unwrap();
        task.complete("12 files found".to_string()).unwrap();
        assert!(task.is_terminal());
        assert_eq!(task.result.as_deref(), Some("12 files found"));
    }

    #[test]
    fn test_invalid_transitions() {
        let mut task = Task::new("task_1", "executor", "do something");
        // Pending -> Completed must go through Running
        assert!(task.transition_to(TaskStatus::Completed).is_err());

        task.transition_to(TaskStatus::Running).unwrap();
        assert!(task.transition_to(TaskStatus::Skipped).is_err());

        task.fail("model exhausted").unwrap();
        // Terminal states accept nothing further
        assert!(task.transition_to(TaskStatus::Running).is_err());
    }

    #[test]
    fn test_skip_from_pending() {
        let mut task = Task::new("task_2", "executor", "dependent work");
        task.skip("dependency task_1 failed").unwrap();
        assert_eq!(task.status, TaskStatus::Skipped);
        assert!(task.error.as_deref().unwrap().contains("task_1"));
    }

    #[test]
    fn test_artifact_result_detection() {
        let mut task = Task::new("task_1", "artifact_agent", "create a form");
        task.transition_to(TaskStatus::Running).unwrap();
        task.complete(artifact_block("form", &json!({"title": "Contact"}))).unwrap();
        assert!(task.has_artifact_result());
    }

    #[test]
    fn test_self_dependency_rejected() {
        let task = Task::new("task_1", "executor", "loop").with_dependency("task_1");
        assert!(task.dependencies.is_empty());

        let mut task = Task::new("task_1", "executor", "loop");
        task.dependencies.push("task_1".to_string());
        assert!(task.validate().is_err());
    }

    #[test]
    fn test_status_roundtrip() {
        for status in [
            TaskStatus::Pending,
            TaskStatus::Running,
            TaskStatus::Completed,
            TaskStatus::Failed,
            TaskStatus::Skipped,
        ] {
            assert_eq!(TaskStatus::from_str(status.as_str()), Some(status));
        }
        assert_eq!(TaskStatus::from_str("unknown"), None);
    }
}
