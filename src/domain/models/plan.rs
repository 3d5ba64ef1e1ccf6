//! Plan model and dependency-graph utilities.
//!
//! A plan is an ordered list of tasks forming a DAG keyed by task id.
//! Graph utilities (cycle detection, ready sets, waves) drive both the
//! validator and the scheduler.

use std::collections::{HashMap, HashSet, VecDeque};

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::task::{Task, TaskStatus};

/// Wire format of the planner's output (spec'd plan JSON).
#[derive(Debug, Clone, Deserialize)]
pub struct PlanDraft {
    pub tasks: Vec<TaskDraft>,
}

/// One task as emitted by the planner model.
#[derive(Debug, Clone, Deserialize)]
pub struct TaskDraft {
    pub id: String,
    pub description: String,
    pub agent_type: String,
    #[serde(default)]
    pub dependencies: Vec<String>,
    #[serde(default)]
    pub expected_output: String,
}

impl PlanDraft {
    /// Materialise the draft into a [`Plan`] for the given query.
    pub fn into_plan(self, query: impl Into<String>, attempt: u32) -> Plan {
        let tasks = self
            .tasks
            .into_iter()
            .map(|draft| {
                let mut task = Task::new(draft.id, draft.agent_type, draft.description)
                    .with_expected_output(draft.expected_output);
                task.dependencies = draft.dependencies;
                task
            })
            .collect();
        Plan::with_attempt(query, tasks, attempt)
    }
}

/// A validated-or-not DAG of tasks produced by the planner for one query.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Plan {
    pub id: Uuid,
    /// The originating user query.
    pub query: String,
    /// Generation attempt (0-based; bumped on validator-driven retries).
    pub attempt: u32,
    pub tasks: Vec<Task>,
}

impl Plan {
    pub fn new(query: impl Into<String>, tasks: Vec<Task>) -> Self {
        Self::with_attempt(query, tasks, 0)
    }

    pub fn with_attempt(query: impl Into<String>, tasks: Vec<Task>, attempt: u32) -> Self {
        Self {
            id: Uuid::new_v4(),
            query: query.into(),
            attempt,
            tasks,
        }
    }

    pub fn task(&self, id: &str) -> Option<&Task> {
        self.tasks.iter().find(|t| t.id == id)
    }

    pub fn task_mut(&mut self, id: &str) -> Option<&mut Task> {
        self.tasks.iter_mut().find(|t| t.id == id)
    }

    /// Task ids appearing more than once.
    pub fn duplicate_ids(&self) -> Vec<String> {
        let mut seen = HashSet::new();
        let mut dupes = Vec::new();
        for task in &self.tasks {
            if !seen.insert(task.id.as_str()) && !dupes.contains(&task.id) {
                dupes.push(task.id.clone());
            }
        }
        dupes
    }

    /// `(task, missing dependency)` pairs for dependencies that reference
    /// no task in this plan.
    pub fn missing_dependencies(&self) -> Vec<(String, String)> {
        let ids: HashSet<&str> = self.tasks.iter().map(|t| t.id.as_str()).collect();
        let mut missing = Vec::new();
        for task in &self.tasks {
            for dep in &task.dependencies {
                if !ids.contains(dep.as_str()) {
                    missing.push((task.id.clone(), dep.clone()));
                }
            }
        }
        missing
    }

    /// Cycle detection over the dependency edges (DFS with a rec stack).
    pub fn has_cycle(&self) -> bool {
        let deps: HashMap<&str, &Vec<String>> =
            self.tasks.iter().map(|t| (t.id.as_str(), &t.dependencies)).collect();

        fn visit<'a>(
            id: &'a str,
            deps: &HashMap<&'a str, &'a Vec<String>>,
            visited: &mut HashSet<&'a str>,
            stack: &mut HashSet<&'a str>,
        ) -> bool {
            if stack.contains(id) {
                return true;
            }
            if !visited.insert(id) {
                return false;
            }
            stack.insert(id);
            if let Some(children) = deps.get(id) {
                for dep in children.iter() {
                    if deps.contains_key(dep.as_str())
                        && visit(dep.as_str(), deps, visited, stack)
                    {
                        return true;
                    }
                }
            }
            stack.remove(id);
            false
        }

        let mut visited = HashSet::new();
        for task in &self.tasks {
            let mut stack = HashSet::new();
            if visit(task.id.as_str(), &deps, &mut visited, &mut stack) {
                return true;
            }
        }
        false
    }

    /// Tasks whose dependencies are all completed and which have not yet
    /// reached a terminal or running state.
    pub fn ready_tasks(&self, completed: &HashSet<String>) -> Vec<String> {
        self.tasks
            .iter()
            .filter(|t| t.status == TaskStatus::Pending)
            .filter(|t| t.dependencies.iter().all(|d| completed.contains(d)))
            .map(|t| t.id.clone())
            .collect()
    }

    /// Group task ids into waves: each wave may run concurrently once the
    /// previous waves are done. Fails on cycles.
    pub fn execution_waves(&self) -> Option<Vec<Vec<String>>> {
        if self.has_cycle() {
            return None;
        }
        let ids: HashSet<&str> = self.tasks.iter().map(|t| t.id.as_str()).collect();
        let mut remaining: Vec<&Task> = self.tasks.iter().collect();
        let mut done: HashSet<&str> = HashSet::new();
        let mut waves = Vec::new();

        while !remaining.is_empty() {
            let (wave, rest): (Vec<&Task>, Vec<&Task>) = remaining.into_iter().partition(|t| {
                t.dependencies
                    .iter()
                    .all(|d| done.contains(d.as_str()) || !ids.contains(d.as_str()))
            });
            if wave.is_empty() {
                return None;
            }
            for task in &wave {
                done.insert(task.id.as_str());
            }
            waves.push(wave.into_iter().map(|t| t.id.clone()).collect());
            remaining = rest;
        }
        Some(waves)
    }

    /// All tasks that transitively depend on `id`.
    pub fn dependents_of(&self, id: &str) -> HashSet<String> {
        let mut result = HashSet::new();
        let mut queue: VecDeque<&str> = VecDeque::new();
        queue.push_back(id);
        while let Some(current) = queue.pop_front() {
            for task in &self.tasks {
                if task.dependencies.iter().any(|d| d == current) && result.insert(task.id.clone())
                {
                    queue.push_back(task.id.as_str());
                }
            }
        }
        result
    }

    /// Count of tasks per terminal/non-terminal status.
    pub fn status_counts(&self) -> HashMap<TaskStatus, usize> {
        let mut counts = HashMap::new();
        for task in &self.tasks {
            *counts.entry(task.status).or_insert(0) += 1;
        }
        counts
    }
}
