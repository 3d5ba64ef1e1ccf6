//! Domain memory port.
//!
//! Memory is an out-of-band append-only store. The engine reads a
//! snapshot for prompt context and appends progress entries through
//! explicit tool calls only; it never writes memory implicitly.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;

use crate::domain::errors::DelegationResult;

/// A goal tracked in domain memory.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MemoryGoal {
    pub id: String,
    pub text: String,
}

/// A feature tracked in domain memory with a free-form status.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MemoryFeature {
    pub id: String,
    pub text: String,
    pub status: String,
}

/// One progress log entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProgressEntry {
    pub id: String,
    pub text: String,
    pub timestamp: DateTime<Utc>,
}

impl ProgressEntry {
    pub fn new(id: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            text: text.into(),
            timestamp: Utc::now(),
        }
    }
}

/// Read-only view of memory included in prompt context.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MemorySnapshot {
    pub goals: Vec<MemoryGoal>,
    pub features: Vec<MemoryFeature>,
    pub recent_progress: Vec<ProgressEntry>,
}

impl MemorySnapshot {
    pub fn is_empty(&self) -> bool {
        self.goals.is_empty() && self.features.is_empty() && self.recent_progress.is_empty()
    }

    /// Render as a markdown section for the system prompt.
    pub fn format_for_prompt(&self) -> String {
        if self.is_empty() {
            return String::new();
        }
        let mut out = String::from("\n\n## Project Memory\n\n");
        if !self.goals.is_empty() {
            out.push_str("**Goals:**\n");
            for goal in &self.goals {
                out.push_str(&format!("- [{}] {}\n", goal.id, goal.text));
            }
        }
        if !self.features.is_empty() {
            out.push_str("\n**Features:**\n");
            for feature in &self.features {
                out.push_str(&format!("- [{}] {} ({})\n", feature.id, feature.text, feature.status));
            }
        }
        if !self.recent_progress.is_empty() {
            out.push_str("\n**Recent progress:**\n");
            for entry in &self.recent_progress {
                out.push_str(&format!("- {}\n", entry.text));
            }
        }
        out
    }
}

/// Port trait for the domain memory store.
///
/// All mutations honour caller-supplied ids so retried tool calls stay
/// idempotent.
#[async_trait]
pub trait MemoryStore: Send + Sync {
    async fn snapshot(&self) -> MemorySnapshot;

    async fn add_goal(&self, id: &str, text: &str) -> DelegationResult<()>;

    async fn add_feature(&self, id: &str, text: &str) -> DelegationResult<()>;

    async fn update_feature_status(&self, id: &str, status: &str) -> DelegationResult<()>;

    async fn log_progress(&self, entry: ProgressEntry) -> DelegationResult<()>;
}

/// A no-op memory store for sessions that do not use domain memory.
#[derive(Debug, Clone, Default)]
pub struct NullMemoryStore;

impl NullMemoryStore {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl MemoryStore for NullMemoryStore {
    async fn snapshot(&self) -> MemorySnapshot {
        MemorySnapshot::default()
    }

    async fn add_goal(&self, _id: &str, _text: &str) -> DelegationResult<()> {
        Ok(())
    }

    async fn add_feature(&self, _id: &str, _text: &str) -> DelegationResult<()> {
        Ok(())
    }

    async fn update_feature_status(&self, _id: &str, _status: &str) -> DelegationResult<()> {
        Ok(())
    }

    async fn log_progress(&self, _entry: ProgressEntry) -> DelegationResult<()> {
        Ok(())
    }
}

/// In-process memory store backing the builtin memory tools and tests.
#[derive(Debug, Default)]
pub struct InMemoryStore {
    state: RwLock<MemorySnapshot>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl MemoryStore for InMemoryStore {
    async fn snapshot(&self) -> MemorySnapshot {
        self.state.read().await.clone()
    }

    async fn add_goal(&self, id: &str, text: &str) -> DelegationResult<()> {
        let mut state = self.state.write().await;
        if !state.goals.iter().any(|g| g.id == id) {
            state.goals.push(MemoryGoal { id: id.to_string(), text: text.to_string() });
        }
        Ok(())
    }

    async fn add_feature(&self, id: &str, text: &str) -> DelegationResult<()> {
        let mut state = self.state.write().await;
        if !state.features.iter().any(|f| f.id == id) {
            state.features.push(MemoryFeature {
                id: id.to_string(),
                text: text.to_string(),
                status: "planned".to_string(),
            });
        }
        Ok(())
    }

    async fn update_feature_status(&self, id: &str, status: &str) -> DelegationResult<()> {
        let mut state = self.state.write().await;
        if let Some(feature) = state.features.iter_mut().find(|f| f.id == id) {
            feature.status = status.to_string();
        }
        Ok(())
    }

    async fn log_progress(&self, entry: ProgressEntry) -> DelegationResult<()> {
        let mut state = self.state.write().await;
        state.recent_progress.push(entry);
        Ok(())
    }
}
