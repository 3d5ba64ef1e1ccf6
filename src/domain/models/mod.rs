//! Domain models
//!
//! Pure domain entities with business logic and validation rules.
//! These models are framework-agnostic and contain no infrastructure
//! concerns.

pub mod agent;
pub mod chat;
pub mod config;
pub mod plan;
pub mod task;
pub mod tool;

pub use agent::{AgentDef, OutputFormat};
pub use chat::{ChatMessage, ChatRole, ModelResponse, TokenUsage, ToolCallRequest};
pub use config::{
    AgentOverride, Config, DelegationConfig, EscalationConfig, LoggingConfig, ModelPoolEntry,
    PlanConfig, TaskConfig, ToolsConfig, TraceLevel, ValidationConfig,
};
pub use plan::{Plan, PlanDraft, TaskDraft};
pub use task::{Task, TaskStatus};
pub use tool::{
    artifact_block, artifact_type, contains_artifact_block, extract_artifact_block,
    find_artifact_block, normalize_artifact_fences, ToolCallRecord, ToolDescriptor, ToolOutput,
    ToolSource,
};
