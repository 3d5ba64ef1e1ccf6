//! Configuration models.
//!
//! Serde-backed configuration tree merged hierarchically by the loader
//! (defaults → project yaml → local yaml → environment).

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// Trace verbosity for the per-plan JSONL trace.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TraceLevel {
    Off,
    Summary,
    Basic,
    Full,
    Debug,
}

impl Default for TraceLevel {
    fn default() -> Self {
        Self::Basic
    }
}

impl TraceLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Off => "off",
            Self::Summary => "summary",
            Self::Basic => "basic",
            Self::Full => "full",
            Self::Debug => "debug",
        }
    }

    #[allow(clippy::should_implement_trait)]
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "off" => Some(Self::Off),
            "summary" => Some(Self::Summary),
            "basic" => Some(Self::Basic),
            "full" => Some(Self::Full),
            "debug" => Some(Self::Debug),
            _ => None,
        }
    }

    /// Whether prompt/response payloads are recorded at all.
    pub fn records_payloads(&self) -> bool {
        matches!(self, Self::Basic | Self::Full | Self::Debug)
    }

    /// Whether payloads are truncated before recording.
    pub fn truncates_payloads(&self) -> bool {
        matches!(self, Self::Basic)
    }
}

/// One model endpoint in the routing pool.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelPoolEntry {
    /// Endpoint base URL (e.g. `http://localhost:11434`).
    pub url: String,
    /// Model tag served at this endpoint.
    pub model: String,
    #[serde(default = "default_max_concurrent")]
    pub max_concurrent: usize,
    /// Relative capability score; the fallback ladder is ordered by this,
    /// descending.
    #[serde(default = "default_capability")]
    pub capability: u32,
}

fn default_max_concurrent() -> usize {
    2
}

fn default_capability() -> u32 {
    50
}

/// Per-role overrides under `agents.<role>`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AgentOverride {
    /// Model tag to pin for this role on attempt 0.
    pub model: Option<String>,
}

/// Trace configuration under `delegation.*`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DelegationConfig {
    #[serde(default = "default_true")]
    pub trace_enabled: bool,
    #[serde(default)]
    pub trace_level: TraceLevel,
    #[serde(default = "default_trace_dir")]
    pub trace_dir: String,
    /// Max prompt/response length recorded at `basic` level.
    #[serde(default = "default_trace_truncate")]
    pub trace_truncate: usize,
}

fn default_true() -> bool {
    true
}

fn default_trace_dir() -> String {
    ".foreman/traces".to_string()
}

fn default_trace_truncate() -> usize {
    500
}

impl Default for DelegationConfig {
    fn default() -> Self {
        Self {
            trace_enabled: true,
            trace_level: TraceLevel::default(),
            trace_dir: default_trace_dir(),
            trace_truncate: default_trace_truncate(),
        }
    }
}

/// Escalation policy under `escalation.*`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EscalationConfig {
    #[serde(default)]
    pub enabled: bool,
    /// Local failures before escalation fires (≥ 1).
    #[serde(default = "default_escalation_threshold")]
    pub threshold: u32,
    /// Opaque provider tag (resolved by the binary wiring).
    #[serde(default = "default_escalation_provider")]
    pub provider: String,
    /// Rolling hourly spend budget in USD.
    #[serde(default = "default_budget_per_hour")]
    pub budget_per_hour: f64,
    /// Per-request output token cap.
    #[serde(default = "default_escalation_max_tokens")]
    pub max_tokens: u32,
}

fn default_escalation_threshold() -> u32 {
    1
}

fn default_escalation_provider() -> String {
    "anthropic".to_string()
}

fn default_budget_per_hour() -> f64 {
    5.0
}

fn default_escalation_max_tokens() -> u32 {
    4096
}

impl Default for EscalationConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            threshold: default_escalation_threshold(),
            provider: default_escalation_provider(),
            budget_per_hour: default_budget_per_hour(),
            max_tokens: default_escalation_max_tokens(),
        }
    }
}

/// Quality-validation policy under `validation.*`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidationConfig {
    #[serde(default)]
    pub enabled: bool,
    /// Roles whose completed results get a post-hoc critique.
    #[serde(default = "default_validate_roles")]
    pub validate_roles: Vec<String>,
    /// Critique-driven re-runs before giving up.
    #[serde(default = "default_qv_max_retries")]
    pub max_retries: u32,
}

fn default_validate_roles() -> Vec<String> {
    ["coder", "file_executor", "shell_executor", "planner"]
        .into_iter()
        .map(String::from)
        .collect()
}

fn default_qv_max_retries() -> u32 {
    3
}

impl Default for ValidationConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            validate_roles: default_validate_roles(),
            max_retries: default_qv_max_retries(),
        }
    }
}

/// Planner retry policy under `plan.*`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlanConfig {
    /// Validator-driven retries (total attempts = max_retries + 1).
    #[serde(default = "default_plan_max_retries")]
    pub max_retries: u32,
    /// JSON parse retries inside a single attempt.
    #[serde(default = "default_parse_retries")]
    pub parse_retries: u32,
}

fn default_plan_max_retries() -> u32 {
    2
}

fn default_parse_retries() -> u32 {
    2
}

impl Default for PlanConfig {
    fn default() -> Self {
        Self {
            max_retries: default_plan_max_retries(),
            parse_retries: default_parse_retries(),
        }
    }
}

/// Per-task execution limits under `task.*`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskConfig {
    /// Model-ladder attempts before escalation.
    #[serde(default = "default_task_max_attempts")]
    pub max_attempts: u32,
    /// Wall-clock timeout per task.
    #[serde(default = "default_wall_timeout_ms")]
    pub wall_timeout_ms: u64,
    /// Timeout per model call.
    #[serde(default = "default_model_timeout_ms")]
    pub model_timeout_ms: u64,
    /// Scheduler concurrency cap (also bounded by pool capacity).
    #[serde(default = "default_task_concurrency")]
    pub max_concurrency: usize,
}

fn default_task_max_attempts() -> u32 {
    2
}

fn default_wall_timeout_ms() -> u64 {
    300_000
}

fn default_model_timeout_ms() -> u64 {
    120_000
}

fn default_task_concurrency() -> usize {
    4
}

impl Default for TaskConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_task_max_attempts(),
            wall_timeout_ms: default_wall_timeout_ms(),
            model_timeout_ms: default_model_timeout_ms(),
            max_concurrency: default_task_concurrency(),
        }
    }
}

/// Tool surface configuration under `tools.*`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolsConfig {
    /// Categories granted to roles that declare none of their own.
    #[serde(default)]
    pub allowed_categories_default: Vec<String>,
    #[serde(default = "default_true")]
    pub enable_builtin: bool,
    /// Default per-call timeout.
    #[serde(default = "default_tool_timeout_secs")]
    pub call_timeout_secs: u64,
    /// Timeout for long-running tool categories.
    #[serde(default = "default_long_tool_timeout_secs")]
    pub long_call_timeout_secs: u64,
    /// Categories treated as long-running.
    #[serde(default = "default_long_running_categories")]
    pub long_running_categories: Vec<String>,
    /// Tool names disabled globally (removed from the snapshot).
    #[serde(default)]
    pub disabled_tools: Vec<String>,
}

fn default_tool_timeout_secs() -> u64 {
    60
}

fn default_long_tool_timeout_secs() -> u64 {
    600
}

fn default_long_running_categories() -> Vec<String> {
    vec!["code_execution".to_string(), "documents".to_string()]
}

impl Default for ToolsConfig {
    fn default() -> Self {
        Self {
            allowed_categories_default: Vec::new(),
            enable_builtin: true,
            call_timeout_secs: default_tool_timeout_secs(),
            long_call_timeout_secs: default_long_tool_timeout_secs(),
            long_running_categories: default_long_running_categories(),
            disabled_tools: Vec::new(),
        }
    }
}

/// Logging configuration (tracing subscriber, not the delegation trace).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
    /// `json` or `pretty`.
    #[serde(default = "default_log_format")]
    pub format: String,
    /// When set, logs also roll into this directory.
    #[serde(default)]
    pub log_dir: Option<String>,
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "pretty".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
            log_dir: None,
        }
    }
}

/// Root configuration for the delegation engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Config {
    /// Working directory override; process cwd when absent.
    #[serde(default)]
    pub cwd: Option<String>,
    /// Model tag used when the pool and role overrides are silent.
    #[serde(default)]
    pub default_model: Option<String>,
    #[serde(default)]
    pub model_pool: Vec<ModelPoolEntry>,
    /// Per-role overrides keyed by role name.
    #[serde(default)]
    pub agents: HashMap<String, AgentOverride>,
    /// Directory of per-role YAML definitions; builtin catalogue when absent.
    #[serde(default)]
    pub catalogue_dir: Option<String>,
    /// Rolling chat-history window included in prompts.
    #[serde(default = "default_history_window")]
    pub history_window: usize,
    #[serde(default)]
    pub delegation: DelegationConfig,
    #[serde(default)]
    pub escalation: EscalationConfig,
    #[serde(default)]
    pub validation: ValidationConfig,
    #[serde(default)]
    pub plan: PlanConfig,
    #[serde(default)]
    pub task: TaskConfig,
    #[serde(default)]
    pub tools: ToolsConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

fn default_history_window() -> usize {
    10
}

impl Default for Config {
    fn default() -> Self {
        Self {
            cwd: None,
            default_model: None,
            model_pool: Vec::new(),
            agents: HashMap::new(),
            catalogue_dir: None,
            history_window: default_history_window(),
            delegation: DelegationConfig::default(),
            escalation: EscalationConfig::default(),
            validation: ValidationConfig::default(),
            plan: PlanConfig::default(),
            task: TaskConfig::default(),
            tools: ToolsConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

impl Config {
    /// Total pool capacity (sum of per-endpoint concurrency caps).
    pub fn pool_capacity(&self) -> usize {
        self.model_pool.iter().map(|e| e.max_concurrent).sum()
    }

    /// The model override for a role, if configured.
    pub fn role_model_override(&self, role: &str) -> Option<&str> {
        self.agents
            .get(role)
            .and_then(|o| o.model.as_deref())
            .filter(|m| !m.is_empty())
    }
}
