//! Error taxonomy for the delegation engine.
//!
//! All failures surface through [`DelegationError`]; model- and
//! tool-specific errors have their own enums and convert into it.

use thiserror::Error;

/// Kinds of plan-validation failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ValidationErrorKind {
    /// Split "list then process each" pattern across tasks.
    PlanAntipattern,
    /// Tool-call-like token with a bare, unbound parameter name.
    UndefinedParameter,
    /// Placeholder path such as `/path/to/` in a task description.
    PlaceholderPath,
    /// Memory-update tasks the user did not ask for.
    ExcessMemoryTasks,
    /// Task assigned to a role missing from the catalogue.
    UnknownRole,
    /// Dependency graph contains a cycle or dangling reference.
    CyclicDependency,
    /// Plan-level structural problem (empty, duplicate ids).
    AggregateInvalid,
}

impl ValidationErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::PlanAntipattern => "plan_antipattern",
            Self::UndefinedParameter => "undefined_parameter",
            Self::PlaceholderPath => "placeholder_path",
            Self::ExcessMemoryTasks => "excess_memory_tasks",
            Self::UnknownRole => "unknown_role",
            Self::CyclicDependency => "cyclic_dependency",
            Self::AggregateInvalid => "aggregate_invalid",
        }
    }
}

/// A specific plan-validation failure with evidence for the retry prompt.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct ValidationError {
    pub kind: ValidationErrorKind,
    pub message: String,
    /// The offending fragment (task id, description excerpt, token).
    pub evidence: String,
}

impl ValidationError {
    pub fn new(kind: ValidationErrorKind, message: impl Into<String>, evidence: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            evidence: evidence.into(),
        }
    }
}

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{}] {} (evidence: {})", self.kind.as_str(), self.message, self.evidence)
    }
}

/// Why a model response was rejected by the quality detectors.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnusableKind {
    /// Stripped response is empty.
    Empty,
    /// Only `<think>` spans, or a remainder too short to stand alone.
    ThinkingOnly,
    /// Leading non-ASCII text with no tool call (wrong-script output).
    CorruptLang,
    /// Two empty responses in consecutive loop iterations.
    ConsecutiveEmpty,
}

impl UnusableKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Empty => "empty",
            Self::ThinkingOnly => "thinking_only",
            Self::CorruptLang => "corrupt_lang",
            Self::ConsecutiveEmpty => "consecutive_empty",
        }
    }
}

impl std::fmt::Display for UnusableKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Errors from model endpoint clients.
#[derive(Debug, Error)]
pub enum ModelError {
    /// Endpoint cannot be reached or refused the connection.
    #[error("Model unavailable: {0}")]
    Unavailable(String),

    /// Request exceeded its deadline.
    #[error("Model call timed out after {0}s")]
    Timeout(u64),

    /// Endpoint signalled throttling.
    #[error("Rate limit exceeded")]
    RateLimited,

    /// Endpoint returned an error status.
    #[error("Model API error {status}: {message}")]
    Api { status: u16, message: String },

    /// Response body could not be interpreted.
    #[error("Invalid model response: {0}")]
    InvalidResponse(String),

    /// Client is missing required configuration (key, endpoint).
    #[error("Model client not configured: {0}")]
    NotConfigured(String),
}

impl ModelError {
    /// Whether a retry against the same endpoint could succeed.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Unavailable(_) | Self::Timeout(_) | Self::RateLimited => true,
            Self::Api { status, .. } => *status >= 500,
            Self::InvalidResponse(_) | Self::NotConfigured(_) => false,
        }
    }
}

/// Errors from tool resolution and invocation.
#[derive(Debug, Error)]
pub enum ToolError {
    /// No tool with this fully-qualified name in the snapshot.
    #[error("Unknown tool: {0}")]
    Unknown(String),

    /// Tool exists but the current agent may not call it.
    #[error("Tool '{tool}' is forbidden for agent '{agent}'")]
    Forbidden { tool: String, agent: String },

    /// Arguments failed schema validation.
    #[error("Invalid arguments for '{tool}': {reason}")]
    InvalidArgs { tool: String, reason: String },

    /// The tool ran and reported failure.
    #[error("Tool invocation failed: {0}")]
    Failed(String),

    /// The tool call exceeded its deadline.
    #[error("Tool call timed out after {0}s")]
    Timeout(u64),
}

impl ToolError {
    /// Arg errors are fed back to the agent for self-correction rather
    /// than failing the task outright.
    pub fn is_recoverable_by_agent(&self) -> bool {
        matches!(self, Self::InvalidArgs { .. })
    }
}

/// Top-level error type for the delegation pipeline.
#[derive(Debug, Error)]
pub enum DelegationError {
    #[error("Plan production failed: {0}")]
    PlanProductionFailed(String),

    #[error("Plan validation failed: {0}")]
    PlanValidationFailed(ValidationError),

    #[error("Unknown role: {0}")]
    UnknownRole(String),

    #[error(transparent)]
    Tool(#[from] ToolError),

    #[error(transparent)]
    Model(#[from] ModelError),

    #[error("Model output unusable ({0})")]
    ModelOutputUnusable(UnusableKind),

    #[error("Loop limit reached after {0} iterations")]
    LoopLimitReached(u32),

    #[error("Task timed out after {0}s wall clock")]
    TaskTimeout(u64),

    #[error("No eligible model for role '{role}' at attempt {attempt}")]
    NoEligibleModel { role: String, attempt: u32 },

    #[error("Escalation unavailable: {0}")]
    EscalationUnavailable(String),

    #[error("Escalation budget exceeded: {spent:.2} of {budget:.2} USD this hour")]
    BudgetExceeded { spent: f64, budget: f64 },

    #[error("Aggregation failed: {0}")]
    AggregationFailed(String),

    #[error("Cancelled")]
    Cancelled,

    #[error("I/O error: {0}")]
    Io(String),

    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl DelegationError {
    /// Whether the pipeline may retry locally before escalating.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Model(e) => e.is_transient(),
            Self::ModelOutputUnusable(_) => true,
            Self::Tool(ToolError::Timeout(_) | ToolError::Failed(_)) => true,
            _ => false,
        }
    }

    /// Whether the whole plan must stop (no retry, no escalation).
    pub fn is_fatal_for_plan(&self) -> bool {
        matches!(self, Self::Cancelled | Self::BudgetExceeded { .. })
    }
}

impl From<serde_json::Error> for DelegationError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

impl From<std::io::Error> for DelegationError {
    fn from(err: std::io::Error) -> Self {
        Self::Io(err.to_string())
    }
}

/// Convenience alias used throughout the services layer.
pub type DelegationResult<T> = Result<T, DelegationError>;
