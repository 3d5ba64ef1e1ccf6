//! Services layer of the delegation engine.

pub mod agent_executor;
pub mod aggregator;
pub mod builtin_tools;
pub mod catalogue;
pub mod detectors;
pub mod engine;
pub mod escalation;
pub mod json_extract;
pub mod model_router;
pub mod plan_validator;
pub mod planner;
pub mod prompt_context;
pub mod quality_validator;
pub mod scheduler;
pub mod tool_gateway;
pub mod trace;

pub use agent_executor::{AgentExecutor, ExecutionOutcome, LoopOutcome, LoopParams};
pub use aggregator::Aggregator;
pub use builtin_tools::BuiltinToolBackend;
pub use catalogue::AgentCatalogue;
pub use detectors::{assess, strip_thinking, EmptyStreak, MIN_TEXT};
pub use engine::{DelegationEngine, DelegationOutcome, EngineParts};
pub use escalation::{estimate_cost, EscalationManager, UsageRecord};
pub use json_extract::{extract_json_object, extract_tool_calls, parse_lenient};
pub use model_router::{ModelRouter, RouteDecision};
pub use plan_validator::PlanValidator;
pub use planner::{Planner, PlanningInputs};
pub use prompt_context::{truncate_section, PromptContextBuilder};
pub use quality_validator::{Critique, QualityValidator, Verdict};
pub use scheduler::{CancellationFlag, PlanContext, TaskScheduler};
pub use tool_gateway::{coerce_arguments, ToolGateway};
pub use trace::{read_trace, TraceEvent, TraceLogger};
