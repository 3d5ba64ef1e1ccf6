//! Foreman - delegation engine for locally-hosted LLM agents.
//!
//! Orchestrates a fleet of role-specialised agents that cooperate on a
//! user request:
//! - Plan production and validation with bounded retry
//! - DAG scheduling with dependency order and bounded parallelism
//! - Per-task agent loops with tool invocation via a frozen gateway
//! - Response-quality detectors for unreliable local models
//! - Escalation to a remote high-capability provider under a budget
//! - Artifact-aware aggregation of the final answer

pub mod domain;
pub mod infrastructure;
pub mod services;

// Re-export key types for convenience
pub use domain::errors::{DelegationError, DelegationResult};
pub use services::engine::{DelegationEngine, DelegationOutcome, EngineParts};
