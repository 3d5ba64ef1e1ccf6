//! Post-hoc quality validation of completed task results.
//!
//! For a configurable set of critical roles, a cheap remote model
//! critiques the result against the task description and a role-specific
//! rubric. A `Retry` verdict re-runs the task with the feedback appended
//! as a reviewer note; a short critique is roughly an order of magnitude
//! cheaper than a full escalation.

use std::sync::Arc;

use crate::domain::errors::DelegationResult;
use crate::domain::models::{ChatMessage, Task, ValidationConfig};
use crate::domain::ports::{ChatRequest, ModelClient};

use super::json_extract::{extract_json_object, parse_lenient};
use super::trace::{TraceEvent, TraceLogger};

/// Critique verdict.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    Ok,
    Retry,
}

impl Verdict {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Ok => "ok",
            Self::Retry => "retry",
        }
    }
}

/// Result of one critique call.
#[derive(Debug, Clone)]
pub struct Critique {
    pub verdict: Verdict,
    pub feedback: String,
}

/// Role-specific rubric lines folded into the critique prompt.
fn rubric_for(role: &str) -> &'static str {
    match role {
        "coder" => {
            "Check: does the output contain the code or change the task asked for, \
             does it reference the exact paths from the task, and is it runnable as \
             presented (no stubs, no elided sections)?"
        }
        "file_executor" => {
            "Check: was every file named in the task actually touched, are all paths \
             absolute and identical to those in the task, and does the output state \
             what was done to each file?"
        }
        "shell_executor" => {
            "Check: does the output show the batch actually ran (per-item results or \
             counts), covering every enumerated item, with no step skipped?"
        }
        "planner" => {
            "Check: is every step self-contained with literal paths and ids, and does \
             the set of steps cover the request with nothing extra?"
        }
        _ => {
            "Check: does the output fully satisfy the task description and the \
             expected output, with concrete values rather than generalities?"
        }
    }
}

/// LLM-backed quality validator.
pub struct QualityValidator {
    client: Arc<dyn ModelClient>,
    /// Remote model tag used for critiques.
    model: String,
    config: ValidationConfig,
}

impl QualityValidator {
    pub fn new(client: Arc<dyn ModelClient>, model: impl Into<String>, config: ValidationConfig) -> Self {
        Self { client, model: model.into(), config }
    }

    /// Whether this role's completed results get critiqued.
    pub fn should_validate(&self, role: &str) -> bool {
        self.config.enabled && self.config.validate_roles.iter().any(|r| r == role)
    }

    pub fn max_retries(&self) -> u32 {
        self.config.max_retries
    }

    /// Critique a completed result. Fails open: an unreachable validator
    /// or unparseable critique yields an `Ok` verdict.
    pub async fn critique(
        &self,
        task: &Task,
        result: &str,
        trace: &TraceLogger,
    ) -> DelegationResult<Critique> {
        let prompt = format!(
            "You are a strict reviewer of agent task output.\n\n\
             ## Task\n{}\n\n## Expected Output\n{}\n\n## Actual Result\n{}\n\n\
             ## Rubric\n{}\n\n\
             Respond with ONLY a JSON object: {{\"verdict\": \"ok\"|\"retry\", \
             \"feedback\": \"what specifically to fix, if retry\"}}",
            task.description,
            if task.expected_output.is_empty() { "(not specified)" } else { &task.expected_output },
            result,
            rubric_for(&task.agent_type),
        );

        let request = ChatRequest::new(
            self.model.clone(),
            vec![ChatMessage::user(prompt)],
        )
        .with_temperature(0.0)
        .with_max_tokens(300);

        let critique = match self.client.chat(request).await {
            Ok(response) => {
                let parsed = parse_lenient(&extract_json_object(&response.content));
                match parsed {
                    Some(value) => {
                        let verdict = match value.get("verdict").and_then(|v| v.as_str()) {
                            Some("retry") => Verdict::Retry,
                            _ => Verdict::Ok,
                        };
                        let feedback = value
                            .get("feedback")
                            .and_then(|v| v.as_str())
                            .unwrap_or_default()
                            .to_string();
                        Critique { verdict, feedback }
                    }
                    None => {
                        tracing::warn!(task_id = %task.id, "Unparseable critique, passing result");
                        Critique { verdict: Verdict::Ok, feedback: String::new() }
                    }
                }
            }
            Err(e) => {
                tracing::warn!(task_id = %task.id, error = %e, "Quality validator unreachable, passing result");
                Critique { verdict: Verdict::Ok, feedback: String::new() }
            }
        };

        trace.record(TraceEvent::ValidatorVerdict {
            task_id: task.id.clone(),
            role: task.agent_type.clone(),
            verdict: critique.verdict.as_str().to_string(),
            feedback: critique.feedback.clone(),
        });

        Ok(critique)
    }
}
