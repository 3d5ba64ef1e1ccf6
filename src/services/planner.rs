//! Plan production.
//!
//! Turns a user query plus execution context into a validated [`Plan`].
//! The planner runs at low temperature, parses its own JSON output with
//! the tolerant extractor, and retries with the validator's error text
//! inlined when a plan is rejected.

use std::sync::Arc;
use std::time::Instant;

use crate::domain::errors::{DelegationError, DelegationResult, ValidationError};
use crate::domain::models::{ChatMessage, Plan, PlanConfig, PlanDraft, ToolDescriptor};
use crate::domain::ports::{ChatRequest, MemorySnapshot, ModelClient};

use super::catalogue::AgentCatalogue;
use super::json_extract::{extract_json_object, parse_lenient};
use super::model_router::ModelRouter;
use super::plan_validator::PlanValidator;
use super::prompt_context::PromptContextBuilder;
use super::trace::{TraceEvent, TraceLogger};

/// Mandatory planning rules appended to the planner's system prompt.
/// The validator enforces the same rules mechanically.
const PLANNING_RULES: &str = r#"
## Mandatory Planning Rules

1. Absolute paths only. Resolve every relative path the user gives against
   the working directory. Placeholders such as "/path/to/" are forbidden.
2. Every task description must be self-contained. If a task consumes data
   named by an earlier task, repeat the literal filenames, paths, and ids;
   executors cannot read other tasks' results. Never write "each", "it",
   or "the files from task_N".
3. Stay on task. Create only the tasks the user explicitly requested. Do
   not add memory-update or progress-log tasks unless the user asked.
4. Batch pattern. When the request enumerates items and applies an
   operation to each (e.g. "get the pdf files and process each"), emit
   exactly ONE task for SHELL_EXECUTOR whose description contains a small
   Python program that enumerates the items and calls
   tools.call(name, **kwargs) inside a loop. Never split enumeration and
   processing into separate tasks.
5. When the user names the items explicitly, create one task per named
   item with its concrete absolute path.
6. Artifact routing: generic form/chart/spreadsheet requests go to
   ARTIFACT_AGENT; a form for one specific tool goes to TOOL_FORM_AGENT;
   author-style or voice analysis goes to RESEARCHER.

## Output Format

Respond with ONLY a JSON object, no other text:
{
  "tasks": [
    {"id": "task_1", "description": "...", "agent_type": "ROLE",
     "dependencies": [], "expected_output": "..."}
  ]
}
Task ids are sequential: task_1, task_2, ...
"#;

/// Produces validated plans from user queries.
pub struct Planner {
    client: Arc<dyn ModelClient>,
    router: Arc<ModelRouter>,
    config: PlanConfig,
}

/// Everything the planner reads when authoring a plan.
pub struct PlanningInputs<'a> {
    pub catalogue: &'a AgentCatalogue,
    pub context: &'a PromptContextBuilder,
    pub memory: &'a MemorySnapshot,
    pub history: &'a [ChatMessage],
    /// Frozen tool snapshot for the plan.
    pub tools: Vec<ToolDescriptor>,
    pub trace: &'a TraceLogger,
}

impl Planner {
    pub fn new(client: Arc<dyn ModelClient>, router: Arc<ModelRouter>, config: PlanConfig) -> Self {
        Self { client, router, config }
    }

    /// Produce a validated plan, retrying with validator feedback up to
    /// `plan.max_retries` times. Terminates in at most
    /// `max_retries + 1` attempts regardless of model behaviour.
    pub async fn produce_plan(
        &self,
        query: &str,
        inputs: &PlanningInputs<'_>,
    ) -> DelegationResult<Plan> {
        let validator = PlanValidator::new(inputs.catalogue.role_names());
        let mut prior_error: Option<ValidationError> = None;

        for attempt in 0..=self.config.max_retries {
            inputs.trace.record(TraceEvent::PlanningPhase {
                attempt,
                query: query.to_string(),
            });

            let draft = self.generate_draft(query, inputs, prior_error.as_ref(), attempt).await?;
            let plan = draft.into_plan(query, attempt);

            match validator.validate(&plan) {
                Ok(()) => {
                    inputs.trace.record(TraceEvent::PlanValidated {
                        plan_id: plan.id,
                        task_count: plan.tasks.len(),
                    });
                    tracing::info!(
                        plan_id = %plan.id,
                        tasks = plan.tasks.len(),
                        attempt,
                        "Plan validated"
                    );
                    return Ok(plan);
                }
                Err(error) => {
                    inputs.trace.record(TraceEvent::PlanRejected {
                        attempt,
                        error: error.clone(),
                    });
                    tracing::warn!(attempt, error = %error, "Plan rejected by validator");
                    prior_error = Some(error);
                }
            }
        }

        let error = prior_error.unwrap_or_else(|| {
            ValidationError::new(
                crate::domain::errors::ValidationErrorKind::AggregateInvalid,
                "plan retries exhausted",
                query.to_string(),
            )
        });
        Err(DelegationError::PlanValidationFailed(error))
    }

    /// One generation attempt: call the planner model and parse its JSON,
    /// re-asking up to `parse_retries` times on unparseable output.
    async fn generate_draft(
        &self,
        query: &str,
        inputs: &PlanningInputs<'_>,
        prior_error: Option<&ValidationError>,
        attempt: u32,
    ) -> DelegationResult<PlanDraft> {
        let def = inputs.catalogue.get("planner")?;
        let route = self.router.route(def, 0).await?;

        let system = format!("{}\n{}", def.system_prompt, PLANNING_RULES);
        let user = self.build_user_prompt(query, inputs, prior_error);
        let mut messages = vec![ChatMessage::system(system), ChatMessage::user(user)];

        let mut last_parse_error = String::new();
        for parse_attempt in 0..=self.config.parse_retries {
            let request = ChatRequest::new(route.model.clone(), messages.clone())
                .with_endpoint(route.url.clone())
                .with_temperature(def.temperature)
                .with_timeout(route.timeout);

            let start = Instant::now();
            let response = self.client.chat(request).await?;
            inputs.trace.record(TraceEvent::LlmCall {
                task_id: None,
                role: "planner".to_string(),
                model: response.model.clone(),
                prompt: Some(query.to_string()),
                response: Some(response.content.clone()),
                duration_ms: start.elapsed().as_millis() as u64,
            });

            let json = extract_json_object(&response.content);
            match parse_lenient(&json)
                .ok_or_else(|| "response is not a JSON object".to_string())
                .and_then(|v| {
                    serde_json::from_value::<PlanDraft>(v).map_err(|e| e.to_string())
                }) {
                Ok(draft) => return Ok(draft),
                Err(e) => {
                    tracing::warn!(attempt, parse_attempt, error = %e, "Plan JSON parse failed");
                    last_parse_error = e;
                    messages.push(ChatMessage::assistant(response.content));
                    messages.push(ChatMessage::user(format!(
                        "Your previous response could not be parsed as plan JSON ({last_parse_error}). \
                         Respond again with ONLY the JSON object in the required format."
                    )));
                }
            }
        }

        Err(DelegationError::PlanProductionFailed(format!(
            "planner produced unparseable JSON after {} attempts: {last_parse_error}",
            self.config.parse_retries + 1
        )))
    }

    fn build_user_prompt(
        &self,
        query: &str,
        inputs: &PlanningInputs<'_>,
        prior_error: Option<&ValidationError>,
    ) -> String {
        let roles = inputs.catalogue.all();
        let assignable: Vec<_> = roles
            .into_iter()
            .filter(|d| d.agent_type != "planner")
            .collect();
        let mut prompt = inputs.context.planner_sections(
            &assignable,
            &inputs.tools,
            inputs.memory,
            inputs.history,
        );

        prompt.push_str("\n## User Request\n\n");
        prompt.push_str(query);
        prompt.push('\n');

        if let Some(error) = prior_error {
            prompt.push_str(&format!(
                "\n## Previous Attempt Rejected\n\nYour previous plan was rejected: {error}\n\
                 Produce a corrected plan that fixes exactly this problem.\n"
            ));
        }

        prompt
    }
}
