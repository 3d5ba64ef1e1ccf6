//! Final-answer aggregation.
//!
//! One pipeline for prose, one for artifacts: single-task plans and
//! artifact-bearing results pass through verbatim (a downstream UI
//! renders artifact payloads), everything else is synthesised by a
//! low-temperature model call with a concatenation fallback.

use std::sync::Arc;
use std::time::Instant;

use crate::domain::errors::{DelegationError, DelegationResult};
use crate::domain::models::{ChatMessage, Plan, TaskStatus};
use crate::domain::ports::{ChatRequest, ModelClient};

use super::catalogue::AgentCatalogue;
use super::model_router::ModelRouter;
use super::trace::{TraceEvent, TraceLogger};

/// Produces the user-visible answer from a fully executed plan.
pub struct Aggregator {
    client: Arc<dyn ModelClient>,
    router: Arc<ModelRouter>,
}

impl Aggregator {
    pub fn new(client: Arc<dyn ModelClient>, router: Arc<ModelRouter>) -> Self {
        Self { client, router }
    }

    /// Aggregate the plan's task results into one answer.
    pub async fn aggregate(
        &self,
        plan: &Plan,
        catalogue: &AgentCatalogue,
        trace: &TraceLogger,
    ) -> DelegationResult<String> {
        let completed: Vec<_> = plan
            .tasks
            .iter()
            .filter(|t| t.status == TaskStatus::Completed && t.result.is_some())
            .collect();

        if completed.is_empty() {
            return Err(DelegationError::AggregationFailed(
                "no task completed with a result".to_string(),
            ));
        }

        // Single-task plan: the lone result verbatim.
        if plan.tasks.len() == 1 {
            trace.record(TraceEvent::Aggregation {
                mode: "single_task".to_string(),
                task_count: 1,
            });
            return Ok(completed[0].result.clone().unwrap_or_default());
        }

        // Artifact passthrough: synthesis would destroy the structured
        // payload, so artifact-bearing results are returned verbatim in
        // plan order.
        let artifact_results: Vec<&str> = completed
            .iter()
            .filter(|t| t.has_artifact_result())
            .filter_map(|t| t.result.as_deref())
            .collect();
        if !artifact_results.is_empty() {
            trace.record(TraceEvent::Aggregation {
                mode: "artifact_passthrough".to_string(),
                task_count: artifact_results.len(),
            });
            return Ok(artifact_results.join("\n\n"));
        }

        // Prose synthesis.
        match self.synthesise(plan, catalogue, &completed).await {
            Ok(answer) => {
                trace.record(TraceEvent::Aggregation {
                    mode: "synthesis".to_string(),
                    task_count: completed.len(),
                });
                Ok(answer)
            }
            Err(e) => {
                tracing::warn!(error = %e, "Aggregation call failed, concatenating results");
                trace.record(TraceEvent::Aggregation {
                    mode: "concatenation_fallback".to_string(),
                    task_count: completed.len(),
                });
                Ok(concatenate(&completed))
            }
        }
    }

    async fn synthesise(
        &self,
        plan: &Plan,
        catalogue: &AgentCatalogue,
        completed: &[&crate::domain::models::Task],
    ) -> DelegationResult<String> {
        let def = catalogue.get("aggregator")?;
        let route = self.router.route(def, 0).await?;

        let mut prompt = format!("## Original Request\n\n{}\n\n## Task Results\n", plan.query);
        for task in completed {
            prompt.push_str(&format!(
                "\n### {} ({})\nTask: {}\nResult:\n{}\n",
                task.id,
                task.agent_type,
                task.description,
                task.result.as_deref().unwrap_or_default()
            ));
        }
        prompt.push_str(
            "\nSynthesise one coherent answer to the original request from these results. \
             Preserve file paths, citations, and figures verbatim.",
        );

        let request = ChatRequest::new(
            route.model.clone(),
            vec![
                ChatMessage::system(def.system_prompt.clone()),
                ChatMessage::user(prompt.clone()),
            ],
        )
        .with_endpoint(route.url.clone())
        .with_temperature(def.temperature)
        .with_timeout(route.timeout);

        let start = Instant::now();
        let response = self.client.chat(request).await?;
        tracing::debug!(
            model = %response.model,
            duration_ms = start.elapsed().as_millis() as u64,
            "Aggregation synthesis call finished"
        );

        if response.content.trim().is_empty() {
            return Err(DelegationError::AggregationFailed(
                "aggregation model returned empty output".to_string(),
            ));
        }
        Ok(response.content)
    }
}

/// Minimal-framing fallback when synthesis is unavailable.
fn concatenate(completed: &[&crate::domain::models::Task]) -> String {
    completed
        .iter()
        .map(|t| format!("[{}] {}", t.id, t.result.as_deref().unwrap_or_default()))
        .collect::<Vec<_>>()
        .join("\n\n")
}
