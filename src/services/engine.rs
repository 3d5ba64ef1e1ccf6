//! The delegation engine: query in, answer out.
//!
//! Wires the pipeline together: context assembly, plan production and
//! validation, scheduling, per-task execution with quality validation
//! and escalation, and final aggregation. Chat history is owned here
//! and updated only at plan boundaries; the tool surface is frozen per
//! plan by the gateway snapshot.

use std::path::PathBuf;
use std::sync::Arc;

use tokio::sync::Mutex;
use uuid::Uuid;

use crate::domain::errors::{DelegationError, DelegationResult};
use crate::domain::models::{ChatMessage, Config, Plan};
use crate::domain::ports::{MemoryStore, ModelClient, ToolBackend};

use super::agent_executor::AgentExecutor;
use super::aggregator::Aggregator;
use super::catalogue::AgentCatalogue;
use super::escalation::EscalationManager;
use super::model_router::ModelRouter;
use super::planner::{Planner, PlanningInputs};
use super::prompt_context::PromptContextBuilder;
use super::quality_validator::QualityValidator;
use super::scheduler::{CancellationFlag, PlanContext, TaskScheduler};
use super::tool_gateway::ToolGateway;
use super::trace::TraceLogger;

/// Everything the engine needs injected; no hidden global state.
pub struct EngineParts {
    pub config: Config,
    pub catalogue: AgentCatalogue,
    /// Client for the local model pool.
    pub local_client: Arc<dyn ModelClient>,
    pub tool_backend: Arc<dyn ToolBackend>,
    pub memory: Arc<dyn MemoryStore>,
    /// Remote high-capability provider for escalation and critiques.
    pub remote_client: Option<Arc<dyn ModelClient>>,
    /// Model tag used on the remote provider.
    pub remote_model: String,
}

/// Result of one delegated query.
#[derive(Debug)]
pub struct DelegationOutcome {
    /// User-visible answer (aggregated text, artifact passthrough, or a
    /// single-line failure summary).
    pub answer: String,
    /// The executed plan with per-task results and statuses.
    pub plan: Plan,
    pub trace_path: Option<PathBuf>,
}

/// Orchestrates the delegation pipeline for one session.
pub struct DelegationEngine {
    config: Config,
    catalogue: Arc<AgentCatalogue>,
    tool_backend: Arc<dyn ToolBackend>,
    memory: Arc<dyn MemoryStore>,
    planner: Planner,
    executor: Arc<AgentExecutor>,
    escalation: Arc<EscalationManager>,
    quality: Arc<QualityValidator>,
    aggregator: Aggregator,
    /// Session chat history; updated only at plan boundaries.
    history: Mutex<Vec<ChatMessage>>,
}

impl DelegationEngine {
    pub fn new(parts: EngineParts) -> Self {
        let EngineParts {
            mut config,
            catalogue,
            local_client,
            tool_backend,
            memory,
            remote_client,
            remote_model,
        } = parts;

        let router = Arc::new(ModelRouter::from_config(&config));

        // Scheduler parallelism is bounded by what the pool can serve.
        let pool_capacity = router.pool_capacity().max(1);
        config.task.max_concurrency = config.task.max_concurrency.clamp(1, pool_capacity);

        let planner = Planner::new(local_client.clone(), router.clone(), config.plan.clone());
        let executor = Arc::new(AgentExecutor::new(
            local_client.clone(),
            router.clone(),
            config.task.clone(),
        ));
        let escalation = Arc::new(EscalationManager::new(
            remote_client.clone(),
            remote_model.clone(),
            config.escalation.clone(),
        ));
        // Critiques go to the remote provider when available; otherwise
        // the local pool serves them.
        let quality_client = remote_client.unwrap_or_else(|| local_client.clone());
        let quality = Arc::new(QualityValidator::new(
            quality_client,
            remote_model,
            config.validation.clone(),
        ));
        let aggregator = Aggregator::new(local_client.clone(), router.clone());

        Self {
            config,
            catalogue: Arc::new(catalogue),
            tool_backend,
            memory,
            planner,
            executor,
            escalation,
            quality,
            aggregator,
            history: Mutex::new(Vec::new()),
        }
    }

    /// The escalation manager (usage journal inspection).
    pub fn escalation(&self) -> &EscalationManager {
        &self.escalation
    }

    /// Snapshot of the session chat history.
    pub async fn history(&self) -> Vec<ChatMessage> {
        self.history.lock().await.clone()
    }

    fn working_dir(&self) -> String {
        self.config.cwd.clone().unwrap_or_else(|| {
            std::env::current_dir()
                .map(|p| p.to_string_lossy().into_owned())
                .unwrap_or_else(|_| "/".to_string())
        })
    }

    /// Handle one user query end to end.
    ///
    /// Fatal plan failures surface as a single-line answer with the
    /// trace path; `Cancelled` propagates as an error.
    pub async fn handle_query(
        &self,
        query: &str,
        cancel: &CancellationFlag,
    ) -> DelegationResult<DelegationOutcome> {
        let session_id = Uuid::new_v4();
        let trace = Arc::new(
            TraceLogger::create(&self.config.delegation, session_id).unwrap_or_else(|e| {
                tracing::warn!(error = %e, "Trace file unavailable, tracing disabled for plan");
                TraceLogger::disabled(session_id)
            }),
        );
        let trace_path = trace.path();

        let prompt = Arc::new(PromptContextBuilder::new(
            self.working_dir(),
            self.config.history_window,
        ));
        let memory_snapshot = self.memory.snapshot().await;
        let history = self.history.lock().await.clone();
        let gateway = Arc::new(ToolGateway::snapshot(
            self.tool_backend.clone(),
            self.config.tools.clone(),
        ));

        // Plan production with validation retries.
        let inputs = PlanningInputs {
            catalogue: &self.catalogue,
            context: &prompt,
            memory: &memory_snapshot,
            history: &history,
            tools: gateway.list().into_iter().cloned().collect(),
            trace: &trace,
        };
        let mut plan = match self.planner.produce_plan(query, &inputs).await {
            Ok(plan) => plan,
            Err(e) if e.is_fatal_for_plan() => return Err(e),
            Err(e) => {
                return Ok(self.failure_outcome(query, e, Plan::new(query, vec![]), trace_path));
            }
        };

        // Execute the DAG.
        let ctx = Arc::new(PlanContext {
            catalogue: self.catalogue.clone(),
            gateway,
            prompt,
            memory: memory_snapshot,
            history,
            trace: trace.clone(),
        });
        let scheduler = TaskScheduler::new(
            self.executor.clone(),
            self.escalation.clone(),
            self.quality.clone(),
            self.config.task.clone(),
        );
        match scheduler.run_plan(&mut plan, &ctx, cancel).await {
            Ok(()) => {}
            Err(DelegationError::Cancelled) => return Err(DelegationError::Cancelled),
            Err(e) => {
                return Ok(self.failure_outcome(query, e, plan, trace_path));
            }
        }

        // Aggregate the final answer.
        let answer = match self.aggregator.aggregate(&plan, &self.catalogue, &trace).await {
            Ok(answer) => answer,
            Err(e) => {
                let first_error = plan
                    .tasks
                    .iter()
                    .find_map(|t| t.error.clone())
                    .unwrap_or_else(|| e.to_string());
                return Ok(self.failure_outcome(
                    query,
                    DelegationError::AggregationFailed(first_error),
                    plan,
                    trace_path,
                ));
            }
        };

        // Plan boundary: fold the exchange into the session history.
        {
            let mut history = self.history.lock().await;
            history.push(ChatMessage::user(query.to_string()));
            history.push(ChatMessage::assistant(answer.clone()));
        }

        Ok(DelegationOutcome { answer, plan, trace_path })
    }

    fn failure_outcome(
        &self,
        query: &str,
        error: DelegationError,
        plan: Plan,
        trace_path: Option<PathBuf>,
    ) -> DelegationOutcome {
        let suffix = trace_path
            .as_ref()
            .map(|p| format!(" (trace: {})", p.display()))
            .unwrap_or_default();
        tracing::error!(query, error = %error, "Delegation failed");
        DelegationOutcome {
            answer: format!("Delegation failed: {error}{suffix}"),
            plan,
            trace_path,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::errors::ToolError;
    use crate::domain::models::{
        artifact_block, ModelPoolEntry, TaskStatus, ToolDescriptor, ToolOutput, ToolSource,
    };
    use crate::domain::ports::{MockModelClient, MockReply, NullMemoryStore};
    use async_trait::async_trait;
    use serde_json::json;

    struct ListFilesBackend;

    #[async_trait]
    impl ToolBackend for ListFilesBackend {
        fn list(&self) -> Vec<ToolDescriptor> {
            vec![
                ToolDescriptor::new(
                    "fs.list_files",
                    "List files",
                    json!({"type": "object", "properties": {"dir": {"type": "string"}}}),
                    "filesystem",
                    ToolSource::Builtin,
                ),
                ToolDescriptor::new(
                    "builtin.generate_form",
                    "Generate a form artifact",
                    json!({"type": "object"}),
                    "artifacts",
                    ToolSource::Builtin,
                ),
            ]
        }

        async fn invoke(&self, name: &str, args: serde_json::Value) -> Result<ToolOutput, ToolError> {
            match name {
                "fs.list_files" => Ok(ToolOutput::Text("/u/p/a.pdf\n/u/p/b.pdf".into())),
                "builtin.generate_form" => Ok(ToolOutput::from_text(artifact_block("toolform", &args))),
                other => Err(ToolError::Unknown(other.to_string())),
            }
        }
    }

    fn config() -> Config {
        Config {
            cwd: Some("/u/p".into()),
            model_pool: vec![ModelPoolEntry {
                url: "http://localhost:11434".into(),
                model: "local".into(),
                max_concurrent: 4,
                capability: 50,
            }],
            delegation: crate::domain::models::DelegationConfig {
                trace_enabled: false,
                ..Default::default()
            },
            ..Default::default()
        }
    }

    fn engine(replies: Vec<MockReply>) -> DelegationEngine {
        DelegationEngine::new(EngineParts {
            config: config(),
            catalogue: AgentCatalogue::builtin(),
            local_client: Arc::new(MockModelClient::new(replies)),
            tool_backend: Arc::new(ListFilesBackend),
            memory: Arc::new(NullMemoryStore::new()),
            remote_client: None,
            remote_model: "remote".into(),
        })
    }

    fn single_reader_plan() -> String {
        r#"{"tasks": [{"id": "task_1", "description": "Summarise /u/p/report.pdf",
            "agent_type": "reader", "dependencies": [], "expected_output": "summary"}]}"#
            .to_string()
    }

    fn long(text: &str) -> String {
        format!("{text} — every requested item was handled and the details are recorded here.")
    }

    #[tokio::test]
    async fn test_single_task_query_end_to_end() {
        let eng = engine(vec![
            MockReply::text(single_reader_plan()),
            MockReply::text(long("The report says X")),
        ]);
        let outcome = eng.handle_query("summarise the report", &CancellationFlag::new()).await.unwrap();
        assert!(outcome.answer.contains("The report says X"));
        assert_eq!(outcome.plan.tasks.len(), 1);
        assert_eq!(outcome.plan.tasks[0].status, TaskStatus::Completed);
    }

    #[tokio::test]
    async fn test_history_updated_at_plan_boundary() {
        let eng = engine(vec![
            MockReply::text(single_reader_plan()),
            MockReply::text(long("Answer")),
        ]);
        eng.handle_query("summarise the report", &CancellationFlag::new()).await.unwrap();
        let history = eng.history().await;
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].content, "summarise the report");
        assert!(history[1].content.contains("Answer"));
    }

    #[tokio::test]
    async fn test_artifact_query_passthrough() {
        let plan = r#"{"tasks": [{"id": "task_1",
            "description": "Create a form for the tool builtin.list_files",
            "agent_type": "tool_form_agent", "dependencies": [],
            "expected_output": "a toolform artifact"}]}"#;
        let eng = engine(vec![
            MockReply::text(plan.to_string()),
            MockReply::tool_call("builtin.generate_form", json!({"tool": "builtin.list_files"})),
            MockReply::text(long("Form generated; see artifact")),
        ]);
        let outcome = eng
            .handle_query("create a form to use builtin.list_files", &CancellationFlag::new())
            .await
            .unwrap();
        assert!(outcome.answer.starts_with("```artifact:toolform"));
    }

    #[tokio::test]
    async fn test_unplannable_query_yields_failure_line() {
        let eng = engine(vec![MockReply::text("I refuse to emit JSON")]);
        let outcome = eng.handle_query("do something", &CancellationFlag::new()).await.unwrap();
        assert!(outcome.answer.starts_with("Delegation failed:"));
        assert!(outcome.plan.tasks.is_empty());
    }

    #[tokio::test]
    async fn test_failed_task_yields_failure_line() {
        let eng = engine(vec![
            MockReply::text(single_reader_plan()),
            // Task execution: model goes silent on both iterations.
            MockReply::text(""),
        ]);
        let outcome = eng.handle_query("summarise the report", &CancellationFlag::new()).await.unwrap();
        assert!(outcome.answer.starts_with("Delegation failed:"));
        assert_eq!(outcome.plan.tasks[0].status, TaskStatus::Failed);
    }

    #[tokio::test]
    async fn test_cancelled_query_propagates() {
        let eng = engine(vec![MockReply::text(single_reader_plan()), MockReply::text(long("x"))]);
        let cancel = CancellationFlag::new();
        cancel.cancel();
        let err = eng.handle_query("summarise", &cancel).await.unwrap_err();
        assert!(matches!(err, DelegationError::Cancelled));
    }

    #[tokio::test]
    async fn test_plan_retry_after_validator_rejection() {
        let bad = r#"{"tasks": [{"id": "task_1", "description": "Summarise /path/to/file.pdf",
            "agent_type": "reader", "dependencies": []}]}"#;
        let eng = engine(vec![
            MockReply::text(bad.to_string()),
            MockReply::text(single_reader_plan()),
            MockReply::text(long("Valid answer")),
        ]);
        let outcome = eng.handle_query("summarise the report", &CancellationFlag::new()).await.unwrap();
        assert!(outcome.answer.contains("Valid answer"));
        assert_eq!(outcome.plan.attempt, 1);
    }
}
