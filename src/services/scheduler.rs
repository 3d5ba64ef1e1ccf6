//! Task scheduling over a validated plan.
//!
//! Executes the plan DAG wave by wave: each wave holds tasks whose
//! dependencies are all completed, run concurrently under a bounded
//! semaphore. Dependents of a failed task are skipped. Cancellation is
//! honoured at wave and task boundaries; each task gets a wall-clock
//! timeout around its whole execution (attempts, critique, escalation).

use std::collections::HashSet;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::{watch, Semaphore};

use crate::domain::errors::{DelegationError, DelegationResult};
use crate::domain::models::{ChatMessage, Plan, Task, TaskConfig, TaskStatus};
use crate::domain::ports::MemorySnapshot;

use super::agent_executor::AgentExecutor;
use super::catalogue::AgentCatalogue;
use super::escalation::EscalationManager;
use super::prompt_context::PromptContextBuilder;
use super::quality_validator::{QualityValidator, Verdict};
use super::tool_gateway::ToolGateway;
use super::trace::{TraceEvent, TraceLogger};

/// Plan-level cancellation signal, honoured at loop-iteration and wave
/// boundaries.
#[derive(Debug, Clone)]
pub struct CancellationFlag {
    tx: Arc<watch::Sender<bool>>,
    rx: watch::Receiver<bool>,
}

impl Default for CancellationFlag {
    fn default() -> Self {
        Self::new()
    }
}

impl CancellationFlag {
    pub fn new() -> Self {
        let (tx, rx) = watch::channel(false);
        Self { tx: Arc::new(tx), rx }
    }

    pub fn cancel(&self) {
        let _ = self.tx.send(true);
    }

    pub fn is_cancelled(&self) -> bool {
        *self.rx.borrow()
    }

    /// Resolves when cancellation is requested.
    pub async fn cancelled(&self) {
        let mut rx = self.rx.clone();
        while !*rx.borrow() {
            if rx.changed().await.is_err() {
                return;
            }
        }
    }
}

/// Shared per-plan context handed to every task execution.
pub struct PlanContext {
    pub catalogue: Arc<AgentCatalogue>,
    pub gateway: Arc<ToolGateway>,
    pub prompt: Arc<PromptContextBuilder>,
    pub memory: MemorySnapshot,
    pub history: Vec<ChatMessage>,
    pub trace: Arc<TraceLogger>,
}

/// Executes validated plans.
pub struct TaskScheduler {
    executor: Arc<AgentExecutor>,
    escalation: Arc<EscalationManager>,
    quality: Arc<QualityValidator>,
    config: TaskConfig,
}

impl TaskScheduler {
    pub fn new(
        executor: Arc<AgentExecutor>,
        escalation: Arc<EscalationManager>,
        quality: Arc<QualityValidator>,
        config: TaskConfig,
    ) -> Self {
        Self { executor, escalation, quality, config }
    }

    /// Run every task in the plan to a terminal status, honouring
    /// dependencies and the concurrency cap. The plan is mutated in
    /// place; returns `Cancelled` when the flag fired mid-plan.
    pub async fn run_plan(
        &self,
        plan: &mut Plan,
        ctx: &Arc<PlanContext>,
        cancel: &CancellationFlag,
    ) -> DelegationResult<()> {
        let waves = plan.execution_waves().ok_or_else(|| {
            DelegationError::PlanValidationFailed(crate::domain::errors::ValidationError::new(
                crate::domain::errors::ValidationErrorKind::CyclicDependency,
                "plan has cyclic dependencies at schedule time",
                plan.id.to_string(),
            ))
        })?;

        let semaphore = Arc::new(Semaphore::new(self.config.max_concurrency.max(1)));
        let mut completed: HashSet<String> = HashSet::new();

        for wave in waves {
            if cancel.is_cancelled() {
                break;
            }

            let mut handles = Vec::new();
            for task_id in wave {
                let mut task = match plan.task(&task_id) {
                    Some(task) => task.clone(),
                    None => continue,
                };

                // Skip when any dependency did not complete.
                let failed_dep = task
                    .dependencies
                    .iter()
                    .find(|dep| !completed.contains(dep.as_str()))
                    .cloned();
                if let Some(dep) = failed_dep {
                    let reason = format!("dependency '{dep}' did not complete");
                    if let Some(slot) = plan.task_mut(&task_id) {
                        if slot.skip(&reason).is_ok() {
                            ctx.trace.record(TraceEvent::TaskEnd {
                                task_id: slot.id.clone(),
                                role: slot.agent_type.clone(),
                                status: slot.status.as_str().to_string(),
                                attempts: slot.attempts,
                                loop_iterations: slot.loop_iterations,
                                duration_ms: 0,
                            });
                        }
                    }
                    continue;
                }
                let permit = semaphore
                    .clone()
                    .acquire_owned()
                    .await
                    .map_err(|_| DelegationError::Cancelled)?;
                let runner = TaskRunner {
                    executor: self.executor.clone(),
                    escalation: self.escalation.clone(),
                    quality: self.quality.clone(),
                    config: self.config.clone(),
                    ctx: ctx.clone(),
                    cancel: cancel.clone(),
                };

                handles.push(tokio::spawn(async move {
                    let _permit = permit;
                    runner.run_one(&mut task).await;
                    task
                }));
            }

            for joined in futures::future::join_all(handles).await {
                if let Ok(task) = joined {
                    if task.status == TaskStatus::Completed {
                        completed.insert(task.id.clone());
                    }
                    if let Some(slot) = plan.task_mut(&task.id) {
                        *slot = task;
                    }
                }
            }
        }

        if cancel.is_cancelled() {
            // Remaining non-terminal tasks never ran.
            for task in &mut plan.tasks {
                if !task.is_terminal() && task.status == TaskStatus::Pending {
                    let _ = task.skip("plan cancelled");
                }
            }
            return Err(DelegationError::Cancelled);
        }

        Ok(())
    }
}

/// Per-task execution pipeline: attempts, critique retries, escalation.
struct TaskRunner {
    executor: Arc<AgentExecutor>,
    escalation: Arc<EscalationManager>,
    quality: Arc<QualityValidator>,
    config: TaskConfig,
    ctx: Arc<PlanContext>,
    cancel: CancellationFlag,
}

impl TaskRunner {
    /// Drive one task to a terminal status, in place.
    async fn run_one(&self, task: &mut Task) {
        let start = Instant::now();
        if task.transition_to(TaskStatus::Running).is_err() {
            return;
        }
        self.ctx.trace.record(TraceEvent::TaskStart {
            task_id: task.id.clone(),
            role: task.agent_type.clone(),
        });

        let wall = Duration::from_millis(self.config.wall_timeout_ms.max(1));
        let outcome = tokio::select! {
            outcome = tokio::time::timeout(wall, self.execute_with_policies(task)) => {
                match outcome {
                    Ok(result) => result,
                    Err(_) => Err(DelegationError::TaskTimeout(wall.as_secs())),
                }
            }
            () = self.cancel.cancelled() => Err(DelegationError::Cancelled),
        };

        task.duration_ms = start.elapsed().as_millis() as u64;
        match outcome {
            Ok(exec) => {
                task.attempts = exec.attempts;
                task.loop_iterations = exec.loop_iterations;
                task.model_used = Some(exec.model_used.clone());
                task.tool_calls = exec.tool_calls.clone();
                let _ = task.complete(exec.result);
            }
            Err(e) => {
                task.attempts = self.config.max_attempts;
                let _ = task.fail(e.to_string());
            }
        }

        self.ctx.trace.record(TraceEvent::TaskEnd {
            task_id: task.id.clone(),
            role: task.agent_type.clone(),
            status: task.status.as_str().to_string(),
            attempts: task.attempts,
            loop_iterations: task.loop_iterations,
            duration_ms: task.duration_ms,
        });
    }

    /// Local attempts, then quality critique with bounded retries, then
    /// escalation.
    async fn execute_with_policies(
        &self,
        task: &Task,
    ) -> DelegationResult<super::agent_executor::ExecutionOutcome> {
        let def = self.ctx.catalogue.get(&task.agent_type)?;
        let mut notes: Vec<String> = Vec::new();
        let mut qv_rounds = 0;

        loop {
            let local = self
                .executor
                .execute_task(
                    task,
                    def,
                    &self.ctx.gateway,
                    &self.ctx.prompt,
                    &self.ctx.memory,
                    &self.ctx.history,
                    &notes,
                    &self.ctx.trace,
                )
                .await;

            let outcome = match local {
                Ok(outcome) => outcome,
                Err(e) if e.is_fatal_for_plan() => return Err(e),
                Err(e) => {
                    // Local ladder exhausted: escalate when policy allows.
                    if self.escalation.is_enabled()
                        && self.config.max_attempts >= self.escalation.threshold()
                    {
                        return self
                            .escalation
                            .escalate_task(
                                task,
                                def,
                                &self.ctx.gateway,
                                &self.ctx.prompt,
                                &self.ctx.memory,
                                &self.ctx.history,
                                &notes,
                                &e.to_string(),
                                &self.ctx.trace,
                            )
                            .await;
                    }
                    return Err(e);
                }
            };

            if !self.quality.should_validate(&task.agent_type) {
                return Ok(outcome);
            }

            let critique = self.quality.critique(task, &outcome.result, &self.ctx.trace).await?;
            match critique.verdict {
                Verdict::Ok => return Ok(outcome),
                Verdict::Retry if qv_rounds < self.quality.max_retries() => {
                    qv_rounds += 1;
                    notes.push(critique.feedback);
                }
                Verdict::Retry => {
                    // Critique retries exhausted: one escalation attempt.
                    if self.escalation.is_enabled() {
                        return self
                            .escalation
                            .escalate_task(
                                task,
                                def,
                                &self.ctx.gateway,
                                &self.ctx.prompt,
                                &self.ctx.memory,
                                &self.ctx.history,
                                &notes,
                                "quality validation retries exhausted",
                                &self.ctx.trace,
                            )
                            .await;
                    }
                    return Ok(outcome);
                }
            }
        }
    }
}
