//! Per-task agent execution loop.
//!
//! Drives one task to a terminal outcome: assemble context, call the
//! routed model, parse tool calls (native first, tolerant text extractor
//! second), invoke tools through the gateway, and terminate on a final
//! answer, the role's loop limit, or a response-quality detector.
//!
//! Each failed attempt advances the model router to the next ladder
//! rung; the escalation manager reuses the same loop against the remote
//! provider after local attempts are exhausted.

use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::domain::errors::{DelegationError, DelegationResult, ToolError, UnusableKind};
use crate::domain::models::{
    contains_artifact_block, normalize_artifact_fences, AgentDef, ChatMessage, Task, TaskConfig,
    TokenUsage, ToolCallRecord,
};
use crate::domain::ports::{ChatRequest, MemorySnapshot, ModelClient};

use super::detectors::{assess, strip_thinking, EmptyStreak, MIN_TEXT};
use super::json_extract::extract_tool_calls;
use super::model_router::ModelRouter;
use super::prompt_context::PromptContextBuilder;
use super::tool_gateway::ToolGateway;
use super::trace::{TraceEvent, TraceLogger};

/// Consecutive invalid-argument failures for one tool before the attempt
/// is abandoned.
const ARG_ERROR_LIMIT: u32 = 3;

/// Result of a successful task execution.
#[derive(Debug, Clone)]
pub struct ExecutionOutcome {
    pub result: String,
    pub model_used: String,
    pub loop_iterations: u32,
    pub tool_calls: Vec<ToolCallRecord>,
    /// Ladder attempts consumed (1-based).
    pub attempts: u32,
}

/// Parameters for one run of the agent loop against a specific model.
pub struct LoopParams<'a> {
    pub def: &'a AgentDef,
    pub task: &'a Task,
    pub gateway: &'a ToolGateway,
    /// Prebuilt system + user messages.
    pub messages: Vec<ChatMessage>,
    pub model: String,
    pub endpoint: Option<String>,
    pub timeout: Duration,
    pub max_tokens: Option<u32>,
    pub trace: &'a TraceLogger,
}

/// Outcome of one loop run (one ladder rung).
#[derive(Debug, Clone)]
pub struct LoopOutcome {
    pub result: String,
    pub loop_iterations: u32,
    pub tool_calls: Vec<ToolCallRecord>,
    /// Token usage accumulated across the loop's model calls.
    pub tokens: TokenUsage,
}

/// Executes tasks against the local model pool.
pub struct AgentExecutor {
    client: Arc<dyn ModelClient>,
    router: Arc<ModelRouter>,
    config: TaskConfig,
}

impl AgentExecutor {
    pub fn new(client: Arc<dyn ModelClient>, router: Arc<ModelRouter>, config: TaskConfig) -> Self {
        Self { client, router, config }
    }

    /// Execute a task, advancing the model ladder on unusable output,
    /// up to `task.max_attempts` attempts.
    #[allow(clippy::too_many_arguments)]
    pub async fn execute_task(
        &self,
        task: &Task,
        def: &AgentDef,
        gateway: &ToolGateway,
        context: &PromptContextBuilder,
        memory: &MemorySnapshot,
        history: &[ChatMessage],
        system_notes: &[String],
        trace: &TraceLogger,
    ) -> DelegationResult<ExecutionOutcome> {
        let mut last_error = None;

        for attempt in 0..self.config.max_attempts {
            let route = match self.router.route(def, attempt).await {
                Ok(route) => route,
                Err(e) => {
                    // Keep the underlying failure when the ladder runs out.
                    last_error.get_or_insert(e);
                    break;
                }
            };

            let messages = build_messages(context, def, task, memory, history, gateway, system_notes);
            let params = LoopParams {
                def,
                task,
                gateway,
                messages,
                model: route.model.clone(),
                endpoint: Some(route.url.clone()),
                timeout: route.timeout,
                max_tokens: None,
                trace,
            };

            match run_agent_loop(self.client.as_ref(), params).await {
                Ok(outcome) => {
                    return Ok(ExecutionOutcome {
                        result: outcome.result,
                        model_used: route.model,
                        loop_iterations: outcome.loop_iterations,
                        tool_calls: outcome.tool_calls,
                        attempts: attempt + 1,
                    });
                }
                Err(e) if e.is_transient() => {
                    tracing::warn!(
                        task_id = %task.id,
                        attempt,
                        model = %route.model,
                        error = %e,
                        "Attempt failed, advancing model ladder"
                    );
                    last_error = Some(e);
                }
                Err(e) => return Err(e),
            }
        }

        Err(last_error.unwrap_or(DelegationError::NoEligibleModel {
            role: def.agent_type.clone(),
            attempt: 0,
        }))
    }
}

/// Assemble the message list for a task attempt, appending any
/// quality-validator feedback as additional system notes.
pub fn build_messages(
    context: &PromptContextBuilder,
    def: &AgentDef,
    task: &Task,
    memory: &MemorySnapshot,
    history: &[ChatMessage],
    gateway: &ToolGateway,
    system_notes: &[String],
) -> Vec<ChatMessage> {
    let tools = gateway.list_for_agent(def);
    let mut messages = context.build(def, &task.description, history, memory, &tools);
    if !system_notes.is_empty() {
        if let Some(system) = messages.first_mut() {
            for note in system_notes {
                system.content.push_str(&format!("\n\n## Reviewer Note\n\n{note}\n"));
            }
        }
    }
    messages
}

/// Run the agent loop once against one model.
///
/// Loop termination: a content-bearing response with no tool calls, the
/// role's loop limit, or a quality detector. A first empty response gets
/// one nudge; two consecutive empties abort the attempt for escalation.
pub async fn run_agent_loop(
    client: &dyn ModelClient,
    params: LoopParams<'_>,
) -> DelegationResult<LoopOutcome> {
    let LoopParams { def, task, gateway, mut messages, model, endpoint, timeout, max_tokens, trace } =
        params;

    let tools = gateway.list_for_agent(def);
    let mut tool_calls_journal: Vec<ToolCallRecord> = Vec::new();
    let mut last_artifact_tool_result: Option<String> = None;
    let mut streak = EmptyStreak::new();
    let mut arg_errors: u32 = 0;
    let mut final_candidate: Option<String> = None;
    let mut tokens = TokenUsage::default();

    let mut iteration = 0;
    while iteration < def.loop_limit {
        iteration += 1;

        let mut request = ChatRequest::new(model.clone(), messages.clone())
            .with_temperature(def.temperature)
            .with_tools(tools.clone())
            .with_timeout(timeout);
        if let Some(ref url) = endpoint {
            request = request.with_endpoint(url.clone());
        }
        if let Some(max) = max_tokens {
            request = request.with_max_tokens(max);
        }

        let start = Instant::now();
        let response = client.chat(request).await?;
        if let Some(usage) = response.usage {
            tokens.input_tokens += usage.input_tokens;
            tokens.output_tokens += usage.output_tokens;
        }
        trace.record(TraceEvent::LlmCall {
            task_id: Some(task.id.clone()),
            role: def.agent_type.clone(),
            model: response.model.clone(),
            prompt: messages.last().map(|m| m.content.clone()),
            response: Some(response.content.clone()),
            duration_ms: start.elapsed().as_millis() as u64,
        });

        // Prefer native tool calls; fall back to the tolerant extractor.
        let calls = if response.has_tool_calls() {
            response.tool_calls.clone()
        } else {
            extract_tool_calls(&response.content)
        };

        match streak.observe(assess(&response.content, !calls.is_empty())) {
            Some(UnusableKind::ConsecutiveEmpty) => {
                return Err(DelegationError::ModelOutputUnusable(UnusableKind::ConsecutiveEmpty));
            }
            Some(UnusableKind::Empty) => {
                // One nudge before the consecutive-empty abort.
                messages.push(ChatMessage::user(
                    "Your previous response was empty. Provide your answer, or call a tool."
                        .to_string(),
                ));
                continue;
            }
            Some(kind) => {
                return Err(DelegationError::ModelOutputUnusable(kind));
            }
            None => {}
        }

        if calls.is_empty() {
            // Content-bearing response with no tool call: final answer
            // candidate, subject to the minimum-substance rule.
            let normalized = normalize_artifact_fences(&response.content);
            let stripped = strip_thinking(&normalized);
            if contains_artifact_block(&normalized) || stripped.trim().len() >= MIN_TEXT {
                final_candidate = Some(normalized);
                break;
            }
            final_candidate = Some(normalized);
            if iteration >= def.loop_limit {
                break;
            }
            messages.push(ChatMessage::assistant(response.content.clone()));
            messages.push(ChatMessage::user(format!(
                "Your answer was too brief to stand alone. Give the complete result for the \
                 task, including every path and value (at least {MIN_TEXT} characters), or \
                 call a tool."
            )));
            continue;
        }

        // Invoke each parsed call in order, feeding results back.
        messages.push(ChatMessage::assistant(if response.content.is_empty() {
            serde_json::to_string(&calls).unwrap_or_default()
        } else {
            response.content.clone()
        }));

        for call in calls {
            let call_start = Instant::now();
            let invocation = gateway.invoke(def, &call.name, call.arguments.clone()).await;
            let duration_ms = call_start.elapsed().as_millis() as u64;

            match invocation {
                Ok(output) => {
                    trace.record(TraceEvent::ToolCall {
                        task_id: task.id.clone(),
                        role: def.agent_type.clone(),
                        name: call.name.clone(),
                        args: call.arguments.clone(),
                        success: true,
                        duration_ms,
                    });
                    tool_calls_journal.push(ToolCallRecord {
                        name: call.name.clone(),
                        arguments: call.arguments.clone(),
                        success: true,
                        duration_ms,
                    });
                    if output.is_artifact() {
                        last_artifact_tool_result = Some(output.as_str().to_string());
                    }
                    messages.push(ChatMessage::tool(format!(
                        "Result of {}:\n{}",
                        call.name,
                        output.as_str()
                    )));
                }
                Err(e) => {
                    trace.record(TraceEvent::ToolCall {
                        task_id: task.id.clone(),
                        role: def.agent_type.clone(),
                        name: call.name.clone(),
                        args: call.arguments.clone(),
                        success: false,
                        duration_ms,
                    });
                    tool_calls_journal.push(ToolCallRecord {
                        name: call.name.clone(),
                        arguments: call.arguments.clone(),
                        success: false,
                        duration_ms,
                    });

                    if e.is_recoverable_by_agent() {
                        arg_errors += 1;
                        if arg_errors >= ARG_ERROR_LIMIT {
                            return Err(DelegationError::Tool(e));
                        }
                    }
                    // Report the failure back so the agent can self-correct.
                    messages.push(ChatMessage::tool(format!("Error calling {}: {e}", call.name)));
                }
            }
        }
    }

    let raw = final_candidate.ok_or(DelegationError::LoopLimitReached(iteration))?;
    let result = finalize_result(def, &raw, last_artifact_tool_result)?;

    // Completion invariant: substantial text or an artifact block.
    let stripped = strip_thinking(&result);
    if !contains_artifact_block(&result) && stripped.trim().len() < MIN_TEXT {
        return Err(DelegationError::ModelOutputUnusable(UnusableKind::ThinkingOnly));
    }

    Ok(LoopOutcome {
        result,
        loop_iterations: iteration,
        tool_calls: tool_calls_journal,
        tokens,
    })
}

/// For artifact-producing roles, fall back to the last artifact-bearing
/// tool result when the final response lacks an artifact block.
fn finalize_result(
    def: &AgentDef,
    response: &str,
    last_artifact_tool_result: Option<String>,
) -> DelegationResult<String> {
    let is_artifact_role = matches!(def.agent_type.as_str(), "artifact_agent" | "tool_form_agent");
    if is_artifact_role && !contains_artifact_block(response) {
        if let Some(artifact) = last_artifact_tool_result {
            return Ok(artifact);
        }
    }
    Ok(response.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::models::{
        artifact_block, ModelPoolEntry, ToolDescriptor, ToolOutput, ToolSource, ToolsConfig,
    };
    use crate::domain::ports::{MockModelClient, MockReply, ToolBackend};
    use async_trait::async_trait;
    use serde_json::json;
    use std::collections::HashMap;
    use uuid::Uuid;

    struct TestBackend;

    #[async_trait]
    impl ToolBackend for TestBackend {
        fn list(&self) -> Vec<ToolDescriptor> {
            vec![
                ToolDescriptor::new(
                    "fs.list_files",
                    "List files in a directory",
                    json!({"type": "object", "properties": {"dir": {"type": "string"}}, "required": ["dir"]}),
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
                "fs.list_files" => Ok(ToolOutput::Text(
                    "/u/p/Daily/a.pdf\n/u/p/Daily/b.pdf".to_string(),
                )),
                "builtin.generate_form" => {
                    Ok(ToolOutput::from_text(artifact_block("toolform", &args)))
                }
                other => Err(ToolError::Unknown(other.to_string())),
            }
        }
    }

    fn gateway() -> ToolGateway {
        ToolGateway::snapshot(Arc::new(TestBackend), ToolsConfig::default())
    }

    fn router() -> Arc<ModelRouter> {
        Arc::new(ModelRouter::new(
            vec![
                ModelPoolEntry {
                    url: "http://localhost:11434".into(),
                    model: "primary".into(),
                    max_concurrent: 2,
                    capability: 80,
                },
                ModelPoolEntry {
                    url: "http://localhost:11435".into(),
                    model: "fallback".into(),
                    max_concurrent: 2,
                    capability: 40,
                },
            ],
            HashMap::new(),
            Duration::from_secs(120),
            Duration::from_millis(100),
        ))
    }

    fn executor(replies: Vec<MockReply>) -> (AgentExecutor, Arc<MockModelClient>) {
        let client = Arc::new(MockModelClient::new(replies));
        let exec = AgentExecutor::new(client.clone(), router(), TaskConfig::default());
        (exec, client)
    }

    fn fs_agent() -> AgentDef {
        AgentDef::new("executor", "You execute tasks.")
            .with_allowed_categories(vec!["filesystem".into()])
    }

    async fn run(
        exec: &AgentExecutor,
        def: &AgentDef,
        task: &Task,
    ) -> DelegationResult<ExecutionOutcome> {
        let gw = gateway();
        let context = PromptContextBuilder::new("/u/p", 5);
        let memory = MemorySnapshot::default();
        let trace = TraceLogger::disabled(Uuid::new_v4());
        exec.execute_task(task, def, &gw, &context, &memory, &[], &[], &trace).await
    }

    fn long_answer(prefix: &str) -> String {
        format!("{prefix} — all requested files were processed and results recorded as described.")
    }

    #[tokio::test]
    async fn test_direct_answer_no_tools() {
        let (exec, client) = executor(vec![MockReply::text(long_answer("Done"))]);
        let task = Task::new("task_1", "executor", "Report the status of /u/p");
        let outcome = run(&exec, &fs_agent(), &task).await.unwrap();
        assert!(outcome.result.starts_with("Done"));
        assert_eq!(outcome.loop_iterations, 1);
        assert_eq!(outcome.attempts, 1);
        assert_eq!(outcome.model_used, "primary");
        assert_eq!(client.request_count().await, 1);
    }

    #[tokio::test]
    async fn test_tool_call_then_answer() {
        let (exec, _) = executor(vec![
            MockReply::tool_call("fs.list_files", json!({"dir": "/u/p/Daily"})),
            MockReply::text(long_answer("Found 2 pdf files: /u/p/Daily/a.pdf and /u/p/Daily/b.pdf")),
        ]);
        let task = Task::new("task_1", "executor", "List the pdf files in /u/p/Daily");
        let outcome = run(&exec, &fs_agent(), &task).await.unwrap();
        assert_eq!(outcome.loop_iterations, 2);
        assert_eq!(outcome.tool_calls.len(), 1);
        assert!(outcome.tool_calls[0].success);
        assert!(outcome.result.contains("a.pdf"));
    }

    #[tokio::test]
    async fn test_textual_tool_call_parsed() {
        let (exec, _) = executor(vec![
            MockReply::text(r#"I'll check. {"name": "fs.list_files", "arguments": {"dir": "/u/p/Daily"}}"#),
            MockReply::text(long_answer("The listing is complete")),
        ]);
        let task = Task::new("task_1", "executor", "List files in /u/p/Daily");
        let outcome = run(&exec, &fs_agent(), &task).await.unwrap();
        assert_eq!(outcome.tool_calls.len(), 1);
        assert_eq!(outcome.tool_calls[0].name, "fs.list_files");
    }

    #[tokio::test]
    async fn test_consecutive_empty_aborts_all_attempts() {
        // Both ladder rungs see two consecutive empties.
        let (exec, client) = executor(vec![MockReply::text("")]);
        let task = Task::new("task_1", "executor", "Do something in /u/p");
        let err = run(&exec, &fs_agent(), &task).await.unwrap_err();
        assert!(matches!(
            err,
            DelegationError::ModelOutputUnusable(UnusableKind::ConsecutiveEmpty)
        ));
        // Two iterations per attempt, two attempts.
        assert_eq!(client.request_count().await, 4);
    }

    #[tokio::test]
    async fn test_empty_then_recovery() {
        let (exec, _) = executor(vec![
            MockReply::text(""),
            MockReply::text(long_answer("Recovered on the nudge")),
        ]);
        let task = Task::new("task_1", "executor", "Do something in /u/p");
        let outcome = run(&exec, &fs_agent(), &task).await.unwrap();
        assert!(outcome.result.contains("Recovered"));
        assert_eq!(outcome.attempts, 1);
    }

    #[tokio::test]
    async fn test_thinking_only_advances_ladder() {
        let (exec, client) = executor(vec![
            MockReply::text("<think>pondering endlessly about the task</think>"),
            MockReply::text(long_answer("Second rung produced a real answer")),
        ]);
        let task = Task::new("task_1", "executor", "Do something in /u/p");
        let outcome = run(&exec, &fs_agent(), &task).await.unwrap();
        assert_eq!(outcome.attempts, 2);
        assert_eq!(outcome.model_used, "fallback");
        assert_eq!(client.request_count().await, 2);
    }

    #[tokio::test]
    async fn test_corrupt_language_advances_ladder() {
        let (exec, _) = executor(vec![
            MockReply::text("好的，我现在开始处理这个复杂的任务"),
            MockReply::text(long_answer("ASCII answer from the fallback model")),
        ]);
        let task = Task::new("task_1", "executor", "Do something in /u/p");
        let outcome = run(&exec, &fs_agent(), &task).await.unwrap();
        assert_eq!(outcome.attempts, 2);
    }

    #[tokio::test]
    async fn test_loop_limit_enforced() {
        // Model keeps calling tools and never answers.
        let (exec, client) = executor(vec![MockReply::tool_call(
            "fs.list_files",
            json!({"dir": "/u/p"}),
        )]);
        let mut def = fs_agent();
        def.loop_limit = 3;
        let task = Task::new("task_1", "executor", "List files in /u/p");
        let err = run(&exec, &def, &task).await.unwrap_err();
        assert!(matches!(err, DelegationError::LoopLimitReached(3)));
        // loop_limit iterations on the first attempt; LoopLimitReached is
        // not transient, so no second attempt.
        assert_eq!(client.request_count().await, 3);
    }

    #[tokio::test]
    async fn test_unknown_tool_fed_back_to_agent() {
        let (exec, _) = executor(vec![
            MockReply::tool_call("fs.nonexistent", json!({})),
            MockReply::text(long_answer("Adjusted after the tool error")),
        ]);
        let task = Task::new("task_1", "executor", "Do something in /u/p");
        let outcome = run(&exec, &fs_agent(), &task).await.unwrap();
        assert_eq!(outcome.tool_calls.len(), 1);
        assert!(!outcome.tool_calls[0].success);
        assert!(outcome.result.contains("Adjusted"));
    }

    #[tokio::test]
    async fn test_repeated_arg_errors_abort_attempt() {
        // Missing required "dir" every time.
        let (exec, _) = executor(vec![MockReply::tool_call("fs.list_files", json!({}))]);
        let mut def = fs_agent();
        def.loop_limit = 10;
        let task = Task::new("task_1", "executor", "List files in /u/p");
        let err = run(&exec, &def, &task).await.unwrap_err();
        assert!(matches!(err, DelegationError::Tool(ToolError::InvalidArgs { .. })));
    }

    #[tokio::test]
    async fn test_artifact_fallback_from_tool_result() {
        let def = AgentDef::new("tool_form_agent", "You build tool forms.")
            .with_default_tools(vec!["builtin.generate_form".into()]);
        let (exec, _) = executor(vec![
            MockReply::tool_call("builtin.generate_form", json!({"tool": "builtin.list_files"})),
            MockReply::text(long_answer("The form was generated; see the artifact above")),
        ]);
        let task = Task::new("task_1", "tool_form_agent", "Create a form for builtin.list_files");
        let outcome = run(&exec, &def, &task).await.unwrap();
        // Final response had no artifact block: the tool's artifact is
        // passed through verbatim.
        assert!(outcome.result.starts_with("```artifact:toolform"));
    }

    #[tokio::test]
    async fn test_malformed_artifact_fence_normalised() {
        let def = AgentDef::new("artifact_agent", "You produce artifacts.");
        let malformed = "```\nartifact:form\n{\"title\": \"Contact\"}\n```";
        let (exec, _) = executor(vec![MockReply::text(malformed)]);
        let task = Task::new("task_1", "artifact_agent", "Create a contact form");
        let outcome = run(&exec, &def, &task).await.unwrap();
        assert!(outcome.result.starts_with("```artifact:form"));
    }

    #[tokio::test]
    async fn test_model_failure_advances_ladder() {
        let (exec, _) = executor(vec![
            MockReply::failure("connection refused"),
            MockReply::text(long_answer("Fallback rung answered successfully")),
        ]);
        let task = Task::new("task_1", "executor", "Do something in /u/p");
        let outcome = run(&exec, &fs_agent(), &task).await.unwrap();
        assert_eq!(outcome.attempts, 2);
        assert_eq!(outcome.model_used, "fallback");
    }

    #[tokio::test]
    async fn test_reviewer_notes_appended_to_system() {
        let client = Arc::new(MockModelClient::always(MockReply::text(long_answer("ok"))));
        let exec = AgentExecutor::new(client.clone(), router(), TaskConfig::default());
        let task = Task::new("task_1", "executor", "Do something in /u/p");
        let gw = gateway();
        let context = PromptContextBuilder::new("/u/p", 5);
        let memory = MemorySnapshot::default();
        let trace = TraceLogger::disabled(Uuid::new_v4());
        exec.execute_task(
            &task,
            &fs_agent(),
            &gw,
            &context,
            &memory,
            &[],
            &["Previous output missed the file count.".to_string()],
            &trace,
        )
        .await
        .unwrap();

        let requests = client.requests().await;
        assert!(requests[0].messages[0].content.contains("Reviewer Note"));
        assert!(requests[0].messages[0].content.contains("missed the file count"));
    }
}
