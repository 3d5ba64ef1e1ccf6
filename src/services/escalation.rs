//! Escalation to a high-capability remote provider.
//!
//! Last-resort execution after local model attempts are exhausted. The
//! remote run reuses the same agent loop, prompt, and tool surface; a
//! rolling hourly spend budget and a per-request token cap bound the
//! cost, and every escalated call lands in an append-only usage journal.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;

use crate::domain::errors::{DelegationError, DelegationResult};
use crate::domain::models::{AgentDef, ChatMessage, EscalationConfig, Task};
use crate::domain::ports::{MemorySnapshot, ModelClient};

use super::agent_executor::{build_messages, run_agent_loop, ExecutionOutcome, LoopParams};
use super::prompt_context::PromptContextBuilder;
use super::tool_gateway::ToolGateway;
use super::trace::{TraceEvent, TraceLogger};

/// Remote pricing estimate per million tokens, used when the provider
/// does not report cost directly.
const INPUT_USD_PER_MTOK: f64 = 3.0;
const OUTPUT_USD_PER_MTOK: f64 = 15.0;

/// One journal entry for an escalated execution.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UsageRecord {
    pub timestamp: DateTime<Utc>,
    pub task_id: String,
    pub role: String,
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub cost_usd: f64,
}

/// Manages the remote fallback and its budget.
pub struct EscalationManager {
    client: Option<Arc<dyn ModelClient>>,
    /// Remote model tag.
    model: String,
    config: EscalationConfig,
    journal: RwLock<Vec<UsageRecord>>,
    /// Timeout for remote model calls.
    call_timeout: Duration,
}

impl EscalationManager {
    pub fn new(
        client: Option<Arc<dyn ModelClient>>,
        model: impl Into<String>,
        config: EscalationConfig,
    ) -> Self {
        Self {
            client,
            model: model.into(),
            config,
            journal: RwLock::new(Vec::new()),
            call_timeout: Duration::from_secs(300),
        }
    }

    /// A manager that never escalates (escalation disabled).
    pub fn disabled() -> Self {
        Self::new(None, "", EscalationConfig::default())
    }

    pub fn is_enabled(&self) -> bool {
        self.config.enabled && self.client.is_some()
    }

    /// Local failures required before escalation fires.
    pub fn threshold(&self) -> u32 {
        self.config.threshold.max(1)
    }

    /// USD spent in the rolling last hour.
    pub async fn spent_last_hour(&self) -> f64 {
        let cutoff = Utc::now() - chrono::Duration::hours(1);
        self.journal
            .read()
            .await
            .iter()
            .filter(|r| r.timestamp > cutoff)
            .map(|r| r.cost_usd)
            .sum()
    }

    /// Snapshot of the usage journal.
    pub async fn journal(&self) -> Vec<UsageRecord> {
        self.journal.read().await.clone()
    }

    /// Execute a task against the remote provider with the same prompt
    /// and tool surface as the local attempts.
    #[allow(clippy::too_many_arguments)]
    pub async fn escalate_task(
        &self,
        task: &Task,
        def: &AgentDef,
        gateway: &ToolGateway,
        context: &PromptContextBuilder,
        memory: &MemorySnapshot,
        history: &[ChatMessage],
        system_notes: &[String],
        reason: &str,
        trace: &TraceLogger,
    ) -> DelegationResult<ExecutionOutcome> {
        let Some(client) = self.client.as_ref().filter(|_| self.config.enabled) else {
            return Err(DelegationError::EscalationUnavailable(
                "escalation is disabled".to_string(),
            ));
        };

        let spent = self.spent_last_hour().await;
        if spent >= self.config.budget_per_hour {
            return Err(DelegationError::BudgetExceeded {
                spent,
                budget: self.config.budget_per_hour,
            });
        }

        trace.record(TraceEvent::Escalation {
            task_id: task.id.clone(),
            role: def.agent_type.clone(),
            reason: reason.to_string(),
        });
        tracing::info!(
            task_id = %task.id,
            role = %def.agent_type,
            model = %self.model,
            reason,
            "Escalating task to remote provider"
        );

        let messages = build_messages(context, def, task, memory, history, gateway, system_notes);
        let params = LoopParams {
            def,
            task,
            gateway,
            messages,
            model: self.model.clone(),
            endpoint: None,
            timeout: self.call_timeout,
            max_tokens: Some(self.config.max_tokens),
            trace,
        };

        let outcome = run_agent_loop(client.as_ref(), params).await?;

        let cost_usd = estimate_cost(outcome.tokens.input_tokens, outcome.tokens.output_tokens);
        self.journal.write().await.push(UsageRecord {
            timestamp: Utc::now(),
            task_id: task.id.clone(),
            role: def.agent_type.clone(),
            input_tokens: outcome.tokens.input_tokens,
            output_tokens: outcome.tokens.output_tokens,
            cost_usd,
        });

        Ok(ExecutionOutcome {
            result: outcome.result,
            model_used: self.model.clone(),
            loop_iterations: outcome.loop_iterations,
            tool_calls: outcome.tool_calls,
            attempts: 1,
        })
    }
}

/// Estimate remote cost in USD from token counts.
pub fn estimate_cost(input_tokens: u64, output_tokens: u64) -> f64 {
    (input_tokens as f64 / 1_000_000.0) * INPUT_USD_PER_MTOK
        + (output_tokens as f64 / 1_000_000.0) * OUTPUT_USD_PER_MTOK
}
