//! Property tests for the plan invariants and the bounded loops.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use proptest::prelude::*;
use serde_json::json;

use foreman::domain::errors::{DelegationError, ToolError, ValidationErrorKind};
use foreman::domain::models::{
    artifact_block, AgentDef, ModelPoolEntry, Plan, Task, TaskConfig, TaskStatus, ToolDescriptor,
    ToolOutput, ToolSource, ToolsConfig,
};
use foreman::domain::ports::{MockModelClient, MockReply, ToolBackend};
use foreman::services::{
    AgentCatalogue, Aggregator, AgentExecutor, ModelRouter, PlanValidator, PromptContextBuilder,
    ToolGateway, TraceLogger,
};

fn validator() -> PlanValidator {
    PlanValidator::new(AgentCatalogue::builtin().role_names())
}

/// Dependency sets drawn only from earlier task indices form a DAG the
/// validator accepts. Each task's dependencies come from a bitmask over
/// its predecessors.
fn arb_dag_plan() -> impl Strategy<Value = Plan> {
    (2usize..8, proptest::collection::vec(any::<u8>(), 7)).prop_map(|(n, masks)| {
        let mut tasks = vec![Task::new(
            "task_1",
            "executor",
            "Copy /data/input_1.txt to /backup/input_1.txt",
        )];
        for i in 1..n {
            let mut task = Task::new(
                format!("task_{}", i + 1),
                "executor",
                format!("Copy /data/input_{}.txt to /backup/input_{}.txt", i + 1, i + 1),
            );
            for d in 0..i.min(8) {
                if masks[i - 1] >> d & 1 == 1 {
                    task.dependencies.push(format!("task_{}", d + 1));
                }
            }
            tasks.push(task);
        }
        Plan::new("copy the inputs", tasks)
    })
}

proptest! {
    #[test]
    fn backward_only_dependencies_always_validate(plan in arb_dag_plan()) {
        prop_assert!(!plan.has_cycle());
        prop_assert!(validator().validate(&plan).is_ok());
        // Waves exist and cover every task exactly once.
        let waves = plan.execution_waves().unwrap();
        let total: usize = waves.iter().map(Vec::len).sum();
        prop_assert_eq!(total, plan.tasks.len());
    }

    #[test]
    fn placeholder_fragments_always_rejected(
        prefix in "[a-zA-Z ]{0,20}",
        marker in prop::sample::select(vec![
            "/path/to/", "/absolute/path/to/", "example.pdf", "<placeholder>",
        ]),
    ) {
        let description = format!("{prefix}process {marker}report now");
        let plan = Plan::new("q", vec![Task::new("task_1", "reader", description)]);
        let err = validator().validate(&plan).unwrap_err();
        prop_assert_eq!(err.kind, ValidationErrorKind::PlaceholderPath);
    }

    #[test]
    fn unknown_roles_always_rejected(role in "[a-z]{3,10}") {
        prop_assume!(!AgentCatalogue::builtin().contains(&role));
        let plan = Plan::new(
            "q",
            vec![Task::new("task_1", role, "Read /data/input.txt and report its size")],
        );
        let err = validator().validate(&plan).unwrap_err();
        prop_assert_eq!(err.kind, ValidationErrorKind::UnknownRole);
    }

    #[test]
    fn forward_dependencies_always_rejected(n in 2usize..6) {
        let mut tasks: Vec<Task> = (0..n)
            .map(|i| {
                Task::new(
                    format!("task_{}", i + 1),
                    "executor",
                    format!("Copy /data/input_{}.txt to /backup", i + 1),
                )
            })
            .collect();
        // First task depends on the last: a forward edge.
        tasks[0].dependencies.push(format!("task_{n}"));
        let plan = Plan::new("q", tasks);
        let err = validator().validate(&plan).unwrap_err();
        prop_assert_eq!(err.kind, ValidationErrorKind::CyclicDependency);
    }

    /// The agent loop never exceeds the role's loop limit, even when the
    /// model calls tools forever.
    #[test]
    fn loop_iterations_never_exceed_limit(loop_limit in 1u32..6) {
        let rt = tokio::runtime::Runtime::new().unwrap();
        rt.block_on(async move {
            struct OneTool;

            #[async_trait::async_trait]
            impl ToolBackend for OneTool {
                fn list(&self) -> Vec<ToolDescriptor> {
                    vec![ToolDescriptor::new(
                        "fs.probe",
                        "probe",
                        json!({"type": "object"}),
                        "filesystem",
                        ToolSource::Builtin,
                    )]
                }
                async fn invoke(
                    &self,
                    _name: &str,
                    _args: serde_json::Value,
                ) -> Result<ToolOutput, ToolError> {
                    Ok(ToolOutput::Text("probed".into()))
                }
            }

            let client = Arc::new(MockModelClient::always(MockReply::tool_call(
                "fs.probe",
                json!({}),
            )));
            let router = Arc::new(ModelRouter::new(
                vec![ModelPoolEntry {
                    url: "http://localhost:11434".into(),
                    model: "m".into(),
                    max_concurrent: 2,
                    capability: 50,
                }],
                HashMap::new(),
                Duration::from_secs(60),
                Duration::from_millis(50),
            ));
            let executor = AgentExecutor::new(client.clone(), router, TaskConfig::default());
            let mut def = AgentDef::new("executor", "p")
                .with_allowed_categories(vec!["filesystem".into()]);
            def.loop_limit = loop_limit;
            let task = Task::new("task_1", "executor", "Probe /data until done");
            let gateway = ToolGateway::snapshot(Arc::new(OneTool), ToolsConfig::default());
            let context = PromptContextBuilder::new("/data", 5);
            let memory = foreman::domain::ports::MemorySnapshot::default();
            let trace = TraceLogger::disabled(uuid::Uuid::new_v4());

            let err = executor
                .execute_task(&task, &def, &gateway, &context, &memory, &[], &[], &trace)
                .await
                .unwrap_err();
            assert!(matches!(err, DelegationError::LoopLimitReached(n) if n == loop_limit));
            // One model call per iteration, one attempt only.
            assert_eq!(client.request_count().await, loop_limit as usize);
        });
    }

    /// Artifact-bearing results pass through aggregation byte for byte.
    #[test]
    fn artifact_passthrough_is_idempotent(payload in "[a-zA-Z0-9 ]{0,40}") {
        let rt = tokio::runtime::Runtime::new().unwrap();
        rt.block_on(async move {
            let block = artifact_block("form", &json!({ "title": payload }));
            let mut artifact_task = Task::new("task_1", "artifact_agent", "make a form");
            artifact_task.transition_to(TaskStatus::Running).unwrap();
            artifact_task.complete(block.clone()).unwrap();

            let mut other = Task::new("task_2", "reader", "read /data/a.txt");
            other.transition_to(TaskStatus::Running).unwrap();
            other.complete("plain prose result".into()).unwrap();

            let plan = Plan::new("q", vec![artifact_task, other]);
            let router = Arc::new(ModelRouter::new(
                vec![ModelPoolEntry {
                    url: "http://localhost:11434".into(),
                    model: "m".into(),
                    max_concurrent: 2,
                    capability: 50,
                }],
                HashMap::new(),
                Duration::from_secs(60),
                Duration::from_millis(50),
            ));
            let aggregator = Aggregator::new(
                Arc::new(MockModelClient::always(MockReply::text("must not be used"))),
                router,
            );
            let trace = TraceLogger::disabled(uuid::Uuid::new_v4());
            let answer = aggregator
                .aggregate(&plan, &AgentCatalogue::builtin(), &trace)
                .await
                .unwrap();
            assert_eq!(answer, block);
        });
    }
}
