//! Foreman CLI entry point.
//!
//! Thin front-end over the delegation engine: load configuration,
//! initialise logging, wire the clients, run one query, print the
//! answer. Web and richer UI front-ends live outside this crate.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use console::style;

use foreman::domain::models::TraceLevel;
use foreman::domain::ports::{InMemoryStore, ModelClient, ToolBackend};
use foreman::infrastructure::anthropic::AnthropicClient;
use foreman::infrastructure::config::ConfigLoader;
use foreman::infrastructure::logging::{LogConfig, LoggerHandle};
use foreman::infrastructure::ollama::OllamaClient;
use foreman::services::{
    AgentCatalogue, BuiltinToolBackend, CancellationFlag, DelegationEngine, EngineParts,
};

/// Model tag used on the remote provider when escalation is enabled.
const DEFAULT_REMOTE_MODEL: &str = "claude-sonnet-4-20250514";
const DEFAULT_LOCAL_ENDPOINT: &str = "http://localhost:11434";

#[derive(Parser)]
#[command(name = "foreman", about = "Delegate a request to a fleet of local LLM agents")]
struct Cli {
    /// The natural-language request to delegate.
    #[arg(required = true)]
    query: Vec<String>,

    /// Path to a configuration file (defaults to .foreman/config.yaml).
    #[arg(long)]
    config: Option<PathBuf>,

    /// Override the delegation trace level (off|summary|basic|full|debug).
    #[arg(long)]
    trace_level: Option<String>,

    /// Emit the outcome as JSON instead of styled text.
    #[arg(long)]
    json: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let query = cli.query.join(" ");

    let mut config = match &cli.config {
        Some(path) => ConfigLoader::load_from_file(path)?,
        None => ConfigLoader::load().context("Failed to load configuration")?,
    };
    if let Some(level) = &cli.trace_level {
        config.delegation.trace_level = TraceLevel::from_str(level)
            .with_context(|| format!("invalid trace level '{level}'"))?;
    }

    let _logger = LoggerHandle::init(&LogConfig::from(&config.logging))
        .context("Failed to initialise logging")?;

    let catalogue = match &config.catalogue_dir {
        Some(dir) => AgentCatalogue::load_from_directory(std::path::Path::new(dir))?,
        None => AgentCatalogue::builtin(),
    };

    let local_endpoint = config
        .model_pool
        .first()
        .map_or(DEFAULT_LOCAL_ENDPOINT.to_string(), |e| e.url.clone());
    let local_client: Arc<dyn ModelClient> = Arc::new(OllamaClient::new(local_endpoint));

    let remote_client: Option<Arc<dyn ModelClient>> =
        if config.escalation.enabled || config.validation.enabled {
            match AnthropicClient::from_env() {
                Ok(client) => Some(Arc::new(client)),
                Err(e) => {
                    tracing::warn!(error = %e, "Remote provider unavailable, escalation disabled");
                    None
                }
            }
        } else {
            None
        };

    let cwd = config.cwd.clone().unwrap_or_else(|| {
        std::env::current_dir()
            .map(|p| p.to_string_lossy().into_owned())
            .unwrap_or_else(|_| "/".to_string())
    });
    let memory = Arc::new(InMemoryStore::new());
    let tool_backend: Arc<dyn ToolBackend> =
        Arc::new(BuiltinToolBackend::new(PathBuf::from(&cwd), memory.clone()));

    let engine = DelegationEngine::new(EngineParts {
        config,
        catalogue,
        local_client,
        tool_backend,
        memory,
        remote_client,
        remote_model: DEFAULT_REMOTE_MODEL.to_string(),
    });

    // Ctrl-C cancels the plan; in-flight work stops at the next loop
    // iteration boundary.
    let cancel = CancellationFlag::new();
    let cancel_on_signal = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            eprintln!("{}", style("Cancelling...").yellow());
            cancel_on_signal.cancel();
        }
    });

    let outcome = engine.handle_query(&query, &cancel).await?;

    if cli.json {
        let payload = serde_json::json!({
            "answer": outcome.answer,
            "trace_path": outcome.trace_path,
            "tasks": outcome.plan.tasks.iter().map(|t| {
                serde_json::json!({
                    "id": t.id,
                    "agent_type": t.agent_type,
                    "status": t.status.as_str(),
                    "model": t.model_used,
                    "attempts": t.attempts,
                    "duration_ms": t.duration_ms,
                })
            }).collect::<Vec<_>>(),
        });
        println!("{}", serde_json::to_string_pretty(&payload)?);
    } else {
        println!("{}", outcome.answer);
        if let Some(path) = &outcome.trace_path {
            eprintln!("{}", style(format!("trace: {}", path.display())).dim());
        }
    }

    Ok(())
}
