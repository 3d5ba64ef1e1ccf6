//! Per-plan JSONL trace stream.
//!
//! One trace file per plan, one JSON entry per line, covering planning,
//! validation, every model and tool call, escalations, and aggregation.
//! Writes are serialised through a single writer; trace failures are
//! logged and never fail the pipeline.

use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use chrono::Utc;
use serde::Serialize;
use uuid::Uuid;

use crate::domain::errors::{DelegationResult, ValidationError};
use crate::domain::models::{DelegationConfig, TraceLevel};

/// One trace event, tagged by type in the JSONL output.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum TraceEvent {
    PlanningPhase {
        attempt: u32,
        query: String,
    },
    PlanValidated {
        plan_id: Uuid,
        task_count: usize,
    },
    PlanRejected {
        attempt: u32,
        error: ValidationError,
    },
    TaskStart {
        task_id: String,
        role: String,
    },
    LlmCall {
        #[serde(skip_serializing_if = "Option::is_none")]
        task_id: Option<String>,
        role: String,
        model: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        prompt: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        response: Option<String>,
        duration_ms: u64,
    },
    ToolCall {
        task_id: String,
        role: String,
        name: String,
        args: serde_json::Value,
        success: bool,
        duration_ms: u64,
    },
    ValidatorVerdict {
        task_id: String,
        role: String,
        verdict: String,
        feedback: String,
    },
    Escalation {
        task_id: String,
        role: String,
        reason: String,
    },
    TaskEnd {
        task_id: String,
        role: String,
        status: String,
        attempts: u32,
        loop_iterations: u32,
        duration_ms: u64,
    },
    Aggregation {
        mode: String,
        task_count: usize,
    },
}

#[derive(Serialize)]
struct TraceEntry<'a> {
    ts: String,
    session: Uuid,
    #[serde(flatten)]
    event: &'a TraceEvent,
}

struct TraceWriter {
    file: File,
    path: PathBuf,
}

/// Append-only trace logger for one plan.
pub struct TraceLogger {
    writer: Option<Mutex<TraceWriter>>,
    level: TraceLevel,
    truncate: usize,
    session_id: Uuid,
}

impl TraceLogger {
    /// Create the trace file for a new plan. With tracing disabled (or
    /// level `off`) the logger becomes a no-op.
    pub fn create(config: &DelegationConfig, session_id: Uuid) -> DelegationResult<Self> {
        if !config.trace_enabled || config.trace_level == TraceLevel::Off {
            return Ok(Self::disabled(session_id));
        }

        let dir = PathBuf::from(&config.trace_dir);
        std::fs::create_dir_all(&dir)?;
        let filename = format!("trace_{}.json", Utc::now().format("%Y%m%d_%H%M%S"));
        let path = dir.join(filename);
        let file = OpenOptions::new().create(true).append(true).open(&path)?;

        Ok(Self {
            writer: Some(Mutex::new(TraceWriter { file, path })),
            level: config.trace_level,
            truncate: config.trace_truncate,
            session_id,
        })
    }

    /// A logger that records nothing.
    pub fn disabled(session_id: Uuid) -> Self {
        Self {
            writer: None,
            level: TraceLevel::Off,
            truncate: 0,
            session_id,
        }
    }

    /// Path of the trace file, when tracing is active.
    pub fn path(&self) -> Option<PathBuf> {
        self.writer
            .as_ref()
            .and_then(|w| w.lock().ok().map(|w| w.path.clone()))
    }

    pub fn session_id(&self) -> Uuid {
        self.session_id
    }

    /// Append one event. Never fails the caller.
    pub fn record(&self, event: TraceEvent) {
        let Some(writer) = &self.writer else { return };

        let event = self.redact(event);
        let entry = TraceEntry {
            ts: Utc::now().to_rfc3339(),
            session: self.session_id,
            event: &event,
        };

        match serde_json::to_string(&entry) {
            Ok(line) => {
                if let Ok(mut writer) = writer.lock() {
                    if let Err(e) = writeln!(writer.file, "{line}") {
                        tracing::warn!(error = %e, "Failed to append trace entry");
                    }
                }
            }
            Err(e) => tracing::warn!(error = %e, "Failed to serialise trace entry"),
        }
    }

    /// Apply the level's payload policy to LLM call entries.
    fn redact(&self, event: TraceEvent) -> TraceEvent {
        let TraceEvent::LlmCall { task_id, role, model, prompt, response, duration_ms } = event
        else {
            return event;
        };

        let (prompt, response) = if !self.level.records_payloads() {
            (None, None)
        } else if self.level.truncates_payloads() {
            (
                prompt.map(|p| clip(&p, self.truncate)),
                response.map(|r| clip(&r, self.truncate)),
            )
        } else {
            (prompt, response)
        };

        TraceEvent::LlmCall { task_id, role, model, prompt, response, duration_ms }
    }
}

fn clip(text: &str, max: usize) -> String {
    if text.len() <= max {
        return text.to_string();
    }
    let mut cut = max;
    while !text.is_char_boundary(cut) {
        cut -= 1;
    }
    format!("{}…", &text[..cut])
}

/// Read a trace file back as parsed JSON values (diagnostics and tests).
pub fn read_trace(path: &Path) -> DelegationResult<Vec<serde_json::Value>> {
    let content = std::fs::read_to_string(path)?;
    content
        .lines()
        .filter(|l| !l.trim().is_empty())
        .map(|l| serde_json::from_str(l).map_err(Into::into))
        .collect()
}
