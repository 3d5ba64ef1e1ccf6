//! Logging configuration for the tracing subscriber.

use crate::domain::models::LoggingConfig;

/// Output format for log lines.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Json,
    Pretty,
}

/// File rotation policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RotationPolicy {
    Daily,
    Never,
}

/// Resolved logging configuration.
#[derive(Debug, Clone)]
pub struct LogConfig {
    pub level: String,
    pub format: LogFormat,
    /// When set, logs also roll into this directory.
    pub log_dir: Option<String>,
    pub rotation: RotationPolicy,
    pub enable_stdout: bool,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: LogFormat::Pretty,
            log_dir: None,
            rotation: RotationPolicy::Daily,
            enable_stdout: true,
        }
    }
}

impl From<&LoggingConfig> for LogConfig {
    fn from(config: &LoggingConfig) -> Self {
        Self {
            level: config.level.clone(),
            format: if config.format == "json" { LogFormat::Json } else { LogFormat::Pretty },
            log_dir: config.log_dir.clone(),
            rotation: RotationPolicy::Daily,
            enable_stdout: true,
        }
    }
}
