//! Configuration loader with hierarchical merging.

use anyhow::{Context, Result};
use figment::providers::{Env, Format, Serialized, Yaml};
use figment::Figment;
use thiserror::Error;

use crate::domain::models::Config;

/// Configuration validation errors.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Invalid log level: {0}. Must be one of: trace, debug, info, warn, error")]
    InvalidLogLevel(String),

    #[error("Invalid log format: {0}. Must be one of: json, pretty")]
    InvalidLogFormat(String),

    #[error("Model pool entry {0} has an empty url")]
    EmptyEndpointUrl(usize),

    #[error("Model pool entry {0} has an empty model tag")]
    EmptyModelTag(usize),

    #[error("Model pool entry {0} has max_concurrent 0. Must be at least 1")]
    InvalidMaxConcurrent(usize),

    #[error("Invalid escalation threshold: {0}. Must be at least 1")]
    InvalidEscalationThreshold(u32),

    #[error("Invalid task max_attempts: {0}. Must be at least 1")]
    InvalidMaxAttempts(u32),

    #[error("Invalid trace truncation length: {0}. Must be positive")]
    InvalidTraceTruncate(usize),

    #[error("Invalid history window: {0}. Must be at least 1")]
    InvalidHistoryWindow(usize),
}

/// Loads configuration with hierarchical merging.
pub struct ConfigLoader;

impl ConfigLoader {
    /// Load configuration for the current project.
    ///
    /// Precedence (lowest to highest):
    /// 1. Programmatic defaults
    /// 2. `.foreman/config.yaml` (project config)
    /// 3. `.foreman/local.yaml` (local overrides, optional)
    /// 4. Environment variables (`FOREMAN_*` prefix, `__` nesting)
    pub fn load() -> Result<Config> {
        let config: Config = Figment::new()
            .merge(Serialized::defaults(Config::default()))
            .merge(Yaml::file(".foreman/config.yaml"))
            .merge(Yaml::file(".foreman/local.yaml"))
            .merge(Env::prefixed("FOREMAN_").split("__"))
            .extract()
            .context("Failed to extract configuration from figment")?;

        Self::validate(&config)?;
        Ok(config)
    }

    /// Load configuration from a specific file.
    pub fn load_from_file(path: impl AsRef<std::path::Path>) -> Result<Config> {
        let config: Config = Figment::new()
            .merge(Serialized::defaults(Config::default()))
            .merge(Yaml::file(path.as_ref()))
            .extract()
            .context(format!(
                "Failed to load config from {}",
                path.as_ref().display()
            ))?;

        Self::validate(&config)?;
        Ok(config)
    }

    /// Validate configuration after loading.
    pub fn validate(config: &Config) -> Result<(), ConfigError> {
        let valid_log_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_log_levels.contains(&config.logging.level.as_str()) {
            return Err(ConfigError::InvalidLogLevel(config.logging.level.clone()));
        }

        let valid_log_formats = ["json", "pretty"];
        if !valid_log_formats.contains(&config.logging.format.as_str()) {
            return Err(ConfigError::InvalidLogFormat(config.logging.format.clone()));
        }

        for (idx, entry) in config.model_pool.iter().enumerate() {
            if entry.url.is_empty() {
                return Err(ConfigError::EmptyEndpointUrl(idx));
            }
            if entry.model.is_empty() {
                return Err(ConfigError::EmptyModelTag(idx));
            }
            if entry.max_concurrent == 0 {
                return Err(ConfigError::InvalidMaxConcurrent(idx));
            }
        }

        if config.escalation.threshold == 0 {
            return Err(ConfigError::InvalidEscalationThreshold(0));
        }

        if config.task.max_attempts == 0 {
            return Err(ConfigError::InvalidMaxAttempts(0));
        }

        if config.delegation.trace_truncate == 0 {
            return Err(ConfigError::InvalidTraceTruncate(0));
        }

        if config.history_window == 0 {
            return Err(ConfigError::InvalidHistoryWindow(0));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_default_config_is_valid() {
        let config = Config::default();
        ConfigLoader::validate(&config).expect("default config should be valid");
    }

    #[test]
    fn test_load_from_file() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(
            file,
            "default_model: qwen2.5:14b\n\
             model_pool:\n\
             - url: http://localhost:11434\n\
             \x20 model: qwen2.5:14b\n\
             \x20 max_concurrent: 2\n\
             \x20 capability: 70\n\
             plan:\n\
             \x20 max_retries: 3\n"
        )
        .unwrap();
        file.flush().unwrap();

        let config = ConfigLoader::load_from_file(file.path()).unwrap();
        assert_eq!(config.default_model.as_deref(), Some("qwen2.5:14b"));
        assert_eq!(config.model_pool.len(), 1);
        assert_eq!(config.plan.max_retries, 3);
        // Untouched sections keep their defaults.
        assert_eq!(config.task.max_attempts, 2);
    }

    #[test]
    fn test_hierarchical_merging() {
        let mut base = NamedTempFile::new().unwrap();
        writeln!(base, "history_window: 5\nlogging:\n  level: info\n  format: json").unwrap();
        base.flush().unwrap();

        let mut overlay = NamedTempFile::new().unwrap();
        writeln!(overlay, "history_window: 15\nlogging:\n  level: debug").unwrap();
        overlay.flush().unwrap();

        let config: Config = Figment::new()
            .merge(Serialized::defaults(Config::default()))
            .merge(Yaml::file(base.path()))
            .merge(Yaml::file(overlay.path()))
            .extract()
            .unwrap();

        assert_eq!(config.history_window, 15, "overlay should win");
        assert_eq!(config.logging.level, "debug", "overlay should win for nested fields");
        assert_eq!(config.logging.format, "json", "base persists when not overridden");
    }

    #[test]
    fn test_validate_rejects_bad_log_level() {
        let mut config = Config::default();
        config.logging.level = "verbose".to_string();
        assert!(matches!(
            ConfigLoader::validate(&config).unwrap_err(),
            ConfigError::InvalidLogLevel(_)
        ));
    }

    #[test]
    fn test_validate_rejects_zero_concurrency_entry() {
        let mut config = Config::default();
        config.model_pool.push(crate::domain::models::ModelPoolEntry {
            url: "http://localhost:11434".into(),
            model: "m".into(),
            max_concurrent: 0,
            capability: 10,
        });
        assert!(matches!(
            ConfigLoader::validate(&config).unwrap_err(),
            ConfigError::InvalidMaxConcurrent(0)
        ));
    }

    #[test]
    fn test_validate_rejects_zero_threshold() {
        let mut config = Config::default();
        config.escalation.threshold = 0;
        assert!(matches!(
            ConfigLoader::validate(&config).unwrap_err(),
            ConfigError::InvalidEscalationThreshold(0)
        ));
    }

    #[test]
    fn test_validate_rejects_empty_url() {
        let mut config = Config::default();
        config.model_pool.push(crate::domain::models::ModelPoolEntry {
            url: String::new(),
            model: "m".into(),
            max_concurrent: 1,
            capability: 10,
        });
        assert!(matches!(
            ConfigLoader::validate(&config).unwrap_err(),
            ConfigError::EmptyEndpointUrl(0)
        ));
    }
}
