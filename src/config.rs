//! Coordinator configuration.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::trace::{LogTracer, NoopTracer, StatementTracer};
use crate::transaction::SavepointPrefix;

/// Errors raised while loading a configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid configuration: {0}")]
    Parse(#[from] serde_json::Error),
}

/// Coordinator configuration options.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CoordinatorConfig {
    /// Prefix for generated savepoint names.
    pub savepoint_prefix: SavepointPrefix,
    /// Log every statement through the `log` facade.
    pub log_statements: bool,
    /// Level for successful statements when `log_statements` is set.
    pub log_level: LogLevel,
    /// Statements slower than this are logged at `warn`.
    pub slow_statement_ms: Option<u64>,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            savepoint_prefix: SavepointPrefix::default(),
            log_statements: false,
            log_level: LogLevel::Debug,
            slow_statement_ms: None,
        }
    }
}

impl CoordinatorConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse a configuration from JSON. Missing fields take their defaults.
    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        Ok(serde_json::from_str(json)?)
    }

    /// Load a configuration from a JSON file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let json = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_json(&json)
    }

    /// Set the savepoint prefix.
    pub fn savepoint_prefix(mut self, prefix: SavepointPrefix) -> Self {
        self.savepoint_prefix = prefix;
        self
    }

    /// Set log_statements flag.
    pub fn log_statements(mut self, value: bool) -> Self {
        self.log_statements = value;
        self
    }

    /// Set the level for successful statements.
    pub fn log_level(mut self, level: LogLevel) -> Self {
        self.log_level = level;
        self
    }

    /// Set the slow statement threshold in milliseconds.
    pub fn slow_statement_ms(mut self, millis: u64) -> Self {
        self.slow_statement_ms = Some(millis);
        self
    }

    /// Tracer described by this configuration.
    pub fn tracer(&self) -> Arc<dyn StatementTracer> {
        if !self.log_statements {
            return Arc::new(NoopTracer);
        }

        let mut tracer = LogTracer::new(self.log_level.into());
        if let Some(ms) = self.slow_statement_ms {
            tracer = tracer.slow_threshold(Duration::from_millis(ms));
        }
        Arc::new(tracer)
    }
}

/// Serializable mirror of [`log::Level`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

impl From<LogLevel> for log::Level {
    fn from(level: LogLevel) -> Self {
        match level {
            LogLevel::Error => log::Level::Error,
            LogLevel::Warn => log::Level::Warn,
            LogLevel::Info => log::Level::Info,
            LogLevel::Debug => log::Level::Debug,
            LogLevel::Trace => log::Level::Trace,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults() {
        let config = CoordinatorConfig::default();
        assert_eq!(config.savepoint_prefix.as_str(), "SP");
        assert!(!config.log_statements);
        assert_eq!(config.log_level, LogLevel::Debug);
        assert_eq!(config.slow_statement_ms, None);
    }

    #[test]
    fn test_from_json_partial() {
        let config = CoordinatorConfig::from_json(
            r#"{ "savepoint_prefix": "nest", "log_statements": true, "log_level": "info" }"#,
        )
        .unwrap();

        assert_eq!(config.savepoint_prefix.as_str(), "nest");
        assert!(config.log_statements);
        assert_eq!(config.log_level, LogLevel::Info);
        assert_eq!(config.slow_statement_ms, None);
    }

    #[test]
    fn test_from_json_rejects_bad_prefix() {
        let err = CoordinatorConfig::from_json(r#"{ "savepoint_prefix": "9lives" }"#).unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
    }

    #[test]
    fn test_load_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"{{ "slow_statement_ms": 250 }}"#).unwrap();

        let config = CoordinatorConfig::load(file.path()).unwrap();
        assert_eq!(config.slow_statement_ms, Some(250));
        assert_eq!(config.savepoint_prefix, SavepointPrefix::default());
    }

    #[test]
    fn test_load_missing_file() {
        let dir = tempfile::TempDir::new().unwrap();
        let err = CoordinatorConfig::load(dir.path().join("absent.json")).unwrap_err();
        assert!(matches!(err, ConfigError::Io { .. }));
    }

    #[test]
    fn test_builder_round_trip_through_json() {
        let config = CoordinatorConfig::new()
            .savepoint_prefix(SavepointPrefix::new("lvl").unwrap())
            .log_statements(true)
            .log_level(LogLevel::Trace)
            .slow_statement_ms(10);

        let json = serde_json::to_string(&config).unwrap();
        assert_eq!(CoordinatorConfig::from_json(&json).unwrap(), config);
    }
}
