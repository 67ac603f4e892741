//! Engine configuration, loaded from TOML.
//!
//! ```toml
//! [executor]
//! max_parallel = 5
//! failure_policy = "continue_if_possible"
//! default_timeout_seconds = 30
//!
//! [context]
//! mode = "batch"
//! strict_validation = true
//!
//! [persistence]
//! database_url = "${ICEOS_DATABASE_URL}"
//! ```

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use nodes::{ExecutionMode, ExecutionPreferences};

use crate::context::DEFAULT_FLUSH_THRESHOLD;
use crate::executor::{ExecutorConfig, FailurePolicy};
use crate::EngineError;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EngineConfig {
    #[serde(default)]
    pub executor: ExecutorSection,
    #[serde(default)]
    pub context: ContextSection,
    #[serde(default)]
    pub persistence: PersistenceSection,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutorSection {
    #[serde(default = "default_max_parallel")]
    pub max_parallel: usize,
    #[serde(default)]
    pub failure_policy: FailurePolicy,
    #[serde(default)]
    pub default_timeout_seconds: Option<f64>,
    #[serde(default = "default_max_nesting_depth")]
    pub max_nesting_depth: usize,
}

impl Default for ExecutorSection {
    fn default() -> Self {
        Self {
            max_parallel: default_max_parallel(),
            failure_policy: FailurePolicy::default(),
            default_timeout_seconds: None,
            max_nesting_depth: default_max_nesting_depth(),
        }
    }
}

fn default_max_parallel() -> usize {
    5
}

fn default_max_nesting_depth() -> usize {
    8
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContextSection {
    #[serde(default)]
    pub mode: ExecutionMode,
    #[serde(default)]
    pub strict_validation: bool,
    #[serde(default)]
    pub require_json_output: bool,
    #[serde(default = "default_flush_threshold")]
    pub flush_threshold: usize,
    #[serde(default)]
    pub user_preferences: Map<String, Value>,
}

impl Default for ContextSection {
    fn default() -> Self {
        Self {
            mode: ExecutionMode::default(),
            strict_validation: false,
            require_json_output: false,
            flush_threshold: default_flush_threshold(),
            user_preferences: Map::new(),
        }
    }
}

fn default_flush_threshold() -> usize {
    DEFAULT_FLUSH_THRESHOLD
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PersistenceSection {
    /// When absent, runs are fully in-memory.
    #[serde(default)]
    pub database_url: Option<String>,
}

impl EngineConfig {
    /// Read a TOML file, expanding `${ENV_VAR}` references first.
    pub fn load(path: &Path) -> Result<Self, EngineError> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| EngineError::Config(format!("{}: {e}", path.display())))?;
        Self::from_toml_str(&content)
    }

    pub fn from_toml_str(content: &str) -> Result<Self, EngineError> {
        let config: Self = toml::from_str(&expand_env_vars(content))
            .map_err(|e| EngineError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), EngineError> {
        if self.executor.max_parallel == 0 {
            return Err(EngineError::Config("executor.max_parallel must be at least 1".into()));
        }
        if let Some(secs) = self.executor.default_timeout_seconds {
            Duration::try_from_secs_f64(secs).map_err(|e| {
                EngineError::Config(format!("executor.default_timeout_seconds: {e}"))
            })?;
        }
        Ok(())
    }

    pub fn executor_config(&self) -> ExecutorConfig {
        ExecutorConfig {
            max_parallel: self.executor.max_parallel.max(1),
            failure_policy: self.executor.failure_policy,
            default_timeout: self
                .executor
                .default_timeout_seconds
                .and_then(|s| Duration::try_from_secs_f64(s).ok()),
            max_nesting_depth: self.executor.max_nesting_depth,
        }
    }

    pub fn preferences(&self) -> ExecutionPreferences {
        ExecutionPreferences {
            mode: self.context.mode,
            require_json_output: self.context.require_json_output,
            strict_validation: self.context.strict_validation,
            user_preferences: self.context.user_preferences.clone(),
        }
    }
}

/// Replace `${NAME}` with the environment value; unset names stay verbatim.
fn expand_env_vars(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    let mut rest = input;
    while let Some(start) = rest.find("${") {
        out.push_str(&rest[..start]);
        let after = &rest[start + 2..];
        match after.find('}') {
            Some(end) => {
                let name = &after[..end];
                match std::env::var(name) {
                    Ok(value) => out.push_str(&value),
                    Err(_) => {
                        out.push_str("${");
                        out.push_str(name);
                        out.push('}');
                    }
                }
                rest = &after[end + 1..];
            }
            None => {
                out.push_str(&rest[start..]);
                rest = "";
            }
        }
    }
    out.push_str(rest);
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_document_uses_defaults() {
        let config = EngineConfig::from_toml_str("").unwrap();
        assert_eq!(config.executor.max_parallel, 5);
        assert_eq!(config.executor.failure_policy, FailurePolicy::ContinueIfPossible);
        assert_eq!(config.executor.max_nesting_depth, 8);
        assert_eq!(config.context.flush_threshold, 10);
        assert!(config.persistence.database_url.is_none());
    }

    #[test]
    fn sections_map_onto_runtime_types() {
        let config = EngineConfig::from_toml_str(
            r#"
[executor]
max_parallel = 2
failure_policy = "halt"
default_timeout_seconds = 1.5

[context]
mode = "batch"
strict_validation = true
"#,
        )
        .unwrap();

        let exec = config.executor_config();
        assert_eq!(exec.max_parallel, 2);
        assert_eq!(exec.failure_policy, FailurePolicy::Halt);
        assert_eq!(exec.default_timeout, Some(Duration::from_millis(1500)));

        let prefs = config.preferences();
        assert_eq!(prefs.mode, ExecutionMode::Batch);
        assert!(prefs.strict_validation);
        assert!(!prefs.require_json_output);
    }

    #[test]
    fn env_references_are_expanded() {
        std::env::set_var("ICEOS_TEST_DB_URL", "sqlite://test.db");
        let config = EngineConfig::from_toml_str(
            "[persistence]\ndatabase_url = \"${ICEOS_TEST_DB_URL}\"",
        )
        .unwrap();
        std::env::remove_var("ICEOS_TEST_DB_URL");

        assert_eq!(config.persistence.database_url.as_deref(), Some("sqlite://test.db"));
    }

    #[test]
    fn unset_env_reference_is_kept() {
        assert_eq!(
            expand_env_vars("url = \"${ICEOS_SURELY_UNSET}\""),
            "url = \"${ICEOS_SURELY_UNSET}\""
        );
    }

    #[test]
    fn zero_parallelism_is_rejected() {
        let err = EngineConfig::from_toml_str("[executor]\nmax_parallel = 0").unwrap_err();
        assert!(matches!(err, EngineError::Config(_)));
    }
}
