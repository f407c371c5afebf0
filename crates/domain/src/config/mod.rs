mod assistant;
mod llm;
mod quota;
mod sandbox;

pub use assistant::*;
pub use llm::*;
pub use quota::*;
pub use sandbox::*;

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;

use crate::error::{Error, Result};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Top-level config
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub llm: LlmConfig,
    #[serde(default)]
    pub quota: QuotaConfig,
    #[serde(default)]
    pub sandbox: SandboxConfig,
    #[serde(default)]
    pub assistant: AssistantConfig,
}

impl Config {
    /// Load configuration from a TOML file.
    pub fn from_file(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        toml::from_str(&text).map_err(|e| Error::Config(format!("{}: {e}", path.display())))
    }

    /// Load from `path` when it exists, otherwise fall back to defaults.
    pub fn from_file_or_default(path: &Path) -> Result<Self> {
        if path.exists() {
            Self::from_file(path)
        } else {
            tracing::info!(path = %path.display(), "config file not found, using defaults");
            Ok(Self::default())
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Config validation
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Severity level for a configuration issue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigSeverity {
    Error,
    Warning,
}

/// A single configuration validation issue.
#[derive(Debug, Clone)]
pub struct ConfigError {
    pub severity: ConfigSeverity,
    pub field: String,
    pub message: String,
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let tag = match self.severity {
            ConfigSeverity::Error => "ERROR",
            ConfigSeverity::Warning => "WARN",
        };
        write!(f, "[{tag}] {}: {}", self.field, self.message)
    }
}

impl Config {
    /// Validate the configuration and return a list of issues.
    ///
    /// Returns an empty vec when everything looks good.
    pub fn validate(&self) -> Vec<ConfigError> {
        let mut errors = Vec::new();

        if self.llm.base_url.is_empty() {
            errors.push(ConfigError {
                severity: ConfigSeverity::Error,
                field: "llm.base_url".into(),
                message: "base_url must not be empty".into(),
            });
        }
        if self.llm.max_attempts == 0 {
            errors.push(ConfigError {
                severity: ConfigSeverity::Error,
                field: "llm.max_attempts".into(),
                message: "at least one attempt is required".into(),
            });
        }

        for (field, value) in [
            ("quota.requests_per_minute", self.quota.requests_per_minute),
            ("quota.requests_per_day", self.quota.requests_per_day),
            ("quota.tokens_per_minute", self.quota.tokens_per_minute),
            ("quota.tokens_per_day", self.quota.tokens_per_day),
        ] {
            if value == 0 {
                errors.push(ConfigError {
                    severity: ConfigSeverity::Error,
                    field: field.into(),
                    message: "quota ceiling must be greater than 0".into(),
                });
            }
        }

        if self.sandbox.max_result_rows == 0 {
            errors.push(ConfigError {
                severity: ConfigSeverity::Error,
                field: "sandbox.max_result_rows".into(),
                message: "row cap must be greater than 0".into(),
            });
        }

        if self.assistant.max_plan_attempts == 0 {
            errors.push(ConfigError {
                severity: ConfigSeverity::Error,
                field: "assistant.max_plan_attempts".into(),
                message: "at least one planning attempt is required".into(),
            });
        }

        // A token-per-minute ceiling smaller than one full call's budget
        // can never admit anything.
        let call_budget =
            (self.llm.plan_max_tokens.max(self.llm.summary_max_tokens)) as u64;
        if self.quota.tokens_per_minute > 0 && self.quota.tokens_per_minute < call_budget {
            errors.push(ConfigError {
                severity: ConfigSeverity::Warning,
                field: "quota.tokens_per_minute".into(),
                message: format!(
                    "ceiling {} is below the per-call output budget {call_budget}",
                    self.quota.tokens_per_minute
                ),
            });
        }

        errors
    }
}
