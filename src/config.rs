//! Global configuration parsing and validation.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

use crate::evaluator::spawner::SpawnConfig;
use crate::{AppError, Result};

/// Client transport served by the agent binary.
#[derive(Debug, Clone, Copy, Default, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum TransportKind {
    /// One session over the process's stdin/stdout.
    #[default]
    Stdio,
    /// One session per connection on a local IPC socket.
    Ipc,
}

/// Evaluator process launch settings.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct EvaluatorConfig {
    /// Evaluator executable.
    pub command: String,
    /// Arguments passed to the evaluator.
    #[serde(default)]
    pub args: Vec<String>,
    /// Seconds to wait for the evaluator's ready line.
    #[serde(default = "default_startup_timeout_seconds")]
    pub startup_timeout_seconds: u64,
    /// Working directory for evaluator processes.
    #[serde(default)]
    pub working_dir: Option<PathBuf>,
}

/// Evaluation engine tuning.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct EvaluationConfig {
    /// Milliseconds an aborted cell's runtime may take to acknowledge before
    /// the engine finalizes the cell on its own.
    #[serde(default = "default_abort_grace_ms")]
    pub abort_grace_ms: u64,
}

impl Default for EvaluationConfig {
    fn default() -> Self {
        Self {
            abort_grace_ms: default_abort_grace_ms(),
        }
    }
}

fn default_startup_timeout_seconds() -> u64 {
    30
}

fn default_abort_grace_ms() -> u64 {
    2000
}

fn default_ipc_name() -> String {
    "interactive-agent".into()
}

/// Global configuration parsed from `config.toml`.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct GlobalConfig {
    /// Named pipe / Unix socket identifier.
    #[serde(default = "default_ipc_name")]
    pub ipc_name: String,
    /// Transport served when none is given on the command line.
    #[serde(default)]
    pub transport: TransportKind,
    /// Evaluator process settings.
    pub evaluator: EvaluatorConfig,
    /// Engine tuning.
    #[serde(default)]
    pub evaluation: EvaluationConfig,
}

impl GlobalConfig {
    /// Load and validate configuration from a TOML file path.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if the file cannot be read or contains
    /// invalid TOML, or if validation fails.
    pub fn load_from_path(path: impl AsRef<Path>) -> Result<Self> {
        let raw = fs::read_to_string(path)
            .map_err(|err| AppError::Config(format!("failed to read config: {err}")))?;
        Self::from_toml_str(&raw)
    }

    /// Parse configuration from a TOML string and normalize paths.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if parsing or validation fails.
    pub fn from_toml_str(raw: &str) -> Result<Self> {
        let mut config: Self = toml::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    /// Grace period granted to a runtime after an abort.
    #[must_use]
    pub fn abort_grace(&self) -> Duration {
        Duration::from_millis(self.evaluation.abort_grace_ms)
    }

    /// Spawn settings for evaluator processes.
    #[must_use]
    pub fn spawn_config(&self) -> SpawnConfig {
        SpawnConfig {
            command: self.evaluator.command.clone(),
            args: self.evaluator.args.clone(),
            working_dir: self.evaluator.working_dir.clone(),
            startup_timeout: Duration::from_secs(self.evaluator.startup_timeout_seconds),
        }
    }

    fn validate(&mut self) -> Result<()> {
        if self.ipc_name.trim().is_empty() {
            return Err(AppError::Config("ipc_name must not be empty".into()));
        }

        if self.evaluator.command.trim().is_empty() {
            return Err(AppError::Config("evaluator.command must not be empty".into()));
        }

        if self.evaluator.startup_timeout_seconds == 0 {
            return Err(AppError::Config(
                "evaluator.startup_timeout_seconds must be greater than zero".into(),
            ));
        }

        if self.evaluation.abort_grace_ms == 0 {
            return Err(AppError::Config(
                "evaluation.abort_grace_ms must be greater than zero".into(),
            ));
        }

        if let Some(ref dir) = self.evaluator.working_dir {
            let canonical = dir
                .canonicalize()
                .map_err(|err| AppError::Config(format!("evaluator.working_dir invalid: {err}")))?;
            self.evaluator.working_dir = Some(canonical);
        }

        Ok(())
    }
}
