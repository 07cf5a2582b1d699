//! Evaluator process spawner.
//!
//! Spawns one evaluator process per evaluation context with:
//! - `kill_on_drop(true)` so processes are cleaned up with their context.
//! - `env_clear()` plus a small allowlist, so the agent's own environment
//!   never leaks into user code.
//! - A startup timeout: the evaluator must print one ready line on stdout
//!   before the window closes, otherwise it is killed.

use std::path::PathBuf;
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::{Child, ChildStdin, ChildStdout, Command};
use tracing::{info, warn};

use crate::models::context::EvaluationContextId;
use crate::{AppError, Result};

/// Environment variables inherited by the evaluator process.
pub const ALLOWED_ENV_VARS: &[&str] = &[
    "PATH",
    "HOME",
    "LANG",
    "RUST_LOG",
    "DOTNET_ROOT",
    // Windows-specific variables.
    "USERPROFILE",
    "SystemRoot",
    "TEMP",
    "TMP",
    "USERNAME",
    "APPDATA",
    "LOCALAPPDATA",
    "COMSPEC",
];

/// Name of the variable carrying the owning context id into the evaluator.
pub const CONTEXT_ID_ENV: &str = "INTERACTIVE_CONTEXT_ID";

/// Configuration for spawning an evaluator process.
#[derive(Debug, Clone)]
pub struct SpawnConfig {
    /// Evaluator executable.
    pub command: String,
    /// Arguments passed to the evaluator.
    pub args: Vec<String>,
    /// Working directory; inherits the agent's when `None`.
    pub working_dir: Option<PathBuf>,
    /// Maximum time to wait for the ready line.
    pub startup_timeout: Duration,
}

/// Stdio connection to a freshly spawned evaluator.
#[derive(Debug)]
pub struct EvaluatorConnection {
    /// Child handle; keep it alive so `kill_on_drop` applies.
    pub child: Child,
    /// Evaluator stdin for outbound requests.
    pub stdin: ChildStdin,
    /// Buffered evaluator stdout, positioned after the ready line.
    pub stdout: BufReader<ChildStdout>,
}

/// Spawn an evaluator for `context_id` and wait for its ready line.
///
/// # Errors
///
/// - `AppError::ContextCreation("failed to spawn evaluator: …")`: OS spawn failure.
/// - `AppError::ContextCreation("startup timeout …")`: no ready line in time.
/// - `AppError::ContextCreation("evaluator exited before ready signal")`: early EOF.
pub async fn spawn_evaluator(
    config: &SpawnConfig,
    context_id: EvaluationContextId,
) -> Result<EvaluatorConnection> {
    let inherited = ALLOWED_ENV_VARS
        .iter()
        .filter_map(|&key| std::env::var(key).ok().map(|val| (key, val)));

    let mut cmd = Command::new(&config.command);
    cmd.args(&config.args)
        .env_clear()
        .envs(inherited)
        .env(CONTEXT_ID_ENV, context_id.to_string());

    if let Some(ref dir) = config.working_dir {
        cmd.current_dir(dir);
    }

    cmd.stdin(std::process::Stdio::piped())
        .stdout(std::process::Stdio::piped())
        .stderr(std::process::Stdio::inherit())
        .kill_on_drop(true);

    let mut child = cmd
        .spawn()
        .map_err(|err| AppError::ContextCreation(format!("failed to spawn evaluator: {err}")))?;

    let stdin = child
        .stdin
        .take()
        .ok_or_else(|| AppError::ContextCreation("failed to capture evaluator stdin".into()))?;
    let stdout_raw = child
        .stdout
        .take()
        .ok_or_else(|| AppError::ContextCreation("failed to capture evaluator stdout".into()))?;

    let mut stdout = BufReader::new(stdout_raw);
    if let Err(err) = await_ready(&mut stdout, config.startup_timeout, context_id).await {
        if let Err(kill_err) = child.kill().await {
            warn!(context_id = %context_id, %kill_err, "failed to kill unready evaluator");
        }
        return Err(err);
    }

    Ok(EvaluatorConnection {
        child,
        stdin,
        stdout,
    })
}

/// Consume the evaluator's first stdout line, which signals readiness.
async fn await_ready(
    stdout: &mut BufReader<ChildStdout>,
    timeout: Duration,
    context_id: EvaluationContextId,
) -> Result<()> {
    let mut banner = String::new();
    let read = tokio::time::timeout(timeout, stdout.read_line(&mut banner))
        .await
        .map_err(|_| {
            AppError::ContextCreation(format!(
                "startup timeout: evaluator did not emit ready signal within {timeout:?}"
            ))
        })?
        .map_err(|err| {
            AppError::ContextCreation(format!("failed to read evaluator ready signal: {err}"))
        })?;

    if read == 0 {
        return Err(AppError::ContextCreation(
            "evaluator exited before ready signal".into(),
        ));
    }

    info!(context_id = %context_id, banner = banner.trim(), "evaluator ready");
    Ok(())
}
