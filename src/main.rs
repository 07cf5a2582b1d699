#![forbid(unsafe_code)]

//! `interactive-agent` is the interactive code-evaluation agent binary.
//!
//! Bootstraps configuration and serves client sessions over stdio or a local
//! IPC socket. Each session owns its evaluation contexts; every context is
//! backed by its own evaluator process.

use std::future::Future;
use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, ValueEnum};
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use tracing_subscriber::{fmt, EnvFilter};

use interactive_agent::compiler::process::ProcessCompiler;
use interactive_agent::compiler::Compiler;
use interactive_agent::config::{GlobalConfig, TransportKind};
use interactive_agent::session::{ipc, transport, ClientSession};
use interactive_agent::{AppError, Result};

#[derive(Debug, Copy, Clone, Eq, PartialEq, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

#[derive(Debug, Copy, Clone, Eq, PartialEq, ValueEnum)]
enum TransportArg {
    Stdio,
    Ipc,
}

impl From<TransportArg> for TransportKind {
    fn from(arg: TransportArg) -> Self {
        match arg {
            TransportArg::Stdio => Self::Stdio,
            TransportArg::Ipc => Self::Ipc,
        }
    }
}

#[derive(Debug, Parser)]
#[command(
    name = "interactive-agent",
    about = "Interactive code-evaluation agent",
    version,
    long_about = None
)]
struct Cli {
    /// Path to the TOML configuration file.
    #[arg(long)]
    config: PathBuf,

    /// Log output format (text or json). Logs always go to stderr.
    #[arg(long, value_enum, default_value_t = LogFormat::Text)]
    log_format: LogFormat,

    /// Override the configured client transport.
    #[arg(long, value_enum)]
    transport: Option<TransportArg>,

    /// Override the configured IPC socket name.
    #[arg(long)]
    ipc_name: Option<String>,
}

fn main() -> Result<()> {
    let args = Cli::parse();
    init_tracing(args.log_format)?;
    info!("interactive-agent bootstrap");

    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .map_err(|err| AppError::Config(format!("failed to build tokio runtime: {err}")))?
        .block_on(run(args))
}

async fn run(args: Cli) -> Result<()> {
    // ── Load configuration ──────────────────────────────
    let mut config = GlobalConfig::load_from_path(&args.config)?;
    if let Some(transport) = args.transport {
        config.transport = transport.into();
    }
    if let Some(name) = args.ipc_name {
        config.ipc_name = name;
    }
    info!(transport = ?config.transport, "configuration loaded");

    let compiler: Arc<dyn Compiler> = Arc::new(ProcessCompiler::new(config.spawn_config()));
    let abort_grace = config.abort_grace();
    let ct = CancellationToken::new();

    // ── Serve ───────────────────────────────────────────
    match config.transport {
        TransportKind::Stdio => {
            let session = ClientSession::new(compiler, abort_grace);
            let mut stdio_handle = tokio::spawn(transport::serve_stdio(session, ct.clone()));

            let finished = tokio::select! {
                () = shutdown_signal() => None,
                joined = &mut stdio_handle => Some(joined),
            };
            let joined = match finished {
                Some(joined) => joined,
                None => {
                    info!("shutdown signal received");
                    ct.cancel();
                    stdio_handle.await
                }
            };

            match joined {
                Ok(Ok(())) => {}
                Ok(Err(err)) => error!(%err, "stdio transport failed"),
                Err(err) => error!(%err, "stdio transport task failed"),
            }
        }
        TransportKind::Ipc => {
            let ipc_handle =
                ipc::spawn_ipc_server(&config.ipc_name, compiler, abort_grace, ct.clone())?;
            info!("IPC transport ready");

            shutdown_signal().await;
            info!("shutdown signal received");
            ct.cancel();

            if let Err(err) = ipc_handle.await {
                error!(%err, "ipc server task failed");
            }
        }
    }

    info!("interactive-agent shut down");
    Ok(())
}

async fn shutdown_signal() {
    #[cfg(unix)]
    {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    () = wait_for_signal("ctrl-c", tokio::signal::ctrl_c()) => {}
                    _ = sigterm.recv() => {}
                }
            }
            Err(err) => {
                tracing::warn!(%err, "failed to register SIGTERM handler, using ctrl-c only");
                wait_for_signal("ctrl-c", tokio::signal::ctrl_c()).await;
            }
        }
    }

    #[cfg(not(unix))]
    wait_for_signal("ctrl-c", tokio::signal::ctrl_c()).await;
}

/// Resolve once `signal` is delivered.
///
/// A handler that fails is logged and never resolves, so it cannot shut the
/// agent down on its own.
async fn wait_for_signal<F>(name: &str, signal: F)
where
    F: Future<Output = std::io::Result<()>>,
{
    if let Err(err) = signal.await {
        error!(%err, signal = name, "signal handler failed");
        std::future::pending::<()>().await;
    }
}

fn init_tracing(log_format: LogFormat) -> Result<()> {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let subscriber = fmt().with_env_filter(env_filter).with_writer(std::io::stderr);

    match log_format {
        LogFormat::Text => subscriber
            .try_init()
            .map_err(|err| AppError::Config(format!("failed to init tracing: {err}")))?,
        LogFormat::Json => subscriber
            .json()
            .try_init()
            .map_err(|err| AppError::Config(format!("failed to init tracing: {err}")))?,
    }

    Ok(())
}
