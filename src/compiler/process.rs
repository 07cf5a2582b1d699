//! Process-backed compiler: one external evaluator per evaluation context.
//!
//! The evaluator speaks NDJSON over its stdio. Requests carry a string `id`
//! and are answered by a response with the same `id`; while a cell executes
//! the evaluator streams `cell/result` and `cell/output` notifications ahead
//! of the execute response. Because all of this arrives on one ordered
//! stream, results always reach the cell's sink before its terminal outcome.
//!
//! # Session lifecycle
//!
//! 1. [`ProcessCompiler::initialize`] spawns the evaluator and waits for its
//!    ready line.
//! 2. [`ProcessRuntime::connect`] starts the reader, writer, and router tasks.
//! 3. An `initialize` request hands the context configuration over.
//! 4. On EOF every pending request fails with `Disconnected`, which the engine
//!    turns into a `Disconnected` cell status.

use std::collections::HashMap;
use std::pin::pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use serde::Deserialize;
use serde_json::{json, Value};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::process::Child;
use tokio::sync::{mpsc, oneshot, Mutex};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::compiler::{
    BoxFuture, Compiler, EvaluationRuntime, EvaluationSink, ExecutionOutcome, Submission,
};
use crate::evaluator::reader::{run_reader, InboundMessage};
use crate::evaluator::spawner::{spawn_evaluator, SpawnConfig};
use crate::evaluator::writer::run_writer;
use crate::models::context::{ContextConfiguration, EvaluationContextId};
use crate::models::diagnostic::Diagnostic;
use crate::{AppError, Result};

/// Capacity of the outbound request channel.
const OUTBOUND_CAPACITY: usize = 64;

/// Capacity of the inbound message channel.
const INBOUND_CAPACITY: usize = 256;

/// [`Compiler`] that spawns an evaluator process per context.
#[derive(Debug, Clone)]
pub struct ProcessCompiler {
    spawn: SpawnConfig,
}

impl ProcessCompiler {
    /// Create a compiler that launches evaluators per `spawn`.
    #[must_use]
    pub fn new(spawn: SpawnConfig) -> Self {
        Self { spawn }
    }
}

impl Compiler for ProcessCompiler {
    fn initialize(
        &self,
        context_id: EvaluationContextId,
        configuration: ContextConfiguration,
    ) -> BoxFuture<'_, Result<Arc<dyn EvaluationRuntime>>> {
        Box::pin(async move {
            let conn = spawn_evaluator(&self.spawn, context_id).await?;
            let runtime =
                ProcessRuntime::connect(context_id, conn.stdout, conn.stdin, Some(conn.child));

            if let Err(err) = runtime.initialize(&configuration).await {
                runtime.shutdown().await;
                return Err(AppError::ContextCreation(format!(
                    "evaluator rejected initialization: {err}"
                )));
            }

            info!(context_id = %context_id, "evaluator initialized");
            Ok(runtime as Arc<dyn EvaluationRuntime>)
        })
    }
}

// ── Runtime ───────────────────────────────────────────────────────────────────

type Waiter = oneshot::Sender<std::result::Result<Value, String>>;

/// Requests awaiting a response, plus the reason the stream closed (if it has).
#[derive(Debug, Default)]
struct PendingRequests {
    closed: Option<String>,
    waiters: HashMap<String, Waiter>,
}

#[derive(Debug, Deserialize)]
struct CheckReply {
    complete: bool,
}

#[derive(Debug, Deserialize)]
struct AnalyzeReply {
    #[serde(default)]
    diagnostics: Vec<Diagnostic>,
}

#[derive(Debug, Deserialize)]
struct ExecuteReply {
    status: String,
    exception: Option<Value>,
}

/// [`EvaluationRuntime`] backed by an NDJSON evaluator stream.
#[derive(Debug)]
pub struct ProcessRuntime {
    context_id: EvaluationContextId,
    outbound: mpsc::Sender<Value>,
    pending: Arc<Mutex<PendingRequests>>,
    active: Arc<Mutex<Option<EvaluationSink>>>,
    next_request: AtomicU64,
    cancel: CancellationToken,
    child: Mutex<Option<Child>>,
}

impl ProcessRuntime {
    /// Start the reader, writer, and router tasks over an evaluator stream.
    ///
    /// `child` is kept so [`shutdown`](EvaluationRuntime::shutdown) can kill it;
    /// pass `None` for in-memory streams.
    pub fn connect<R, W>(
        context_id: EvaluationContextId,
        reader: R,
        writer: W,
        child: Option<Child>,
    ) -> Arc<Self>
    where
        R: AsyncRead + Unpin + Send + 'static,
        W: AsyncWrite + Unpin + Send + 'static,
    {
        let cancel = CancellationToken::new();
        let (outbound_tx, outbound_rx) = mpsc::channel(OUTBOUND_CAPACITY);
        let (inbound_tx, inbound_rx) = mpsc::channel(INBOUND_CAPACITY);
        let pending = Arc::new(Mutex::new(PendingRequests::default()));
        let active = Arc::new(Mutex::new(None));

        let writer_cancel = cancel.clone();
        tokio::spawn(async move {
            if let Err(err) = run_writer(context_id, writer, outbound_rx, writer_cancel).await {
                warn!(context_id = %context_id, %err, "evaluator writer stopped");
            }
        });

        let reader_cancel = cancel.clone();
        tokio::spawn(async move {
            if let Err(err) = run_reader(context_id, reader, inbound_tx, reader_cancel).await {
                warn!(context_id = %context_id, %err, "evaluator reader stopped");
            }
        });

        tokio::spawn(route_inbound(
            context_id,
            inbound_rx,
            Arc::clone(&pending),
            Arc::clone(&active),
        ));

        Arc::new(Self {
            context_id,
            outbound: outbound_tx,
            pending,
            active,
            next_request: AtomicU64::new(1),
            cancel,
            child: Mutex::new(child),
        })
    }

    /// Send the context configuration to the evaluator.
    ///
    /// # Errors
    ///
    /// Returns the evaluator's error as [`AppError::Compiler`], or
    /// [`AppError::Disconnected`] if the stream closed.
    pub async fn initialize(&self, configuration: &ContextConfiguration) -> Result<()> {
        self.request("initialize", json!({ "configuration": configuration }))
            .await
            .map(|_| ())
    }

    async fn request(&self, method: &str, params: Value) -> Result<Value> {
        let id = self.next_request.fetch_add(1, Ordering::Relaxed).to_string();

        let rx = {
            let mut pending = self.pending.lock().await;
            if let Some(ref reason) = pending.closed {
                return Err(AppError::Disconnected(reason.clone()));
            }
            let (tx, rx) = oneshot::channel();
            pending.waiters.insert(id.clone(), tx);
            rx
        };

        let msg = json!({ "id": id, "method": method, "params": params });
        if self.outbound.send(msg).await.is_err() {
            self.pending.lock().await.waiters.remove(&id);
            return Err(AppError::Disconnected("evaluator writer closed".into()));
        }

        match rx.await {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(message)) => Err(AppError::Compiler(format!("{method}: {message}"))),
            Err(_) => {
                let reason = self.pending.lock().await.closed.clone();
                Err(AppError::Disconnected(
                    reason.unwrap_or_else(|| "evaluator stream closed".into()),
                ))
            }
        }
    }

    async fn notify(&self, method: &str, params: Value) -> Result<()> {
        self.outbound
            .send(json!({ "method": method, "params": params }))
            .await
            .map_err(|_| AppError::Disconnected("evaluator writer closed".into()))
    }
}

impl Drop for ProcessRuntime {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

impl EvaluationRuntime for ProcessRuntime {
    fn is_submission_complete(&self, source: String) -> BoxFuture<'_, Result<bool>> {
        Box::pin(async move {
            let value = self
                .request("submission/check", json!({ "source": source }))
                .await?;
            let reply: CheckReply = serde_json::from_value(value)
                .map_err(|e| AppError::Protocol(format!("invalid submission/check reply: {e}")))?;
            Ok(reply.complete)
        })
    }

    fn analyze(&self, submission: Submission) -> BoxFuture<'_, Result<Vec<Diagnostic>>> {
        Box::pin(async move {
            let value = self
                .request(
                    "submission/analyze",
                    json!({
                        "codeCellId": submission.code_cell_id,
                        "source": submission.source,
                    }),
                )
                .await?;
            let reply: AnalyzeReply = serde_json::from_value(value).map_err(|e| {
                AppError::Protocol(format!("invalid submission/analyze reply: {e}"))
            })?;
            Ok(reply.diagnostics)
        })
    }

    fn execute(
        &self,
        submission: Submission,
        sink: EvaluationSink,
        cancel: CancellationToken,
    ) -> BoxFuture<'_, ExecutionOutcome> {
        Box::pin(async move {
            let cell_id = submission.code_cell_id.clone();
            *self.active.lock().await = Some(sink);

            let mut request = pin!(self.request(
                "submission/execute",
                json!({
                    "codeCellId": submission.code_cell_id,
                    "source": submission.source,
                }),
            ));
            let mut abort_sent = false;

            let reply = loop {
                tokio::select! {
                    biased;
                    reply = &mut request => break reply,
                    () = cancel.cancelled(), if !abort_sent => {
                        abort_sent = true;
                        debug!(
                            context_id = %self.context_id,
                            code_cell_id = %cell_id,
                            "forwarding abort to evaluator"
                        );
                        if let Err(err) = self
                            .notify("execution/abort", json!({ "codeCellId": cell_id }))
                            .await
                        {
                            warn!(context_id = %self.context_id, %err, "failed to forward abort");
                        }
                    }
                }
            };

            self.active.lock().await.take();

            match reply {
                Ok(value) => execution_outcome(value),
                Err(AppError::Disconnected(reason)) => ExecutionOutcome::Disconnected(reason),
                Err(err) => ExecutionOutcome::Exception(json!({ "message": err.to_string() })),
            }
        })
    }

    fn shutdown(&self) -> BoxFuture<'_, ()> {
        Box::pin(async move {
            self.cancel.cancel();
            {
                let mut pending = self.pending.lock().await;
                pending
                    .closed
                    .get_or_insert_with(|| "evaluator shut down".to_owned());
                pending.waiters.clear();
            }

            if let Some(mut child) = self.child.lock().await.take() {
                if let Err(err) = child.kill().await {
                    warn!(context_id = %self.context_id, %err, "failed to kill evaluator process");
                }
            }
            debug!(context_id = %self.context_id, "evaluator runtime shut down");
        })
    }
}

fn execution_outcome(value: Value) -> ExecutionOutcome {
    match serde_json::from_value::<ExecuteReply>(value) {
        Ok(reply) => match reply.status.as_str() {
            "success" => ExecutionOutcome::Completed,
            "interrupted" => ExecutionOutcome::Interrupted,
            "exception" => ExecutionOutcome::Exception(reply.exception.unwrap_or(Value::Null)),
            other => ExecutionOutcome::Exception(
                json!({ "message": format!("unknown execution status `{other}`") }),
            ),
        },
        Err(e) => ExecutionOutcome::Exception(
            json!({ "message": format!("invalid submission/execute reply: {e}") }),
        ),
    }
}

/// Dispatch inbound messages to request waiters and the active cell sink.
async fn route_inbound(
    context_id: EvaluationContextId,
    mut inbound_rx: mpsc::Receiver<InboundMessage>,
    pending: Arc<Mutex<PendingRequests>>,
    active: Arc<Mutex<Option<EvaluationSink>>>,
) {
    let mut close_reason = "evaluator reader stopped".to_owned();

    while let Some(msg) = inbound_rx.recv().await {
        match msg {
            InboundMessage::Response { id, result } => {
                let waiter = pending.lock().await.waiters.remove(&id);
                match waiter {
                    Some(tx) => {
                        let _ = tx.send(result);
                    }
                    None => debug!(%context_id, id, "response for unknown request dropped"),
                }
            }
            InboundMessage::CellResult {
                code_cell_id,
                result_handling,
                type_name,
                value_representations,
            } => {
                let guard = active.lock().await;
                match guard.as_ref() {
                    Some(sink) if *sink.code_cell_id() == code_cell_id => {
                        sink.result(result_handling, type_name, value_representations);
                    }
                    _ => debug!(%context_id, %code_cell_id, "result for inactive cell dropped"),
                }
            }
            InboundMessage::CellOutput {
                code_cell_id,
                file_descriptor,
                value,
            } => {
                let guard = active.lock().await;
                match guard.as_ref() {
                    Some(sink) if *sink.code_cell_id() == code_cell_id => {
                        sink.output(file_descriptor, value);
                    }
                    _ => debug!(%context_id, %code_cell_id, "output for inactive cell dropped"),
                }
            }
            InboundMessage::Closed { reason } => {
                close_reason = reason;
                break;
            }
        }
    }

    warn!(context_id = %context_id, reason = %close_reason, "evaluator stream closed");
    let mut pending = pending.lock().await;
    pending.closed.get_or_insert(close_reason);
    // Dropping the senders wakes every waiter with `Disconnected`.
    pending.waiters.clear();
    drop(pending);
    active.lock().await.take();
}
