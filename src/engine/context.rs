//! Evaluation context: one persistent runtime plus a strictly serialized cell queue.
//!
//! Each context owns a worker task that dequeues cells one at a time, runs
//! them through the [`EvaluationRuntime`], and publishes their events to the
//! session's [`EventBus`]. Submission only touches the shared state under the
//! context lock and pushes onto the worker's queue, so it never waits for
//! evaluation.
//!
//! Abort flips the running cell's [`CancellationToken`]. The worker keeps
//! relaying events until the runtime acknowledges the cancellation or the
//! abort grace period elapses, emits the terminal event, and only then
//! dequeues the next cell.
//!
//! A runtime that panics while analyzing or executing fails only the cell it
//! was working on; the worker stays alive for the rest of the queue.

use std::any::Any;
use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::pin::pin;
use std::sync::Arc;
use std::time::Duration;

use futures_util::FutureExt;
use serde_json::json;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, info_span, warn, Instrument};

use crate::compiler::{EvaluationRuntime, EvaluationSink, ExecutionOutcome, Submission};
use crate::engine::bus::EventBus;
use crate::errors::panic_message;
use crate::models::cell::{CellState, CodeCellId, CodeCellRecord, EvaluationStatus};
use crate::models::context::{ContextState, ContextSummary, EvaluationContextId};
use crate::models::diagnostic::{has_errors, Diagnostic, DiagnosticSeverity};
use crate::models::event::CodeCellEvent;
use crate::models::position::{FileLinePositionSpan, Position, Span};
use crate::{AppError, Result};

/// Diagnostic id attached when the runtime fails to analyze a submission.
pub const ANALYSIS_FAILURE_DIAGNOSTIC_ID: &str = "IA0001";

/// Why an in-flight evaluation is being stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AbortReason {
    /// The client asked for the evaluation to stop.
    Requested,
    /// The context is being destroyed.
    Teardown,
    /// The client transport was lost.
    Disconnect,
}

impl AbortReason {
    fn status(self) -> EvaluationStatus {
        match self {
            Self::Requested | Self::Teardown => EvaluationStatus::Interrupted,
            Self::Disconnect => EvaluationStatus::Disconnected,
        }
    }
}

/// Result of [`EvaluationContext::submit`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SubmitOutcome {
    /// The cell was queued under this identifier.
    Accepted(CodeCellId),
    /// The text is not a complete unit; nothing was queued and no id was allocated.
    Incomplete,
}

/// The cell currently occupying the evaluation slot.
#[derive(Debug)]
struct Running {
    cell: CodeCellId,
    cancel: CancellationToken,
    reason: Option<AbortReason>,
}

/// State shared between the context handle and its worker.
#[derive(Debug)]
struct ContextInner {
    state: ContextState,
    history: Vec<CodeCellRecord>,
    index: HashMap<CodeCellId, usize>,
    pending: usize,
    running: Option<Running>,
    queue: Option<mpsc::UnboundedSender<CodeCellId>>,
}

impl ContextInner {
    fn record_mut(&mut self, id: &CodeCellId) -> Option<&mut CodeCellRecord> {
        let pos = *self.index.get(id)?;
        self.history.get_mut(pos)
    }

    fn idle_state(&self) -> ContextState {
        if self.state == ContextState::Destroyed {
            ContextState::Destroyed
        } else if self.pending > 0 {
            ContextState::Queued
        } else {
            ContextState::Ready
        }
    }
}

/// How the worker concluded one cell before abort reasons are applied.
enum Verdict {
    Status {
        status: EvaluationStatus,
        diagnostics: Vec<Diagnostic>,
        exception: Option<serde_json::Value>,
    },
    Aborted {
        diagnostics: Vec<Diagnostic>,
    },
}

/// A live, stateful execution environment.
pub struct EvaluationContext {
    id: EvaluationContextId,
    inner: Arc<Mutex<ContextInner>>,
    runtime: Arc<dyn EvaluationRuntime>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl std::fmt::Debug for EvaluationContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EvaluationContext")
            .field("id", &self.id)
            .finish_non_exhaustive()
    }
}

impl EvaluationContext {
    /// Create a context around an initialized runtime and start its worker.
    #[must_use]
    pub fn spawn(
        id: EvaluationContextId,
        runtime: Arc<dyn EvaluationRuntime>,
        bus: Arc<EventBus>,
        abort_grace: Duration,
    ) -> Self {
        let (queue_tx, queue_rx) = mpsc::unbounded_channel();
        let inner = Arc::new(Mutex::new(ContextInner {
            state: ContextState::Ready,
            history: Vec::new(),
            index: HashMap::new(),
            pending: 0,
            running: None,
            queue: Some(queue_tx),
        }));

        let worker = Worker {
            id,
            inner: Arc::clone(&inner),
            runtime: Arc::clone(&runtime),
            bus,
            abort_grace,
        };
        let handle = tokio::spawn(
            worker
                .run(queue_rx)
                .instrument(info_span!("context_worker", context_id = %id)),
        );

        Self {
            id,
            inner,
            runtime,
            worker: Mutex::new(Some(handle)),
        }
    }

    /// Context identifier.
    #[must_use]
    pub fn id(&self) -> EvaluationContextId {
        self.id
    }

    /// Check completeness and enqueue a submission.
    ///
    /// # Errors
    ///
    /// - [`AppError::UnknownContext`] if the context has been destroyed.
    /// - Any error the runtime reports from its completeness check.
    pub async fn submit(&self, source: String, cell_id: CodeCellId) -> Result<SubmitOutcome> {
        self.ensure_live().await?;

        if !self.runtime.is_submission_complete(source.clone()).await? {
            debug!(context_id = %self.id, "submission incomplete, not queued");
            return Ok(SubmitOutcome::Incomplete);
        }

        let mut inner = self.inner.lock().await;
        let Some(queue) = inner.queue.clone() else {
            return Err(AppError::UnknownContext(format!(
                "evaluation context {} was destroyed",
                self.id
            )));
        };

        let record = CodeCellRecord::new(cell_id.clone(), self.id, source);
        let position = inner.history.len();
        inner.history.push(record);
        inner.index.insert(cell_id.clone(), position);
        inner.pending += 1;
        if inner.state == ContextState::Ready {
            inner.state = ContextState::Queued;
        }

        if queue.send(cell_id.clone()).is_err() {
            // Worker is gone; resolve the record so it does not stay pending.
            inner.pending -= 1;
            if let Some(record) = inner.record_mut(&cell_id) {
                record.finish(EvaluationStatus::Interrupted);
            }
            return Err(AppError::UnknownContext(format!(
                "evaluation context {} is no longer running",
                self.id
            )));
        }

        info!(context_id = %self.id, code_cell_id = %cell_id, "cell queued");
        Ok(SubmitOutcome::Accepted(cell_id))
    }

    /// Signal the running cell to stop. Returns `false` when nothing was evaluating.
    pub async fn abort(&self, reason: AbortReason) -> bool {
        let mut inner = self.inner.lock().await;
        let Some(running) = inner.running.as_mut() else {
            debug!(context_id = %self.id, "abort with nothing evaluating, ignored");
            return false;
        };

        running.reason.get_or_insert(reason);
        running.cancel.cancel();
        info!(
            context_id = %self.id,
            code_cell_id = %running.cell,
            ?reason,
            "evaluation abort signalled"
        );
        true
    }

    /// Tear the context down, aborting any in-flight cell, and wait for the worker to exit.
    ///
    /// Queued cells that never started are marked `Interrupted` without
    /// emitting events. Calling this more than once is a no-op.
    pub async fn destroy(&self, reason: AbortReason) {
        {
            let mut inner = self.inner.lock().await;
            if inner.state == ContextState::Destroyed {
                return;
            }
            inner.state = ContextState::Destroyed;
            inner.queue = None;

            if let Some(running) = inner.running.as_mut() {
                running.reason.get_or_insert(reason);
                running.cancel.cancel();
            }

            let mut dropped = 0usize;
            for record in &mut inner.history {
                let pending = record.state == CellState::Pending;
                if pending && record.finish(EvaluationStatus::Interrupted) {
                    dropped += 1;
                }
            }
            inner.pending = 0;
            if dropped > 0 {
                info!(context_id = %self.id, dropped, "discarded queued cells on teardown");
            }
        }

        let handle = self.worker.lock().await.take();
        if let Some(handle) = handle {
            if let Err(err) = handle.await {
                warn!(context_id = %self.id, %err, "context worker ended abnormally");
            }
        }
        info!(context_id = %self.id, ?reason, "evaluation context destroyed");
    }

    /// Current lifecycle state.
    pub async fn state(&self) -> ContextState {
        self.inner.lock().await.state
    }

    /// Snapshot of the cell history in submission order.
    pub async fn history(&self) -> Vec<CodeCellRecord> {
        self.inner.lock().await.history.clone()
    }

    /// Snapshot of one cell, if it belongs to this context.
    pub async fn cell(&self, id: &CodeCellId) -> Option<CodeCellRecord> {
        let inner = self.inner.lock().await;
        inner.index.get(id).and_then(|&pos| inner.history.get(pos).cloned())
    }

    /// Listing view of the context.
    pub async fn summary(&self) -> ContextSummary {
        let inner = self.inner.lock().await;
        ContextSummary {
            id: self.id,
            state: inner.state,
            history_len: inner.history.len(),
            current_cell: inner.running.as_ref().map(|r| r.cell.clone()),
        }
    }

    async fn ensure_live(&self) -> Result<()> {
        if self.inner.lock().await.state == ContextState::Destroyed {
            return Err(AppError::UnknownContext(format!(
                "evaluation context {} was destroyed",
                self.id
            )));
        }
        Ok(())
    }
}

// ── Worker ────────────────────────────────────────────────────────────────────

struct Worker {
    id: EvaluationContextId,
    inner: Arc<Mutex<ContextInner>>,
    runtime: Arc<dyn EvaluationRuntime>,
    bus: Arc<EventBus>,
    abort_grace: Duration,
}

impl Worker {
    async fn run(self, mut queue_rx: mpsc::UnboundedReceiver<CodeCellId>) {
        while let Some(cell_id) = queue_rx.recv().await {
            let span = info_span!("cell", code_cell_id = %cell_id);
            self.run_cell(cell_id).instrument(span).await;
        }

        debug!("queue closed, shutting runtime down");
        self.runtime.shutdown().await;
    }

    async fn run_cell(&self, cell_id: CodeCellId) {
        let Some((source, cancel)) = self.begin(&cell_id).await else {
            debug!("cell no longer pending, skipping");
            return;
        };

        self.bus
            .publish(CodeCellEvent::EvaluationStarted {
                code_cell_id: cell_id.clone(),
            })
            .await;

        let submission = Submission {
            code_cell_id: cell_id.clone(),
            source,
        };
        let verdict = self.evaluate(submission, &cancel).await;

        let (status, diagnostics) = self.conclude(&cell_id, verdict).await;
        info!(?status, "cell finished");
        self.bus
            .publish(CodeCellEvent::finished(cell_id, status, diagnostics))
            .await;
    }

    /// Claim the evaluation slot for `cell_id`.
    async fn begin(&self, cell_id: &CodeCellId) -> Option<(String, CancellationToken)> {
        let mut inner = self.inner.lock().await;
        let record = inner.record_mut(cell_id)?;
        if !record.begin() {
            return None;
        }
        let source = record.source.clone();

        let cancel = CancellationToken::new();
        inner.pending = inner.pending.saturating_sub(1);
        inner.state = ContextState::Evaluating;
        inner.running = Some(Running {
            cell: cell_id.clone(),
            cancel: cancel.clone(),
            reason: None,
        });
        Some((source, cancel))
    }

    /// Record the terminal status and release the evaluation slot.
    async fn conclude(
        &self,
        cell_id: &CodeCellId,
        verdict: Verdict,
    ) -> (EvaluationStatus, Vec<Diagnostic>) {
        let mut inner = self.inner.lock().await;
        let reason = inner
            .running
            .take()
            .and_then(|r| r.reason)
            .unwrap_or(AbortReason::Requested);

        let (status, diagnostics, exception) = match verdict {
            Verdict::Status {
                status,
                diagnostics,
                exception,
            } => (status, diagnostics, exception),
            Verdict::Aborted { diagnostics } => (reason.status(), diagnostics, None),
        };

        if let Some(record) = inner.record_mut(cell_id) {
            record.diagnostics.clone_from(&diagnostics);
            record.exception = exception;
            if !record.finish(status) {
                warn!(?status, "cell was already terminal");
            }
        }
        inner.state = inner.idle_state();
        (status, diagnostics)
    }

    async fn evaluate(&self, submission: Submission, cancel: &CancellationToken) -> Verdict {
        let analysis = tokio::select! {
            biased;
            () = cancel.cancelled() => {
                return Verdict::Aborted { diagnostics: Vec::new() };
            }
            result = AssertUnwindSafe(self.runtime.analyze(submission.clone())).catch_unwind() => {
                result.unwrap_or_else(|payload| {
                    let message = describe_panic(&*payload);
                    Err(AppError::Internal(format!("runtime panicked: {message}")))
                })
            }
        };

        let diagnostics = match analysis {
            Ok(diagnostics) => diagnostics,
            Err(AppError::Disconnected(msg)) => {
                warn!(%msg, "runtime disconnected during analysis");
                return Verdict::Status {
                    status: EvaluationStatus::Disconnected,
                    diagnostics: Vec::new(),
                    exception: None,
                };
            }
            Err(err) => {
                warn!(%err, "analysis failed");
                return Verdict::Status {
                    status: EvaluationStatus::ErrorDiagnostic,
                    diagnostics: vec![analysis_failure(&err)],
                    exception: None,
                };
            }
        };

        if has_errors(&diagnostics) {
            debug!(count = diagnostics.len(), "error diagnostics, not executing");
            return Verdict::Status {
                status: EvaluationStatus::ErrorDiagnostic,
                diagnostics,
                exception: None,
            };
        }

        let (event_tx, mut event_rx) = mpsc::unbounded_channel();
        let sink = EvaluationSink::new(submission.code_cell_id.clone(), event_tx);
        let execution = self.runtime.execute(submission, sink, cancel.clone());
        let mut execution = pin!(AssertUnwindSafe(execution).catch_unwind());
        let mut grace = pin!(tokio::time::sleep(self.abort_grace));
        let mut cancel_seen = false;

        let outcome = loop {
            tokio::select! {
                biased;
                Some(event) = event_rx.recv() => {
                    self.bus.publish(event).await;
                }
                outcome = &mut execution => break Some(outcome.unwrap_or_else(panicked)),
                () = cancel.cancelled(), if !cancel_seen => {
                    cancel_seen = true;
                    grace.as_mut().reset(Instant::now() + self.abort_grace);
                    debug!(grace_ms = self.abort_grace.as_millis(), "waiting for runtime to stop");
                }
                () = grace.as_mut(), if cancel_seen => {
                    warn!("runtime ignored abort within grace period, abandoning execution");
                    break None;
                }
            }
        };

        // Output produced before the outcome was observed still belongs to the cell.
        while let Ok(event) = event_rx.try_recv() {
            self.bus.publish(event).await;
        }
        drop(event_rx);

        match outcome {
            Some(ExecutionOutcome::Disconnected(msg)) => {
                warn!(%msg, "runtime disconnected during execution");
                Verdict::Status {
                    status: EvaluationStatus::Disconnected,
                    diagnostics,
                    exception: None,
                }
            }
            None => Verdict::Aborted { diagnostics },
            Some(_) if cancel.is_cancelled() => Verdict::Aborted { diagnostics },
            Some(ExecutionOutcome::Completed) => Verdict::Status {
                status: EvaluationStatus::Success,
                diagnostics,
                exception: None,
            },
            Some(ExecutionOutcome::Exception(exception)) => Verdict::Status {
                status: EvaluationStatus::EvaluationException,
                diagnostics,
                exception: Some(exception),
            },
            Some(ExecutionOutcome::Interrupted) => Verdict::Status {
                status: EvaluationStatus::Interrupted,
                diagnostics,
                exception: None,
            },
        }
    }
}

fn describe_panic(payload: &(dyn Any + Send)) -> String {
    panic_message(payload).unwrap_or_else(|| "non-string panic payload".to_owned())
}

/// Execution outcome standing in for a runtime that panicked mid-cell.
fn panicked(payload: Box<dyn Any + Send>) -> ExecutionOutcome {
    let message = describe_panic(&*payload);
    warn!(%message, "runtime panicked during execution");
    ExecutionOutcome::Exception(json!({ "kind": "panic", "message": message }))
}

fn analysis_failure(err: &AppError) -> Diagnostic {
    Diagnostic {
        id: ANALYSIS_FAILURE_DIAGNOSTIC_ID.to_owned(),
        message: format!("analysis failed: {err}"),
        severity: DiagnosticSeverity::Error,
        span: FileLinePositionSpan::in_buffer(Span::at(Position::new(1, 1))),
    }
}
