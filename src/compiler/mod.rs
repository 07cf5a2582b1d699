//! Compiler collaborator abstraction.
//!
//! The [`Compiler`] trait decouples the evaluation engine from whatever
//! actually turns source text into something runnable. A compiler creates one
//! [`EvaluationRuntime`] per evaluation context; the runtime owns the
//! accumulated execution state of that context and is only ever asked to
//! execute one cell at a time.
//!
//! Values and captured output produced while a cell runs are pushed through
//! an [`EvaluationSink`]. The engine relays them in arrival order and drops
//! anything pushed after the cell's terminal status has been decided.

pub mod process;

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::models::cell::CodeCellId;
use crate::models::context::{ContextConfiguration, EvaluationContextId};
use crate::models::diagnostic::Diagnostic;
use crate::models::event::{CodeCellEvent, ResultHandling};
use crate::Result;

/// Boxed future returned by collaborator trait methods.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// A complete submission handed to the runtime for analysis or execution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Submission {
    /// Cell being evaluated.
    pub code_cell_id: CodeCellId,
    /// Source text of the cell.
    pub source: String,
}

/// How the runtime concluded an execution request.
#[derive(Debug, Clone, PartialEq)]
pub enum ExecutionOutcome {
    /// The cell ran to completion.
    Completed,
    /// User code raised; the payload describes the exception.
    Exception(serde_json::Value),
    /// The runtime observed the cancellation signal and stopped.
    Interrupted,
    /// The runtime lost its connection before a result was determined.
    Disconnected(String),
}

/// Per-cell channel through which a runtime reports results and output.
#[derive(Debug, Clone)]
pub struct EvaluationSink {
    code_cell_id: CodeCellId,
    tx: mpsc::UnboundedSender<CodeCellEvent>,
}

impl EvaluationSink {
    /// Create a sink that tags everything with `code_cell_id`.
    #[must_use]
    pub fn new(code_cell_id: CodeCellId, tx: mpsc::UnboundedSender<CodeCellEvent>) -> Self {
        Self { code_cell_id, tx }
    }

    /// Cell this sink reports for.
    #[must_use]
    pub fn code_cell_id(&self) -> &CodeCellId {
        &self.code_cell_id
    }

    /// Report a produced value.
    ///
    /// Returns `false` once the cell has been finalized and the event was dropped.
    pub fn result(
        &self,
        result_handling: ResultHandling,
        type_name: Option<String>,
        value_representations: Option<Vec<serde_json::Value>>,
    ) -> bool {
        self.tx
            .send(CodeCellEvent::Result {
                code_cell_id: self.code_cell_id.clone(),
                result_handling,
                type_name,
                value_representations,
            })
            .is_ok()
    }

    /// Report a captured output segment.
    ///
    /// Returns `false` once the cell has been finalized and the event was dropped.
    pub fn output(&self, file_descriptor: i32, value: impl Into<String>) -> bool {
        self.tx
            .send(CodeCellEvent::CapturedOutputSegment {
                code_cell_id: self.code_cell_id.clone(),
                file_descriptor,
                value: value.into(),
            })
            .is_ok()
    }

    /// Whether the engine has stopped accepting events for this cell.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

/// Factory for per-context runtimes.
pub trait Compiler: Send + Sync {
    /// Initialize the runtime state for a new evaluation context.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::ContextCreation`](crate::AppError::ContextCreation)
    /// when the runtime cannot be initialized (missing target runtime,
    /// invalid configuration, evaluator failed to start).
    fn initialize(
        &self,
        context_id: EvaluationContextId,
        configuration: ContextConfiguration,
    ) -> BoxFuture<'_, Result<Arc<dyn EvaluationRuntime>>>;
}

/// Stateful runtime backing one evaluation context.
///
/// The engine guarantees that `analyze` and `execute` are never called
/// concurrently for the same runtime. `is_submission_complete` may be called
/// at any time, including while a cell executes.
pub trait EvaluationRuntime: Send + Sync {
    /// Whether `source` is a syntactically complete unit.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::Compiler`](crate::AppError::Compiler) or
    /// [`AppError::Disconnected`](crate::AppError::Disconnected) when the
    /// check could not be performed.
    fn is_submission_complete(&self, source: String) -> BoxFuture<'_, Result<bool>>;

    /// Produce diagnostics for a complete submission.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::Compiler`](crate::AppError::Compiler) or
    /// [`AppError::Disconnected`](crate::AppError::Disconnected) when analysis
    /// could not be performed.
    fn analyze(&self, submission: Submission) -> BoxFuture<'_, Result<Vec<Diagnostic>>>;

    /// Execute a submission that analyzed without errors.
    ///
    /// `cancel` fires when the cell is aborted. Cancellation is cooperative:
    /// the runtime should stop promptly and return
    /// [`ExecutionOutcome::Interrupted`].
    fn execute(
        &self,
        submission: Submission,
        sink: EvaluationSink,
        cancel: CancellationToken,
    ) -> BoxFuture<'_, ExecutionOutcome>;

    /// Release the runtime's resources. Called once when the context is destroyed.
    fn shutdown(&self) -> BoxFuture<'_, ()>;
}
