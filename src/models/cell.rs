//! Code cell model and its evaluation state machine.

use std::fmt::{Display, Formatter};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::context::EvaluationContextId;
use super::diagnostic::Diagnostic;

/// Opaque identifier of a submitted code cell.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CodeCellId(String);

impl CodeCellId {
    /// Allocate a fresh random identifier.
    #[must_use]
    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    /// Borrow the identifier as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<String> for CodeCellId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl From<&str> for CodeCellId {
    fn from(value: &str) -> Self {
        Self(value.to_owned())
    }
}

impl Display for CodeCellId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Terminal outcome of a cell evaluation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EvaluationStatus {
    /// Ran to completion without an unhandled fault.
    Success,
    /// The evaluator connection was lost; the final state is unknown.
    Disconnected,
    /// Evaluation was aborted.
    Interrupted,
    /// Analysis produced an error diagnostic; nothing was executed.
    ErrorDiagnostic,
    /// User code raised during execution.
    EvaluationException,
}

impl EvaluationStatus {
    /// Whether the client should open a fresh cell after this outcome.
    #[must_use]
    pub fn should_start_new_cell(self) -> bool {
        matches!(self, Self::Success)
    }
}

/// Lifecycle state of a code cell.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum CellState {
    /// Accepted and waiting in the context queue.
    Pending,
    /// Dequeued and currently evaluating.
    Evaluating,
    /// Reached a terminal status.
    Finished(EvaluationStatus),
}

impl CellState {
    /// Whether the state is terminal.
    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Finished(_))
    }
}

/// Historical record of one submission.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CodeCellRecord {
    /// Cell identifier.
    pub id: CodeCellId,
    /// Owning evaluation context.
    pub evaluation_context_id: EvaluationContextId,
    /// Submitted source text.
    pub source: String,
    /// Whether the submission was a syntactically complete unit.
    pub is_submission_complete: bool,
    /// Diagnostics produced by analysis.
    pub diagnostics: Vec<Diagnostic>,
    /// Current lifecycle state.
    pub state: CellState,
    /// Exception value attached when the status is `EvaluationException`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub exception: Option<serde_json::Value>,
    /// Submission timestamp.
    pub submitted_at: DateTime<Utc>,
    /// Dequeue timestamp.
    pub started_at: Option<DateTime<Utc>>,
    /// Terminal-status timestamp.
    pub finished_at: Option<DateTime<Utc>>,
}

impl CodeCellRecord {
    /// Construct a `Pending` record for a complete submission.
    #[must_use]
    pub fn new(id: CodeCellId, evaluation_context_id: EvaluationContextId, source: String) -> Self {
        Self {
            id,
            evaluation_context_id,
            source,
            is_submission_complete: true,
            diagnostics: Vec::new(),
            state: CellState::Pending,
            exception: None,
            submitted_at: Utc::now(),
            started_at: None,
            finished_at: None,
        }
    }

    /// Determine whether a lifecycle transition is permitted.
    #[must_use]
    pub fn can_transition_to(&self, next: CellState) -> bool {
        matches!(
            (self.state, next),
            (CellState::Pending, CellState::Evaluating | CellState::Finished(_))
                | (CellState::Evaluating, CellState::Finished(_))
        )
    }

    /// Move `Pending → Evaluating`. Returns `false` if the transition is not allowed.
    pub fn begin(&mut self) -> bool {
        if !self.can_transition_to(CellState::Evaluating) {
            return false;
        }
        self.state = CellState::Evaluating;
        self.started_at = Some(Utc::now());
        true
    }

    /// Move to a terminal status. Returns `false` if the cell is already terminal.
    pub fn finish(&mut self, status: EvaluationStatus) -> bool {
        let next = CellState::Finished(status);
        if !self.can_transition_to(next) {
            return false;
        }
        self.state = next;
        self.finished_at = Some(Utc::now());
        true
    }

    /// Terminal status, if reached.
    #[must_use]
    pub fn status(&self) -> Option<EvaluationStatus> {
        match self.state {
            CellState::Finished(status) => Some(status),
            CellState::Pending | CellState::Evaluating => None,
        }
    }
}
