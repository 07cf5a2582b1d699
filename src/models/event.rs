//! Code cell events streamed to subscribers.
//!
//! Events form a closed tagged union. On the wire the tag is the `$type`
//! field and every variant carries `codeCellId`.

use serde::{Deserialize, Serialize};

use super::cell::{CodeCellId, EvaluationStatus};
use super::diagnostic::Diagnostic;

/// How a result relates to earlier results for the same cell.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ResultHandling {
    /// Replaces any pending display for the cell.
    #[default]
    Replace,
    /// Added to the existing display.
    Append,
}

/// Notification emitted while a cell moves through evaluation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "$type")]
pub enum CodeCellEvent {
    /// The cell was dequeued and evaluation began.
    #[serde(rename = "CodeCellEvaluationStartedEvent", rename_all = "camelCase")]
    EvaluationStarted {
        /// Originating cell.
        code_cell_id: CodeCellId,
    },
    /// The evaluator produced a value.
    #[serde(rename = "CodeCellResultEvent", rename_all = "camelCase")]
    Result {
        /// Originating cell.
        code_cell_id: CodeCellId,
        /// Display handling mode.
        result_handling: ResultHandling,
        /// Declared type name of the value.
        #[serde(rename = "type")]
        type_name: Option<String>,
        /// Structured value representations; `None` for no displayable value.
        value_representations: Option<Vec<serde_json::Value>>,
    },
    /// A segment of captured standard output or error.
    #[serde(rename = "CapturedOutputSegment", rename_all = "camelCase")]
    CapturedOutputSegment {
        /// Originating cell.
        code_cell_id: CodeCellId,
        /// Originating stream descriptor (1 = stdout, 2 = stderr).
        file_descriptor: i32,
        /// Captured text.
        value: String,
    },
    /// The cell reached its terminal status.
    #[serde(rename = "CodeCellEvaluationFinishedEvent", rename_all = "camelCase")]
    EvaluationFinished {
        /// Originating cell.
        code_cell_id: CodeCellId,
        /// Terminal status.
        status: EvaluationStatus,
        /// Whether the client should open a new cell.
        should_start_new_cell: bool,
        /// Final diagnostics list.
        diagnostics: Vec<Diagnostic>,
    },
}

impl CodeCellEvent {
    /// Cell this event belongs to.
    #[must_use]
    pub fn code_cell_id(&self) -> &CodeCellId {
        match self {
            Self::EvaluationStarted { code_cell_id }
            | Self::Result { code_cell_id, .. }
            | Self::CapturedOutputSegment { code_cell_id, .. }
            | Self::EvaluationFinished { code_cell_id, .. } => code_cell_id,
        }
    }

    /// Whether this is the terminal event for its cell.
    #[must_use]
    pub fn is_finished(&self) -> bool {
        matches!(self, Self::EvaluationFinished { .. })
    }

    /// Build an [`EvaluationFinished`](Self::EvaluationFinished) event.
    #[must_use]
    pub fn finished(
        code_cell_id: CodeCellId,
        status: EvaluationStatus,
        diagnostics: Vec<Diagnostic>,
    ) -> Self {
        Self::EvaluationFinished {
            code_cell_id,
            status,
            should_start_new_cell: status.should_start_new_cell(),
            diagnostics,
        }
    }
}
