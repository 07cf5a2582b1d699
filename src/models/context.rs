//! Evaluation context identity, configuration, and lifecycle state.

use std::fmt::{Display, Formatter};

use serde::{Deserialize, Serialize};

use super::cell::CodeCellId;

/// Opaque identifier of an evaluation context; never reused within a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EvaluationContextId(u64);

impl EvaluationContextId {
    /// Wrap a raw identifier value.
    #[must_use]
    pub fn new(raw: u64) -> Self {
        Self(raw)
    }

    /// Raw identifier value.
    #[must_use]
    pub fn get(self) -> u64 {
        self.0
    }
}

impl Display for EvaluationContextId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Lifecycle state of an evaluation context.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContextState {
    /// Idle, nothing queued.
    Ready,
    /// Cells are waiting but none has been dequeued yet.
    Queued,
    /// A cell is evaluating.
    Evaluating,
    /// Torn down; accepts no further work.
    Destroyed,
}

/// Compiler/runtime configuration supplied when creating a context.
///
/// The engine does not interpret anything besides `target_runtime`; the
/// remaining fields are forwarded to the compiler collaborator verbatim.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ContextConfiguration {
    /// Target runtime identifier the compiler should initialize against.
    pub target_runtime: Option<String>,
    /// Namespaces/modules imported into the context on creation.
    pub initial_imports: Vec<String>,
    /// Collaborator-specific options.
    pub options: serde_json::Value,
}

/// Point-in-time view of one context for listing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContextSummary {
    /// Context identifier.
    pub id: EvaluationContextId,
    /// Current lifecycle state.
    pub state: ContextState,
    /// Number of cells submitted to this context.
    pub history_len: usize,
    /// Cell currently evaluating, if any.
    pub current_cell: Option<CodeCellId>,
}
