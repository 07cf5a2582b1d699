//! Compiler diagnostics forwarded unchanged by the engine.

use serde::{Deserialize, Serialize};

use super::position::FileLinePositionSpan;

/// Diagnostic severity as reported by the compiler collaborator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum DiagnosticSeverity {
    /// Not shown to users by default.
    Hidden,
    /// Informational note.
    Info,
    /// Suspicious but compilable code.
    Warning,
    /// Compilation failure; stops the cell before execution.
    Error,
}

/// One compiler diagnostic attached to a code cell.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Diagnostic {
    /// Compiler-defined diagnostic code (e.g. `CS0103`).
    pub id: String,
    /// Human-readable message.
    pub message: String,
    /// Severity level.
    pub severity: DiagnosticSeverity,
    /// Location of the diagnostic.
    pub span: FileLinePositionSpan,
}

impl Diagnostic {
    /// Whether this diagnostic prevents execution.
    #[must_use]
    pub fn is_error(&self) -> bool {
        self.severity == DiagnosticSeverity::Error
    }
}

/// Whether any diagnostic in `diagnostics` has `Error` severity.
#[must_use]
pub fn has_errors(diagnostics: &[Diagnostic]) -> bool {
    diagnostics.iter().any(Diagnostic::is_error)
}
