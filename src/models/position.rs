//! Source location value types.
//!
//! Positions are 1-based inside the engine. On the wire they are 0-based
//! `{line, character}` pairs; the conversion lives entirely in the serde
//! representation below so no other module has to care.

use std::fmt::{Display, Formatter};

use serde::{Deserialize, Serialize};

/// A 1-based `(line, column)` position in a submitted buffer.
///
/// Field order gives the derived `Ord` document order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(into = "WireLinePosition", from = "WireLinePosition")]
pub struct Position {
    line: u32,
    column: u32,
}

impl Position {
    /// Construct a position from 1-based coordinates.
    ///
    /// Zero coordinates are clamped to 1.
    #[must_use]
    pub fn new(line: u32, column: u32) -> Self {
        Self {
            line: line.max(1),
            column: column.max(1),
        }
    }

    /// Construct a position from 0-based coordinates.
    #[must_use]
    pub fn from_zero_based(line: u32, character: u32) -> Self {
        Self {
            line: line.saturating_add(1),
            column: character.saturating_add(1),
        }
    }

    /// 1-based line number.
    #[must_use]
    pub fn line(self) -> u32 {
        self.line
    }

    /// 1-based column number.
    #[must_use]
    pub fn column(self) -> u32 {
        self.column
    }
}

impl Display for Position {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.line, self.column)
    }
}

/// 0-based wire form of a [`Position`].
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
struct WireLinePosition {
    line: u32,
    character: u32,
}

impl From<Position> for WireLinePosition {
    fn from(pos: Position) -> Self {
        Self {
            line: pos.line - 1,
            character: pos.column - 1,
        }
    }
}

impl From<WireLinePosition> for Position {
    fn from(wire: WireLinePosition) -> Self {
        Self::from_zero_based(wire.line, wire.character)
    }
}

/// An ordered `(start, end)` pair of positions with `start <= end`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "RawSpan")]
pub struct Span {
    start: Position,
    end: Position,
}

impl Span {
    /// Construct a span, returning `None` when `end` precedes `start`.
    #[must_use]
    pub fn new(start: Position, end: Position) -> Option<Self> {
        (start <= end).then_some(Self { start, end })
    }

    /// Zero-width span at `pos`.
    #[must_use]
    pub fn at(pos: Position) -> Self {
        Self {
            start: pos,
            end: pos,
        }
    }

    /// Start position (inclusive).
    #[must_use]
    pub fn start(self) -> Position {
        self.start
    }

    /// End position.
    #[must_use]
    pub fn end(self) -> Position {
        self.end
    }
}

#[derive(Deserialize)]
struct RawSpan {
    start: Position,
    end: Position,
}

impl TryFrom<RawSpan> for Span {
    type Error = String;

    fn try_from(raw: RawSpan) -> std::result::Result<Self, Self::Error> {
        Self::new(raw.start, raw.end)
            .ok_or_else(|| format!("span end {} precedes start {}", raw.end, raw.start))
    }
}

/// A span qualified by the source path it refers to.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileLinePositionSpan {
    /// Source path; empty for the literal submitted buffer.
    pub path: String,
    /// Whether `path` was remapped (e.g. by a line directive) from the submitted buffer.
    pub has_mapped_path: bool,
    /// Location within `path`.
    pub span: Span,
}

impl FileLinePositionSpan {
    /// Span inside the submitted buffer itself.
    #[must_use]
    pub fn in_buffer(span: Span) -> Self {
        Self {
            path: String::new(),
            has_mapped_path: false,
            span,
        }
    }
}
