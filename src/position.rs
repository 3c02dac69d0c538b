//! Document positions and ranges.
//!
//! Lines and columns are 1-based; columns count bytes from the line
//! start. Column `line_length + 1` is the valid insertion point at the
//! end of a line.

use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;

/// A 1-based `(line, column)` position.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Position {
    pub line: usize,
    pub column: usize,
}

impl Position {
    pub fn new(line: usize, column: usize) -> Position {
        Position { line, column }
    }

    /// Strictly before `other` in document order.
    pub fn is_before(&self, other: &Position) -> bool {
        if self.line < other.line {
            return true;
        }
        self.line == other.line && self.column < other.column
    }

    pub fn is_before_or_equal(&self, other: &Position) -> bool {
        if self.line < other.line {
            return true;
        }
        self.line == other.line && self.column <= other.column
    }
}

impl fmt::Display for Position {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({},{})", self.line, self.column)
    }
}

/// A `[start, end)` span between two positions. `start` must not come
/// after `end`; an equal pair is an empty range (a caret).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Range {
    pub start_line: usize,
    pub start_column: usize,
    pub end_line: usize,
    pub end_column: usize,
}

impl Range {
    pub fn new(start_line: usize, start_column: usize, end_line: usize, end_column: usize) -> Range {
        Range {
            start_line,
            start_column,
            end_line,
            end_column,
        }
    }

    pub fn from_positions(start: Position, end: Position) -> Range {
        Range::new(start.line, start.column, end.line, end.column)
    }

    pub fn start_position(&self) -> Position {
        Position::new(self.start_line, self.start_column)
    }

    pub fn end_position(&self) -> Position {
        Position::new(self.end_line, self.end_column)
    }

    pub fn is_empty(&self) -> bool {
        self.start_line == self.end_line && self.start_column == self.end_column
    }

    /// Total order by end position, then start position. Batch edits are
    /// sorted with this so equal ends tie-break deterministically.
    pub fn compare_using_ends(a: &Range, b: &Range) -> Ordering {
        a.end_line
            .cmp(&b.end_line)
            .then(a.end_column.cmp(&b.end_column))
            .then(a.start_line.cmp(&b.start_line))
            .then(a.start_column.cmp(&b.start_column))
    }
}

impl fmt::Display for Range {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[{},{} -> {},{}]",
            self.start_line, self.start_column, self.end_line, self.end_column
        )
    }
}
