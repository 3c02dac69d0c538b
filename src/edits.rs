//! Types of the batch-edit protocol.

use serde::{Deserialize, Serialize};

use crate::position::Range;

/// A single edit operation submitted to
/// [`TextBuffer::apply_edits`](crate::TextBuffer::apply_edits).
///
/// An empty `range` with text emulates an insert; a non-empty `range`
/// with `None` text emulates a delete.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SingleEditOperation {
    /// The range to replace.
    pub range: Range,
    /// The replacement text, if any.
    pub text: Option<String>,
    /// Insert semantics: markers sitting exactly at a collapsed range
    /// move with the insertion.
    pub force_move_markers: bool,
}

impl SingleEditOperation {
    pub fn new(range: Range, text: impl Into<String>) -> SingleEditOperation {
        SingleEditOperation {
            range,
            text: Some(text.into()),
            force_move_markers: false,
        }
    }

    pub fn delete(range: Range) -> SingleEditOperation {
        SingleEditOperation {
            range,
            text: None,
            force_move_markers: false,
        }
    }
}

/// An operation validated against the current document: absolute offset
/// and length resolved, replacement text normalized to the buffer EOL,
/// line-break structure measured.
#[derive(Debug, Clone)]
pub(crate) struct ValidatedEditOperation {
    /// Position in the caller's original list.
    pub sort_index: usize,
    pub range: Range,
    /// Byte offset of `range`'s start.
    pub range_offset: usize,
    /// Byte length of `range`.
    pub range_length: usize,
    pub text: String,
    /// Line terminators in `text`.
    pub eol_count: usize,
    /// Byte length of `text`'s first line.
    pub first_line_length: usize,
    /// Byte length of `text`'s last line.
    pub last_line_length: usize,
    pub force_move_markers: bool,
}

/// Change record emitted for one applied operation, in the caller's
/// input order and against the pre-edit document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContentChange {
    /// The replaced range, as validated before applying.
    pub range: Range,
    /// Byte offset of the replaced range.
    pub range_offset: usize,
    /// Byte length of the replaced range.
    pub range_length: usize,
    /// The inserted text.
    pub text: String,
    pub force_move_markers: bool,
}

/// Offset-level record of one replacement: enough to replay it or to
/// build its inverse.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TextChange {
    pub old_offset: usize,
    pub old_text: String,
    pub new_offset: usize,
    pub new_text: String,
}

/// The inverse of one applied operation, for building an undo edit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReverseEditOperation {
    /// Position of the forward operation in the caller's original list.
    pub sort_index: usize,
    /// Range the undo edit must replace.
    pub range: Range,
    /// Text the undo edit restores.
    pub text: String,
    pub text_change: TextChange,
}

/// Everything [`TextBuffer::apply_edits`](crate::TextBuffer::apply_edits)
/// reports back.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApplyEditsResult {
    pub changes: Vec<ContentChange>,
    /// Present when undo edits were requested.
    pub reverse_edits: Option<Vec<ReverseEditOperation>>,
}
