//! The public document facade over the piece-tree engine.

use anyhow::{bail, Result};
use regex::Regex;
use std::cmp::Ordering;

use crate::buffer::ChunkBuffer;
use crate::edits::{
    ApplyEditsResult, ContentChange, ReverseEditOperation, SingleEditOperation, TextChange,
    ValidatedEditOperation,
};
use crate::piece_tree::{Eol, PieceTree};
use crate::position::{Position, Range};
use crate::snapshot::Snapshot;
use crate::strings::{self, EolKind};

/// Line-terminator style requested for a range read.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EolPreference {
    /// Whatever the document stores; no rewriting.
    TextDefined,
    Lf,
    CrLf,
}

/// Batches at or above this many operations collapse into one edit
/// unless the owner reconfigures the threshold.
pub const DEFAULT_REDUCE_THRESHOLD: usize = 1000;

/// The document model: character-sequence reads, range queries, search,
/// snapshots, and transactional batch edits over one piece-tree engine.
pub struct TextBuffer {
    piece_tree: PieceTree,
    bom: String,
    might_contain_rtl: bool,
    might_contain_unusual_line_terminators: bool,
    might_contain_non_basic_ascii: bool,
    reduce_threshold: usize,
}

impl TextBuffer {
    pub(crate) fn new(
        chunks: Vec<ChunkBuffer>,
        eol: Eol,
        eol_normalized: bool,
        bom: String,
        contains_rtl: bool,
        contains_unusual_line_terminators: bool,
        might_contain_non_basic_ascii: bool,
    ) -> TextBuffer {
        TextBuffer {
            piece_tree: PieceTree::new(chunks, eol, eol_normalized),
            bom,
            might_contain_rtl: contains_rtl,
            might_contain_unusual_line_terminators: contains_unusual_line_terminators,
            might_contain_non_basic_ascii,
            reduce_threshold: DEFAULT_REDUCE_THRESHOLD,
        }
    }

    // ---- engine access ----

    pub fn piece_tree(&self) -> &PieceTree {
        &self.piece_tree
    }

    pub fn piece_tree_mut(&mut self) -> &mut PieceTree {
        &mut self.piece_tree
    }

    pub fn into_piece_tree(self) -> PieceTree {
        self.piece_tree
    }

    // ---- document state ----

    pub fn len(&self) -> usize {
        self.piece_tree.len()
    }

    pub fn is_empty(&self) -> bool {
        self.piece_tree.is_empty()
    }

    pub fn line_count(&self) -> usize {
        self.piece_tree.line_count()
    }

    pub fn eol(&self) -> Eol {
        self.piece_tree.eol()
    }

    /// Rewrites the whole document to `eol`.
    pub fn set_eol(&mut self, eol: Eol) {
        self.piece_tree.set_eol(eol);
    }

    pub fn bom(&self) -> &str {
        &self.bom
    }

    pub fn might_contain_rtl(&self) -> bool {
        self.might_contain_rtl
    }

    pub fn might_contain_unusual_line_terminators(&self) -> bool {
        self.might_contain_unusual_line_terminators
    }

    pub fn might_contain_non_basic_ascii(&self) -> bool {
        self.might_contain_non_basic_ascii
    }

    /// Batch size at which `apply_edits` collapses operations into one.
    pub fn set_reduce_threshold(&mut self, threshold: usize) {
        self.reduce_threshold = threshold.max(1);
    }

    // ---- position arithmetic ----

    pub fn offset_at(&self, position: Position) -> usize {
        self.piece_tree.offset_at(position.line, position.column)
    }

    pub fn position_at(&self, offset: usize) -> Position {
        self.piece_tree.position_at(offset)
    }

    /// The range starting at byte `start` and covering `length` bytes.
    pub fn range_at(&self, start: usize, length: usize) -> Range {
        Range::from_positions(self.position_at(start), self.position_at(start + length))
    }

    // ---- reads ----

    /// The whole document, raw.
    pub fn content(&self) -> String {
        self.piece_tree.content()
    }

    pub fn get_value_in_range(&self, range: Range, eol: EolPreference) -> String {
        match eol {
            EolPreference::TextDefined => self.piece_tree.get_value_in_range(range),
            EolPreference::Lf => self.piece_tree.get_value_in_range_with_eol(range, "\n"),
            EolPreference::CrLf => self.piece_tree.get_value_in_range_with_eol(range, "\r\n"),
        }
    }

    /// Byte length of `range`.
    pub fn get_value_length_in_range(&self, range: Range) -> usize {
        if range.is_empty() {
            return 0;
        }
        if range.start_line == range.end_line {
            return range.end_column - range.start_column;
        }
        let start_offset = self.piece_tree.offset_at(range.start_line, range.start_column);
        let end_offset = self.piece_tree.offset_at(range.end_line, range.end_column);
        end_offset - start_offset
    }

    /// Number of characters in `range`, terminators included one per
    /// line at the document's EOL width.
    pub fn char_count_in_range(&mut self, range: Range) -> usize {
        if self.might_contain_non_basic_ascii {
            let mut result = 0;
            for line_number in range.start_line..=range.end_line {
                let content = self.piece_tree.get_line_content(line_number);
                let from = if line_number == range.start_line {
                    range.start_column - 1
                } else {
                    0
                };
                let to = if line_number == range.end_line {
                    range.end_column - 1
                } else {
                    content.len()
                };
                result += content[from..to].chars().count();
            }
            result += self.eol().len() * (range.end_line - range.start_line);
            return result;
        }
        self.get_value_length_in_range(range)
    }

    pub fn get_line_content(&mut self, line: usize) -> String {
        self.piece_tree.get_line_content(line)
    }

    pub fn get_line_content_with_eol(&mut self, line: usize) -> String {
        let mut content = self.piece_tree.get_line_content(line);
        content.push_str(self.eol().as_str());
        content
    }

    pub fn get_line_length(&self, line: usize) -> usize {
        self.piece_tree.get_line_length(line)
    }

    /// Columns start at 1; the last valid column is one past the line's
    /// content.
    pub fn get_line_max_column(&self, line: usize) -> usize {
        self.get_line_length(line) + 1
    }

    /// 1-based column of the first non-whitespace byte, or 0 when the
    /// line is blank.
    pub fn get_first_non_whitespace_column(&mut self, line: usize) -> usize {
        let content = self.piece_tree.get_line_content(line);
        match strings::first_non_whitespace_index(&content) {
            Some(index) => index + 1,
            None => 0,
        }
    }

    /// 1-based column just past the last non-whitespace byte, or 0 when
    /// the line is blank.
    pub fn get_last_non_whitespace_column(&mut self, line: usize) -> usize {
        let content = self.piece_tree.get_line_content(line);
        match strings::last_non_whitespace_index(&content) {
            Some(index) => index + 2,
            None => 0,
        }
    }

    pub fn char_at(&mut self, offset: usize) -> Option<char> {
        self.piece_tree.char_at(offset)
    }

    /// Character at zero-based byte `index` of `line`.
    pub fn line_char_at(&mut self, line: usize, index: usize) -> Option<char> {
        self.piece_tree.line_char_at(line, index)
    }

    /// Raw text of the piece at or right after `offset`; lets an
    /// incremental parser pull source text without materializing the
    /// document.
    pub fn get_nearest_chunk(&mut self, offset: usize) -> String {
        self.piece_tree.get_nearest_chunk(offset)
    }

    // ---- search ----

    /// Literal substring search within `range`.
    pub fn find_matches_by_word(
        &mut self,
        search_text: &str,
        search_range: Range,
        limit: usize,
        is_cancelled: impl Fn() -> bool,
    ) -> Vec<Range> {
        self.piece_tree
            .find_matches_by_word(search_text, search_range, limit, is_cancelled)
    }

    /// Regex search within `range`. Multi-line mode joins the range with
    /// `\n` first so the pattern can match across terminators; otherwise
    /// the scan stays inside one buffer slice at a time.
    pub fn find_matches(
        &mut self,
        regex: &Regex,
        search_range: Range,
        multiline: bool,
        limit: usize,
        is_cancelled: impl Fn() -> bool,
    ) -> Vec<Range> {
        if multiline {
            self.piece_tree
                .find_matches_multiline(regex, search_range, limit, is_cancelled)
        } else {
            self.piece_tree
                .find_matches_line_by_line(regex, search_range, limit, is_cancelled)
        }
    }

    // ---- snapshots ----

    pub fn create_snapshot(&self, preserve_bom: bool) -> Snapshot {
        let bom = if preserve_bom { self.bom.as_str() } else { "" };
        self.piece_tree.create_snapshot(bom)
    }

    // ---- batch edits ----

    /// Validates and applies a batch of edit operations as one
    /// transaction.
    ///
    /// Operations may touch but must not overlap; overlapping ranges fail
    /// the whole call before anything is mutated. Batches at or above the
    /// reduce threshold collapse into a single equivalent edit. With
    /// `compute_undo_edits`, the result carries the inverse operations.
    /// Change records come back in the caller's input order.
    pub fn apply_edits(
        &mut self,
        raw_operations: &[SingleEditOperation],
        compute_undo_edits: bool,
    ) -> Result<ApplyEditsResult> {
        let mut might_contain_rtl = self.might_contain_rtl;
        let mut might_contain_unusual = self.might_contain_unusual_line_terminators;
        let mut might_contain_non_basic_ascii = self.might_contain_non_basic_ascii;

        let mut operations = Vec::with_capacity(raw_operations.len());
        for (index, op) in raw_operations.iter().enumerate() {
            let text = op.text.clone().unwrap_or_default();

            if !text.is_empty() {
                let mut text_might_contain_non_basic_ascii = true;
                if !might_contain_non_basic_ascii {
                    text_might_contain_non_basic_ascii = !strings::is_basic_ascii(&text);
                    might_contain_non_basic_ascii = text_might_contain_non_basic_ascii;
                }
                if !might_contain_rtl && text_might_contain_non_basic_ascii {
                    might_contain_rtl = strings::contains_rtl(&text);
                }
                if !might_contain_unusual && text_might_contain_non_basic_ascii {
                    might_contain_unusual = strings::contains_unusual_line_terminators(&text);
                }
            }

            let counter = strings::count_line_breaks(&text);
            let expected = match self.eol() {
                Eol::CrLf => EolKind::CrLf,
                Eol::Lf => EolKind::Lf,
            };
            let valid_text = if counter.kind == EolKind::None || counter.kind == expected {
                text
            } else {
                strings::normalize_eol(&text, self.eol().as_str())
            };

            operations.push(ValidatedEditOperation {
                sort_index: index,
                range: op.range,
                range_offset: self.offset_at(op.range.start_position()),
                range_length: self.get_value_length_in_range(op.range),
                text: valid_text,
                eol_count: counter.eol_count,
                first_line_length: counter.first_line_length,
                last_line_length: counter.last_line_length,
                force_move_markers: op.force_move_markers,
            });
        }

        operations.sort_by(sort_ops_ascending);

        let mut has_touching_ranges = false;
        for pair in operations.windows(2) {
            let range_end = pair[0].range.end_position();
            let next_range_start = pair[1].range.start_position();
            if next_range_start.is_before_or_equal(&range_end) {
                if next_range_start.is_before(&range_end) {
                    bail!("overlapping edit operations are not allowed");
                }
                has_touching_ranges = true;
            }
        }

        if operations.len() >= self.reduce_threshold {
            // huge batches cause a storm of temporary allocations when
            // applied one by one; collapse them into one equivalent edit
            tracing::debug!(
                operations = operations.len(),
                threshold = self.reduce_threshold,
                "reducing edit batch to a single operation"
            );
            operations = vec![self.to_single_edit_operation(&operations)];
        }

        let reverse_ranges = if compute_undo_edits {
            inverse_edit_ranges(&operations)
        } else {
            Vec::new()
        };

        let mut reverse_operations = None;
        if compute_undo_edits {
            let mut reverse_range_delta_offset: isize = 0;
            let mut reverse = Vec::with_capacity(operations.len());
            for (index, op) in operations.iter().enumerate() {
                let buffer_text = self.piece_tree.get_value_in_range(op.range);
                let reverse_range_offset =
                    (op.range_offset as isize + reverse_range_delta_offset) as usize;
                reverse_range_delta_offset += op.text.len() as isize - buffer_text.len() as isize;

                reverse.push(ReverseEditOperation {
                    sort_index: op.sort_index,
                    range: reverse_ranges[index],
                    text: buffer_text.clone(),
                    text_change: TextChange {
                        old_offset: op.range_offset,
                        old_text: buffer_text,
                        new_offset: reverse_range_offset,
                        new_text: op.text.clone(),
                    },
                });
            }

            // only meaningful to restore input order when no ranges touch
            if !has_touching_ranges {
                reverse.sort_by_key(|op| op.sort_index);
            }
            reverse_operations = Some(reverse);
        }

        self.might_contain_rtl = might_contain_rtl;
        self.might_contain_unusual_line_terminators = might_contain_unusual;
        self.might_contain_non_basic_ascii = might_contain_non_basic_ascii;

        let changes = self.do_apply_edits(operations);

        Ok(ApplyEditsResult {
            changes,
            reverse_edits: reverse_operations,
        })
    }

    /// Applies validated operations in descending range order, so lower
    /// offsets are untouched by the time they are edited.
    fn do_apply_edits(&mut self, mut operations: Vec<ValidatedEditOperation>) -> Vec<ContentChange> {
        operations.sort_by(sort_ops_descending);

        let mut tagged = Vec::with_capacity(operations.len());
        for op in &operations {
            self.piece_tree.delete(op.range_offset, op.range_length);
            if !op.text.is_empty() {
                self.piece_tree.insert(op.range_offset, &op.text, true);
            }

            tagged.push((
                op.sort_index,
                ContentChange {
                    range: op.range,
                    range_offset: op.range_offset,
                    range_length: op.range_length,
                    text: op.text.clone(),
                    force_move_markers: op.force_move_markers,
                },
            ));
        }

        tagged.sort_by_key(|(sort_index, _)| *sort_index);
        tagged.into_iter().map(|(_, change)| change).collect()
    }

    /// Collapses a sorted batch into one operation producing the same
    /// net text over the whole affected range.
    fn to_single_edit_operation(
        &self,
        operations: &[ValidatedEditOperation],
    ) -> ValidatedEditOperation {
        let first = operations.first().expect("non-empty batch");
        let last = operations.last().expect("non-empty batch");
        let entire_range = Range::new(
            first.range.start_line,
            first.range.start_column,
            last.range.end_line,
            last.range.end_column,
        );

        let mut last_end_line = first.range.start_line;
        let mut last_end_column = first.range.start_column;
        let mut force_move_markers = false;
        let mut result = String::new();

        for op in operations {
            force_move_markers |= op.force_move_markers;

            // untouched text between the previous op and this one
            result.push_str(&self.piece_tree.get_value_in_range(Range::new(
                last_end_line,
                last_end_column,
                op.range.start_line,
                op.range.start_column,
            )));
            result.push_str(&op.text);

            last_end_line = op.range.end_line;
            last_end_column = op.range.end_column;
        }

        let counter = strings::count_line_breaks(&result);
        ValidatedEditOperation {
            sort_index: 0,
            range: entire_range,
            range_offset: self.offset_at(entire_range.start_position()),
            range_length: self.get_value_length_in_range(entire_range),
            text: result,
            eol_count: counter.eol_count,
            first_line_length: counter.first_line_length,
            last_line_length: counter.last_line_length,
            force_move_markers,
        }
    }
}

/// Ranges of the text each operation will have inserted, for building
/// undo edits. Assumes `operations` is validated and sorted ascending.
fn inverse_edit_ranges(operations: &[ValidatedEditOperation]) -> Vec<Range> {
    let mut result = Vec::with_capacity(operations.len());

    let mut prev_op: Option<&ValidatedEditOperation> = None;
    let mut prev_end_line = 0;
    let mut prev_end_column = 0;

    for op in operations {
        let (start_line, start_column) = if let Some(prev) = prev_op {
            if prev.range.end_line == op.range.start_line {
                (
                    prev_end_line,
                    prev_end_column + (op.range.start_column - prev.range.end_column),
                )
            } else {
                (
                    prev_end_line + (op.range.start_line - prev.range.end_line),
                    op.range.start_column,
                )
            }
        } else {
            (op.range.start_line, op.range.start_column)
        };

        let range = if !op.text.is_empty() {
            let line_count = op.eol_count + 1;
            if line_count == 1 {
                Range::new(
                    start_line,
                    start_column,
                    start_line,
                    start_column + op.first_line_length,
                )
            } else {
                Range::new(
                    start_line,
                    start_column,
                    start_line + line_count - 1,
                    op.last_line_length + 1,
                )
            }
        } else {
            Range::new(start_line, start_column, start_line, start_column)
        };

        prev_end_line = range.end_line;
        prev_end_column = range.end_column;
        result.push(range);
        prev_op = Some(op);
    }

    result
}

fn sort_ops_ascending(a: &ValidatedEditOperation, b: &ValidatedEditOperation) -> Ordering {
    Range::compare_using_ends(&a.range, &b.range).then(a.sort_index.cmp(&b.sort_index))
}

fn sort_ops_descending(a: &ValidatedEditOperation, b: &ValidatedEditOperation) -> Ordering {
    Range::compare_using_ends(&b.range, &a.range).then(b.sort_index.cmp(&a.sort_index))
}
