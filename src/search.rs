//! Search over the piece tree.
//!
//! Word search scans line-joined windows; single-line regex search works
//! node by node against one buffer slice at a time and never crosses a
//! node's buffer; multi-line regex search joins the requested range with
//! `\n` and compensates for CRLF terminator widths when mapping match
//! offsets back to positions.
//!
//! All three accept a cooperative cancellation predicate polled between
//! matches and a result-count limit. A cancelled search returns what it
//! has; it never reports a partial match.

use regex::Regex;

use crate::buffer::BufferCursor;
use crate::piece_tree::{Eol, PieceTree};
use crate::position::Range;
use crate::strings::{self, LineFeedCounter};
use crate::tree::{NodeIdx, SENTINEL};

/// Advances past a match, stepping one character further on an empty
/// match so the scan always makes progress.
fn next_search_start(text: &str, m: &regex::Match) -> usize {
    if m.end() > m.start() {
        m.end()
    } else {
        let mut next = m.end() + 1;
        while next < text.len() && !text.is_char_boundary(next) {
            next += 1;
        }
        next
    }
}

impl PieceTree {
    /// Literal substring search. The needle may span lines; terminators
    /// in it must match the buffer content byte for byte.
    pub fn find_matches_by_word(
        &mut self,
        search_text: &str,
        search_range: Range,
        limit: usize,
        is_cancelled: impl Fn() -> bool,
    ) -> Vec<Range> {
        let mut result = Vec::new();
        if search_text.is_empty() {
            return result;
        }

        let counter = strings::count_line_breaks(search_text);
        let lines = counter.eol_count;
        let last_line_length = counter.last_line_length;

        let mut line_number = search_range.start_line;
        while line_number + lines <= search_range.end_line && !is_cancelled() {
            let window_end_len = self.get_line_length(line_number + lines);
            let text = self.get_value_in_range(Range::new(
                line_number,
                1,
                line_number + lines,
                window_end_len + 1,
            ));

            let mut last_match_index = text.find(search_text);
            let delta_count = if last_match_index.is_some() { lines + 1 } else { 1 };

            while let Some(index) = last_match_index {
                if result.len() >= limit || is_cancelled() {
                    return result;
                }
                let start_offset = if lines > 0 { 0 } else { index };
                result.push(Range::new(
                    line_number,
                    index + 1,
                    line_number + lines,
                    start_offset + last_line_length + 1,
                ));

                let from = index + search_text.len();
                last_match_index = text[from..].find(search_text).map(|i| i + from);
            }

            line_number += delta_count;
        }

        result
    }

    /// Regex search restricted to one node's buffer slice at a time.
    pub fn find_matches_line_by_line(
        &mut self,
        regex: &Regex,
        search_range: Range,
        limit: usize,
        is_cancelled: impl Fn() -> bool,
    ) -> Vec<Range> {
        let mut result = Vec::new();

        let Some(mut start_position) =
            self.node_at_position(search_range.start_line, search_range.start_column)
        else {
            return result;
        };
        let Some(end_position) =
            self.node_at_position(search_range.end_line, search_range.end_column)
        else {
            return result;
        };

        let mut start = self.position_in_buffer(start_position.node, start_position.remainder);
        let end = self.position_in_buffer(end_position.node, end_position.remainder);

        if start_position.node == end_position.node {
            self.find_matches_in_node(
                start_position.node,
                regex,
                search_range.start_line,
                search_range.start_column,
                start,
                end,
                limit,
                &mut result,
                &is_cancelled,
            );
            return result;
        }

        let mut start_line_number = search_range.start_line;
        let mut current_node = start_position.node;

        while current_node != end_position.node {
            let piece = self.tree[current_node].piece;
            let line_break_cnt = self.line_feed_count(piece.buffer_index, start, piece.end);

            if line_break_cnt >= 1 {
                // search up to the last line break inside this node
                let line_starts = &self.buffers[piece.buffer_index].line_starts;
                let start_offset_in_buffer = self.buffer_offset(piece.buffer_index, piece.start);
                let next_line_start_offset = line_starts[start.line + line_break_cnt];
                let search_end =
                    self.position_in_buffer(current_node, next_line_start_offset - start_offset_in_buffer);
                let start_column = if start_line_number == search_range.start_line {
                    search_range.start_column
                } else {
                    1
                };
                self.find_matches_in_node(
                    current_node,
                    regex,
                    start_line_number,
                    start_column,
                    start,
                    search_end,
                    limit,
                    &mut result,
                    &is_cancelled,
                );

                if result.len() >= limit {
                    return result;
                }

                start_line_number += line_break_cnt;
            }

            let start_column = if start_line_number == search_range.start_line {
                search_range.start_column - 1
            } else {
                0
            };

            // the tail of the current line may continue into other nodes;
            // search it through the line content instead
            if start_line_number == search_range.end_line {
                let line = self.get_line_content(start_line_number);
                let search_text = &line[start_column..search_range.end_column - 1];
                find_matches_in_line(
                    search_text,
                    regex,
                    search_range.end_line,
                    start_column,
                    &mut result,
                    limit,
                );
                return result;
            }

            let line = self.get_line_content(start_line_number);
            find_matches_in_line(
                &line[start_column..],
                regex,
                start_line_number,
                start_column,
                &mut result,
                limit,
            );

            if result.len() >= limit {
                return result;
            }

            start_line_number += 1;
            let Some(next_position) = self.node_at_position(start_line_number, 1) else {
                return result;
            };
            start_position = next_position;
            current_node = start_position.node;
            start = self.position_in_buffer(start_position.node, start_position.remainder);
        }

        if start_line_number == search_range.end_line {
            let start_column = if start_line_number == search_range.start_line {
                search_range.start_column - 1
            } else {
                0
            };
            let line = self.get_line_content(start_line_number);
            let search_text = &line[start_column..search_range.end_column - 1];
            find_matches_in_line(
                search_text,
                regex,
                search_range.end_line,
                start_column,
                &mut result,
                limit,
            );
            return result;
        }

        let start_column = if start_line_number == search_range.start_line {
            search_range.start_column
        } else {
            1
        };
        self.find_matches_in_node(
            end_position.node,
            regex,
            start_line_number,
            start_column,
            start,
            end,
            limit,
            &mut result,
            &is_cancelled,
        );

        result
    }

    #[allow(clippy::too_many_arguments)]
    fn find_matches_in_node(
        &self,
        node: NodeIdx,
        regex: &Regex,
        start_line_number: usize,
        start_column: usize,
        start_cursor: BufferCursor,
        end_cursor: BufferCursor,
        limit: usize,
        result: &mut Vec<Range>,
        is_cancelled: &impl Fn() -> bool,
    ) -> usize {
        if node == SENTINEL {
            return result.len();
        }
        let piece = self.tree[node].piece;
        let buffer = &self.buffers[piece.buffer_index];
        let start_offset_in_buffer = self.buffer_offset(piece.buffer_index, piece.start);
        let start = self.buffer_offset(piece.buffer_index, start_cursor);
        let end = self.buffer_offset(piece.buffer_index, end_cursor);

        let text = &buffer.text;
        let mut pos = start;

        while pos <= text.len() && !is_cancelled() {
            let Some(m) = regex.find_at(text, pos) else {
                break;
            };
            if m.start() >= end {
                return result.len();
            }

            let ret = self.position_in_buffer(node, m.start() - start_offset_in_buffer);
            let line_feed_cnt = self.line_feed_count(piece.buffer_index, start_cursor, ret);
            let ret_start_column = if ret.line == start_cursor.line {
                ret.column - start_cursor.column + start_column
            } else {
                ret.column + 1
            };
            let ret_end_column = ret_start_column + (m.end() - m.start());
            result.push(Range::new(
                start_line_number + line_feed_cnt,
                ret_start_column,
                start_line_number + line_feed_cnt,
                ret_end_column,
            ));

            if m.end() >= end {
                return result.len();
            }
            if result.len() >= limit {
                return result.len();
            }

            pos = next_search_start(text, &m);
        }

        result.len()
    }

    /// Regex search against the whole range joined with `\n`, so a `\n`
    /// in the pattern matches the terminator of both LF and CRLF buffers.
    pub fn find_matches_multiline(
        &mut self,
        regex: &Regex,
        search_range: Range,
        limit: usize,
        is_cancelled: impl Fn() -> bool,
    ) -> Vec<Range> {
        let delta_offset = self.offset_at(search_range.start_line, search_range.start_column);

        let text = self.get_value_in_range_with_eol(search_range, "\n");
        let lf_counter = if self.eol() == Eol::CrLf {
            Some(LineFeedCounter::new(&text))
        } else {
            None
        };

        let mut result = Vec::new();
        let mut pos = 0;
        while result.len() < limit && !is_cancelled() && pos <= text.len() {
            let Some(m) = regex.find_at(&text, pos) else {
                break;
            };
            result.push(self.multiline_match_range(
                delta_offset,
                lf_counter.as_ref(),
                m.start(),
                m.end() - m.start(),
            ));
            pos = next_search_start(&text, &m);
        }

        result
    }

    /// Maps a match in the `\n`-joined text back to document positions,
    /// re-adding one byte per compensated `\r`.
    fn multiline_match_range(
        &self,
        delta_offset: usize,
        lf_counter: Option<&LineFeedCounter>,
        match_index: usize,
        match_len: usize,
    ) -> Range {
        let (start_offset, end_offset) = if let Some(counter) = lf_counter {
            let line_feeds_before_match = counter.count_before(match_index);
            let start_offset = delta_offset + match_index + line_feeds_before_match;
            let line_feeds_before_end = counter.count_before(match_index + match_len);
            let line_feeds_in_match = line_feeds_before_end - line_feeds_before_match;
            (start_offset, start_offset + match_len + line_feeds_in_match)
        } else {
            let start_offset = delta_offset + match_index;
            (start_offset, start_offset + match_len)
        };

        Range::from_positions(self.position_at(start_offset), self.position_at(end_offset))
    }
}

/// Collects matches of `regex` in one line's text, shifted by
/// `delta_offset` columns.
fn find_matches_in_line(
    text: &str,
    regex: &Regex,
    line_number: usize,
    delta_offset: usize,
    result: &mut Vec<Range>,
    limit: usize,
) -> usize {
    let mut pos = 0;
    while result.len() < limit && pos <= text.len() {
        let Some(m) = regex.find_at(text, pos) else {
            break;
        };
        result.push(Range::new(
            line_number,
            m.start() + 1 + delta_offset,
            line_number,
            m.start() + 1 + (m.end() - m.start()) + delta_offset,
        ));
        pos = next_search_start(text, &m);
    }
    result.len()
}
