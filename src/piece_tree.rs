//! The buffer engine: a piece table indexed by an augmented red-black
//! tree.
//!
//! The engine owns the tree, the backing chunk buffers and the caches.
//! Reads that touch a cache take `&mut self`; the one designed escape
//! hatch for concurrent reading is [`PieceTree::create_snapshot`], which
//! shares the chunk buffers behind `Arc` and stays valid while the live
//! tree keeps mutating (buffer 0 copies on write when a snapshot holds
//! it).
//!
//! The single most delicate invariant in here is CRLF integrity: a `\r\n`
//! pair must never end up split across two pieces, because every line
//! count in the tree depends on counting it as one terminator. Every
//! mutation path below funnels through the repair helpers near the bottom
//! of this file.

use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::buffer::{BufferCursor, ChunkBuffer, Piece};
use crate::cache::{CacheEntry, SearchCache};
use crate::position::{Position, Range};
use crate::snapshot::Snapshot;
use crate::strings;
use crate::tree::{NodeIdx, Tree, SENTINEL};

/// Byte-size cap for one chunk buffer. Content larger than this is split
/// so substring and byte lookups on any one buffer stay cheap.
pub(crate) const AVERAGE_BUFFER_SIZE: usize = 65535;

/// Line-terminator style a buffer normalizes to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Eol {
    Lf,
    CrLf,
}

impl Eol {
    pub fn as_str(&self) -> &'static str {
        match self {
            Eol::Lf => "\n",
            Eol::CrLf => "\r\n",
        }
    }

    /// Byte length of the terminator.
    pub fn len(&self) -> usize {
        self.as_str().len()
    }
}

/// Resolution of a document offset or position to a node plus the byte
/// remainder inside that node's piece.
#[derive(Debug, Clone, Copy)]
pub(crate) struct NodePosition {
    pub node: NodeIdx,
    pub remainder: usize,
    pub node_start_offset: usize,
}

/// The piece-tree buffer engine.
pub struct PieceTree {
    pub(crate) tree: Tree,
    pub(crate) buffers: Vec<Arc<ChunkBuffer>>,
    line_count: usize,
    length: usize,
    eol: Eol,
    eol_normalized: bool,
    last_change_buffer_pos: BufferCursor,
    last_visited_line: (usize, String),
    search_cache: SearchCache,
}

impl PieceTree {
    pub fn new(chunks: Vec<ChunkBuffer>, eol: Eol, eol_normalized: bool) -> PieceTree {
        let mut tree = PieceTree {
            tree: Tree::new(),
            buffers: vec![Arc::new(ChunkBuffer::default())],
            line_count: 1,
            length: 0,
            eol,
            eol_normalized,
            last_change_buffer_pos: BufferCursor::default(),
            last_visited_line: (0, String::new()),
            search_cache: SearchCache::new(1),
        };
        tree.create(chunks, eol, eol_normalized);
        tree
    }

    fn create(&mut self, chunks: Vec<ChunkBuffer>, eol: Eol, eol_normalized: bool) {
        self.tree = Tree::new();
        self.buffers = vec![Arc::new(ChunkBuffer::default())];
        self.eol = eol;
        self.eol_normalized = eol_normalized;
        self.last_change_buffer_pos = BufferCursor::default();
        self.last_visited_line = (0, String::new());
        self.search_cache = SearchCache::new(1);

        let mut last_node = SENTINEL;
        for chunk in chunks {
            if chunk.is_empty() {
                continue;
            }
            let last_line = chunk.line_starts.len() - 1;
            let piece = Piece::new(
                self.buffers.len(),
                BufferCursor::default(),
                BufferCursor::new(last_line, chunk.len() - chunk.line_starts[last_line]),
                last_line,
                chunk.len(),
            );
            self.buffers.push(Arc::new(chunk));
            last_node = self.tree.rb_insert_right(last_node, piece);
        }

        self.compute_buffer_metadata();
    }

    // ---- aggregate state ----

    pub fn len(&self) -> usize {
        self.length
    }

    pub fn is_empty(&self) -> bool {
        self.length == 0
    }

    /// Number of lines; an empty document has one line.
    pub fn line_count(&self) -> usize {
        self.line_count
    }

    pub fn eol(&self) -> Eol {
        self.eol
    }

    /// Switches the buffer to `eol` and rewrites every terminator in the
    /// content accordingly. The tree is rebuilt, not edited in place:
    /// every piece's internal line accounting depends on the terminator
    /// width.
    pub fn set_eol(&mut self, eol: Eol) {
        self.normalize_eol_style(eol);
    }

    fn normalize_eol_style(&mut self, eol: Eol) {
        let min = AVERAGE_BUFFER_SIZE - AVERAGE_BUFFER_SIZE / 3;
        let max = min * 2;

        let mut temp = String::new();
        let mut chunks = Vec::new();
        for node in self.nodes_in_order() {
            let piece = self.tree[node].piece;
            let content = self.piece_str(&piece);
            if temp.len() <= min || temp.len() + content.len() < max {
                temp.push_str(content);
            } else {
                let text = strings::normalize_eol(&temp, eol.as_str());
                chunks.push(ChunkBuffer::new(text));
                temp = content.to_string();
            }
        }
        if !temp.is_empty() {
            chunks.push(ChunkBuffer::new(strings::normalize_eol(&temp, eol.as_str())));
        }

        tracing::debug!(eol = eol.as_str(), chunks = chunks.len(), "rebuilding tree for eol change");
        self.create(chunks, eol, true);
    }

    /// Captures the current piece sequence for decoupled sequential
    /// reading. The chunk buffers are shared; later appends to the change
    /// buffer copy on write instead of disturbing the capture.
    pub fn create_snapshot(&self, bom: &str) -> Snapshot {
        let pieces = self
            .nodes_in_order()
            .into_iter()
            .map(|n| self.tree[n].piece)
            .collect();
        Snapshot::new(pieces, self.buffers.clone(), bom.to_string())
    }

    // ---- position arithmetic ----

    /// Byte offset of 1-based `(line, column)`. O(log n).
    pub fn offset_at(&self, line: usize, column: usize) -> usize {
        let mut left_len = 0;
        let mut line = line;

        let mut x = self.tree.root;
        while x != SENTINEL {
            let left = self.tree[x].left;
            let lf_left = self.tree[x].lf_left;
            let piece = self.tree[x].piece;
            if left != SENTINEL && lf_left + 1 >= line {
                x = left;
            } else if lf_left + piece.line_feed_cnt + 1 >= line {
                left_len += self.tree[x].size_left;
                let acc = self.accumulated_value(x, line as isize - lf_left as isize - 2);
                return left_len + acc + column - 1;
            } else {
                line -= lf_left + piece.line_feed_cnt;
                left_len += self.tree[x].size_left + piece.length;
                x = self.tree[x].right;
            }
        }

        left_len
    }

    /// 1-based position of a byte offset. O(log n).
    pub fn position_at(&self, offset: usize) -> Position {
        let original_offset = offset;
        let mut offset = offset;
        let mut lf_cnt = 0;

        let mut x = self.tree.root;
        while x != SENTINEL {
            let size_left = self.tree[x].size_left;
            let lf_left = self.tree[x].lf_left;
            let piece = self.tree[x].piece;
            if size_left != 0 && size_left >= offset {
                x = self.tree[x].left;
            } else if size_left + piece.length >= offset {
                let (index, remainder) = self.node_index_of(x, offset - size_left);
                lf_cnt += lf_left + index;

                if index == 0 {
                    let line_start_offset = self.offset_at(lf_cnt + 1, 1);
                    return Position::new(lf_cnt + 1, original_offset - line_start_offset + 1);
                }

                return Position::new(lf_cnt + 1, remainder + 1);
            } else {
                offset -= size_left + piece.length;
                lf_cnt += lf_left + piece.line_feed_cnt;

                if self.tree[x].right == SENTINEL {
                    // past the last node; clamp to its line
                    let line_start_offset = self.offset_at(lf_cnt + 1, 1);
                    return Position::new(lf_cnt + 1, original_offset - offset - line_start_offset + 1);
                }
                x = self.tree[x].right;
            }
        }

        Position::new(1, 1)
    }

    /// Maps `remainder` bytes into `node`'s piece to a cursor in the
    /// piece's owning buffer, by binary search over its line starts.
    pub(crate) fn position_in_buffer(&self, node: NodeIdx, remainder: usize) -> BufferCursor {
        let piece = self.tree[node].piece;
        let line_starts = &self.buffers[piece.buffer_index].line_starts;

        let start_offset = line_starts[piece.start.line] + piece.start.column;
        let offset = start_offset + remainder;

        let mut low = piece.start.line;
        let mut high = piece.end.line;
        let mut mid = 0;
        let mut mid_start = 0;

        while low <= high {
            mid = (low + high) / 2;
            mid_start = line_starts[mid];

            if mid == high {
                break;
            }

            let mid_stop = line_starts[mid + 1];
            if offset < mid_start {
                high = mid - 1;
            } else if offset >= mid_stop {
                low = mid + 1;
            } else {
                break;
            }
        }

        BufferCursor::new(mid, offset - mid_start)
    }

    /// Line index and column of `accumulated` bytes into `node`'s piece,
    /// with the CRLF correction at the piece end.
    fn node_index_of(&self, node: NodeIdx, accumulated: usize) -> (usize, usize) {
        let piece = self.tree[node].piece;
        let pos = self.position_in_buffer(node, accumulated);
        let line_cnt = pos.line - piece.start.line;

        let start_offset = self.buffer_offset(piece.buffer_index, piece.start);
        let end_offset = self.buffer_offset(piece.buffer_index, piece.end);
        if end_offset - start_offset == accumulated {
            // at the piece end a split \r\n makes the raw line delta lie
            let real_line_cnt = self.line_feed_count(piece.buffer_index, piece.start, pos);
            if real_line_cnt != line_cnt {
                return (real_line_cnt, 0);
            }
        }

        (line_cnt, pos.column)
    }

    /// Line terminators between two cursors of one buffer, counting a
    /// CRLF pair once even when `end` sits between its two bytes.
    pub(crate) fn line_feed_count(
        &self,
        buffer_index: usize,
        start: BufferCursor,
        end: BufferCursor,
    ) -> usize {
        // nothing before `start` matters: whether the boundary there
        // falls on \r|\n or after a whole terminator, the count of
        // terminators after it is the same
        if end.column == 0 {
            return end.line - start.line;
        }

        let line_starts = &self.buffers[buffer_index].line_starts;
        if end.line == line_starts.len() - 1 {
            // no terminator after `end` at all
            return end.line - start.line;
        }

        let next_line_start = line_starts[end.line + 1];
        let end_offset = line_starts[end.line] + end.column;
        if next_line_start > end_offset + 1 {
            // more than one byte between `end` and the next line start,
            // so the byte at `end` cannot be the \n of a pair
            return end.line - start.line;
        }

        // the byte at `end` is a one-byte terminator; a \r right before it
        // means `end` splits a \r\n pair
        if self.buffers[buffer_index].text.as_bytes()[end_offset - 1] == b'\r' {
            end.line - start.line + 1
        } else {
            end.line - start.line
        }
    }

    /// Byte length of the first `index + 1` lines of `node`'s piece.
    /// Negative `index` means zero lines.
    fn accumulated_value(&self, node: NodeIdx, index: isize) -> usize {
        if index < 0 {
            return 0;
        }
        let piece = self.tree[node].piece;
        let line_starts = &self.buffers[piece.buffer_index].line_starts;
        let expected_line_start_index = piece.start.line + index as usize + 1;
        if expected_line_start_index > piece.end.line {
            line_starts[piece.end.line] + piece.end.column
                - line_starts[piece.start.line]
                - piece.start.column
        } else {
            line_starts[expected_line_start_index] - line_starts[piece.start.line] - piece.start.column
        }
    }

    pub(crate) fn buffer_offset(&self, buffer_index: usize, cursor: BufferCursor) -> usize {
        self.buffers[buffer_index].offset_of(cursor)
    }

    // ---- lookups ----

    /// Resolves a byte offset to the node covering it. `None` past the
    /// end of the document or on an empty tree.
    pub(crate) fn node_at(&mut self, offset: usize) -> Option<NodePosition> {
        if let Some(entry) = self.search_cache.get(&self.tree, offset) {
            return Some(NodePosition {
                node: entry.node,
                remainder: offset - entry.node_start_offset,
                node_start_offset: entry.node_start_offset,
            });
        }

        let mut offset = offset;
        let mut node_start_offset = 0;
        let mut x = self.tree.root;

        while x != SENTINEL {
            let size_left = self.tree[x].size_left;
            let piece_len = self.tree[x].piece.length;
            if size_left > offset {
                x = self.tree[x].left;
            } else if size_left + piece_len >= offset {
                node_start_offset += size_left;
                let ret = NodePosition {
                    node: x,
                    remainder: offset - size_left,
                    node_start_offset,
                };
                self.search_cache.insert(CacheEntry {
                    node: x,
                    generation: self.tree.generation(x),
                    node_start_offset,
                    node_start_line_number: None,
                });
                return Some(ret);
            } else {
                offset -= size_left + piece_len;
                node_start_offset += size_left + piece_len;
                x = self.tree[x].right;
            }
        }

        None
    }

    /// Resolves a 1-based `(line, column)` to the node covering it.
    pub(crate) fn node_at_position(&self, line: usize, column: usize) -> Option<NodePosition> {
        let mut line = line;
        let mut column = column;
        let mut node_start_offset = 0;
        let mut x = self.tree.root;

        while x != SENTINEL {
            let left = self.tree[x].left;
            let lf_left = self.tree[x].lf_left;
            let piece = self.tree[x].piece;

            if left != SENTINEL && lf_left >= line - 1 {
                x = left;
            } else if lf_left + piece.line_feed_cnt > line - 1 {
                let prev_acc = self.accumulated_value(x, line as isize - lf_left as isize - 2);
                let acc = self.accumulated_value(x, line as isize - lf_left as isize - 1);
                node_start_offset += self.tree[x].size_left;
                return Some(NodePosition {
                    node: x,
                    remainder: (prev_acc + column - 1).min(acc),
                    node_start_offset,
                });
            } else if lf_left + piece.line_feed_cnt == line - 1 {
                let prev_acc = self.accumulated_value(x, line as isize - lf_left as isize - 2);
                if prev_acc + column - 1 <= piece.length {
                    return Some(NodePosition {
                        node: x,
                        remainder: prev_acc + column - 1,
                        node_start_offset,
                    });
                }
                column -= piece.length - prev_acc;
                break;
            } else {
                line -= lf_left + piece.line_feed_cnt;
                node_start_offset += self.tree[x].size_left + piece.length;
                x = self.tree[x].right;
            }
        }

        // the line continues in following nodes; walk until the column fits
        let mut x = self.tree.next_node(x);
        while x != SENTINEL {
            let piece = self.tree[x].piece;
            if piece.line_feed_cnt > 0 {
                let acc = self.accumulated_value(x, 0);
                let node_start_offset = self.offset_of_node(x);
                return Some(NodePosition {
                    node: x,
                    remainder: (column - 1).min(acc),
                    node_start_offset,
                });
            }
            if piece.length >= column - 1 {
                let node_start_offset = self.offset_of_node(x);
                return Some(NodePosition {
                    node: x,
                    remainder: column - 1,
                    node_start_offset,
                });
            }
            column -= piece.length;
            x = self.tree.next_node(x);
        }

        None
    }

    fn offset_of_node(&self, node: NodeIdx) -> usize {
        let mut node = node;
        let mut pos = self.tree[node].size_left;
        while node != self.tree.root {
            let parent = self.tree[node].parent;
            if self.tree[parent].right == node {
                pos += self.tree[parent].size_left + self.tree[parent].piece.length;
            }
            node = parent;
        }
        pos
    }

    // ---- content reads ----

    pub(crate) fn nodes_in_order(&self) -> Vec<NodeIdx> {
        let mut out = Vec::new();
        if self.tree.root == SENTINEL {
            return out;
        }
        let mut x = self.tree.leftmost(self.tree.root);
        while x != SENTINEL {
            out.push(x);
            x = self.tree.next_node(x);
        }
        out
    }

    pub(crate) fn piece_str(&self, piece: &Piece) -> &str {
        let buffer = &self.buffers[piece.buffer_index];
        let start = buffer.offset_of(piece.start);
        let end = buffer.offset_of(piece.end);
        &buffer.text[start..end]
    }

    /// The whole document, raw.
    pub fn content(&self) -> String {
        let mut ret = String::with_capacity(self.length);
        for node in self.nodes_in_order() {
            let piece = self.tree[node].piece;
            ret.push_str(self.piece_str(&piece));
        }
        ret
    }

    /// Raw text covered by `range`.
    pub fn get_value_in_range(&self, range: Range) -> String {
        if range.is_empty() {
            return String::new();
        }

        let start = self.node_at_position(range.start_line, range.start_column);
        let end = self.node_at_position(range.end_line, range.end_column);
        match (start, end) {
            (Some(start), Some(end)) => self.value_between(start, end),
            _ => String::new(),
        }
    }

    /// Text covered by `range`, with terminators rewritten to `eol`
    /// unless the buffer is already normalized to exactly that style.
    pub fn get_value_in_range_with_eol(&self, range: Range, eol: &str) -> String {
        let value = self.get_value_in_range(range);
        if eol != self.eol.as_str() || !self.eol_normalized {
            return strings::normalize_eol(&value, eol);
        }
        value
    }

    fn value_between(&self, start: NodePosition, end: NodePosition) -> String {
        if start.node == end.node {
            let piece = self.tree[start.node].piece;
            let buffer = &self.buffers[piece.buffer_index];
            let start_offset = buffer.offset_of(piece.start);
            return buffer.text[start_offset + start.remainder..start_offset + end.remainder]
                .to_string();
        }

        let mut x = start.node;
        let piece = self.tree[x].piece;
        let buffer = &self.buffers[piece.buffer_index];
        let start_offset = buffer.offset_of(piece.start);
        let mut ret =
            buffer.text[start_offset + start.remainder..start_offset + piece.length].to_string();

        x = self.tree.next_node(x);
        while x != SENTINEL {
            let piece = self.tree[x].piece;
            let buffer = &self.buffers[piece.buffer_index];
            let start_offset = buffer.offset_of(piece.start);

            if x == end.node {
                ret.push_str(&buffer.text[start_offset..start_offset + end.remainder]);
                break;
            }
            ret.push_str(&buffer.text[start_offset..start_offset + piece.length]);
            x = self.tree.next_node(x);
        }

        ret
    }

    /// Content of `line` without its terminator. Sequential calls for the
    /// same line hit a one-entry cache.
    pub fn get_line_content(&mut self, line: usize) -> String {
        if self.last_visited_line.0 == line {
            return self.last_visited_line.1.clone();
        }

        let value = if line == self.line_count {
            self.get_line_raw_content(line, 0)
        } else if self.eol_normalized {
            self.get_line_raw_content(line, self.eol.len())
        } else {
            let raw = self.get_line_raw_content(line, 0);
            strings::trim_trailing_eol(&raw).to_string()
        };

        self.last_visited_line = (line, value.clone());
        value
    }

    /// Content of `line` including its terminator, minus `end_trim`
    /// trailing bytes.
    pub fn get_line_raw_content(&mut self, line: usize, end_trim: usize) -> String {
        let mut x = self.tree.root;
        let mut line = line;
        let mut ret = String::new();

        if let Some(entry) = self.search_cache.get_by_line(&self.tree, line) {
            x = entry.node;
            let node_start_line = entry.node_start_line_number.unwrap_or(0);
            let prev_acc = self.accumulated_value(x, line as isize - node_start_line as isize - 1);
            let piece = self.tree[x].piece;
            let buffer = &self.buffers[piece.buffer_index];
            let start_offset = buffer.offset_of(piece.start);
            if node_start_line + piece.line_feed_cnt == line {
                ret = buffer.text[start_offset + prev_acc..start_offset + piece.length].to_string();
            } else {
                let acc = self.accumulated_value(x, line as isize - node_start_line as isize);
                return buffer.text[start_offset + prev_acc..start_offset + acc - end_trim]
                    .to_string();
            }
        } else {
            let mut node_start_offset = 0;
            let original_line = line;
            while x != SENTINEL {
                let left = self.tree[x].left;
                let lf_left = self.tree[x].lf_left;
                let piece = self.tree[x].piece;

                if left != SENTINEL && lf_left >= line - 1 {
                    x = left;
                } else if lf_left + piece.line_feed_cnt > line - 1 {
                    let prev_acc = self.accumulated_value(x, line as isize - lf_left as isize - 2);
                    let acc = self.accumulated_value(x, line as isize - lf_left as isize - 1);
                    node_start_offset += self.tree[x].size_left;
                    self.search_cache.insert(CacheEntry {
                        node: x,
                        generation: self.tree.generation(x),
                        node_start_offset,
                        node_start_line_number: Some(original_line - (line - 1 - lf_left)),
                    });

                    let buffer = &self.buffers[piece.buffer_index];
                    let start_offset = buffer.offset_of(piece.start);
                    return buffer.text[start_offset + prev_acc..start_offset + acc - end_trim]
                        .to_string();
                } else if lf_left + piece.line_feed_cnt == line - 1 {
                    let prev_acc = self.accumulated_value(x, line as isize - lf_left as isize - 2);
                    let buffer = &self.buffers[piece.buffer_index];
                    let start_offset = buffer.offset_of(piece.start);
                    if piece.length > prev_acc {
                        ret = buffer.text[start_offset + prev_acc..start_offset + piece.length]
                            .to_string();
                    } else {
                        ret.clear();
                    }
                    break;
                } else {
                    line -= lf_left + piece.line_feed_cnt;
                    node_start_offset += self.tree[x].size_left + piece.length;
                    x = self.tree[x].right;
                }
            }
        }

        // the line spills into following nodes until one contains a terminator
        let mut x = self.tree.next_node(x);
        while x != SENTINEL {
            let piece = self.tree[x].piece;
            let buffer = &self.buffers[piece.buffer_index];
            let start_offset = buffer.offset_of(piece.start);

            if piece.line_feed_cnt > 0 {
                let acc = self.accumulated_value(x, 0);
                ret.push_str(&buffer.text[start_offset..start_offset + acc - end_trim]);
                return ret;
            }
            ret.push_str(&buffer.text[start_offset..start_offset + piece.length]);
            x = self.tree.next_node(x);
        }

        ret
    }

    /// Byte length of `line` without its terminator.
    pub fn get_line_length(&self, line: usize) -> usize {
        if line == self.line_count {
            let start_offset = self.offset_at(line, 1);
            return self.length - start_offset;
        }
        self.offset_at(line + 1, 1) - self.offset_at(line, 1) - self.eol.len()
    }

    /// Character at a byte offset; `None` past the end.
    pub fn char_at(&mut self, offset: usize) -> Option<char> {
        let pos = self.node_at(offset)?;
        self.char_at_node_pos(pos)
    }

    /// Character at a zero-based byte `index` of 1-based `line`.
    pub fn line_char_at(&mut self, line: usize, index: usize) -> Option<char> {
        let pos = self.node_at_position(line, index + 1)?;
        self.char_at_node_pos(pos)
    }

    fn char_at_node_pos(&self, pos: NodePosition) -> Option<char> {
        let piece = self.tree[pos.node].piece;
        if pos.remainder == piece.length {
            // the wanted byte is the head of the next node
            let next = self.tree.next_node(pos.node);
            if next == SENTINEL {
                return None;
            }
            let piece = self.tree[next].piece;
            let offset = self.buffer_offset(piece.buffer_index, piece.start);
            self.buffers[piece.buffer_index]
                .text
                .get(offset..)
                .and_then(|s| s.chars().next())
        } else {
            let offset = self.buffer_offset(piece.buffer_index, piece.start) + pos.remainder;
            self.buffers[piece.buffer_index]
                .text
                .get(offset..)
                .and_then(|s| s.chars().next())
        }
    }

    /// Raw text of the piece starting at or right after `offset`, without
    /// materializing the rest of the document. Used by incremental
    /// parsers to pull contiguous source text.
    pub fn get_nearest_chunk(&mut self, offset: usize) -> String {
        let Some(pos) = self.node_at(offset) else {
            return String::new();
        };
        let piece = self.tree[pos.node].piece;
        if pos.remainder == piece.length {
            let next = self.tree.next_node(pos.node);
            if next == SENTINEL {
                return String::new();
            }
            let piece = self.tree[next].piece;
            let start = self.buffer_offset(piece.buffer_index, piece.start);
            self.buffers[piece.buffer_index].text[start..start + piece.length].to_string()
        } else {
            let start = self.buffer_offset(piece.buffer_index, piece.start);
            self.buffers[piece.buffer_index].text[start + pos.remainder..start + piece.length]
                .to_string()
        }
    }

    // ---- mutation ----

    /// Inserts `value` at byte `offset`. `eol_normalized` declares whether
    /// the caller already rewrote the text's terminators to the buffer
    /// style; once a caller passes `false` the buffer stops assuming
    /// uniform terminators.
    pub fn insert(&mut self, offset: usize, value: &str, eol_normalized: bool) {
        assert!(offset <= self.length, "insert offset {offset} out of bounds");
        self.eol_normalized = self.eol_normalized && eol_normalized;
        self.last_visited_line = (0, String::new());

        if value.is_empty() {
            return;
        }

        if self.tree.root != SENTINEL {
            let NodePosition {
                node,
                remainder,
                node_start_offset,
            } = self.node_at(offset).expect("offset resolved inside bounds");
            let piece = self.tree[node].piece;
            let buffer_index = piece.buffer_index;
            let insert_pos = self.position_in_buffer(node, remainder);

            if piece.buffer_index == 0
                && piece.end.line == self.last_change_buffer_pos.line
                && piece.end.column == self.last_change_buffer_pos.column
                && node_start_offset + piece.length == offset
                && value.len() < AVERAGE_BUFFER_SIZE
            {
                // keystrokes at the tail of the change buffer extend the
                // piece in place instead of allocating a new one
                self.append_to_node(node, value);
                self.compute_buffer_metadata();
                return;
            }

            if node_start_offset == offset {
                self.insert_content_left(node, value);
                self.search_cache.validate(&self.tree, offset);
            } else if node_start_offset + piece.length > offset {
                // splitting the node in two
                let mut nodes_to_del = Vec::new();
                let mut value = value.to_string();

                let mut new_right_piece = Piece::new(
                    piece.buffer_index,
                    insert_pos,
                    piece.end,
                    self.line_feed_count(piece.buffer_index, insert_pos, piece.end),
                    self.buffer_offset(buffer_index, piece.end)
                        - self.buffer_offset(buffer_index, insert_pos),
                );

                if self.should_check_crlf() && strings::ends_with_cr(&value) {
                    if self.node_byte_at(node, remainder) == Some(b'\n') {
                        // pull the \n over to travel with the inserted \r
                        let new_start = BufferCursor::new(new_right_piece.start.line + 1, 0);
                        new_right_piece = Piece::new(
                            new_right_piece.buffer_index,
                            new_start,
                            new_right_piece.end,
                            self.line_feed_count(
                                new_right_piece.buffer_index,
                                new_start,
                                new_right_piece.end,
                            ),
                            new_right_piece.length - 1,
                        );
                        value.push('\n');
                    }
                }

                if self.should_check_crlf() && strings::starts_with_lf(&value) {
                    if self.node_byte_at(node, remainder - 1) == Some(b'\r') {
                        // pull the \r out of the node into the inserted text
                        let prev_pos = self.position_in_buffer(node, remainder - 1);
                        self.delete_node_tail(node, prev_pos);
                        value.insert(0, '\r');

                        if self.tree[node].piece.length == 0 {
                            nodes_to_del.push(node);
                        }
                    } else {
                        self.delete_node_tail(node, insert_pos);
                    }
                } else {
                    self.delete_node_tail(node, insert_pos);
                }

                let new_pieces = self.create_new_pieces(&value);
                if new_right_piece.length > 0 {
                    self.tree.rb_insert_right(node, new_right_piece);
                }

                let mut tmp_node = node;
                for piece in new_pieces {
                    tmp_node = self.tree.rb_insert_right(tmp_node, piece);
                }
                self.delete_nodes(nodes_to_del);
            } else {
                self.insert_content_right(node, value);
            }
        } else {
            let pieces = self.create_new_pieces(value);
            let mut node = self.tree.rb_insert_left(SENTINEL, pieces[0]);
            for piece in &pieces[1..] {
                node = self.tree.rb_insert_right(node, *piece);
            }
        }

        self.compute_buffer_metadata();
    }

    /// Deletes `cnt` bytes starting at byte `offset`.
    pub fn delete(&mut self, offset: usize, cnt: usize) {
        self.last_visited_line = (0, String::new());

        if cnt == 0 || self.tree.root == SENTINEL {
            return;
        }
        assert!(offset + cnt <= self.length, "delete range out of bounds");

        let start_position = self.node_at(offset).expect("start offset inside bounds");
        let end_position = self.node_at(offset + cnt).expect("end offset inside bounds");
        let start_node = start_position.node;
        let end_node = end_position.node;

        if start_node == end_node {
            let start_split = self.position_in_buffer(start_node, start_position.remainder);
            let end_split = self.position_in_buffer(start_node, end_position.remainder);

            if start_position.node_start_offset == offset {
                if cnt == self.tree[start_node].piece.length {
                    // the whole piece goes
                    let next = self.tree.next_node(start_node);
                    self.tree.rb_delete(start_node);
                    self.validate_crlf_with_prev_node(next);
                    self.compute_buffer_metadata();
                    return;
                }
                self.delete_node_head(start_node, end_split);
                self.search_cache.validate(&self.tree, offset);
                self.validate_crlf_with_next_node(start_node);
                self.compute_buffer_metadata();
                return;
            }

            if start_position.node_start_offset + self.tree[start_node].piece.length == offset + cnt
            {
                self.delete_node_tail(start_node, start_split);
                self.validate_crlf_with_next_node(start_node);
                self.compute_buffer_metadata();
                return;
            }

            // removing from the middle splits the piece in two
            self.shrink_node(start_node, start_split, end_split);
            self.compute_buffer_metadata();
            return;
        }

        let mut nodes_to_del = Vec::new();

        let start_split = self.position_in_buffer(start_node, start_position.remainder);
        self.delete_node_tail(start_node, start_split);
        self.search_cache.validate(&self.tree, offset);
        if self.tree[start_node].piece.length == 0 {
            nodes_to_del.push(start_node);
        }

        let end_split = self.position_in_buffer(end_node, end_position.remainder);
        self.delete_node_head(end_node, end_split);
        if self.tree[end_node].piece.length == 0 {
            nodes_to_del.push(end_node);
        }

        let mut node = self.tree.next_node(start_node);
        while node != SENTINEL && node != end_node {
            nodes_to_del.push(node);
            node = self.tree.next_node(node);
        }

        let prev = if self.tree[start_node].piece.length == 0 {
            self.tree.prev_node(start_node)
        } else {
            start_node
        };
        self.delete_nodes(nodes_to_del);
        self.validate_crlf_with_next_node(prev);
        self.compute_buffer_metadata();
    }

    fn delete_nodes(&mut self, nodes: Vec<NodeIdx>) {
        for node in nodes {
            self.tree.rb_delete(node);
        }
    }

    fn insert_content_left(&mut self, node: NodeIdx, value: &str) {
        // inserting at the very start of a node
        let mut nodes_to_del = Vec::new();
        let mut value = value.to_string();

        if self.should_check_crlf() && strings::ends_with_cr(&value) && self.node_starts_with_lf(node)
        {
            let piece = self.tree[node].piece;
            let new_start = BufferCursor::new(piece.start.line + 1, 0);
            let n_piece = Piece::new(
                piece.buffer_index,
                new_start,
                piece.end,
                self.line_feed_count(piece.buffer_index, new_start, piece.end),
                piece.length - 1,
            );
            self.tree[node].piece = n_piece;

            value.push('\n');
            self.tree.update_metadata(node, -1, -1);

            if n_piece.length == 0 {
                nodes_to_del.push(node);
            }
        }

        let new_pieces = self.create_new_pieces(&value);
        let mut new_node = self.tree.rb_insert_left(node, new_pieces[new_pieces.len() - 1]);
        for piece in new_pieces[..new_pieces.len() - 1].iter().rev() {
            new_node = self.tree.rb_insert_left(new_node, *piece);
        }
        self.validate_crlf_with_prev_node(new_node);
        self.delete_nodes(nodes_to_del);
    }

    fn insert_content_right(&mut self, node: NodeIdx, value: &str) {
        // inserting right after a node's end
        let mut value = value.to_string();
        if self.adjust_carriage_return_from_next(&value, node) {
            value.push('\n');
        }

        let new_pieces = self.create_new_pieces(&value);
        let new_node = self.tree.rb_insert_right(node, new_pieces[0]);
        let mut tmp_node = new_node;
        for piece in &new_pieces[1..] {
            tmp_node = self.tree.rb_insert_right(tmp_node, *piece);
        }

        self.validate_crlf_with_prev_node(new_node);
    }

    /// Extends the buffer-0 piece `node` in place by appending `value` to
    /// the change buffer.
    fn append_to_node(&mut self, node: NodeIdx, value: &str) {
        let mut value = value.to_string();
        if self.adjust_carriage_return_from_next(&value, node) {
            value.push('\n');
        }

        let hit_crlf =
            self.should_check_crlf() && strings::starts_with_lf(&value) && self.node_ends_with_cr(node);
        let start_offset = self.buffers[0].len();
        Arc::make_mut(&mut self.buffers[0]).text.push_str(&value);

        let mut line_starts = strings::compute_line_starts(&value);
        for start in line_starts.iter_mut() {
            *start += start_offset;
        }
        if hit_crlf {
            // the lone \r at the buffer tail just became a \r\n; its line
            // start is no longer real
            let prev_start = self.buffers[0].line_starts[self.buffers[0].line_starts.len() - 2];
            Arc::make_mut(&mut self.buffers[0]).line_starts.pop();
            self.last_change_buffer_pos = BufferCursor::new(
                self.last_change_buffer_pos.line - 1,
                start_offset - prev_start,
            );
        }

        Arc::make_mut(&mut self.buffers[0])
            .line_starts
            .extend_from_slice(&line_starts[1..]);
        let end_index = self.buffers[0].line_starts.len() - 1;
        let end_column = self.buffers[0].len() - self.buffers[0].line_starts[end_index];
        let new_end = BufferCursor::new(end_index, end_column);

        let piece = self.tree[node].piece;
        let new_length = piece.length + value.len();
        let new_line_feed_cnt = self.line_feed_count(0, piece.start, new_end);
        let lf_delta = new_line_feed_cnt as isize - piece.line_feed_cnt as isize;
        self.tree[node].piece = Piece::new(
            piece.buffer_index,
            piece.start,
            new_end,
            new_line_feed_cnt,
            new_length,
        );

        self.last_change_buffer_pos = new_end;
        self.tree.update_metadata(node, value.len() as isize, lf_delta);
    }

    /// Turns `text` into pieces, appending small texts to the change
    /// buffer and splitting large ones into fresh chunk buffers.
    fn create_new_pieces(&mut self, text: &str) -> Vec<Piece> {
        if text.len() > AVERAGE_BUFFER_SIZE {
            let mut text = text;
            let mut new_pieces = Vec::new();
            while text.len() > AVERAGE_BUFFER_SIZE {
                let mut split = AVERAGE_BUFFER_SIZE;
                while !text.is_char_boundary(split) {
                    split -= 1;
                }
                if text.as_bytes()[split - 1] == b'\r' {
                    // hold the \r back so a following \n lands in the same chunk
                    split -= 1;
                }
                let (chunk, rest) = text.split_at(split);
                new_pieces.push(self.push_chunk_buffer(chunk));
                text = rest;
            }
            new_pieces.push(self.push_chunk_buffer(text));
            return new_pieces;
        }

        let mut start_offset = self.buffers[0].len();
        let mut line_starts = strings::compute_line_starts(text);

        let mut start = self.last_change_buffer_pos;
        let buffer_ends_with_cr = strings::ends_with_cr(&self.buffers[0].text);
        let last_line_start = *self.buffers[0].line_starts.last().expect("line_starts non-empty");

        if last_line_start == start_offset
            && start_offset != 0
            && strings::starts_with_lf(text)
            && buffer_ends_with_cr
        {
            // the change buffer ends with \r and the new text starts with
            // \n; keep them apart with a filler byte so the buffer's line
            // starts do not fuse two pieces' terminators
            self.last_change_buffer_pos = BufferCursor::new(
                self.last_change_buffer_pos.line,
                self.last_change_buffer_pos.column + 1,
            );
            start = self.last_change_buffer_pos;

            for ls in line_starts.iter_mut() {
                *ls += start_offset + 1;
            }

            let buffer = Arc::make_mut(&mut self.buffers[0]);
            buffer.line_starts.extend_from_slice(&line_starts[1..]);
            buffer.text.push('_');
            buffer.text.push_str(text);
            start_offset += 1;
        } else {
            if start_offset != 0 {
                for ls in line_starts.iter_mut() {
                    *ls += start_offset;
                }
            }
            let buffer = Arc::make_mut(&mut self.buffers[0]);
            buffer.line_starts.extend_from_slice(&line_starts[1..]);
            buffer.text.push_str(text);
        }

        let end_offset = self.buffers[0].len();
        let end_index = self.buffers[0].line_starts.len() - 1;
        let end_column = end_offset - self.buffers[0].line_starts[end_index];
        let end_pos = BufferCursor::new(end_index, end_column);
        let piece = Piece::new(
            0,
            start,
            end_pos,
            self.line_feed_count(0, start, end_pos),
            end_offset - start_offset,
        );
        self.last_change_buffer_pos = end_pos;
        vec![piece]
    }

    fn push_chunk_buffer(&mut self, text: &str) -> Piece {
        let buffer = ChunkBuffer::new(text.to_string());
        let last_line = buffer.line_starts.len() - 1;
        let piece = Piece::new(
            self.buffers.len(),
            BufferCursor::default(),
            BufferCursor::new(last_line, buffer.len() - buffer.line_starts[last_line]),
            last_line,
            buffer.len(),
        );
        self.buffers.push(Arc::new(buffer));
        piece
    }

    fn delete_node_tail(&mut self, node: NodeIdx, pos: BufferCursor) {
        let piece = self.tree[node].piece;
        let original_lf_cnt = piece.line_feed_cnt;
        let original_end_offset = self.buffer_offset(piece.buffer_index, piece.end);

        let new_end_offset = self.buffer_offset(piece.buffer_index, pos);
        let new_line_feed_cnt = self.line_feed_count(piece.buffer_index, piece.start, pos);

        let lf_delta = new_line_feed_cnt as isize - original_lf_cnt as isize;
        let size_delta = new_end_offset as isize - original_end_offset as isize;
        let new_length = (piece.length as isize + size_delta) as usize;

        self.tree[node].piece = Piece::new(
            piece.buffer_index,
            piece.start,
            pos,
            new_line_feed_cnt,
            new_length,
        );

        self.tree.update_metadata(node, size_delta, lf_delta);
    }

    fn delete_node_head(&mut self, node: NodeIdx, pos: BufferCursor) {
        let piece = self.tree[node].piece;
        let original_lf_cnt = piece.line_feed_cnt;
        let original_start_offset = self.buffer_offset(piece.buffer_index, piece.start);

        let new_line_feed_cnt = self.line_feed_count(piece.buffer_index, pos, piece.end);
        let new_start_offset = self.buffer_offset(piece.buffer_index, pos);
        let lf_delta = new_line_feed_cnt as isize - original_lf_cnt as isize;
        let size_delta = original_start_offset as isize - new_start_offset as isize;
        let new_length = (piece.length as isize + size_delta) as usize;

        self.tree[node].piece = Piece::new(
            piece.buffer_index,
            pos,
            piece.end,
            new_line_feed_cnt,
            new_length,
        );

        self.tree.update_metadata(node, size_delta, lf_delta);
    }

    /// Cuts `[start, end)` out of the middle of `node`'s piece, keeping
    /// the head in `node` and inserting the tail as a new right sibling.
    fn shrink_node(&mut self, node: NodeIdx, start: BufferCursor, end: BufferCursor) {
        let piece = self.tree[node].piece;
        let original_start_pos = piece.start;
        let original_end_pos = piece.end;

        let old_length = piece.length;
        let old_lf_cnt = piece.line_feed_cnt;
        let new_line_feed_cnt = self.line_feed_count(piece.buffer_index, piece.start, start);
        let new_length = self.buffer_offset(piece.buffer_index, start)
            - self.buffer_offset(piece.buffer_index, original_start_pos);

        self.tree[node].piece = Piece::new(
            piece.buffer_index,
            piece.start,
            start,
            new_line_feed_cnt,
            new_length,
        );

        self.tree.update_metadata(
            node,
            new_length as isize - old_length as isize,
            new_line_feed_cnt as isize - old_lf_cnt as isize,
        );

        let new_piece = Piece::new(
            piece.buffer_index,
            end,
            original_end_pos,
            self.line_feed_count(piece.buffer_index, end, original_end_pos),
            self.buffer_offset(piece.buffer_index, original_end_pos)
                - self.buffer_offset(piece.buffer_index, end),
        );

        let new_node = self.tree.rb_insert_right(node, new_piece);
        self.validate_crlf_with_prev_node(new_node);
    }

    // ---- CRLF integrity ----

    fn should_check_crlf(&self) -> bool {
        !(self.eol_normalized && self.eol == Eol::Lf)
    }

    fn node_starts_with_lf(&self, node: NodeIdx) -> bool {
        if node == SENTINEL {
            return false;
        }
        let piece = self.tree[node].piece;
        if piece.line_feed_cnt == 0 {
            return false;
        }

        let buffer = &self.buffers[piece.buffer_index];
        let line = piece.start.line;
        let start_offset = buffer.line_starts[line] + piece.start.column;
        if line == buffer.line_starts.len() - 1 {
            // no terminator on the last buffer line
            return false;
        }
        if buffer.line_starts[line + 1] > start_offset + 1 {
            return false;
        }
        buffer.text.as_bytes()[start_offset] == b'\n'
    }

    fn node_ends_with_cr(&self, node: NodeIdx) -> bool {
        if node == SENTINEL {
            return false;
        }
        let piece = self.tree[node].piece;
        if piece.line_feed_cnt == 0 {
            return false;
        }
        self.node_byte_at(node, piece.length - 1) == Some(b'\r')
    }

    /// Byte at `offset` into `node`'s piece; `None` for pieces with no
    /// terminators (they cannot take part in a CRLF repair).
    fn node_byte_at(&self, node: NodeIdx, offset: usize) -> Option<u8> {
        let piece = self.tree[node].piece;
        if piece.line_feed_cnt < 1 {
            return None;
        }
        let buffer = &self.buffers[piece.buffer_index];
        let target = buffer.offset_of(piece.start) + offset;
        Some(buffer.text.as_bytes()[target])
    }

    /// Repairs the boundary in front of `node` after it gained a new
    /// predecessor.
    fn validate_crlf_with_prev_node(&mut self, node: NodeIdx) {
        if self.should_check_crlf() && self.node_starts_with_lf(node) {
            let prev = self.tree.prev_node(node);
            if self.node_ends_with_cr(prev) {
                self.fix_crlf(prev, node);
            }
        }
    }

    /// Repairs the boundary behind `node` after its tail changed.
    fn validate_crlf_with_next_node(&mut self, node: NodeIdx) {
        if self.should_check_crlf() && self.node_ends_with_cr(node) {
            let next = self.tree.next_node(node);
            if self.node_starts_with_lf(next) {
                self.fix_crlf(node, next);
            }
        }
    }

    /// `prev` ends with \r and `next` starts with \n: trim both and put a
    /// dedicated "\r\n" piece between them, dropping emptied nodes.
    fn fix_crlf(&mut self, prev: NodeIdx, next: NodeIdx) {
        let mut nodes_to_del = Vec::new();

        let prev_piece = self.tree[prev].piece;
        let new_end = if prev_piece.end.column == 0 {
            // the piece ended right after a lone \r; step back over it
            let line_starts = &self.buffers[prev_piece.buffer_index].line_starts;
            BufferCursor::new(
                prev_piece.end.line - 1,
                line_starts[prev_piece.end.line] - line_starts[prev_piece.end.line - 1] - 1,
            )
        } else {
            BufferCursor::new(prev_piece.end.line, prev_piece.end.column - 1)
        };

        self.tree[prev].piece = Piece::new(
            prev_piece.buffer_index,
            prev_piece.start,
            new_end,
            prev_piece.line_feed_cnt - 1,
            prev_piece.length - 1,
        );
        self.tree.update_metadata(prev, -1, -1);
        if self.tree[prev].piece.length == 0 {
            nodes_to_del.push(prev);
        }

        let next_piece = self.tree[next].piece;
        let new_start = BufferCursor::new(next_piece.start.line + 1, 0);
        let new_length = next_piece.length - 1;
        let new_line_feed_cnt =
            self.line_feed_count(next_piece.buffer_index, new_start, next_piece.end);
        self.tree[next].piece = Piece::new(
            next_piece.buffer_index,
            new_start,
            next_piece.end,
            new_line_feed_cnt,
            new_length,
        );
        self.tree.update_metadata(next, -1, -1);
        if self.tree[next].piece.length == 0 {
            nodes_to_del.push(next);
        }

        let pieces = self.create_new_pieces("\r\n");
        self.tree.rb_insert_right(prev, pieces[0]);

        for node in nodes_to_del {
            self.tree.rb_delete(node);
        }
    }

    /// When `value` ends with \r and the node after `node` starts with
    /// \n, steals that \n (shrinking or deleting the next node) so the
    /// caller can append it to `value`. Returns whether it did.
    fn adjust_carriage_return_from_next(&mut self, value: &str, node: NodeIdx) -> bool {
        if self.should_check_crlf() && strings::ends_with_cr(value) {
            let next = self.tree.next_node(node);
            if self.node_starts_with_lf(next) {
                if self.tree[next].piece.length == 1 {
                    self.tree.rb_delete(next);
                } else {
                    let piece = self.tree[next].piece;
                    let new_start = BufferCursor::new(piece.start.line + 1, 0);
                    let new_line_feed_cnt =
                        self.line_feed_count(piece.buffer_index, new_start, piece.end);
                    self.tree[next].piece = Piece::new(
                        piece.buffer_index,
                        new_start,
                        piece.end,
                        new_line_feed_cnt,
                        piece.length - 1,
                    );
                    self.tree.update_metadata(next, -1, -1);
                }
                return true;
            }
        }
        false
    }

    /// Recomputes the aggregate length and line count by walking the
    /// right spine, and drops cache entries past the new length.
    fn compute_buffer_metadata(&mut self) {
        let mut lf_cnt = 1;
        let mut len = 0;
        let mut x = self.tree.root;
        while x != SENTINEL {
            lf_cnt += self.tree[x].lf_left + self.tree[x].piece.line_feed_cnt;
            len += self.tree[x].size_left + self.tree[x].piece.length;
            x = self.tree[x].right;
        }
        self.line_count = lf_cnt;
        self.length = len;
        self.search_cache.validate(&self.tree, len);
    }

    // ---- debugging support ----

    /// Validates every internal invariant, panicking on violation: the
    /// red-black shape, the left-subtree aggregates, the document-level
    /// length and line count, and that no piece boundary splits a `\r\n`
    /// pair. Intended for tests and debugging.
    pub fn check_invariants(&self) {
        if self.tree.root != SENTINEL {
            self.tree.assert_valid_rb(self.tree.root);
        }

        let content = self.content();
        assert_eq!(self.length, content.len(), "aggregate length diverged");
        assert_eq!(
            self.line_count,
            strings::count_line_breaks(&content).eol_count + 1,
            "aggregate line count diverged"
        );

        let nodes = self.nodes_in_order();
        for pair in nodes.windows(2) {
            let left = self.tree[pair[0]].piece;
            let right = self.tree[pair[1]].piece;
            assert!(
                !(self.piece_str(&left).ends_with('\r') && self.piece_str(&right).starts_with('\n')),
                "a \\r\\n pair is split across two pieces"
            );
        }

        for &node in &nodes {
            let piece = self.tree[node].piece;
            assert!(piece.length > 0, "zero-length piece left in the tree");
            assert_eq!(
                piece.line_feed_cnt,
                self.line_feed_count(piece.buffer_index, piece.start, piece.end),
                "piece line feed count diverged"
            );
        }
    }
}
