//! Point-in-time sequential reader over a buffer's content.

use std::sync::Arc;

use crate::buffer::{ChunkBuffer, Piece};

/// An immutable capture of the piece sequence at one instant.
///
/// The snapshot shares the chunk buffers with the live engine behind
/// `Arc`; the engine copies the change buffer on write while a snapshot
/// holds it, so later edits never show through. Reading is pull-based:
/// [`Snapshot::read`] yields successive chunks until `None`, which makes
/// it suitable for streaming the document to a sink from another thread.
pub struct Snapshot {
    pieces: Vec<Piece>,
    buffers: Vec<Arc<ChunkBuffer>>,
    bom: String,
    index: usize,
}

impl Snapshot {
    pub(crate) fn new(pieces: Vec<Piece>, buffers: Vec<Arc<ChunkBuffer>>, bom: String) -> Snapshot {
        Snapshot {
            pieces,
            buffers,
            bom,
            index: 0,
        }
    }

    /// The next chunk of content, or `None` when exhausted. The first
    /// chunk carries the byte-order mark, if any.
    pub fn read(&mut self) -> Option<String> {
        if self.pieces.is_empty() {
            if self.index == 0 {
                self.index += 1;
                if self.bom.is_empty() {
                    return None;
                }
                return Some(self.bom.clone());
            }
            return None;
        }

        if self.index > self.pieces.len() - 1 {
            return None;
        }

        let piece = &self.pieces[self.index];
        let buffer = &self.buffers[piece.buffer_index];
        let start = buffer.offset_of(piece.start);
        let end = buffer.offset_of(piece.end);
        let content = &buffer.text[start..end];

        let chunk = if self.index == 0 {
            format!("{}{}", self.bom, content)
        } else {
            content.to_string()
        };
        self.index += 1;
        Some(chunk)
    }
}
