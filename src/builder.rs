//! Chunked construction of a [`TextBuffer`].

use crate::buffer::ChunkBuffer;
use crate::piece_tree::Eol;
use crate::strings;
use crate::text_buffer::TextBuffer;

/// Accepts raw text in chunks and finalizes into a [`TextBuffer`].
///
/// The first chunk's byte-order mark is detected and held aside. A chunk
/// ending in `\r` keeps that byte back so a `\n` arriving at the start of
/// the next chunk lands in the same chunk buffer and the pair stays one
/// terminator.
#[derive(Default)]
pub struct TextBufferBuilder {
    chunks: Vec<ChunkBuffer>,
    bom: String,
    /// Trailing `\r` of the previous chunk, still to be emitted.
    pending_cr: bool,
    cr: usize,
    lf: usize,
    crlf: usize,
    contains_rtl: bool,
    contains_unusual_line_terminators: bool,
    not_basic_ascii: bool,
}

impl TextBufferBuilder {
    pub fn new() -> TextBufferBuilder {
        TextBufferBuilder::default()
    }

    pub fn accept_chunk(&mut self, text: &str) {
        if text.is_empty() {
            return;
        }

        let mut chunk = text;
        if self.chunks.is_empty() && !self.pending_cr {
            if let Some(stripped) = chunk.strip_prefix(strings::UTF8_BOM) {
                self.bom = strings::UTF8_BOM.to_string();
                chunk = stripped;
            }
        }

        if let Some(body) = chunk.strip_suffix('\r') {
            self.accept_chunk_inner(body, false);
            self.pending_cr = true;
        } else {
            self.accept_chunk_inner(chunk, false);
            self.pending_cr = false;
        }
    }

    fn accept_chunk_inner(&mut self, chunk: &str, allow_empty: bool) {
        if !allow_empty && chunk.is_empty() && !self.pending_cr {
            return;
        }

        if self.pending_cr {
            self.pending_cr = false;
            let mut text = String::with_capacity(chunk.len() + 1);
            text.push('\r');
            text.push_str(chunk);
            self.append_chunk(&text);
        } else {
            self.append_chunk(chunk);
        }
    }

    fn append_chunk(&mut self, chunk: &str) {
        let analysis = strings::analyze_line_starts(chunk);

        self.cr += analysis.cr;
        self.lf += analysis.lf;
        self.crlf += analysis.crlf;

        if !analysis.is_basic_ascii {
            self.not_basic_ascii = true;
            if !self.contains_rtl {
                self.contains_rtl = strings::contains_rtl(chunk);
            }
            if !self.contains_unusual_line_terminators {
                self.contains_unusual_line_terminators =
                    strings::contains_unusual_line_terminators(chunk);
            }
        }

        self.chunks
            .push(ChunkBuffer::from_parts(chunk.to_string(), analysis.line_starts));
    }

    /// Majority vote between CR-bearing and plain-LF terminators;
    /// `default_eol` decides for empty or single-line input.
    fn detect_eol(&self, default_eol: Eol) -> Eol {
        let total = self.cr + self.lf + self.crlf;
        let total_cr = self.cr + self.crlf;
        if total == 0 {
            return default_eol;
        }
        if total_cr > total / 2 {
            Eol::CrLf
        } else {
            Eol::Lf
        }
    }

    /// Finalizes into a [`TextBuffer`], deciding the document EOL and
    /// optionally rewriting every terminator to it.
    pub fn build(mut self, default_eol: Eol, normalize_eol: bool) -> TextBuffer {
        if self.chunks.is_empty() && !self.pending_cr {
            self.accept_chunk_inner("", true);
        }

        if self.pending_cr {
            // flush the held-back \r into the last chunk
            self.pending_cr = false;
            match self.chunks.last_mut() {
                Some(last) => {
                    last.text.push('\r');
                    last.line_starts = strings::compute_line_starts(&last.text);
                }
                None => self.chunks.push(ChunkBuffer::new("\r".to_string())),
            }
            self.cr += 1;
        }

        let eol = self.detect_eol(default_eol);

        if normalize_eol
            && ((eol == Eol::CrLf && (self.cr > 0 || self.lf > 0))
                || (eol == Eol::Lf && (self.cr > 0 || self.crlf > 0)))
        {
            for chunk in &mut self.chunks {
                let text = strings::normalize_eol(&chunk.text, eol.as_str());
                *chunk = ChunkBuffer::new(text);
            }
        }

        tracing::debug!(
            eol = eol.as_str(),
            normalized = normalize_eol,
            chunks = self.chunks.len(),
            "finalizing text buffer"
        );

        TextBuffer::new(
            self.chunks,
            eol,
            normalize_eol,
            self.bom,
            self.contains_rtl,
            self.contains_unusual_line_terminators,
            self.not_basic_ascii,
        )
    }
}
