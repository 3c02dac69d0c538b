//! Shared helpers for the integration tests.

#![allow(dead_code)]

use piecebuf::piece_tree::PieceTree;
use piecebuf::{Eol, Position, Range, TextBuffer, TextBufferBuilder};

pub fn create_text_buffer(chunks: &[&str], normalize_eol: bool) -> TextBuffer {
    let mut builder = TextBufferBuilder::new();
    for chunk in chunks {
        builder.accept_chunk(chunk);
    }
    builder.build(Eol::Lf, normalize_eol)
}

pub fn create_piece_tree(chunks: &[&str], normalize_eol: bool) -> PieceTree {
    create_text_buffer(chunks, normalize_eol).into_piece_tree()
}

/// Splits on `\r\n`, `\r`, `\n`, keeping a trailing empty line.
pub fn split_lines(text: &str) -> Vec<String> {
    let bytes = text.as_bytes();
    let mut lines = Vec::new();
    let mut start = 0;
    let mut i = 0;
    while i < bytes.len() {
        match bytes[i] {
            b'\r' => {
                lines.push(text[start..i].to_string());
                if i + 1 < bytes.len() && bytes[i + 1] == b'\n' {
                    i += 1;
                }
                start = i + 1;
            }
            b'\n' => {
                lines.push(text[start..i].to_string());
                start = i + 1;
            }
            _ => {}
        }
        i += 1;
    }
    lines.push(text[start..].to_string());
    lines
}

pub fn trim_line_feed(text: &str) -> &str {
    piecebuf::strings::trim_trailing_eol(text)
}

/// Line-start offsets of `text`, the trailing start included when the
/// text ends with a terminator.
fn reference_line_starts(text: &str) -> Vec<usize> {
    let bytes = text.as_bytes();
    let mut line_starts = vec![0];
    let mut i = 0;
    while i < bytes.len() {
        match bytes[i] {
            b'\r' if i + 1 < bytes.len() && bytes[i + 1] == b'\n' => {
                line_starts.push(i + 2);
                i += 2;
            }
            b'\r' | b'\n' => {
                line_starts.push(i + 1);
                i += 1;
            }
            _ => i += 1,
        }
    }
    line_starts
}

/// Validates offset/position arithmetic against the expected content.
pub fn assert_line_starts(expected: &str, pt: &PieceTree) {
    let line_starts = reference_line_starts(expected);

    for (i, &line_start) in line_starts.iter().enumerate() {
        let position = Position::new(i + 1, 1);
        assert_eq!(
            pt.position_at(line_start),
            position,
            "position_at({line_start}) in {expected:?}"
        );
        assert_eq!(
            pt.offset_at(position.line, position.column),
            line_start,
            "offset_at({position}) in {expected:?}"
        );
    }

    for &line_start in line_starts.iter().skip(1) {
        let offset = line_start - 1;
        let position = pt.position_at(offset);
        assert_eq!(
            pt.offset_at(position.line, position.column),
            offset,
            "offset/position inverse at {offset} in {expected:?}"
        );
    }
}

/// Validates per-line reads against the expected content.
pub fn assert_lines_content(expected: &str, pt: &mut PieceTree) {
    let lines = split_lines(expected);
    assert_eq!(pt.line_count(), lines.len(), "line count of {expected:?}");
    assert_eq!(pt.content(), expected);

    for (i, line) in lines.iter().enumerate() {
        assert_eq!(&pt.get_line_content(i + 1), line, "line {} of {expected:?}", i + 1);
        let end_column = line.len() + if i == lines.len() - 1 { 1 } else { 2 };
        let ranged = pt.get_value_in_range(Range::new(i + 1, 1, i + 1, end_column));
        assert_eq!(
            trim_line_feed(&ranged),
            line,
            "ranged line {} of {expected:?}",
            i + 1
        );
    }
}

/// A small deterministic generator for the randomized transcripts.
pub struct TestRng(u64);

impl TestRng {
    pub fn new(seed: u64) -> TestRng {
        TestRng(seed.max(1))
    }

    pub fn next_u64(&mut self) -> u64 {
        let mut x = self.0;
        x ^= x << 13;
        x ^= x >> 7;
        x ^= x << 17;
        self.0 = x;
        x
    }

    pub fn below(&mut self, bound: usize) -> usize {
        if bound == 0 {
            0
        } else {
            (self.next_u64() % bound as u64) as usize
        }
    }

    pub fn string(&mut self, len: usize) -> String {
        const ALPHABET: &[u8] = b"abcdefghijklmnopqrstuvwxyzABCDEFGHIJKLMNOPQRSTUVWXYZ\r\n";
        let mut out = String::with_capacity(len);
        for _ in 0..len {
            out.push(ALPHABET[self.below(ALPHABET.len())] as char);
        }
        out
    }
}
