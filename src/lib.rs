//! A piece-table text buffer over an augmented red-black tree.
//!
//! This is the text-storage engine of a code editor: fast random insert
//! and delete, O(log n) offset/line conversion, line retrieval, regex and
//! word search, and point-in-time snapshots for safe concurrent export.
//! It scales to megabyte documents and thousands of edits per session.
//!
//! Document text lives in append-only chunk buffers; the document order
//! is an in-order walk of a red-black tree whose nodes describe pieces of
//! those buffers and carry left-subtree byte and line-feed totals. Small
//! consecutive edits append to a shared change buffer instead of
//! allocating a piece per keystroke, and every mutation repairs the
//! one invariant that keeps line accounting honest: a `\r\n` pair never
//! spans two pieces.
//!
//! # Example
//!
//! ```
//! use piecebuf::{Eol, Range, SingleEditOperation, TextBufferBuilder};
//!
//! let mut builder = TextBufferBuilder::new();
//! builder.accept_chunk("hello world");
//! let mut buffer = builder.build(Eol::Lf, true);
//!
//! buffer
//!     .apply_edits(
//!         &[SingleEditOperation::new(Range::new(1, 1, 1, 1), "X")],
//!         false,
//!     )
//!     .unwrap();
//! assert_eq!(buffer.content(), "Xhello world");
//! assert_eq!(buffer.get_line_length(1), 12);
//! ```
//!
//! Offsets and columns throughout the crate are byte offsets into UTF-8
//! text; line numbers and columns are 1-based. Conversion to and from
//! other position encodings (UTF-16 code units, codepoints) is the
//! caller's concern.

pub mod buffer;
pub mod builder;
mod cache;
pub mod edits;
pub mod piece_tree;
pub mod position;
mod search;
pub mod snapshot;
pub mod strings;
pub mod text_buffer;
mod tree;

pub use buffer::{BufferCursor, ChunkBuffer, Piece};
pub use builder::TextBufferBuilder;
pub use edits::{
    ApplyEditsResult, ContentChange, ReverseEditOperation, SingleEditOperation, TextChange,
};
pub use piece_tree::{Eol, PieceTree};
pub use position::{Position, Range};
pub use snapshot::Snapshot;
pub use text_buffer::{EolPreference, TextBuffer, DEFAULT_REDUCE_THRESHOLD};
