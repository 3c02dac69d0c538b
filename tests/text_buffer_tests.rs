//! Facade-level behavior: the batch-edit protocol, builder handoff,
//! snapshots, search dispatch and range reads.

mod common;

use common::create_text_buffer;
use piecebuf::{
    Eol, EolPreference, Position, Range, ReverseEditOperation, SingleEditOperation,
    TextBufferBuilder,
};
use regex::Regex;

fn snapshot_value(snapshot: &mut piecebuf::Snapshot) -> String {
    let mut out = String::new();
    while let Some(chunk) = snapshot.read() {
        out.push_str(&chunk);
    }
    out
}

fn as_forward_ops(reverse: &[ReverseEditOperation]) -> Vec<SingleEditOperation> {
    reverse
        .iter()
        .map(|op| SingleEditOperation::new(op.range, op.text.clone()))
        .collect()
}

#[test]
fn batch_edits_emit_changes_in_input_order() {
    let mut buffer = create_text_buffer(&["hello world"], true);

    let result = buffer
        .apply_edits(
            &[
                SingleEditOperation::new(Range::new(1, 1, 1, 1), "X"),
                SingleEditOperation::new(Range::new(1, 7, 1, 7), "Y"),
            ],
            false,
        )
        .unwrap();

    assert_eq!(buffer.content(), "Xhello Yworld");
    assert_eq!(result.changes.len(), 2);
    assert_eq!(result.changes[0].text, "X");
    assert_eq!(result.changes[0].range, Range::new(1, 1, 1, 1));
    assert_eq!(result.changes[1].text, "Y");
    assert_eq!(result.changes[1].range, Range::new(1, 7, 1, 7));
    buffer.piece_tree().check_invariants();
}

#[test]
fn overlapping_edits_fail_before_mutating() {
    let mut buffer = create_text_buffer(&["hello world"], true);

    let result = buffer.apply_edits(
        &[
            SingleEditOperation::new(Range::new(1, 1, 1, 4), "A"),
            SingleEditOperation::new(Range::new(1, 3, 1, 6), "B"),
        ],
        false,
    );

    assert!(result.is_err());
    assert_eq!(buffer.content(), "hello world");
}

#[test]
fn touching_ranges_are_allowed() {
    let mut buffer = create_text_buffer(&["hello world"], true);

    buffer
        .apply_edits(
            &[
                SingleEditOperation::new(Range::new(1, 1, 1, 3), "A"),
                SingleEditOperation::new(Range::new(1, 3, 1, 6), "B"),
            ],
            false,
        )
        .unwrap();

    assert_eq!(buffer.content(), "AB world");
}

#[test]
fn replacement_and_deletion_in_one_batch() {
    let mut buffer = create_text_buffer(&["hello world"], true);

    let result = buffer
        .apply_edits(
            &[
                SingleEditOperation::new(Range::new(1, 1, 1, 6), "goodbye"),
                SingleEditOperation::delete(Range::new(1, 6, 1, 12)),
            ],
            false,
        )
        .unwrap();

    assert_eq!(buffer.content(), "goodbye");
    assert_eq!(result.changes.len(), 2);
    assert_eq!(result.changes[1].range_length, 6);
    assert_eq!(result.changes[1].text, "");
}

#[test]
fn undo_edits_restore_the_document() {
    let mut buffer = create_text_buffer(&["abc\ndef"], true);

    let result = buffer
        .apply_edits(
            &[SingleEditOperation::new(Range::new(1, 1, 2, 4), "123")],
            true,
        )
        .unwrap();
    assert_eq!(buffer.content(), "123");

    let reverse = result.reverse_edits.unwrap();
    assert_eq!(reverse.len(), 1);
    assert_eq!(reverse[0].range, Range::new(1, 1, 1, 4));
    assert_eq!(reverse[0].text, "abc\ndef");
    assert_eq!(reverse[0].text_change.old_offset, 0);
    assert_eq!(reverse[0].text_change.new_text, "123");

    buffer.apply_edits(&as_forward_ops(&reverse), false).unwrap();
    assert_eq!(buffer.content(), "abc\ndef");
}

#[test]
fn undo_edits_restore_multi_op_batches() {
    let mut buffer = create_text_buffer(&["abc\ndef"], true);

    let result = buffer
        .apply_edits(
            &[
                SingleEditOperation::new(Range::new(1, 1, 1, 1), "A"),
                SingleEditOperation::new(Range::new(2, 1, 2, 1), "BB\nC"),
            ],
            true,
        )
        .unwrap();
    assert_eq!(buffer.content(), "Aabc\nBB\nCdef");

    let reverse = result.reverse_edits.unwrap();
    buffer.apply_edits(&as_forward_ops(&reverse), false).unwrap();
    assert_eq!(buffer.content(), "abc\ndef");
    buffer.piece_tree().check_invariants();
}

#[test]
fn big_batches_collapse_into_one_edit() {
    let mut buffer = create_text_buffer(&["abcdefgh"], true);
    buffer.set_reduce_threshold(3);

    let result = buffer
        .apply_edits(
            &[
                SingleEditOperation::new(Range::new(1, 1, 1, 2), "1"),
                SingleEditOperation::new(Range::new(1, 3, 1, 4), "2"),
                SingleEditOperation::new(Range::new(1, 5, 1, 6), "3"),
            ],
            false,
        )
        .unwrap();

    assert_eq!(buffer.content(), "1b2d3fgh");
    assert_eq!(result.changes.len(), 1);
    assert_eq!(result.changes[0].range, Range::new(1, 1, 1, 6));
}

#[test]
fn inserted_text_is_normalized_to_buffer_eol() {
    let mut builder = TextBufferBuilder::new();
    builder.accept_chunk("a\r\nb");
    let mut buffer = builder.build(Eol::CrLf, true);
    assert_eq!(buffer.eol(), Eol::CrLf);

    buffer
        .apply_edits(
            &[SingleEditOperation::new(Range::new(1, 1, 1, 1), "x\ny\n")],
            false,
        )
        .unwrap();
    assert_eq!(buffer.content(), "x\r\ny\r\na\r\nb");
    buffer.piece_tree().check_invariants();
}

#[test]
fn content_flags_update_from_inserted_text() {
    let mut buffer = create_text_buffer(&["plain"], true);
    assert!(!buffer.might_contain_rtl());
    assert!(!buffer.might_contain_non_basic_ascii());

    buffer
        .apply_edits(
            &[SingleEditOperation::new(Range::new(1, 1, 1, 1), "שלום")],
            false,
        )
        .unwrap();
    assert!(buffer.might_contain_non_basic_ascii());
    assert!(buffer.might_contain_rtl());

    let mut buffer = create_text_buffer(&["plain"], true);
    buffer
        .apply_edits(
            &[SingleEditOperation::new(Range::new(1, 1, 1, 1), "a\u{2028}b")],
            false,
        )
        .unwrap();
    assert!(buffer.might_contain_unusual_line_terminators());
}

// snapshots

#[test]
fn snapshot_is_isolated_from_later_edits() {
    let mut buffer = create_text_buffer(&["abc\ndef"], true);
    let mut snapshot = buffer.create_snapshot(false);

    buffer
        .apply_edits(&[SingleEditOperation::delete(Range::new(2, 1, 2, 4))], false)
        .unwrap();
    buffer
        .apply_edits(
            &[SingleEditOperation::new(Range::new(1, 1, 2, 1), "abc\ndef")],
            false,
        )
        .unwrap();

    assert_eq!(snapshot_value(&mut snapshot), "abc\ndef");
    assert_eq!(buffer.content(), "abc\ndef");
}

#[test]
fn snapshot_survives_insert_then_delete() {
    let mut buffer = create_text_buffer(&["abc\ndef"], true);
    let mut snapshot = buffer.create_snapshot(false);

    buffer
        .apply_edits(
            &[SingleEditOperation::new(Range::new(2, 1, 2, 1), "!")],
            false,
        )
        .unwrap();
    buffer
        .apply_edits(&[SingleEditOperation::delete(Range::new(2, 1, 2, 2))], false)
        .unwrap();

    assert_eq!(snapshot_value(&mut snapshot), "abc\ndef");
}

#[test]
fn snapshot_reflects_state_at_capture_time() {
    let mut buffer = create_text_buffer(&["abc\ndef"], true);
    buffer
        .apply_edits(
            &[SingleEditOperation::new(Range::new(2, 4, 2, 4), "!")],
            false,
        )
        .unwrap();
    let mut snapshot = buffer.create_snapshot(false);

    buffer
        .apply_edits(
            &[SingleEditOperation::new(Range::new(2, 5, 2, 5), "!")],
            false,
        )
        .unwrap();

    assert_eq!(snapshot_value(&mut snapshot), "abc\ndef!");
    assert_ne!(snapshot_value(&mut buffer.create_snapshot(false)), "abc\ndef!");
}

#[test]
fn snapshot_on_change_buffer_appends() {
    let mut buffer = create_text_buffer(&["\n"], true);
    buffer
        .apply_edits(
            &[SingleEditOperation::new(Range::new(2, 1, 2, 1), "!")],
            false,
        )
        .unwrap();
    let mut snapshot = buffer.create_snapshot(false);
    let mut snapshot2 = buffer.create_snapshot(false);
    assert_eq!(snapshot_value(&mut snapshot), "\n!");

    buffer
        .apply_edits(&[SingleEditOperation::delete(Range::new(2, 1, 2, 2))], false)
        .unwrap();
    buffer
        .apply_edits(
            &[SingleEditOperation::new(Range::new(2, 1, 2, 1), "!")],
            false,
        )
        .unwrap();
    assert_eq!(snapshot_value(&mut snapshot2), "\n!");
}

#[test]
fn snapshot_carries_the_bom_when_asked() {
    let mut builder = TextBufferBuilder::new();
    builder.accept_chunk("\u{FEFF}abc");
    let buffer = builder.build(Eol::Lf, true);
    assert_eq!(buffer.content(), "abc");

    let mut with_bom = buffer.create_snapshot(true);
    assert_eq!(snapshot_value(&mut with_bom), "\u{FEFF}abc");
    let mut without_bom = buffer.create_snapshot(false);
    assert_eq!(snapshot_value(&mut without_bom), "abc");
}

// search through the facade

#[test]
fn word_search_reports_line_column_ranges() {
    let mut buffer = create_text_buffer(&["hello\nlow"], true);

    let matches = buffer.find_matches_by_word("lo", Range::new(1, 1, 2, 4), 1000, || false);
    assert_eq!(matches.len(), 2);
    assert_eq!(matches[0], Range::new(1, 4, 1, 6));
    assert_eq!(matches[1], Range::new(2, 1, 2, 3));
}

#[test]
fn word_search_honors_limit_and_cancellation() {
    let mut buffer = create_text_buffer(&["ab ab ab"], true);

    let matches = buffer.find_matches_by_word("ab", Range::new(1, 1, 1, 9), 2, || false);
    assert_eq!(matches.len(), 2);

    let matches = buffer.find_matches_by_word("ab", Range::new(1, 1, 1, 9), 1000, || true);
    assert!(matches.is_empty());
}

#[test]
fn single_line_regex_search() {
    let mut buffer = create_text_buffer(&["one two\nthree two"], true);

    let regex = Regex::new("two").unwrap();
    let matches = buffer.find_matches(&regex, Range::new(1, 1, 2, 10), false, 1000, || false);
    assert_eq!(matches.len(), 2);
    assert_eq!(matches[0], Range::new(1, 5, 1, 8));
    assert_eq!(matches[1], Range::new(2, 7, 2, 10));
}

#[test]
fn multiline_regex_search_compensates_crlf() {
    let mut builder = TextBufferBuilder::new();
    builder.accept_chunk("a\r\nb\r\nc");
    let mut buffer = builder.build(Eol::CrLf, true);
    assert_eq!(buffer.eol(), Eol::CrLf);

    let regex = Regex::new("b\nc").unwrap();
    let matches = buffer.find_matches(&regex, Range::new(1, 1, 3, 2), true, 1000, || false);
    assert_eq!(matches.len(), 1);
    assert_eq!(matches[0], Range::new(2, 1, 3, 2));
}

#[test]
fn multiline_regex_search_on_lf_buffer() {
    let mut buffer = create_text_buffer(&["ab\ncd\nab"], true);

    let regex = Regex::new("ab\ncd").unwrap();
    let matches = buffer.find_matches(&regex, Range::new(1, 1, 3, 3), true, 1000, || false);
    assert_eq!(matches.len(), 1);
    assert_eq!(matches[0], Range::new(1, 1, 2, 3));
}

// reads

#[test]
fn offset_position_roundtrip_through_facade() {
    let buffer = create_text_buffer(&["hello\nworld"], true);

    assert_eq!(buffer.offset_at(Position::new(2, 1)), 6);
    assert_eq!(buffer.position_at(6), Position::new(2, 1));
    assert_eq!(buffer.range_at(3, 5), Range::new(1, 4, 2, 3));
    for offset in 0..=buffer.len() {
        let position = buffer.position_at(offset);
        assert_eq!(buffer.offset_at(position), offset);
    }
}

#[test]
fn value_length_in_range() {
    let buffer = create_text_buffer(&["hello\nworld"], true);
    assert_eq!(buffer.get_value_length_in_range(Range::new(1, 1, 1, 1)), 0);
    assert_eq!(buffer.get_value_length_in_range(Range::new(1, 2, 1, 5)), 3);
    assert_eq!(buffer.get_value_length_in_range(Range::new(1, 1, 2, 6)), 11);
}

#[test]
fn char_count_in_range_counts_codepoints() {
    let mut buffer = create_text_buffer(&["héllo\nwörld"], true);
    assert!(buffer.might_contain_non_basic_ascii());

    let full = Range::new(1, 1, 2, 7);
    assert_eq!(buffer.char_count_in_range(full), 11);

    let ascii = create_text_buffer(&["hello"], true);
    assert_eq!(ascii.get_value_length_in_range(Range::new(1, 1, 1, 6)), 5);
}

#[test]
fn line_reads_through_facade() {
    let mut buffer = create_text_buffer(&["  abc  \n\nx"], true);

    assert_eq!(buffer.get_line_content(1), "  abc  ");
    assert_eq!(buffer.get_line_content_with_eol(1), "  abc  \n");
    assert_eq!(buffer.get_line_length(1), 7);
    assert_eq!(buffer.get_line_max_column(1), 8);
    assert_eq!(buffer.get_first_non_whitespace_column(1), 3);
    assert_eq!(buffer.get_last_non_whitespace_column(1), 6);
    assert_eq!(buffer.get_first_non_whitespace_column(2), 0);
    assert_eq!(buffer.get_last_non_whitespace_column(2), 0);
}

#[test]
fn char_at_reads_across_pieces() {
    let mut buffer = create_text_buffer(&["ab"], true);
    buffer
        .apply_edits(
            &[SingleEditOperation::new(Range::new(1, 2, 1, 2), "é")],
            false,
        )
        .unwrap();
    assert_eq!(buffer.content(), "aéb");
    assert_eq!(buffer.char_at(0), Some('a'));
    assert_eq!(buffer.char_at(1), Some('é'));
    assert_eq!(buffer.char_at(3), Some('b'));
    assert_eq!(buffer.char_at(4), None);
}

#[test]
fn value_in_range_eol_preference() {
    let mut builder = TextBufferBuilder::new();
    builder.accept_chunk("a\r\nb");
    let buffer = builder.build(Eol::CrLf, true);

    let full = Range::new(1, 1, 2, 2);
    assert_eq!(buffer.get_value_in_range(full, EolPreference::TextDefined), "a\r\nb");
    assert_eq!(buffer.get_value_in_range(full, EolPreference::Lf), "a\nb");
    assert_eq!(buffer.get_value_in_range(full, EolPreference::CrLf), "a\r\nb");
}

#[test]
fn set_eol_through_facade() {
    let mut buffer = create_text_buffer(&["a\nb\nc"], true);
    buffer.set_eol(Eol::CrLf);
    assert_eq!(buffer.content(), "a\r\nb\r\nc");
    assert_eq!(buffer.eol(), Eol::CrLf);
    assert_eq!(buffer.line_count(), 3);
    buffer.piece_tree().check_invariants();
}

#[test]
fn edit_operations_serialize_roundtrip() {
    let op = SingleEditOperation::new(Range::new(1, 2, 3, 4), "text");
    let json = serde_json::to_string(&op).unwrap();
    let back: SingleEditOperation = serde_json::from_str(&json).unwrap();
    assert_eq!(back.range, op.range);
    assert_eq!(back.text, op.text);
}
