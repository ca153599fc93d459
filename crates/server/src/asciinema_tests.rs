// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;

fn temp_stream() -> (tempfile::TempDir, std::path::PathBuf) {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("stdout");
    (dir, path)
}

#[test]
fn header_then_events() {
    let (_dir, path) = temp_stream();
    let mut writer = AsciinemaWriter::create(&path, &AsciinemaHeader::new(80, 24)).unwrap();
    writer.write_output(b"hello").unwrap();
    writer.write_resize(100, 30).unwrap();
    writer.write_exit(0, "sess-1").unwrap();

    let contents = std::fs::read_to_string(&path).unwrap();
    let lines: Vec<&str> = contents.lines().collect();
    assert_eq!(lines.len(), 4);

    assert_eq!(parse_line(lines[0]), Some(StreamEvent::Header { width: 80, height: 24 }));
    match parse_line(lines[1]) {
        Some(StreamEvent::Output { data, .. }) => assert_eq!(data, "hello"),
        other => panic!("unexpected: {other:?}"),
    }
    match parse_line(lines[2]) {
        Some(StreamEvent::Resize { cols, rows, .. }) => {
            assert_eq!((cols, rows), (100, 30));
        }
        other => panic!("unexpected: {other:?}"),
    }
    assert_eq!(
        parse_line(lines[3]),
        Some(StreamEvent::Exit { code: 0, session_id: "sess-1".to_owned() })
    );
}

#[test]
fn offsets_advance_per_line() {
    let (_dir, path) = temp_stream();
    let mut writer = AsciinemaWriter::create(&path, &AsciinemaHeader::new(80, 24)).unwrap();
    let after_header = writer.current_offset();
    assert!(after_header > 0);
    writer.write_output(b"abc").unwrap();
    assert!(writer.current_offset() > after_header);
    assert_eq!(writer.current_offset(), std::fs::metadata(&path).unwrap().len());
}

#[test]
fn clear_sequence_moves_offset() {
    let (_dir, path) = temp_stream();
    let mut writer = AsciinemaWriter::create(&path, &AsciinemaHeader::new(80, 24)).unwrap();
    writer.write_output(b"before").unwrap();
    assert_eq!(writer.last_clear_offset(), 0);

    let clear_line_offset = writer.current_offset();
    writer.write_output(b"\x1b[2Jafter").unwrap();
    assert_eq!(writer.last_clear_offset(), clear_line_offset);

    // A later clear supersedes the earlier one.
    writer.write_output(b"more").unwrap();
    let second_clear = writer.current_offset();
    writer.write_output(b"\x1b[3J").unwrap();
    assert_eq!(writer.last_clear_offset(), second_clear);
}

#[test]
fn home_clear_form_detected() {
    assert!(contains_clear("\x1b[H\x1b[2J"));
    assert!(contains_clear("\x1b[2J"));
    assert!(contains_clear("\x1b[3J"));
    assert!(!contains_clear("\x1b[K"));
    assert!(!contains_clear("plain text"));
}

#[test]
fn scan_matches_writer_offset() {
    let (_dir, path) = temp_stream();
    let mut writer = AsciinemaWriter::create(&path, &AsciinemaHeader::new(80, 24)).unwrap();
    for _ in 0..50 {
        writer.write_output(b"line of output\r\n").unwrap();
    }
    let expected = writer.current_offset();
    writer.write_output(b"\x1b[H\x1b[2J").unwrap();
    writer.write_output(b"post-clear").unwrap();

    assert_eq!(writer.last_clear_offset(), expected);
    assert_eq!(scan_last_clear_offset(&path).unwrap(), expected);
}

#[test]
fn scan_clear_at_file_end() {
    let (_dir, path) = temp_stream();
    let mut writer = AsciinemaWriter::create(&path, &AsciinemaHeader::new(80, 24)).unwrap();
    writer.write_output(b"history").unwrap();
    let expected = writer.current_offset();
    writer.write_output(b"\x1b[2J").unwrap();

    assert_eq!(scan_last_clear_offset(&path).unwrap(), expected);
}

#[test]
fn parse_rejects_garbage() {
    assert_eq!(parse_line(""), None);
    assert_eq!(parse_line("not json"), None);
    assert_eq!(parse_line("[1.0]"), None);
    assert_eq!(parse_line("[1.0, \"x\", \"data\"]"), None);
}

#[test]
fn event_times_non_decreasing() {
    let (_dir, path) = temp_stream();
    let mut writer = AsciinemaWriter::create(&path, &AsciinemaHeader::new(80, 24)).unwrap();
    for _ in 0..5 {
        writer.write_output(b"x").unwrap();
    }
    let contents = std::fs::read_to_string(&path).unwrap();
    let times: Vec<f64> = contents
        .lines()
        .filter_map(parse_line)
        .filter_map(|e| match e {
            StreamEvent::Output { time, .. } => Some(time),
            _ => None,
        })
        .collect();
    assert_eq!(times.len(), 5);
    assert!(times.windows(2).all(|w| w[0] <= w[1]));
}
