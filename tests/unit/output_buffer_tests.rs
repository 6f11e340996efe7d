//! Unit tests for captured child output and the log file sink.

use preview_supervisor::process::output::tail_bytes;
use preview_supervisor::process::{LogSink, OutputBuffer, StreamKind};

#[test]
fn buffer_keeps_order_and_streams() {
    let buffer = OutputBuffer::new();
    buffer.push(StreamKind::Stdout, "one");
    buffer.push(StreamKind::Stderr, "two");
    assert_eq!(buffer.len(), 2);
    let lines = buffer.lines_from(1);
    assert_eq!(lines.len(), 1);
    assert_eq!(lines[0].stream, StreamKind::Stderr);
    assert_eq!(lines[0].text, "two");
    assert!(buffer.lines_from(5).is_empty());
    assert_eq!(buffer.text(), "one\ntwo");
}

#[test]
fn trailing_bounds_lines_then_bytes() {
    let buffer = OutputBuffer::new();
    for i in 0..10 {
        buffer.push(StreamKind::Stdout, &format!("line {i}"));
    }
    assert_eq!(buffer.trailing(2, 1000), "line 8\nline 9");
    assert_eq!(buffer.trailing(10, 6), "line 9");
}

#[test]
fn tail_bytes_respects_char_boundaries() {
    let text = "héllo wörld";
    let tail = tail_bytes(text, 5);
    assert!(tail.len() <= 5);
    assert!(text.ends_with(tail));
    assert_eq!(tail_bytes("short", 100), "short");
}

#[test]
fn subscribers_see_appends() {
    let buffer = OutputBuffer::new();
    let rx = buffer.subscribe();
    buffer.push(StreamKind::Stdout, "hello");
    assert!(rx.has_changed().expect("sender alive"));
    assert_eq!(*rx.borrow(), 1);
}

#[test]
fn log_sink_writes_tagged_lines() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("logs/dev.log");
    let sink = LogSink::open(&path).expect("open");
    sink.write_line(StreamKind::Stdout, "ready");
    sink.write_line(StreamKind::Stderr, "warn");
    let raw = std::fs::read_to_string(&path).expect("read");
    let lines: Vec<&str> = raw.lines().collect();
    assert_eq!(lines.len(), 2);
    assert!(lines[0].ends_with("[stdout] ready"), "{}", lines[0]);
    assert!(lines[1].ends_with("[stderr] warn"), "{}", lines[1]);
    assert!(lines[0].contains('T') && lines[0].contains('Z'));
}
