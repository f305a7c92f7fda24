//! Integration tests for backpressure and flow control.
//!
//! These tests verify that:
//! - `write` and `push` report the high-water mark correctly
//! - `drain` fires once per backpressure episode
//! - A pipe never lets a slow destination buffer unboundedly

use sluice::elements::AppSink;
use sluice::prelude::*;
use std::cell::Cell;
use std::rc::Rc;

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

fn count_events(stream: &Stream, kind: EventKind) -> Rc<Cell<usize>> {
    let count = Rc::new(Cell::new(0));
    let c = Rc::clone(&count);
    stream.on(kind, move |_| c.set(c.get() + 1));
    count
}

#[test]
fn test_write_reports_high_water_mark() {
    init_tracing();
    let sink = AppSink::new().hold_writes(true);
    let handle = sink.handle();
    let stream = Stream::writable(sink, StreamOptions::default().high_water_mark(10));
    let drains = count_events(&stream, EventKind::Drain);

    assert!(stream.write(vec![0u8; 4]).unwrap());
    assert!(stream.write(vec![0u8; 4]).unwrap());
    assert!(!stream.write(vec![0u8; 4]).unwrap());
    assert!(stream.writable_need_drain());
    // Still accepted while backpressured
    assert!(!stream.write(vec![0u8; 4]).unwrap());
    assert_eq!(stream.writable_length(), 16);

    while handle.release(Ok(())) {
        run_until_idle();
    }
    run_until_idle();

    assert_eq!(stream.writable_length(), 0);
    assert_eq!(drains.get(), 1);
    assert!(!stream.writable_need_drain());
    let stats = stream.writable_flow_stats();
    assert_eq!(stats.backpressure_events, 1);
    assert_eq!(stats.drains, 1);
}

#[test]
fn test_no_drain_without_backpressure() {
    let sink = AppSink::new();
    let stream = Stream::writable(sink, StreamOptions::default().high_water_mark(100));
    let drains = count_events(&stream, EventKind::Drain);
    for _ in 0..10 {
        assert!(stream.write("abc").unwrap());
    }
    run_until_idle();
    assert_eq!(drains.get(), 0);
}

#[test]
fn test_object_mode_counts_entries() {
    let sink = AppSink::new().hold_writes(true);
    let stream = Stream::writable(sink, StreamOptions::objects().high_water_mark(2));
    assert!(stream.write(Chunk::object(vec![0u8; 1024])).unwrap());
    assert!(!stream.write(Chunk::object(())).unwrap());
    assert_eq!(stream.writable_length(), 2);
}

#[test]
fn test_push_reports_high_water_mark() {
    let stream = Stream::readable(ManualSource, StreamOptions::default().high_water_mark(5));
    assert!(stream.push("abc").unwrap());
    assert!(!stream.push("de").unwrap());
    assert!(!stream.push("f").unwrap());
    assert_eq!(stream.readable_length(), 6);
}

#[test]
fn test_pipe_into_slow_sink_is_bounded() {
    init_tracing();
    let produced = Rc::new(Cell::new(0usize));
    let p = Rc::clone(&produced);
    let source = Stream::readable(
        FnSource(move |stream: &Stream, _size: usize| {
            if p.get() == 30 {
                stream.push_eof();
            } else {
                p.set(p.get() + 1);
                stream.push(vec![b'x'; 3])?;
            }
            Ok(())
        }),
        StreamOptions::default().high_water_mark(5),
    );
    let sink = AppSink::new().hold_writes(true);
    let handle = sink.handle();
    let dest = Stream::writable(sink, StreamOptions::default().high_water_mark(5));
    let pauses = count_events(&source, EventKind::Pause);
    let drains = count_events(&dest, EventKind::Drain);

    source.pipe(&dest);
    let mut max_buffered = 0;
    for _ in 0..10_000 {
        run_until_idle();
        max_buffered = max_buffered.max(dest.writable_length());
        if !handle.release(Ok(())) && dest.writable_finished() {
            break;
        }
    }

    assert!(dest.writable_finished());
    assert_eq!(handle.bytes().len(), 90);
    assert_eq!(produced.get(), 30);
    assert!(pauses.get() >= 1);
    assert!(drains.get() >= 1);
    // One chunk over the mark at most before the source pauses
    assert!(max_buffered <= 5 + 3);
}

#[test]
fn test_pipe_with_chunks_larger_than_both_marks() {
    init_tracing();
    const LINE: &str = "aaaaaaaaaaaaaaaaaaaaaaaaaaaa\n";
    const LINES: usize = 20;
    let produced = Rc::new(Cell::new(0usize));
    let p = Rc::clone(&produced);
    let source = Stream::readable(
        FnSource(move |stream: &Stream, _size: usize| {
            if p.get() == LINES {
                stream.push_eof();
            } else {
                p.set(p.get() + 1);
                stream.push(LINE)?;
            }
            Ok(())
        }),
        StreamOptions::default().high_water_mark(5),
    );
    let sink = AppSink::new().hold_writes(true);
    let handle = sink.handle();
    let dest = Stream::writable(sink, StreamOptions::default().high_water_mark(5));

    source.pipe(&dest);
    let mut max_buffered = 0;
    for _ in 0..10_000 {
        run_until_idle();
        max_buffered = max_buffered.max(dest.writable_length());
        if !handle.release(Ok(())) && dest.writable_finished() {
            break;
        }
    }

    assert_eq!(LINE.len(), 29);
    assert!(dest.writable_finished());
    assert_eq!(produced.get(), LINES);
    assert_eq!(handle.bytes().len(), LINE.len() * LINES);
    assert!(handle.bytes().iter().all(|b| *b == b'a' || *b == b'\n'));
    assert!(max_buffered <= 2 * LINE.len());
}

#[tokio::test]
async fn test_ready_future_waits_for_drain() {
    let sink = AppSink::new().hold_writes(true);
    let handle = sink.handle();
    let stream = Stream::writable(sink, StreamOptions::default().high_water_mark(2));
    assert!(!stream.write("ab").unwrap());

    let mut ready = stream.ready();
    assert!(ready.try_take().is_none());
    handle.release(Ok(()));
    ready.await.unwrap();
    assert!(!stream.writable_need_drain());
}
