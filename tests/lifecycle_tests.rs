//! Integration tests for stream lifecycles: ending, finishing, destroying
//! and error delivery.

use sluice::elements::{AppSink, NullSink};
use sluice::prelude::*;
use sluice::runtime::{reset_uncaught_error_handler, set_uncaught_error_handler};
use std::cell::RefCell;
use std::rc::Rc;

fn record(stream: &Stream, kinds: &[EventKind]) -> Rc<RefCell<Vec<&'static str>>> {
    let log = Rc::new(RefCell::new(Vec::new()));
    for kind in kinds.iter().copied() {
        let l = Rc::clone(&log);
        stream.on(kind, move |_| l.borrow_mut().push(kind.name()));
    }
    log
}

#[test]
fn test_readable_end_then_close() {
    let stream = Stream::readable(ManualSource, StreamOptions::default());
    let log = record(&stream, &[EventKind::End, EventKind::Close]);
    stream.on_data(|_| {});
    stream.push("only").unwrap();
    stream.push_eof();
    run_until_idle();
    assert_eq!(*log.borrow(), vec!["end", "close"]);
    assert!(stream.is_destroyed());
}

#[test]
fn test_end_not_emitted_until_consumed() {
    let stream = Stream::readable(ManualSource, StreamOptions::default());
    let log = record(&stream, &[EventKind::End]);
    stream.push("unread").unwrap();
    stream.push_eof();
    run_until_idle();
    assert!(log.borrow().is_empty());
    assert!(!stream.readable_ended());

    assert!(stream.read(None).is_some());
    run_until_idle();
    assert_eq!(*log.borrow(), vec!["end"]);
}

#[test]
fn test_writable_finish_waits_for_in_flight_writes() {
    let sink = AppSink::new().hold_writes(true);
    let handle = sink.handle();
    let stream = Stream::writable(sink, StreamOptions::default());
    let log = record(&stream, &[EventKind::Prefinish, EventKind::Finish, EventKind::Close]);

    stream.write("a").unwrap();
    stream.write("b").unwrap();
    stream.end().unwrap();
    run_until_idle();
    assert!(stream.writable_ended());
    assert!(!stream.writable_finished());
    assert!(log.borrow().is_empty());

    handle.release_all();
    run_until_idle();
    assert_eq!(*log.borrow(), vec!["prefinish", "finish", "close"]);
    assert!(handle.is_finalized());
}

#[test]
fn test_end_with_final_chunk_and_callback() {
    let sink = NullSink::new();
    let stream = Stream::writable(sink.clone(), StreamOptions::default());
    let result = Rc::new(RefCell::new(None));
    let r = Rc::clone(&result);
    stream
        .end_with(Some(Chunk::from("last")), move |res| *r.borrow_mut() = Some(res.is_ok()))
        .unwrap();
    run_until_idle();
    assert_eq!(*result.borrow(), Some(true));
    assert_eq!(sink.count(), 1);

    // A second end after finish reports the stream already finished
    let late = Rc::new(RefCell::new(None));
    let l = Rc::clone(&late);
    let _ = stream.end_with(None, move |res| *l.borrow_mut() = Some(res));
    run_until_idle();
    assert!(matches!(*late.borrow(), Some(Err(Error::AlreadyFinished(_)))));
}

#[test]
fn test_write_after_end_is_rejected() {
    let stream = Stream::writable(NullSink::new(), StreamOptions::default());
    stream.on_error(|_| {});
    stream.end().unwrap();
    assert!(matches!(stream.write("late"), Err(Error::WriteAfterEnd)));
}

#[test]
fn test_cork_batches_into_writev() {
    let sink = AppSink::new().writev(true);
    let handle = sink.handle();
    let stream = Stream::writable(sink, StreamOptions::default());

    stream.cork();
    stream.cork();
    for part in ["a", "b", "c"] {
        stream.write(part).unwrap();
    }
    stream.uncork();
    assert_eq!(stream.writable_corked(), 1);
    assert!(handle.stats().batches.is_empty());

    stream.uncork();
    run_until_idle();
    assert_eq!(handle.stats().batches, vec![3]);
    assert_eq!(handle.text(), "abc");
}

#[test]
fn test_destroy_fails_buffered_writes() {
    let sink = AppSink::new().hold_writes(true);
    let handle = sink.handle();
    let stream = Stream::writable(sink, StreamOptions::default());
    stream.on_error(|_| {});
    let results = Rc::new(RefCell::new(Vec::new()));
    for part in ["in flight", "buffered"] {
        let r = Rc::clone(&results);
        stream
            .write_with(part, move |res| r.borrow_mut().push((part, res.is_ok())))
            .unwrap();
    }
    stream.destroy(Some(Error::custom("cancelled")));
    handle.release(Ok(()));
    run_until_idle();

    assert_eq!(*results.borrow(), vec![("in flight", true), ("buffered", false)]);
    assert!(stream.is_closed());
    assert!(matches!(stream.write("more"), Err(Error::Destroyed(_))));
}

#[test]
fn test_unhandled_error_goes_to_uncaught_handler() {
    let caught = Rc::new(RefCell::new(Vec::new()));
    let c = Rc::clone(&caught);
    set_uncaught_error_handler(move |err| c.borrow_mut().push(err.to_string()));

    let stream = Stream::readable(ManualSource, StreamOptions::default());
    stream.destroy(Some(Error::custom("nobody listens")));
    run_until_idle();
    reset_uncaught_error_handler();

    assert_eq!(*caught.borrow(), vec!["nobody listens"]);
}

#[test]
#[should_panic(expected = "unhandled 'error' event")]
fn test_unhandled_error_panics_by_default() {
    let stream = Stream::readable(ManualSource, StreamOptions::default());
    stream.destroy(Some(Error::custom("fatal")));
    run_until_idle();
}

#[test]
fn test_duplex_without_half_open_closes_both_sides() {
    let sink = AppSink::new();
    let handle = sink.handle();
    let duplex = Stream::duplex(ManualSource, sink, StreamOptions::default().allow_half_open(false));
    let log = record(&duplex, &[EventKind::End, EventKind::Finish, EventKind::Close]);
    duplex.on_data(|_| {});
    duplex.write("reply").unwrap();
    duplex.push_eof();
    run_until_idle();

    assert_eq!(*log.borrow(), vec!["end", "finish", "close"]);
    assert_eq!(handle.text(), "reply");
}

#[test]
fn test_set_encoding_reassembles_split_characters() {
    let stream = Stream::readable(ManualSource, StreamOptions::default());
    stream.set_encoding(Encoding::Utf8);
    let text = Rc::new(RefCell::new(String::new()));
    let t = Rc::clone(&text);
    stream.on_data(move |chunk| t.borrow_mut().push_str(chunk.as_text().unwrap_or_default()));

    let snowman = "☃".as_bytes();
    stream.push(&snowman[..1]).unwrap();
    stream.push(&snowman[1..]).unwrap();
    stream.push(&b" ok"[..]).unwrap();
    stream.push_eof();
    run_until_idle();
    assert_eq!(*text.borrow(), "☃ ok");
}

#[test]
fn test_repeated_end_while_ending_finishes_once() {
    let sink = AppSink::new();
    let handle = sink.handle();
    let stream = Stream::writable(sink, StreamOptions::default());
    let log = record(&stream, &[EventKind::Prefinish, EventKind::Finish]);

    stream.write("a").unwrap();
    stream.write("b").unwrap();
    stream.end().unwrap();
    assert!(stream.end().is_ok());
    run_until_idle();

    assert_eq!(*log.borrow(), vec!["prefinish", "finish"]);
    assert_eq!(handle.stats().received, 2);
    assert_eq!(handle.text(), "ab");
    assert!(handle.is_finalized());
}
