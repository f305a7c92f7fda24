//! Integration tests for the pipe coordinator.

use sluice::elements::{AppSink, NullSink};
use sluice::prelude::*;
use std::cell::{Cell, RefCell};
use std::rc::Rc;

const KINDS: [EventKind; 6] = [
    EventKind::Data,
    EventKind::End,
    EventKind::Error,
    EventKind::Close,
    EventKind::Drain,
    EventKind::Finish,
];

fn listener_counts(stream: &Stream) -> Vec<usize> {
    KINDS.iter().map(|kind| stream.listener_count(*kind)).collect()
}

#[test]
fn test_unpipe_restores_listener_counts() {
    let source = Stream::readable(ManualSource, StreamOptions::default());
    let dest = Stream::writable(NullSink::new(), StreamOptions::default());
    let (src_before, dest_before) = (listener_counts(&source), listener_counts(&dest));

    source.pipe(&dest);
    assert_ne!(listener_counts(&source), src_before);
    assert_ne!(listener_counts(&dest), dest_before);

    source.unpipe(Some(&dest));
    assert_eq!(listener_counts(&source), src_before);
    assert_eq!(listener_counts(&dest), dest_before);
    assert!(source.pipe_destinations().is_empty());
    assert_eq!(source.readable_flowing(), Some(false));
}

#[test]
fn test_pipe_and_unpipe_events_carry_source() {
    let source = Stream::readable(ManualSource, StreamOptions::default());
    let dest = Stream::writable(NullSink::new(), StreamOptions::default());
    let seen = Rc::new(RefCell::new(Vec::new()));
    for kind in [EventKind::Pipe, EventKind::Unpipe] {
        let s = Rc::clone(&seen);
        let src = source.clone();
        dest.on(kind, move |event| {
            let from_source = event.peer().is_some_and(|peer| peer.ptr_eq(&src));
            s.borrow_mut().push((kind.name(), from_source));
        });
    }
    source.pipe(&dest);
    source.unpipe(None);
    assert_eq!(*seen.borrow(), vec![("pipe", true), ("unpipe", true)]);
}

#[test]
fn test_fan_out_waits_for_slowest_destination() {
    let source = Stream::readable(ManualSource, StreamOptions::default());
    let fast = NullSink::new();
    let fast_dest = Stream::writable(fast.clone(), StreamOptions::default());
    let slow = AppSink::new().hold_writes(true);
    let slow_handle = slow.handle();
    let slow_dest = Stream::writable(slow, StreamOptions::default().high_water_mark(4));

    source.pipe(&fast_dest);
    source.pipe(&slow_dest);
    assert_eq!(source.pipe_destinations().len(), 2);

    source.push("abcd").unwrap();
    source.push("efgh").unwrap();
    run_until_idle();
    // The slow destination pushed back on the first chunk
    assert!(source.is_paused());
    assert_eq!(fast.count(), 1);
    assert_eq!(source.readable_length(), 4);

    slow_handle.release_all();
    run_until_idle();
    assert_eq!(fast.count(), 2);
    assert_eq!(slow_handle.text(), "abcdefgh");
}

#[test]
fn test_end_option_false_keeps_destination_open() {
    let source = Stream::readable(ManualSource, StreamOptions::default());
    let sink = AppSink::new();
    let handle = sink.handle();
    let dest = Stream::writable(sink, StreamOptions::default());
    source.pipe_with(&dest, PipeOptions::default().end(false));
    source.push("data").unwrap();
    source.push_eof();
    run_until_idle();

    assert!(source.readable_ended());
    assert!(!dest.writable_ended());
    assert_eq!(handle.text(), "data");
    assert!(dest.write(" more").unwrap());
}

#[test]
fn test_chained_pipes_return_destination() {
    let source = Stream::readable(ManualSource, StreamOptions::default());
    let middle = Stream::pass_through(StreamOptions::default());
    let sink = AppSink::new();
    let handle = sink.handle();
    let dest = Stream::writable(sink, StreamOptions::default());

    let last = source.pipe(&middle).pipe(&dest);
    assert!(last.ptr_eq(&dest));

    source.push("through ").unwrap();
    source.push("two pipes").unwrap();
    source.push_eof();
    run_until_idle();

    assert_eq!(handle.text(), "through two pipes");
    assert!(dest.writable_finished());
    assert!(handle.is_finalized());
}

#[test]
fn test_destination_error_unpipes() {
    let source = Stream::readable(ManualSource, StreamOptions::default());
    let sink = AppSink::new();
    let handle = sink.handle();
    let dest = Stream::writable(sink, StreamOptions::default());
    let errors = Rc::new(Cell::new(0));
    let e = Rc::clone(&errors);
    dest.on_error(move |_| e.set(e.get() + 1));

    source.pipe(&dest);
    handle.fail_next(Error::custom("refused"));
    source.push("x").unwrap();
    run_until_idle();

    assert_eq!(errors.get(), 1);
    assert!(source.pipe_destinations().is_empty());
    assert!(!source.is_destroyed());
    assert!(dest.is_destroyed());
}

#[test]
fn test_source_error_releases_destinations() {
    let source = Stream::readable(ManualSource, StreamOptions::default());
    let dest = Stream::writable(NullSink::new(), StreamOptions::default());
    source.on_error(|_| {});
    source.pipe(&dest);
    source.destroy(Some(Error::custom("upstream failed")));
    run_until_idle();

    assert!(source.pipe_destinations().is_empty());
    assert!(!dest.is_destroyed());
    assert!(!dest.writable_ended());
}

#[test]
fn test_piping_twice_keeps_one_link() {
    let source = Stream::readable(ManualSource, StreamOptions::default());
    let sink = AppSink::new();
    let handle = sink.handle();
    let dest = Stream::writable(sink, StreamOptions::default());

    let first = source.pipe(&dest);
    let data_listeners = source.listener_count(EventKind::Data);
    let second = source.pipe(&dest);
    assert!(first.ptr_eq(&second));
    assert_eq!(source.pipe_destinations().len(), 1);
    assert_eq!(source.listener_count(EventKind::Data), data_listeners);

    source.push("abc").unwrap();
    source.push_eof();
    run_until_idle();

    assert_eq!(handle.text(), "abc");
    assert!(dest.writable_finished());
}
