//! NullSink - discards everything written to it.

use crate::chunk::Chunk;
use crate::stream::{Sink, Stream, WriteCallback};
use std::cell::Cell;
use std::rc::Rc;

/// A sink that discards all chunks.
///
/// This is useful for:
/// - Benchmarking stream throughput
/// - Draining a readable without side effects
///
/// Clones share their counters, so keep one to inspect the sink after it
/// was moved into a stream.
///
/// # Example
///
/// ```rust
/// use sluice::elements::NullSink;
/// use sluice::prelude::*;
///
/// let sink = NullSink::new();
/// let stream = Stream::writable(sink.clone(), StreamOptions::default());
///
/// stream.write("abc").unwrap();
/// stream.write("de").unwrap();
/// run_until_idle();
///
/// assert_eq!(sink.count(), 2);
/// assert_eq!(sink.bytes(), 5);
/// ```
#[derive(Clone)]
pub struct NullSink {
    name: String,
    count: Rc<Cell<u64>>,
    bytes: Rc<Cell<u64>>,
}

impl NullSink {
    /// Create a new NullSink.
    pub fn new() -> Self {
        Self::with_name("nullsink")
    }

    /// Create a new NullSink with a custom name.
    pub fn with_name(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            count: Rc::new(Cell::new(0)),
            bytes: Rc::new(Cell::new(0)),
        }
    }

    /// Get the number of chunks consumed.
    pub fn count(&self) -> u64 {
        self.count.get()
    }

    /// Get the measured size of everything consumed.
    pub fn bytes(&self) -> u64 {
        self.bytes.get()
    }
}

impl Default for NullSink {
    fn default() -> Self {
        Self::new()
    }
}

impl Sink for NullSink {
    fn write(&mut self, _stream: &Stream, chunk: Chunk, done: WriteCallback) {
        self.count.set(self.count.get() + 1);
        self.bytes.set(self.bytes.get() + chunk.len() as u64);
        done.complete(Ok(()));
    }

    fn name(&self) -> &str {
        &self.name
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::options::StreamOptions;
    use crate::runtime::run_until_idle;

    #[test]
    fn test_null_sink_counts() {
        let sink = NullSink::with_name("drain");
        let stream = Stream::writable(sink.clone(), StreamOptions::default());
        for _ in 0..10 {
            stream.write(vec![0u8; 3]).unwrap();
        }
        stream.end().unwrap();
        run_until_idle();

        assert_eq!(sink.count(), 10);
        assert_eq!(sink.bytes(), 30);
        assert_eq!(Sink::name(&sink), "drain");
        assert!(stream.writable_finished());
    }

    #[test]
    fn test_null_sink_objects() {
        let sink = NullSink::default();
        let stream = Stream::writable(sink.clone(), StreamOptions::objects());
        stream.write(Chunk::object(1u8)).unwrap();
        run_until_idle();
        assert_eq!(sink.count(), 1);
        assert_eq!(sink.bytes(), 1);
    }
}
