//! AppSink element for extracting data to application code.
//!
//! Allows applications to inspect what a stream wrote and to decide when
//! each write completes, which makes it a controllable slow consumer.

use crate::chunk::Chunk;
use crate::error::{Error, Result};
use crate::stream::{FinalCallback, Sink, Stream, WriteCallback};
use std::cell::RefCell;
use std::collections::VecDeque;
use std::rc::Rc;

/// A sink that hands written chunks to application code.
///
/// Chunks are queued internally and can be retrieved via an
/// [`AppSinkHandle`]. With [`hold_writes`](AppSink::hold_writes) every write
/// stays in flight until the application releases it.
///
/// # Example
///
/// ```rust
/// use sluice::elements::AppSink;
/// use sluice::prelude::*;
///
/// let sink = AppSink::new().hold_writes(true);
/// let handle = sink.handle();
/// let stream = Stream::writable(sink, StreamOptions::default().high_water_mark(4));
///
/// assert!(!stream.write("abcd").unwrap());
/// run_until_idle();
/// assert_eq!(handle.held(), 1);
///
/// handle.release(Ok(()));
/// run_until_idle();
/// assert_eq!(handle.text(), "abcd");
/// assert_eq!(stream.writable_length(), 0);
/// ```
pub struct AppSink {
    name: String,
    writev: bool,
    shared: Rc<RefCell<AppSinkState>>,
}

#[derive(Default)]
struct AppSinkState {
    queue: VecDeque<Chunk>,
    held: VecDeque<WriteCallback>,
    hold_writes: bool,
    fail_next: Option<Error>,
    finalized: bool,
    destroyed: bool,
    stats: AppSinkStats,
}

/// Counters kept by an [`AppSink`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AppSinkStats {
    /// Chunks received.
    pub received: u64,
    /// Chunks taken out with [`AppSinkHandle::pull`].
    pub pulled: u64,
    /// `write` and `writev` calls, in order, with the number of chunks each
    /// carried.
    pub batches: Vec<usize>,
}

/// Handle for inspecting and controlling an [`AppSink`].
#[derive(Clone)]
pub struct AppSinkHandle {
    shared: Rc<RefCell<AppSinkState>>,
}

impl AppSink {
    /// Create a new AppSink that completes writes immediately.
    pub fn new() -> Self {
        Self {
            name: "appsink".to_string(),
            writev: false,
            shared: Rc::new(RefCell::new(AppSinkState::default())),
        }
    }

    /// Set a custom name.
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Keep each write in flight until [`AppSinkHandle::release`].
    pub fn hold_writes(self, hold: bool) -> Self {
        self.shared.borrow_mut().hold_writes = hold;
        self
    }

    /// Accept buffered backlogs in one `writev` call.
    pub fn writev(mut self, enabled: bool) -> Self {
        self.writev = enabled;
        self
    }

    /// Get a handle to this sink.
    pub fn handle(&self) -> AppSinkHandle {
        AppSinkHandle {
            shared: Rc::clone(&self.shared),
        }
    }

    fn accept(&mut self, chunks: Vec<Chunk>, done: WriteCallback) {
        let failure = {
            let mut state = self.shared.borrow_mut();
            state.stats.batches.push(chunks.len());
            match state.fail_next.take() {
                Some(err) => Some(err),
                None => {
                    state.stats.received += chunks.len() as u64;
                    state.queue.extend(chunks);
                    if state.hold_writes {
                        state.held.push_back(done);
                        return;
                    }
                    None
                }
            }
        };
        match failure {
            Some(err) => done.complete(Err(err)),
            None => done.complete(Ok(())),
        }
    }
}

impl Default for AppSink {
    fn default() -> Self {
        Self::new()
    }
}

impl Sink for AppSink {
    fn write(&mut self, _stream: &Stream, chunk: Chunk, done: WriteCallback) {
        self.accept(vec![chunk], done);
    }

    fn supports_writev(&self) -> bool {
        self.writev
    }

    fn writev(&mut self, stream: &Stream, chunks: Vec<Chunk>, done: WriteCallback) {
        tracing::trace!(stream = %stream.name(), count = chunks.len(), "appsink writev");
        self.accept(chunks, done);
    }

    fn finalize(&mut self, _stream: &Stream, done: FinalCallback) {
        self.shared.borrow_mut().finalized = true;
        done.complete(Ok(()));
    }

    fn destroy(&mut self, error: Option<Error>) -> Option<Error> {
        self.shared.borrow_mut().destroyed = true;
        error
    }

    fn name(&self) -> &str {
        &self.name
    }
}

impl AppSinkHandle {
    /// Take the oldest received chunk.
    pub fn pull(&self) -> Option<Chunk> {
        let mut state = self.shared.borrow_mut();
        let chunk = state.queue.pop_front()?;
        state.stats.pulled += 1;
        Some(chunk)
    }

    /// Copy of every chunk not yet pulled.
    pub fn chunks(&self) -> Vec<Chunk> {
        self.shared.borrow().queue.iter().cloned().collect()
    }

    /// Concatenated bytes of every byte or text chunk not yet pulled.
    pub fn bytes(&self) -> Vec<u8> {
        self.shared
            .borrow()
            .queue
            .iter()
            .filter_map(Chunk::as_bytes)
            .flatten()
            .copied()
            .collect()
    }

    /// [`bytes`](Self::bytes) as UTF-8 text.
    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.bytes()).into_owned()
    }

    /// Number of writes waiting for [`release`](Self::release).
    pub fn held(&self) -> usize {
        self.shared.borrow().held.len()
    }

    /// Complete the oldest held write. Returns `false` if none was held.
    pub fn release(&self, result: Result<()>) -> bool {
        let done = self.shared.borrow_mut().held.pop_front();
        match done {
            Some(done) => {
                done.complete(result);
                true
            }
            None => false,
        }
    }

    /// Stop holding writes and complete the one in flight.
    pub fn release_all(&self) {
        self.shared.borrow_mut().hold_writes = false;
        while self.release(Ok(())) {}
    }

    /// Fail the next write with `err`.
    pub fn fail_next(&self, err: Error) {
        self.shared.borrow_mut().fail_next = Some(err);
    }

    /// Whether the sink's final flush ran.
    pub fn is_finalized(&self) -> bool {
        self.shared.borrow().finalized
    }

    /// Whether the owning stream was destroyed.
    pub fn is_destroyed(&self) -> bool {
        self.shared.borrow().destroyed
    }

    /// Get a snapshot of the counters.
    pub fn stats(&self) -> AppSinkStats {
        self.shared.borrow().stats.clone()
    }
}
