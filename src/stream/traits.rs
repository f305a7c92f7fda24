//! Extension points implemented by concrete producers and consumers.
//!
//! A stream delegates the actual I/O to user code:
//!
//! - [`Source`]: pulls data from somewhere and `push`es it (the readable side)
//! - [`Sink`]: flushes one chunk at a time and reports completion (the
//!   writable side)
//! - [`Transformer`]: maps written chunks to readable output (transform
//!   streams)
//!
//! Completion is signalled through callback objects that are consumed by
//! value ([`WriteCallback`], [`FinalCallback`], [`TransformCallback`],
//! [`FlushCallback`]), so a callback can never be invoked twice. A callback
//! may be completed synchronously, from inside the trait method, or later
//! from any other callback on the same thread.

use crate::chunk::Chunk;
use crate::error::{Error, Result};
use crate::stream::{Stream, WeakStream};
use std::cell::RefCell;
use std::rc::Rc;

// ============================================================================
// Source
// ============================================================================

/// The readable side's data provider.
///
/// # Lifecycle
///
/// - `read()` is called whenever the stream wants more data and no earlier
///   read is outstanding
/// - Call `stream.push(chunk)` any number of times, now or later
/// - Call `stream.push_eof()` when there is no more data
/// - Return `Err(...)` to fail the stream
///
/// # Example
///
/// ```rust
/// use sluice::error::Result;
/// use sluice::stream::{Source, Stream};
///
/// struct Countdown(u32);
///
/// impl Source for Countdown {
///     fn read(&mut self, stream: &Stream, _size: usize) -> Result<()> {
///         if self.0 == 0 {
///             stream.push_eof();
///         } else {
///             stream.push(self.0.to_string())?;
///             self.0 -= 1;
///         }
///         Ok(())
///     }
/// }
/// ```
pub trait Source {
    /// Produce more data for `stream`. `size` is an advisory byte (or entry)
    /// count, usually the readable high water mark.
    fn read(&mut self, stream: &Stream, size: usize) -> Result<()>;

    /// Release resources. The returned error (if any) is the one emitted.
    fn destroy(&mut self, error: Option<Error>) -> Option<Error> {
        error
    }

    /// Get the name of this source (for debugging/logging).
    fn name(&self) -> &str {
        std::any::type_name::<Self>()
    }
}

/// A source whose data is pushed from outside the stream.
///
/// `read` requests are ignored; the owner of the stream handle calls
/// `push`/`push_eof` directly.
#[derive(Debug, Default, Clone, Copy)]
pub struct ManualSource;

impl Source for ManualSource {
    fn read(&mut self, _stream: &Stream, _size: usize) -> Result<()> {
        Ok(())
    }
}

/// A [`Source`] built from a closure.
pub struct FnSource<F>(pub F);

impl<F> Source for FnSource<F>
where
    F: FnMut(&Stream, usize) -> Result<()>,
{
    fn read(&mut self, stream: &Stream, size: usize) -> Result<()> {
        (self.0)(stream, size)
    }
}

// ============================================================================
// Sink
// ============================================================================

/// The writable side's consumer.
///
/// Exactly one `write`/`writev` is in flight at a time; the stream buffers
/// everything written meanwhile. Each call must eventually complete its
/// callback.
///
/// # Example
///
/// ```rust
/// use sluice::chunk::Chunk;
/// use sluice::stream::{Sink, Stream, WriteCallback};
///
/// #[derive(Default)]
/// struct ByteCounter(usize);
///
/// impl Sink for ByteCounter {
///     fn write(&mut self, _stream: &Stream, chunk: Chunk, done: WriteCallback) {
///         self.0 += chunk.len();
///         done.complete(Ok(()));
///     }
/// }
/// ```
pub trait Sink {
    /// Flush one chunk and complete `done`.
    fn write(&mut self, stream: &Stream, chunk: Chunk, done: WriteCallback);

    /// Whether `writev` should be used to flush a backlog in one call.
    fn supports_writev(&self) -> bool {
        false
    }

    /// Flush several buffered chunks at once.
    ///
    /// Only called when [`supports_writev`](Sink::supports_writev) is true.
    fn writev(&mut self, _stream: &Stream, _chunks: Vec<Chunk>, done: WriteCallback) {
        done.complete(Err(Error::custom("writev is not implemented by this sink")));
    }

    /// Called once after `end()`, when every write has been flushed and
    /// before `finish` is emitted.
    fn finalize(&mut self, _stream: &Stream, done: FinalCallback) {
        done.complete(Ok(()));
    }

    /// Release resources. The returned error (if any) is the one emitted.
    fn destroy(&mut self, error: Option<Error>) -> Option<Error> {
        error
    }

    /// Get the name of this sink (for debugging/logging).
    fn name(&self) -> &str {
        std::any::type_name::<Self>()
    }
}

/// A [`Sink`] built from a closure.
pub struct FnSink<F>(pub F);

impl<F> Sink for FnSink<F>
where
    F: FnMut(&Stream, Chunk, WriteCallback),
{
    fn write(&mut self, stream: &Stream, chunk: Chunk, done: WriteCallback) {
        (self.0)(stream, chunk, done)
    }
}

/// Completion handle for a `Sink::write`/`Sink::writev` call.
#[must_use = "a write never completes unless its callback is completed"]
pub struct WriteCallback {
    stream: WeakStream,
}

impl WriteCallback {
    pub(crate) fn new(stream: &Stream) -> Self {
        Self {
            stream: stream.downgrade(),
        }
    }

    /// Report the outcome of the write.
    pub fn complete(self, result: Result<()>) {
        if let Some(stream) = self.stream.upgrade() {
            stream.on_write(result);
        }
    }
}

/// Completion handle for `Sink::finalize`.
#[must_use = "the stream never finishes unless its final callback is completed"]
pub struct FinalCallback {
    stream: WeakStream,
}

impl FinalCallback {
    pub(crate) fn new(stream: &Stream) -> Self {
        Self {
            stream: stream.downgrade(),
        }
    }

    /// Report the outcome of the final flush.
    pub fn complete(self, result: Result<()>) {
        if let Some(stream) = self.stream.upgrade() {
            stream.on_final(result);
        }
    }
}

// ============================================================================
// Transformer
// ============================================================================

/// Maps chunks written to a transform stream into readable output.
///
/// # Example
///
/// ```rust
/// use sluice::chunk::Chunk;
/// use sluice::stream::{TransformCallback, Transformer};
///
/// struct Upper;
///
/// impl Transformer for Upper {
///     fn transform(&mut self, chunk: Chunk, done: TransformCallback) {
///         let text = String::from_utf8_lossy(chunk.as_bytes().unwrap_or_default());
///         done.complete(Ok(Some(Chunk::from(text.to_uppercase()))));
///     }
/// }
/// ```
pub trait Transformer {
    /// Transform one chunk. Push any number of outputs through `done`, then
    /// complete it (optionally with one last output).
    fn transform(&mut self, chunk: Chunk, done: TransformCallback);

    /// Emit trailing output after the writable side ended.
    fn flush(&mut self, done: FlushCallback) {
        done.complete(Ok(None));
    }

    /// Release resources. The returned error (if any) is the one emitted.
    fn destroy(&mut self, error: Option<Error>) -> Option<Error> {
        error
    }

    /// Get the name of this transformer (for debugging/logging).
    fn name(&self) -> &str {
        std::any::type_name::<Self>()
    }
}

/// A [`Transformer`] built from a closure mapping one chunk to at most one
/// output.
pub struct FnTransformer<F>(pub F);

impl<F> Transformer for FnTransformer<F>
where
    F: FnMut(Chunk) -> Result<Option<Chunk>>,
{
    fn transform(&mut self, chunk: Chunk, done: TransformCallback) {
        let result = (self.0)(chunk);
        done.complete(result);
    }
}

/// Bookkeeping shared between a transform stream's two sides.
#[derive(Default)]
pub(crate) struct TransformCore {
    /// Write completion held back while the readable side is full.
    pub(crate) pending: Option<WriteCallback>,
    pub(crate) in_progress: bool,
}

/// Completion handle for `Transformer::transform`.
#[must_use = "the write never completes unless the transform callback is completed"]
pub struct TransformCallback {
    stream: WeakStream,
    core: Rc<RefCell<TransformCore>>,
    done: WriteCallback,
    length_before: usize,
}

impl TransformCallback {
    pub(crate) fn new(
        stream: &Stream,
        core: Rc<RefCell<TransformCore>>,
        done: WriteCallback,
    ) -> Self {
        Self {
            stream: stream.downgrade(),
            length_before: stream.readable_length(),
            core,
            done,
        }
    }

    /// Push one output chunk to the readable side.
    ///
    /// Returns `false` when the readable side is above its watermark.
    pub fn push(&self, chunk: impl Into<Chunk>) -> bool {
        match self.stream.upgrade() {
            Some(stream) => stream.push(chunk).unwrap_or(false),
            None => false,
        }
    }

    /// Finish this transform, pushing `output` first if given.
    pub fn complete(self, result: Result<Option<Chunk>>) {
        self.core.borrow_mut().in_progress = false;
        let Some(stream) = self.stream.upgrade() else {
            return;
        };
        match result {
            Err(err) => self.done.complete(Err(err)),
            Ok(output) => {
                if let Some(chunk) = output {
                    let _ = stream.push(chunk);
                }
                let length = stream.readable_length();
                let release = stream.writable_ended()
                    || length == self.length_before
                    || length < stream.readable_high_water_mark();
                if release {
                    self.done.complete(Ok(()));
                } else {
                    tracing::trace!(stream = %stream.name(), length, "transform output full, holding write");
                    self.core.borrow_mut().pending = Some(self.done);
                }
            }
        }
    }
}

/// Completion handle for `Transformer::flush`.
#[must_use = "the stream never ends unless the flush callback is completed"]
pub struct FlushCallback {
    stream: WeakStream,
    done: FinalCallback,
}

impl FlushCallback {
    pub(crate) fn new(stream: &Stream, done: FinalCallback) -> Self {
        Self {
            stream: stream.downgrade(),
            done,
        }
    }

    /// Push one trailing output chunk.
    pub fn push(&self, chunk: impl Into<Chunk>) -> bool {
        match self.stream.upgrade() {
            Some(stream) => stream.push(chunk).unwrap_or(false),
            None => false,
        }
    }

    /// Finish flushing; the readable side ends afterwards.
    pub fn complete(self, result: Result<Option<Chunk>>) {
        let Some(stream) = self.stream.upgrade() else {
            return;
        };
        match result {
            Err(err) => self.done.complete(Err(err)),
            Ok(output) => {
                if let Some(chunk) = output {
                    let _ = stream.push(chunk);
                }
                stream.push_eof();
                self.done.complete(Ok(()));
            }
        }
    }
}
