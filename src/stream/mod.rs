//! Streams: readable, writable, duplex and transform.
//!
//! A [`Stream`] is a cheap, clonable handle to one stream object. Which
//! operations are meaningful depends on the sides it was built with:
//!
//! | Constructor | Readable side | Writable side |
//! |-------------|---------------|---------------|
//! | [`Stream::readable`] | [`Source`] | - |
//! | [`Stream::writable`] | - | [`Sink`] |
//! | [`Stream::duplex`] | [`Source`] | [`Sink`] |
//! | [`Stream::transform`] | fed by the [`Transformer`] | [`Transformer`] |
//!
//! All state lives on one thread. Deferred work goes through the tick queue
//! in [`crate::runtime`]; call [`run_until_idle`](crate::runtime::run_until_idle)
//! (or await a future returned by the stream) to let it run.
//!
//! # Example
//!
//! ```rust
//! use sluice::prelude::*;
//! use std::cell::RefCell;
//! use std::rc::Rc;
//!
//! let source = Stream::readable(ManualSource, StreamOptions::default());
//! let seen = Rc::new(RefCell::new(Vec::new()));
//! let out = Rc::clone(&seen);
//! let sink = Stream::writable(
//!     FnSink(move |_: &Stream, chunk: Chunk, done: WriteCallback| {
//!         out.borrow_mut().extend_from_slice(chunk.as_bytes().unwrap_or_default());
//!         done.complete(Ok(()));
//!     }),
//!     StreamOptions::default(),
//! );
//!
//! source.pipe(&sink);
//! source.push("hello, ").unwrap();
//! source.push("world").unwrap();
//! source.push_eof();
//! run_until_idle();
//!
//! assert_eq!(&seen.borrow()[..], b"hello, world");
//! assert!(sink.writable_finished());
//! ```

mod collect;
mod destroy;
mod duplex;
mod pipe;
mod readable;
mod traits;
mod transform;
mod writable;

pub use collect::Collected;
pub use pipe::PipeOptions;
pub use traits::{
    FinalCallback, FlushCallback, FnSink, FnSource, FnTransformer, ManualSource, Sink, Source,
    TransformCallback, Transformer, WriteCallback,
};

pub(crate) use readable::ReadableState;
pub(crate) use writable::WritableState;

use crate::chunk::Chunk;
use crate::error::Error;
use crate::event::{Callback, EventKind, ListenerId, Listeners, StreamEvent};
use crate::options::StreamOptions;
use std::cell::RefCell;
use std::fmt;
use std::rc::{Rc, Weak};
use std::sync::atomic::{AtomicU64, Ordering};

static NEXT_STREAM_ID: AtomicU64 = AtomicU64::new(1);

/// Which sides a stream was constructed with.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamKind {
    /// Readable side only.
    Readable,
    /// Writable side only.
    Writable,
    /// Independent readable and writable sides.
    Duplex,
    /// Writable side feeding the readable side through a transformer.
    Transform,
}

impl StreamKind {
    fn label(&self) -> &'static str {
        match self {
            StreamKind::Readable => "readable",
            StreamKind::Writable => "writable",
            StreamKind::Duplex => "duplex",
            StreamKind::Transform => "transform",
        }
    }
}

/// State shared by both sides.
#[derive(Debug)]
pub(crate) struct CommonState {
    pub(crate) destroyed: bool,
    pub(crate) errored: Option<Error>,
    pub(crate) error_emitted: bool,
    pub(crate) closed: bool,
    pub(crate) close_emitted: bool,
    pub(crate) auto_destroy: bool,
    pub(crate) emit_close: bool,
    pub(crate) allow_half_open: bool,
}

pub(crate) struct Inner {
    id: u64,
    name: String,
    kind: StreamKind,
    listeners: RefCell<Listeners>,
    pub(crate) common: RefCell<CommonState>,
    pub(crate) readable: Option<RefCell<ReadableState>>,
    pub(crate) writable: Option<RefCell<WritableState>>,
    pub(crate) source: RefCell<Option<Box<dyn Source>>>,
    pub(crate) sink: RefCell<Option<Box<dyn Sink>>>,
}

/// Handle to a stream.
///
/// Clones refer to the same stream; equality is identity.
#[derive(Clone)]
pub struct Stream {
    inner: Rc<Inner>,
}

/// Non-owning handle to a stream.
#[derive(Clone)]
pub struct WeakStream {
    inner: Weak<Inner>,
}

impl WeakStream {
    /// Get a strong handle if the stream is still alive.
    pub fn upgrade(&self) -> Option<Stream> {
        self.inner.upgrade().map(|inner| Stream { inner })
    }
}

impl Stream {
    // ========================================================================
    // Construction
    // ========================================================================

    pub(crate) fn build(
        kind: StreamKind,
        source: Option<Box<dyn Source>>,
        sink: Option<Box<dyn Sink>>,
        options: &StreamOptions,
    ) -> Self {
        let id = NEXT_STREAM_ID.fetch_add(1, Ordering::Relaxed);
        let name = options
            .name
            .clone()
            .unwrap_or_else(|| format!("{}-{id}", kind.label()));
        let readable = source
            .is_some()
            .then(|| RefCell::new(ReadableState::new(options)));
        let writable = sink.as_ref().map(|sink| {
            RefCell::new(WritableState::new(options, sink.supports_writev()))
        });
        let stream = Stream {
            inner: Rc::new(Inner {
                id,
                name,
                kind,
                listeners: RefCell::new(Listeners::new()),
                common: RefCell::new(CommonState {
                    destroyed: false,
                    errored: None,
                    error_emitted: false,
                    closed: false,
                    close_emitted: false,
                    auto_destroy: options.auto_destroy,
                    emit_close: options.emit_close,
                    allow_half_open: options.allow_half_open,
                }),
                readable,
                writable,
                source: RefCell::new(source),
                sink: RefCell::new(sink),
            }),
        };
        tracing::debug!(stream = %stream.name(), kind = kind.label(), "stream created");
        stream
    }

    /// Create a readable stream fed by `source`.
    pub fn readable(source: impl Source + 'static, options: StreamOptions) -> Self {
        Self::build(StreamKind::Readable, Some(Box::new(source)), None, &options)
    }

    /// Create a writable stream flushing into `sink`.
    pub fn writable(sink: impl Sink + 'static, options: StreamOptions) -> Self {
        Self::build(StreamKind::Writable, None, Some(Box::new(sink)), &options)
    }

    // ========================================================================
    // Identity
    // ========================================================================

    /// Process-unique stream id.
    pub fn id(&self) -> u64 {
        self.inner.id
    }

    /// Name used in logs and metrics.
    pub fn name(&self) -> &str {
        &self.inner.name
    }

    /// Which sides this stream has.
    pub fn kind(&self) -> StreamKind {
        self.inner.kind
    }

    /// Create a non-owning handle.
    pub fn downgrade(&self) -> WeakStream {
        WeakStream {
            inner: Rc::downgrade(&self.inner),
        }
    }

    /// Check whether two handles refer to the same stream.
    pub fn ptr_eq(&self, other: &Stream) -> bool {
        Rc::ptr_eq(&self.inner, &other.inner)
    }

    /// Whether the stream has a readable side.
    pub fn has_readable_side(&self) -> bool {
        self.inner.readable.is_some()
    }

    /// Whether the stream has a writable side.
    pub fn has_writable_side(&self) -> bool {
        self.inner.writable.is_some()
    }

    // ========================================================================
    // Terminal state
    // ========================================================================

    /// Whether `destroy` was called.
    pub fn is_destroyed(&self) -> bool {
        self.inner.common.borrow().destroyed
    }

    /// The error the stream failed with, if any.
    pub fn errored(&self) -> Option<Error> {
        self.inner.common.borrow().errored.clone()
    }

    /// Whether the stream released its resources.
    pub fn is_closed(&self) -> bool {
        self.inner.common.borrow().closed
    }

    pub(crate) fn is_destroyed_or_errored(&self) -> bool {
        let common = self.inner.common.borrow();
        common.destroyed || common.errored.is_some()
    }

    // ========================================================================
    // Events
    // ========================================================================

    /// Register a listener for `kind`.
    pub fn on(&self, kind: EventKind, listener: impl Fn(&StreamEvent) + 'static) -> ListenerId {
        self.add_listener(kind, Rc::new(listener), false, false)
    }

    /// Register a listener that runs at most once.
    pub fn once(&self, kind: EventKind, listener: impl Fn(&StreamEvent) + 'static) -> ListenerId {
        self.add_listener(kind, Rc::new(listener), true, false)
    }

    /// Register a listener ahead of the existing ones.
    pub fn prepend(&self, kind: EventKind, listener: impl Fn(&StreamEvent) + 'static) -> ListenerId {
        self.add_listener(kind, Rc::new(listener), false, true)
    }

    /// Remove a listener. Returns `false` if it was not registered.
    pub fn off(&self, id: ListenerId) -> bool {
        let removed = self.inner.listeners.borrow_mut().remove(id);
        match removed {
            Some(kind) => {
                self.listener_removed(kind);
                true
            }
            None => false,
        }
    }

    /// Remove every listener for `kind`, or all listeners when `None`.
    pub fn remove_all_listeners(&self, kind: Option<EventKind>) {
        self.inner.listeners.borrow_mut().remove_all(kind);
        match kind {
            Some(kind) => self.listener_removed(kind),
            None => {
                self.listener_removed(EventKind::Data);
                self.listener_removed(EventKind::Readable);
            }
        }
    }

    /// Number of listeners registered for `kind`.
    pub fn listener_count(&self, kind: EventKind) -> usize {
        self.inner.listeners.borrow().count(kind)
    }

    /// Listen for `data` chunks.
    pub fn on_data(&self, listener: impl Fn(&Chunk) + 'static) -> ListenerId {
        self.on(EventKind::Data, move |event| {
            if let Some(chunk) = event.chunk() {
                listener(chunk);
            }
        })
    }

    /// Listen for `error`.
    pub fn on_error(&self, listener: impl Fn(&Error) + 'static) -> ListenerId {
        self.on(EventKind::Error, move |event| {
            if let Some(err) = event.error() {
                listener(err);
            }
        })
    }

    /// Listen for `end`.
    pub fn on_end(&self, listener: impl Fn() + 'static) -> ListenerId {
        self.on(EventKind::End, move |_| listener())
    }

    /// Listen for `finish`.
    pub fn on_finish(&self, listener: impl Fn() + 'static) -> ListenerId {
        self.on(EventKind::Finish, move |_| listener())
    }

    /// Listen for `close`.
    pub fn on_close(&self, listener: impl Fn() + 'static) -> ListenerId {
        self.on(EventKind::Close, move |_| listener())
    }

    /// Listen for `drain`.
    pub fn on_drain(&self, listener: impl Fn() + 'static) -> ListenerId {
        self.on(EventKind::Drain, move |_| listener())
    }

    /// Listen for `readable`.
    pub fn on_readable(&self, listener: impl Fn() + 'static) -> ListenerId {
        self.on(EventKind::Readable, move |_| listener())
    }

    fn add_listener(&self, kind: EventKind, callback: Callback, once: bool, prepend: bool) -> ListenerId {
        let id = self
            .inner
            .listeners
            .borrow_mut()
            .add(kind, callback, once, prepend);
        self.listener_added(kind);
        id
    }

    /// Deliver `event` to its listeners.
    ///
    /// Returns `true` if any listener ran. An `error` nobody listens to is
    /// escalated to the uncaught-error handler.
    pub(crate) fn emit(&self, event: StreamEvent) -> bool {
        let kind = event.kind();
        let (callbacks, remaining) = {
            let mut listeners = self.inner.listeners.borrow_mut();
            let callbacks = listeners.snapshot(kind);
            let remaining = listeners.count(kind);
            (callbacks, remaining)
        };
        if callbacks.is_empty() {
            if let StreamEvent::Error(err) = &event {
                crate::runtime::report_uncaught(self.name(), err);
            }
            return false;
        }
        if remaining < callbacks.len() {
            self.listener_removed(kind);
        }
        tracing::trace!(stream = %self.name(), event = %kind, listeners = callbacks.len(), "emit");
        for callback in callbacks {
            callback(&event);
        }
        true
    }
}

impl PartialEq for Stream {
    fn eq(&self, other: &Self) -> bool {
        self.ptr_eq(other)
    }
}

impl Eq for Stream {}

impl fmt::Debug for Stream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Stream")
            .field("id", &self.inner.id)
            .field("name", &self.inner.name)
            .field("kind", &self.inner.kind)
            .finish()
    }
}

impl fmt::Debug for WeakStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.upgrade() {
            Some(stream) => write!(f, "WeakStream({})", stream.name()),
            None => f.write_str("WeakStream(<dropped>)"),
        }
    }
}
