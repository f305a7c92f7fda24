//! Stream events and the ordered listener registry.
//!
//! Every stream owns a [`Listeners`] registry. Events are a closed, typed
//! set ([`EventKind`]) instead of free-form names, so a listener for
//! `Data` always receives a [`StreamEvent::Data`] payload.
//!
//! # Ordering
//!
//! Listeners run in registration order; `prepend` puts a listener in front
//! of the existing ones. Emission works on a snapshot, so listeners added or
//! removed while an event is being delivered only affect later emissions.
//!
//! # Example
//!
//! ```rust
//! use sluice::event::{EventKind, Listeners, StreamEvent};
//! use std::cell::Cell;
//! use std::rc::Rc;
//!
//! let mut listeners = Listeners::new();
//! let hits = Rc::new(Cell::new(0));
//! let h = Rc::clone(&hits);
//! listeners.add(EventKind::Drain, Rc::new(move |_| h.set(h.get() + 1)), true, false);
//!
//! for callback in listeners.snapshot(EventKind::Drain) {
//!     callback(&StreamEvent::Drain);
//! }
//! assert_eq!(hits.get(), 1);
//! assert_eq!(listeners.count(EventKind::Drain), 0); // `once` listener removed
//! ```

use crate::chunk::Chunk;
use crate::error::Error;
use crate::stream::Stream;
use smallvec::SmallVec;
use std::fmt;
use std::rc::Rc;

// ============================================================================
// Event Types
// ============================================================================

/// The kind of a stream event, used to register listeners.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    /// A chunk was delivered to the consumer.
    Data,
    /// Data (or the end of the stream) is available to `read()`.
    Readable,
    /// The readable side delivered all of its data.
    End,
    /// The writable side drained after signalling backpressure.
    Drain,
    /// All writes were flushed after `end()`.
    Finish,
    /// Emitted right before `Finish`, after the final hook completed.
    Prefinish,
    /// The stream and its resources were released.
    Close,
    /// The stream failed.
    Error,
    /// A source started piping into this stream.
    Pipe,
    /// A source stopped piping into this stream.
    Unpipe,
    /// The readable side left flowing mode.
    Pause,
    /// The readable side entered flowing mode.
    Resume,
}

impl EventKind {
    /// Get a human-readable name for this event kind.
    pub fn name(&self) -> &'static str {
        match self {
            EventKind::Data => "data",
            EventKind::Readable => "readable",
            EventKind::End => "end",
            EventKind::Drain => "drain",
            EventKind::Finish => "finish",
            EventKind::Prefinish => "prefinish",
            EventKind::Close => "close",
            EventKind::Error => "error",
            EventKind::Pipe => "pipe",
            EventKind::Unpipe => "unpipe",
            EventKind::Pause => "pause",
            EventKind::Resume => "resume",
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// An event delivered to listeners, with its payload.
#[derive(Debug, Clone)]
pub enum StreamEvent {
    /// A chunk for the consumer.
    Data(Chunk),
    /// Data is available to `read()`.
    Readable,
    /// End of the readable side.
    End,
    /// Backpressure released.
    Drain,
    /// Writable side finished.
    Finish,
    /// Writable side about to finish.
    Prefinish,
    /// Stream closed.
    Close,
    /// Stream failed.
    Error(Error),
    /// `source` started piping into this stream.
    Pipe(Stream),
    /// `source` stopped piping into this stream.
    Unpipe(Stream),
    /// Flowing mode stopped.
    Pause,
    /// Flowing mode started.
    Resume,
}

impl StreamEvent {
    /// The kind of this event.
    pub fn kind(&self) -> EventKind {
        match self {
            StreamEvent::Data(_) => EventKind::Data,
            StreamEvent::Readable => EventKind::Readable,
            StreamEvent::End => EventKind::End,
            StreamEvent::Drain => EventKind::Drain,
            StreamEvent::Finish => EventKind::Finish,
            StreamEvent::Prefinish => EventKind::Prefinish,
            StreamEvent::Close => EventKind::Close,
            StreamEvent::Error(_) => EventKind::Error,
            StreamEvent::Pipe(_) => EventKind::Pipe,
            StreamEvent::Unpipe(_) => EventKind::Unpipe,
            StreamEvent::Pause => EventKind::Pause,
            StreamEvent::Resume => EventKind::Resume,
        }
    }

    /// The data chunk, for `Data` events.
    pub fn chunk(&self) -> Option<&Chunk> {
        match self {
            StreamEvent::Data(chunk) => Some(chunk),
            _ => None,
        }
    }

    /// The error, for `Error` events.
    pub fn error(&self) -> Option<&Error> {
        match self {
            StreamEvent::Error(err) => Some(err),
            _ => None,
        }
    }

    /// The other stream, for `Pipe`/`Unpipe` events.
    pub fn peer(&self) -> Option<&Stream> {
        match self {
            StreamEvent::Pipe(s) | StreamEvent::Unpipe(s) => Some(s),
            _ => None,
        }
    }
}

// ============================================================================
// Listener Registry
// ============================================================================

/// Shared listener callback.
pub type Callback = Rc<dyn Fn(&StreamEvent)>;

/// Handle identifying a registered listener, used to remove it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

struct Listener {
    id: ListenerId,
    kind: EventKind,
    once: bool,
    callback: Callback,
}

/// Ordered listener registry for one stream.
#[derive(Default)]
pub struct Listeners {
    entries: Vec<Listener>,
    next_id: u64,
}

impl Listeners {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `callback` for `kind`.
    ///
    /// `once` listeners are removed when they are snapshotted for delivery.
    /// `prepend` places the listener before existing listeners of any kind.
    pub fn add(&mut self, kind: EventKind, callback: Callback, once: bool, prepend: bool) -> ListenerId {
        let id = ListenerId(self.next_id);
        self.next_id += 1;
        let listener = Listener {
            id,
            kind,
            once,
            callback,
        };
        if prepend {
            self.entries.insert(0, listener);
        } else {
            self.entries.push(listener);
        }
        id
    }

    /// Remove a listener. Returns its kind if it was registered.
    pub fn remove(&mut self, id: ListenerId) -> Option<EventKind> {
        let pos = self.entries.iter().position(|l| l.id == id)?;
        Some(self.entries.remove(pos).kind)
    }

    /// Remove every listener for `kind`, or every listener when `None`.
    pub fn remove_all(&mut self, kind: Option<EventKind>) {
        match kind {
            Some(kind) => self.entries.retain(|l| l.kind != kind),
            None => self.entries.clear(),
        }
    }

    /// Number of listeners registered for `kind`.
    pub fn count(&self, kind: EventKind) -> usize {
        self.entries.iter().filter(|l| l.kind == kind).count()
    }

    /// Check whether `id` is still registered.
    pub fn contains(&self, id: ListenerId) -> bool {
        self.entries.iter().any(|l| l.id == id)
    }

    /// Collect the callbacks to run for `kind`, in order.
    ///
    /// `once` listeners are removed from the registry at this point, so a
    /// listener that re-emits the same event does not see itself again.
    pub fn snapshot(&mut self, kind: EventKind) -> SmallVec<[Callback; 4]> {
        let mut out = SmallVec::new();
        self.entries.retain(|l| {
            if l.kind != kind {
                return true;
            }
            out.push(Rc::clone(&l.callback));
            !l.once
        });
        out
    }
}

impl fmt::Debug for Listeners {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list()
            .entries(self.entries.iter().map(|l| (l.id, l.kind, l.once)))
            .finish()
    }
}
