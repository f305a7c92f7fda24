//! Pipe coordinator: move data from a readable side into a writable side
//! with backpressure.
//!
//! A pipe is represented by a [`PipeLink`] owned by the source. The link
//! remembers every listener it installed on both streams; dropping it
//! removes them, so an unpiped pair is left exactly as it was found.
//!
//! Flow control: when `dest.write()` reports backpressure, the source is
//! paused and the destination recorded as awaited. The source resumes once
//! every awaited destination emitted `drain`.

use super::{Stream, WeakStream};
use crate::event::{EventKind, ListenerId, StreamEvent};
use crate::observability;
use crate::runtime::next_tick;
use smallvec::SmallVec;
use std::cell::Cell;
use std::rc::Rc;

/// Options for [`Stream::pipe_with`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PipeOptions {
    /// End the destination when the source ends (default `true`).
    pub end: bool,
}

impl Default for PipeOptions {
    fn default() -> Self {
        Self { end: true }
    }
}

impl PipeOptions {
    /// Control whether the destination is ended with the source.
    pub fn end(mut self, end: bool) -> Self {
        self.end = end;
        self
    }
}

/// One source → destination connection.
pub(crate) struct PipeLink {
    dest: Stream,
    src: WeakStream,
    src_listeners: SmallVec<[ListenerId; 2]>,
    dest_listeners: SmallVec<[ListenerId; 4]>,
    /// `drain` listener, installed the first time the destination pushes back.
    ondrain: Rc<Cell<Option<ListenerId>>>,
    cleaned: Rc<Cell<bool>>,
    span: tracing::Span,
}

impl PipeLink {
    pub(crate) fn dest(&self) -> &Stream {
        &self.dest
    }

    fn cleanup(&mut self) {
        if self.cleaned.replace(true) {
            return;
        }
        let _enter = self.span.enter();
        tracing::debug!(dest = %self.dest.name(), "pipe cleanup");
        for id in self.dest_listeners.drain(..) {
            self.dest.off(id);
        }
        if let Some(id) = self.ondrain.get() {
            self.dest.off(id);
        }
        if let Some(src) = self.src.upgrade() {
            for id in self.src_listeners.drain(..) {
                src.off(id);
            }
        }
    }
}

impl Drop for PipeLink {
    fn drop(&mut self) {
        self.cleanup();
    }
}

impl Stream {
    /// Pipe this stream into `dest`, ending `dest` when this stream ends.
    ///
    /// Returns `dest` so pipes can be chained.
    pub fn pipe(&self, dest: &Stream) -> Stream {
        self.pipe_with(dest, PipeOptions::default())
    }

    /// Pipe this stream into `dest` with explicit options.
    ///
    /// Piping into a destination that is already attached does nothing.
    pub fn pipe_with(&self, dest: &Stream, options: PipeOptions) -> Stream {
        let Some(cell) = self.inner.readable.as_ref() else {
            return dest.clone();
        };
        // One link per destination
        if cell.borrow().pipes.iter().any(|link| link.dest.ptr_eq(dest)) {
            tracing::debug!(src = %self.name(), dest = %dest.name(), "already piped");
            return dest.clone();
        }
        let span = observability::span_pipe(self.name(), dest.name());
        let _enter = span.enter();
        tracing::debug!(
            pipes = cell.borrow().pipes.len() + 1,
            end = options.end,
            "pipe"
        );

        let cleaned = Rc::new(Cell::new(false));
        let ondrain: Rc<Cell<Option<ListenerId>>> = Rc::new(Cell::new(None));
        let src_weak = self.downgrade();
        let dest_weak = dest.downgrade();
        let mut src_listeners = SmallVec::new();
        let mut dest_listeners = SmallVec::new();

        // Source end: end the destination or just detach from it
        let end_dest = {
            let (src_weak, dest_weak, cleaned) = (src_weak.clone(), dest_weak.clone(), cleaned.clone());
            move || {
                let (Some(src), Some(dest)) = (src_weak.upgrade(), dest_weak.upgrade()) else {
                    return;
                };
                if cleaned.get() {
                    return;
                }
                if options.end {
                    let _ = dest.end();
                } else {
                    src.unpipe(Some(&dest));
                }
            }
        };
        if cell.borrow().end_emitted {
            next_tick(end_dest);
        } else {
            src_listeners.push(self.once(EventKind::End, move |_| end_dest()));
        }

        // Source data: forward, pause on backpressure
        {
            let (src_weak, dest_weak) = (src_weak.clone(), dest_weak.clone());
            let (cleaned, ondrain) = (cleaned.clone(), ondrain.clone());
            src_listeners.push(self.on(EventKind::Data, move |event| {
                let (Some(src), Some(dest), Some(chunk)) =
                    (src_weak.upgrade(), dest_weak.upgrade(), event.chunk())
                else {
                    return;
                };
                tracing::trace!(src = %src.name(), dest = %dest.name(), len = chunk.len(), "pipe data");
                if let Ok(false) = dest.write(chunk.clone()) {
                    pause_for(&src, &dest, &cleaned, &ondrain);
                }
            }));
        }

        // Destination error: stop piping, keep the error visible
        {
            let src_weak = src_weak.clone();
            let dest_weak = dest_weak.clone();
            dest_listeners.push(dest.prepend(EventKind::Error, move |event| {
                let (Some(src), Some(dest), Some(err)) =
                    (src_weak.upgrade(), dest_weak.upgrade(), event.error())
                else {
                    return;
                };
                tracing::debug!(src = %src.name(), dest = %dest.name(), error = %err, "pipe destination error");
                src.unpipe(Some(&dest));
                if dest.listener_count(EventKind::Error) == 0 {
                    if dest.inner.common.borrow().error_emitted {
                        dest.emit(StreamEvent::Error(err.clone()));
                    } else {
                        dest.error_or_destroy(err.clone(), false);
                    }
                }
            }));
        }

        // Destination close or finish: stop piping
        for kind in [EventKind::Close, EventKind::Finish] {
            let (src_weak, dest_weak) = (src_weak.clone(), dest_weak.clone());
            dest_listeners.push(dest.once(kind, move |_| {
                if let (Some(src), Some(dest)) = (src_weak.upgrade(), dest_weak.upgrade()) {
                    src.unpipe(Some(&dest));
                }
            }));
        }

        cell.borrow_mut().pipes.push(PipeLink {
            dest: dest.clone(),
            src: src_weak,
            src_listeners,
            dest_listeners,
            ondrain: Rc::clone(&ondrain),
            cleaned: Rc::clone(&cleaned),
            span: span.clone(),
        });

        dest.emit(StreamEvent::Pipe(self.clone()));

        if dest.writable_need_drain() {
            pause_for(self, dest, &cleaned, &ondrain);
        } else if cell.borrow().flowing != Some(true) {
            tracing::debug!("pipe resume");
            self.resume();
        }
        dest.clone()
    }

    /// Stop piping into `dest`, or into every destination when `None`.
    ///
    /// The source pauses once no destination is left.
    pub fn unpipe(&self, dest: Option<&Stream>) -> &Self {
        let Some(cell) = self.inner.readable.as_ref() else {
            return self;
        };
        let (removed, none_left) = {
            let mut st = cell.borrow_mut();
            let removed: Vec<PipeLink> = match dest {
                Some(dest) => match st.pipes.iter().position(|link| link.dest.ptr_eq(dest)) {
                    Some(index) => vec![st.pipes.remove(index)],
                    None => Vec::new(),
                },
                None => st.pipes.drain(..).collect(),
            };
            (removed, st.pipes.is_empty())
        };
        if removed.is_empty() {
            return self;
        }
        if none_left {
            self.pause();
        }
        for link in removed {
            self.detach(link);
        }
        self
    }

    /// Drop every link without touching the flowing state.
    pub(crate) fn release_pipes(&self) {
        let Some(cell) = self.inner.readable.as_ref() else {
            return;
        };
        let links: Vec<PipeLink> = cell.borrow_mut().pipes.drain(..).collect();
        for link in links {
            self.detach(link);
        }
    }

    fn detach(&self, mut link: PipeLink) {
        let dest = link.dest.clone();
        let awaiting = link.ondrain.get().is_some()
            && self
                .inner
                .readable
                .as_ref()
                .is_some_and(|cell| cell.borrow().await_drain.contains(&dest.id()));
        link.cleanup();
        drop(link);

        // Still waiting for this destination would leave the source stuck
        if awaiting && (!dest.has_writable_side() || dest.writable_need_drain()) {
            pipe_on_drain(self, dest.id());
        }
        dest.emit(StreamEvent::Unpipe(self.clone()));
    }

    /// Streams this stream currently pipes into.
    pub fn pipe_destinations(&self) -> Vec<Stream> {
        self.inner.readable.as_ref().map_or_else(Vec::new, |cell| {
            cell.borrow().pipes.iter().map(|link| link.dest().clone()).collect()
        })
    }
}

/// Pause `src` because `dest` pushed back, and arrange for the resume.
fn pause_for(src: &Stream, dest: &Stream, cleaned: &Rc<Cell<bool>>, ondrain: &Rc<Cell<Option<ListenerId>>>) {
    if !cleaned.get() {
        if let Some(cell) = src.inner.readable.as_ref() {
            let mut st = cell.borrow_mut();
            let piped = st.pipes.iter().any(|link| link.dest.ptr_eq(dest));
            if piped && !st.await_drain.contains(&dest.id()) {
                st.await_drain.push(dest.id());
            }
            tracing::debug!(src = %src.name(), awaiting = st.await_drain.len(), "false write response, pause");
        }
        src.pause();
    }
    if ondrain.get().is_none() {
        let src_weak = src.downgrade();
        let dest_id = dest.id();
        let id = dest.on(EventKind::Drain, move |_| {
            if let Some(src) = src_weak.upgrade() {
                pipe_on_drain(&src, dest_id);
            }
        });
        ondrain.set(Some(id));
    }
}

fn pipe_on_drain(src: &Stream, dest_id: u64) {
    let Some(cell) = src.inner.readable.as_ref() else {
        return;
    };
    let resume = {
        let mut st = cell.borrow_mut();
        st.await_drain.retain(|id| *id != dest_id);
        tracing::debug!(src = %src.name(), awaiting = st.await_drain.len(), "pipe on drain");
        st.await_drain.is_empty() && st.data_listening
    };
    if resume {
        src.resume();
    }
}
