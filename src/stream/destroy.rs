//! Destruction and error delivery shared by both sides.

use super::Stream;
use crate::error::Error;
use crate::event::StreamEvent;
use crate::observability;
use crate::runtime::next_tick;

impl Stream {
    /// Destroy the stream and release its resources.
    ///
    /// With `None` this is a clean cancellation: only `close` is emitted.
    /// With an error, `error` is emitted first. Buffered writes and pending
    /// `end` callbacks fail with the error (or [`Error::Destroyed`]).
    /// Calling `destroy` again has no effect.
    pub fn destroy(&self, error: Option<Error>) -> &Self {
        {
            let mut common = self.inner.common.borrow_mut();
            if common.destroyed {
                return self;
            }
            if let Some(err) = &error {
                common.errored.get_or_insert_with(|| err.clone());
            }
            common.destroyed = true;
        }
        match &error {
            Some(err) => tracing::debug!(stream = %self.name(), error = %err, "destroy"),
            None => tracing::debug!(stream = %self.name(), "destroy"),
        }
        observability::record_destroyed(self.name(), error.is_some());

        if self.has_pending_writes() {
            let stream = self.clone();
            next_tick(move || stream.error_buffer());
        }
        self.run_destroy_hooks(error);
        self
    }

    /// Run `Source::destroy` and `Sink::destroy`, then schedule the
    /// terminal events.
    fn run_destroy_hooks(&self, error: Option<Error>) {
        let (Ok(mut source), Ok(mut sink)) = (
            self.inner.source.try_borrow_mut(),
            self.inner.sink.try_borrow_mut(),
        ) else {
            // Destroyed from inside a source or sink call
            let stream = self.clone();
            next_tick(move || stream.run_destroy_hooks(error));
            return;
        };
        let _span = observability::span_stream(self.name(), self.kind().label()).entered();
        let mut error = error;
        if let Some(source) = source.as_mut() {
            error = source.destroy(error);
        }
        if let Some(sink) = sink.as_mut() {
            error = sink.destroy(error);
        }
        drop(source);
        drop(sink);

        {
            let mut common = self.inner.common.borrow_mut();
            if let Some(err) = &error {
                common.errored.get_or_insert_with(|| err.clone());
            }
            common.closed = true;
        }
        let stream = self.clone();
        match error {
            Some(err) => next_tick(move || {
                stream.emit_error_now(err);
                stream.emit_close_now();
            }),
            None => next_tick(move || stream.emit_close_now()),
        }
    }

    fn has_pending_writes(&self) -> bool {
        self.inner.writable.as_ref().is_some_and(|cell| {
            let st = cell.borrow();
            st.has_buffered() || st.has_finish_callbacks()
        })
    }

    /// Fail the stream: destroy it when `auto_destroy` is set, otherwise
    /// only record and emit the error.
    pub(crate) fn error_or_destroy(&self, err: Error, sync: bool) {
        let (destroyed, auto_destroy) = {
            let common = self.inner.common.borrow();
            (common.destroyed, common.auto_destroy)
        };
        if destroyed {
            return;
        }
        if auto_destroy {
            self.destroy(Some(err));
            return;
        }
        self.inner
            .common
            .borrow_mut()
            .errored
            .get_or_insert_with(|| err.clone());
        if sync {
            let stream = self.clone();
            next_tick(move || stream.emit_error_now(err));
        } else {
            self.emit_error_now(err);
        }
    }

    fn emit_error_now(&self, err: Error) {
        {
            let mut common = self.inner.common.borrow_mut();
            if common.error_emitted {
                return;
            }
            common.error_emitted = true;
        }
        self.release_pipes();
        self.emit(StreamEvent::Error(err));
    }

    fn emit_close_now(&self) {
        let emit_close = {
            let mut common = self.inner.common.borrow_mut();
            common.close_emitted = true;
            common.emit_close
        };
        self.release_pipes();
        if emit_close {
            self.emit(StreamEvent::Close);
        }
    }
}
