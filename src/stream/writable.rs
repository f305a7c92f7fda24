//! The writable side: buffering, one write in flight, cork, end and finish.

use super::Stream;
use super::traits::{FinalCallback, WriteCallback};
use crate::chunk::{Chunk, Encoding};
use crate::error::{Error, Result};
use crate::event::StreamEvent;
use crate::flow::{FlowGate, FlowStats};
use crate::observability;
use crate::options::StreamOptions;
use crate::queue::{BufferQueue, QueueItem, SizeMode};
use crate::runtime::{Deferred, Resolver, deferred, next_tick};
use std::cell::RefCell;

/// Callback attached to a write or to `end`.
pub(crate) type WriteDone = Box<dyn FnOnce(Result<()>)>;

/// A buffered write waiting for the sink.
pub(crate) struct WriteRequest {
    chunk: Chunk,
    callback: Option<WriteDone>,
}

impl QueueItem for WriteRequest {
    fn chunk(&self) -> &Chunk {
        &self.chunk
    }
}

/// What a single sink call receives.
enum WriteBatch {
    Single(Chunk),
    Vectored(Vec<Chunk>),
}

pub(crate) struct WritableState {
    object_mode: bool,
    high_water_mark: usize,
    /// Buffered plus in-flight length.
    length: usize,
    buffered: BufferQueue<WriteRequest>,
    writing: bool,
    sync: bool,
    corked: u32,
    pub(crate) ending: bool,
    pub(crate) ended: bool,
    pub(crate) finished: bool,
    prefinished: bool,
    final_called: bool,
    buffer_processing: bool,
    /// Callbacks (and pseudo-callbacks) that must run before `finish`.
    pending_cb: usize,
    write_len: usize,
    write_cb: Option<WriteDone>,
    on_finished: Vec<WriteDone>,
    default_encoding: Encoding,
    decode_strings: bool,
    writev: bool,
    gate: FlowGate,
    ready_waiters: Vec<Resolver<()>>,
}

impl WritableState {
    pub(crate) fn new(options: &StreamOptions, supports_writev: bool) -> Self {
        let config = options.writable_config();
        Self {
            object_mode: config.object_mode,
            high_water_mark: config.high_water_mark,
            length: 0,
            buffered: BufferQueue::new(SizeMode::for_object_mode(config.object_mode)),
            writing: false,
            sync: true,
            corked: 0,
            ending: false,
            ended: false,
            finished: false,
            prefinished: false,
            final_called: false,
            buffer_processing: false,
            pending_cb: 0,
            write_len: 0,
            write_cb: None,
            on_finished: Vec::new(),
            default_encoding: options.default_encoding,
            decode_strings: options.decode_strings,
            writev: supports_writev,
            gate: FlowGate::new(),
            ready_waiters: Vec::new(),
        }
    }

    fn measure(&self, chunk: &Chunk) -> usize {
        self.buffered.mode().measure(chunk)
    }

    fn need_drain(&self) -> bool {
        self.gate.signal().is_backpressure()
    }

    pub(crate) fn has_buffered(&self) -> bool {
        !self.buffered.is_empty()
    }

    pub(crate) fn has_finish_callbacks(&self) -> bool {
        !self.on_finished.is_empty()
    }
}

impl Stream {
    fn writable_cell(&self) -> Result<&RefCell<WritableState>> {
        self.inner.writable.as_ref().ok_or(Error::NotWritable)
    }

    // ========================================================================
    // Write path
    // ========================================================================

    /// Write a chunk.
    ///
    /// Returns `Ok(false)` when the buffered length reached the high water
    /// mark; wait for `drain` (or [`ready`](Self::ready)) before writing
    /// more. Writing after `end()` fails with [`Error::WriteAfterEnd`] and
    /// errors the stream.
    pub fn write(&self, chunk: impl Into<Chunk>) -> Result<bool> {
        self.write_chunk(chunk.into(), None)
    }

    /// Write a chunk and get notified once the sink flushed it.
    pub fn write_with(
        &self,
        chunk: impl Into<Chunk>,
        callback: impl FnOnce(Result<()>) + 'static,
    ) -> Result<bool> {
        self.write_chunk(chunk.into(), Some(Box::new(callback)))
    }

    fn write_chunk(&self, chunk: Chunk, callback: Option<WriteDone>) -> Result<bool> {
        let cell = self.writable_cell()?;
        let (chunk, ending) = {
            let st = cell.borrow();
            let chunk = match chunk {
                _ if st.object_mode => chunk,
                Chunk::Object(_) => return Err(Error::InvalidChunk("write")),
                Chunk::Text(text) if st.decode_strings => {
                    Chunk::Bytes(st.default_encoding.encode(&text)?)
                }
                other => other,
            };
            (chunk, st.ending)
        };

        let rejected = if ending {
            Some(Error::WriteAfterEnd)
        } else if self.is_destroyed() {
            Some(Error::Destroyed("write"))
        } else {
            None
        };
        if let Some(err) = rejected {
            tracing::debug!(stream = %self.name(), error = %err, "write rejected");
            if let Some(callback) = callback {
                let e = err.clone();
                next_tick(move || callback(Err(e)));
            }
            self.error_or_destroy(err.clone(), true);
            return Err(err);
        }
        // Already failed without being destroyed: report the stored error
        if let Some(err) = self.errored() {
            tracing::debug!(stream = %self.name(), error = %err, "write on errored stream");
            if let Some(callback) = callback {
                let e = err.clone();
                next_tick(move || callback(Err(e)));
            }
            return Err(err);
        }

        cell.borrow_mut().pending_cb += 1;
        Ok(self.write_or_buffer(chunk, callback))
    }

    fn write_or_buffer(&self, chunk: Chunk, callback: Option<WriteDone>) -> bool {
        let Some(cell) = self.inner.writable.as_ref() else {
            return false;
        };
        let errored = self.inner.common.borrow().errored.is_some();
        observability::record_written(self.name(), chunk.len());
        observability::trace_chunk(self.name(), "write", chunk.len());

        let (direct, len, accepted) = {
            let mut st = cell.borrow_mut();
            let len = st.measure(&chunk);
            st.length += len;

            let was_backpressured = st.need_drain();
            let (length, hwm) = (st.length, st.high_water_mark);
            let accepted = st.gate.on_accept(length, hwm);
            if !accepted && !was_backpressured {
                tracing::debug!(stream = %self.name(), length, hwm, "backpressure");
                observability::record_backpressure(self.name());
            }

            let direct = if st.writing || errored || st.corked > 0 || !st.buffered.is_empty() {
                st.buffered.push(WriteRequest { chunk, callback });
                None
            } else {
                Some((chunk, callback))
            };
            (direct, len, accepted)
        };

        if let Some((chunk, callback)) = direct {
            self.do_write(WriteBatch::Single(chunk), len, callback);
        }
        accepted && !self.is_destroyed_or_errored()
    }

    fn do_write(&self, batch: WriteBatch, len: usize, callback: Option<WriteDone>) {
        let Some(cell) = self.inner.writable.as_ref() else {
            return;
        };
        {
            let mut st = cell.borrow_mut();
            st.write_len = len;
            st.write_cb = callback;
            st.writing = true;
            st.sync = true;
        }
        if self.is_destroyed() {
            self.on_write(Err(Error::Destroyed("write")));
        } else {
            self.call_sink(batch);
        }
        cell.borrow_mut().sync = false;
    }

    fn call_sink(&self, batch: WriteBatch) {
        let Ok(mut slot) = self.inner.sink.try_borrow_mut() else {
            // The sink is still inside an earlier call on this stack
            let stream = self.clone();
            next_tick(move || stream.call_sink(batch));
            return;
        };
        if let Some(sink) = slot.as_mut() {
            let done = WriteCallback::new(self);
            match batch {
                WriteBatch::Single(chunk) => sink.write(self, chunk, done),
                WriteBatch::Vectored(chunks) => sink.writev(self, chunks, done),
            }
        }
    }

    /// Completion of the in-flight sink call.
    pub(crate) fn on_write(&self, result: Result<()>) {
        let Some(cell) = self.inner.writable.as_ref() else {
            return;
        };
        let (sync, callback) = {
            let mut st = cell.borrow_mut();
            if !st.writing {
                return;
            }
            st.writing = false;
            st.length -= st.write_len;
            st.write_len = 0;
            (st.sync, st.write_cb.take())
        };

        match result {
            Err(err) => {
                tracing::debug!(stream = %self.name(), error = %err, "write failed");
                self.inner
                    .common
                    .borrow_mut()
                    .errored
                    .get_or_insert_with(|| err.clone());
                if sync {
                    let stream = self.clone();
                    next_tick(move || stream.on_write_error(err, callback));
                } else {
                    self.on_write_error(err, callback);
                }
            }
            Ok(()) => {
                if !cell.borrow().buffered.is_empty() {
                    self.clear_buffer();
                }
                if sync {
                    let need_tick = {
                        let st = cell.borrow();
                        (st.need_drain() && st.length == 0)
                            || self.is_destroyed()
                            || callback.is_some()
                    };
                    if need_tick {
                        let stream = self.clone();
                        next_tick(move || stream.after_write(callback));
                    } else {
                        let ending = {
                            let mut st = cell.borrow_mut();
                            st.pending_cb -= 1;
                            st.ending
                        };
                        if ending {
                            self.finish_maybe(true);
                        }
                    }
                } else {
                    self.after_write(callback);
                }
            }
        }
    }

    fn on_write_error(&self, err: Error, callback: Option<WriteDone>) {
        if let Some(cell) = self.inner.writable.as_ref() {
            let mut st = cell.borrow_mut();
            st.pending_cb = st.pending_cb.saturating_sub(1);
        }
        if let Some(callback) = callback {
            callback(Err(err.clone()));
        }
        self.error_buffer();
        self.error_or_destroy(err, false);
    }

    fn after_write(&self, callback: Option<WriteDone>) {
        let Some(cell) = self.inner.writable.as_ref() else {
            return;
        };
        let destroyed = self.is_destroyed();
        let waiters = {
            let mut st = cell.borrow_mut();
            let drain = !st.ending && !destroyed && st.length == 0 && st.gate.release();
            drain.then(|| std::mem::take(&mut st.ready_waiters))
        };
        if let Some(waiters) = waiters {
            tracing::debug!(stream = %self.name(), "drain");
            observability::record_drain(self.name());
            self.emit(StreamEvent::Drain);
            for mut waiter in waiters {
                waiter.resolve(Ok(()));
            }
        }

        cell.borrow_mut().pending_cb -= 1;
        if let Some(callback) = callback {
            callback(Ok(()));
        }
        if self.is_destroyed() {
            self.error_buffer();
        }
        if cell.borrow().ending {
            self.finish_maybe(true);
        }
    }

    /// Flush buffered writes, as one vectored write when the sink supports it.
    fn clear_buffer(&self) {
        let Some(cell) = self.inner.writable.as_ref() else {
            return;
        };
        let destroyed = self.is_destroyed();
        let vectored = {
            let mut st = cell.borrow_mut();
            if destroyed || st.buffer_processing || st.corked > 0 || st.buffered.is_empty() {
                return;
            }
            st.buffer_processing = true;
            if st.buffered.len() > 1 && st.writev {
                let requests = st.buffered.clear();
                st.pending_cb -= requests.len() - 1;
                Some(requests)
            } else {
                None
            }
        };

        match vectored {
            Some(requests) => {
                let len = {
                    let st = cell.borrow();
                    requests.iter().map(|r| st.measure(&r.chunk)).sum()
                };
                tracing::trace!(stream = %self.name(), count = requests.len(), len, "writev");
                let mut chunks = Vec::with_capacity(requests.len());
                let mut callbacks = Vec::new();
                for request in requests {
                    chunks.push(request.chunk);
                    callbacks.extend(request.callback);
                }
                let callback: Option<WriteDone> = (!callbacks.is_empty()).then(|| {
                    Box::new(move |result: Result<()>| {
                        for callback in callbacks {
                            callback(result.clone());
                        }
                    }) as WriteDone
                });
                self.do_write(WriteBatch::Vectored(chunks), len, callback);
            }
            None => loop {
                let next = {
                    let mut st = cell.borrow_mut();
                    if st.writing {
                        break;
                    }
                    st.buffered.shift().map(|request| {
                        let len = st.measure(&request.chunk);
                        (request, len)
                    })
                };
                let Some((request, len)) = next else {
                    break;
                };
                self.do_write(WriteBatch::Single(request.chunk), len, request.callback);
            },
        }
        cell.borrow_mut().buffer_processing = false;
    }

    /// Fail every buffered write and pending `end` callback.
    pub(crate) fn error_buffer(&self) {
        let Some(cell) = self.inner.writable.as_ref() else {
            return;
        };
        let (requests, on_finished, waiters) = {
            let mut st = cell.borrow_mut();
            if st.writing {
                return;
            }
            let requests = st.buffered.clear();
            for request in &requests {
                let len = st.measure(&request.chunk);
                st.length -= len;
            }
            st.pending_cb = st.pending_cb.saturating_sub(requests.len());
            (
                requests,
                std::mem::take(&mut st.on_finished),
                std::mem::take(&mut st.ready_waiters),
            )
        };
        let errored = self.errored();
        for request in requests {
            if let Some(callback) = request.callback {
                callback(Err(errored.clone().unwrap_or(Error::Destroyed("write"))));
            }
        }
        for callback in on_finished {
            callback(Err(errored.clone().unwrap_or(Error::Destroyed("end"))));
        }
        for mut waiter in waiters {
            waiter.resolve(Err(errored.clone().unwrap_or(Error::Destroyed("write"))));
        }
    }

    // ========================================================================
    // Cork
    // ========================================================================

    /// Buffer writes without flushing them until [`uncork`](Self::uncork).
    ///
    /// Calls nest; every `cork` needs a matching `uncork`.
    pub fn cork(&self) {
        if let Some(cell) = self.inner.writable.as_ref() {
            cell.borrow_mut().corked += 1;
        }
    }

    /// Undo one [`cork`](Self::cork); the last one flushes the buffer.
    pub fn uncork(&self) {
        let Some(cell) = self.inner.writable.as_ref() else {
            return;
        };
        let flush = {
            let mut st = cell.borrow_mut();
            if st.corked == 0 {
                return;
            }
            st.corked -= 1;
            !st.writing
        };
        if flush {
            self.clear_buffer();
        }
    }

    // ========================================================================
    // End and finish
    // ========================================================================

    /// Signal that nothing more will be written.
    ///
    /// `finish` is emitted once every buffered write was flushed and the
    /// sink's `finalize` completed.
    pub fn end(&self) -> Result<()> {
        self.end_inner(None, None)
    }

    /// Optionally write a last chunk, then end; `callback` runs on finish
    /// (or with the error that prevented it).
    pub fn end_with(
        &self,
        chunk: Option<Chunk>,
        callback: impl FnOnce(Result<()>) + 'static,
    ) -> Result<()> {
        self.end_inner(chunk, Some(Box::new(callback)))
    }

    fn end_inner(&self, chunk: Option<Chunk>, callback: Option<WriteDone>) -> Result<()> {
        let cell = self.writable_cell()?;
        let mut failure = chunk.and_then(|chunk| self.write_chunk(chunk, None).err());

        {
            let mut st = cell.borrow_mut();
            if st.corked > 0 {
                st.corked = 1;
            }
        }
        self.uncork();

        let errored = self.errored();
        if failure.is_none() {
            let start = {
                let st = cell.borrow();
                !st.ending && errored.is_none()
            };
            if start {
                tracing::debug!(stream = %self.name(), "ending");
                cell.borrow_mut().ending = true;
                self.finish_maybe(true);
                cell.borrow_mut().ended = true;
            } else if cell.borrow().finished {
                failure = Some(Error::AlreadyFinished("end"));
            } else if self.is_destroyed() {
                failure = Some(Error::Destroyed("end"));
            }
        }

        if let Some(callback) = callback {
            let finished = cell.borrow().finished;
            match failure.clone().or(errored) {
                Some(err) => next_tick(move || callback(Err(err))),
                None if finished => next_tick(move || callback(Ok(()))),
                None => cell.borrow_mut().on_finished.push(callback),
            }
        }

        match failure {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    fn need_finish(&self) -> bool {
        let Some(cell) = self.inner.writable.as_ref() else {
            return false;
        };
        let common = self.inner.common.borrow();
        let st = cell.borrow();
        st.ending
            && !common.destroyed
            && !st.finished
            && !st.writing
            && !common.error_emitted
            && !common.close_emitted
            && common.errored.is_none()
            && st.buffered.is_empty()
            && st.length == 0
    }

    fn finish_maybe(&self, sync: bool) {
        let Some(cell) = self.inner.writable.as_ref() else {
            return;
        };
        if !self.need_finish() {
            return;
        }
        self.prefinish();
        if cell.borrow().pending_cb != 0 {
            return;
        }
        if sync {
            cell.borrow_mut().pending_cb += 1;
            let stream = self.clone();
            next_tick(move || {
                if stream.need_finish() {
                    stream.finish();
                } else if let Some(cell) = stream.inner.writable.as_ref() {
                    cell.borrow_mut().pending_cb -= 1;
                }
            });
        } else if self.need_finish() {
            cell.borrow_mut().pending_cb += 1;
            self.finish();
        }
    }

    fn prefinish(&self) {
        let Some(cell) = self.inner.writable.as_ref() else {
            return;
        };
        let destroyed = self.is_destroyed();
        let call_final = {
            let mut st = cell.borrow_mut();
            if st.prefinished || st.final_called {
                return;
            }
            st.final_called = true;
            if destroyed {
                st.prefinished = true;
                false
            } else {
                st.sync = true;
                st.pending_cb += 1;
                true
            }
        };
        if call_final {
            self.call_final();
            cell.borrow_mut().sync = false;
        } else {
            self.emit(StreamEvent::Prefinish);
        }
    }

    fn call_final(&self) {
        let Ok(mut slot) = self.inner.sink.try_borrow_mut() else {
            let stream = self.clone();
            next_tick(move || stream.call_final());
            return;
        };
        if let Some(sink) = slot.as_mut() {
            sink.finalize(self, FinalCallback::new(self));
        }
    }

    /// Completion of `Sink::finalize`.
    pub(crate) fn on_final(&self, result: Result<()>) {
        let Some(cell) = self.inner.writable.as_ref() else {
            return;
        };
        let sync = {
            let mut st = cell.borrow_mut();
            st.pending_cb -= 1;
            st.sync
        };
        match result {
            Err(err) => {
                tracing::debug!(stream = %self.name(), error = %err, "finalize failed");
                let callbacks = std::mem::take(&mut cell.borrow_mut().on_finished);
                for callback in callbacks {
                    callback(Err(err.clone()));
                }
                self.error_or_destroy(err, sync);
            }
            Ok(()) if self.need_finish() => {
                {
                    let mut st = cell.borrow_mut();
                    st.prefinished = true;
                    st.pending_cb += 1;
                }
                self.emit(StreamEvent::Prefinish);
                let stream = self.clone();
                next_tick(move || stream.finish());
            }
            Ok(()) => {}
        }
    }

    fn finish(&self) {
        let Some(cell) = self.inner.writable.as_ref() else {
            return;
        };
        let callbacks = {
            let mut st = cell.borrow_mut();
            st.pending_cb -= 1;
            st.finished = true;
            std::mem::take(&mut st.on_finished)
        };
        for callback in callbacks {
            callback(Ok(()));
        }
        tracing::debug!(stream = %self.name(), "finish");
        self.emit(StreamEvent::Finish);

        let (allow_half_open, auto_destroy) = {
            let common = self.inner.common.borrow();
            (common.allow_half_open, common.auto_destroy)
        };
        if !allow_half_open && self.inner.readable.as_ref().is_some_and(|r| !r.borrow().ended) {
            self.push_eof();
        }
        if auto_destroy {
            let readable_done = self
                .inner
                .readable
                .as_ref()
                .is_none_or(|r| r.borrow().end_emitted);
            if readable_done {
                self.destroy(None);
            }
        }
    }

    /// End the writable side after the readable side ended (half-open off).
    pub(crate) fn end_writable_after_readable(&self) {
        let open = self
            .inner
            .writable
            .as_ref()
            .is_some_and(|w| !w.borrow().ending);
        if open && !self.is_destroyed() {
            let _ = self.end();
        }
    }

    // ========================================================================
    // Flow signal
    // ========================================================================

    /// Resolves once the writable side can take more data.
    ///
    /// Already resolved when no backpressure is pending; rejects if the
    /// stream is destroyed first.
    pub fn ready(&self) -> Deferred<()> {
        let Some(cell) = self.inner.writable.as_ref() else {
            return Deferred::ready(Err(Error::NotWritable));
        };
        if self.is_destroyed() {
            return Deferred::ready(Err(self.errored().unwrap_or(Error::Destroyed("write"))));
        }
        let mut st = cell.borrow_mut();
        if !st.need_drain() {
            return Deferred::ready(Ok(()));
        }
        let (resolver, future) = deferred();
        st.ready_waiters.push(resolver);
        future
    }

    /// Change the encoding used for text written to this stream.
    pub fn set_default_encoding(&self, encoding: Encoding) -> &Self {
        if let Some(cell) = self.inner.writable.as_ref() {
            cell.borrow_mut().default_encoding = encoding;
        }
        self
    }

    // ========================================================================
    // Introspection
    // ========================================================================

    /// Buffered plus in-flight length of the writable side.
    pub fn writable_length(&self) -> usize {
        self.inner
            .writable
            .as_ref()
            .map_or(0, |cell| cell.borrow().length)
    }

    /// The writable side's high water mark.
    pub fn writable_high_water_mark(&self) -> usize {
        self.inner
            .writable
            .as_ref()
            .map_or(0, |cell| cell.borrow().high_water_mark)
    }

    /// Whether a `drain` is pending.
    pub fn writable_need_drain(&self) -> bool {
        self.inner
            .writable
            .as_ref()
            .is_some_and(|cell| cell.borrow().need_drain())
    }

    /// Current cork depth.
    pub fn writable_corked(&self) -> u32 {
        self.inner
            .writable
            .as_ref()
            .map_or(0, |cell| cell.borrow().corked)
    }

    /// Whether `end()` was called.
    pub fn writable_ended(&self) -> bool {
        self.inner
            .writable
            .as_ref()
            .is_some_and(|cell| cell.borrow().ending)
    }

    /// Whether `finish` was emitted.
    pub fn writable_finished(&self) -> bool {
        self.inner
            .writable
            .as_ref()
            .is_some_and(|cell| cell.borrow().finished)
    }

    /// Whether the writable side is in object mode.
    pub fn writable_object_mode(&self) -> bool {
        self.inner
            .writable
            .as_ref()
            .is_some_and(|cell| cell.borrow().object_mode)
    }

    /// Backpressure episodes and drains seen so far.
    pub fn writable_flow_stats(&self) -> FlowStats {
        self.inner
            .writable
            .as_ref()
            .map(|cell| cell.borrow().gate.stats().clone())
            .unwrap_or_default()
    }

    /// Whether `write` is currently allowed.
    pub fn is_writable(&self) -> bool {
        let Some(cell) = self.inner.writable.as_ref() else {
            return false;
        };
        !self.is_destroyed_or_errored() && !cell.borrow().ending
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::run_until_idle;
    use crate::stream::{FnSink, Sink};
    use std::cell::Cell;
    use std::rc::Rc;

    type Held = Rc<RefCell<Vec<(Chunk, WriteCallback)>>>;

    /// Sink that holds every write until the test completes it.
    fn held_sink(options: StreamOptions) -> (Stream, Held) {
        let held: Held = Rc::default();
        let h = Rc::clone(&held);
        let stream = Stream::writable(
            FnSink(move |_: &Stream, chunk: Chunk, done: WriteCallback| {
                h.borrow_mut().push((chunk, done));
            }),
            options,
        );
        (stream, held)
    }

    fn complete_next(held: &Held) {
        let (_, done) = held.borrow_mut().remove(0);
        done.complete(Ok(()));
    }

    #[test]
    fn test_one_write_in_flight() {
        let (stream, held) = held_sink(StreamOptions::default());
        stream.write("a").unwrap();
        stream.write("b").unwrap();
        stream.write("c").unwrap();
        assert_eq!(held.borrow().len(), 1);
        assert_eq!(stream.writable_length(), 3);

        complete_next(&held);
        assert_eq!(held.borrow().len(), 1);
        assert_eq!(held.borrow()[0].0.as_bytes(), Some(&b"b"[..]));
        assert_eq!(stream.writable_length(), 2);
    }

    #[test]
    fn test_backpressure_and_single_drain() {
        let (stream, held) = held_sink(StreamOptions::default().high_water_mark(3));
        let drains = Rc::new(Cell::new(0));
        let d = Rc::clone(&drains);
        stream.on_drain(move || d.set(d.get() + 1));

        assert!(stream.write("ab").unwrap());
        assert!(!stream.write("cd").unwrap());
        assert!(stream.writable_need_drain());

        complete_next(&held);
        run_until_idle();
        assert_eq!(drains.get(), 0, "no drain until the buffer is empty");

        complete_next(&held);
        run_until_idle();
        assert_eq!(drains.get(), 1);
        assert!(!stream.writable_need_drain());
        assert_eq!(stream.writable_flow_stats().backpressure_events, 1);
    }

    #[test]
    fn test_write_after_end() {
        let stream = Stream::writable(
            FnSink(|_: &Stream, _: Chunk, done: WriteCallback| done.complete(Ok(()))),
            StreamOptions::default(),
        );
        let errors = Rc::new(Cell::new(0));
        let e = Rc::clone(&errors);
        stream.on_error(move |err| {
            assert!(matches!(err, Error::WriteAfterEnd));
            e.set(e.get() + 1);
        });
        let cb_err = Rc::new(Cell::new(false));
        let c = Rc::clone(&cb_err);

        stream.end().unwrap();
        let result = stream.write_with("late", move |r| c.set(r.is_err()));
        assert!(matches!(result, Err(Error::WriteAfterEnd)));
        run_until_idle();
        assert!(cb_err.get());
        assert_eq!(errors.get(), 1);
    }

    #[test]
    fn test_end_runs_finalize_then_finish() {
        let log = Rc::new(RefCell::new(Vec::new()));

        struct Logging(Rc<RefCell<Vec<&'static str>>>);
        impl Sink for Logging {
            fn write(&mut self, _: &Stream, _: Chunk, done: WriteCallback) {
                self.0.borrow_mut().push("write");
                done.complete(Ok(()));
            }
            fn finalize(&mut self, _: &Stream, done: FinalCallback) {
                self.0.borrow_mut().push("final");
                done.complete(Ok(()));
            }
        }

        let stream = Stream::writable(Logging(Rc::clone(&log)), StreamOptions::default());
        let l = Rc::clone(&log);
        stream.on(crate::event::EventKind::Prefinish, move |_| l.borrow_mut().push("prefinish"));
        let l = Rc::clone(&log);
        stream.on_finish(move || l.borrow_mut().push("finish"));
        let l = Rc::clone(&log);
        stream.on_close(move || l.borrow_mut().push("close"));
        let l = Rc::clone(&log);
        stream
            .end_with(Some(Chunk::from("x")), move |r| {
                assert!(r.is_ok());
                l.borrow_mut().push("end-cb");
            })
            .unwrap();
        run_until_idle();

        assert_eq!(
            *log.borrow(),
            vec!["write", "final", "prefinish", "end-cb", "finish", "close"]
        );
        assert!(stream.writable_finished());
        assert!(stream.is_destroyed());
    }

    #[test]
    fn test_end_after_finish_reports_already_finished() {
        let stream = Stream::writable(
            FnSink(|_: &Stream, _: Chunk, done: WriteCallback| done.complete(Ok(()))),
            StreamOptions::default().auto_destroy(false),
        );
        stream.end().unwrap();
        run_until_idle();
        assert!(stream.writable_finished());
        let seen = Rc::new(RefCell::new(None));
        let s = Rc::clone(&seen);
        let result = stream.end_with(None, move |r| *s.borrow_mut() = Some(r));
        assert!(matches!(result, Err(Error::AlreadyFinished("end"))));
        run_until_idle();
        assert!(matches!(*seen.borrow(), Some(Err(Error::AlreadyFinished("end")))));
    }

    #[test]
    fn test_cork_batches_into_writev() {
        struct Vectored(Rc<RefCell<Vec<usize>>>);
        impl Sink for Vectored {
            fn write(&mut self, _: &Stream, _: Chunk, done: WriteCallback) {
                self.0.borrow_mut().push(1);
                done.complete(Ok(()));
            }
            fn supports_writev(&self) -> bool {
                true
            }
            fn writev(&mut self, _: &Stream, chunks: Vec<Chunk>, done: WriteCallback) {
                self.0.borrow_mut().push(chunks.len());
                done.complete(Ok(()));
            }
        }

        let calls = Rc::new(RefCell::new(Vec::new()));
        let stream = Stream::writable(Vectored(Rc::clone(&calls)), StreamOptions::default());
        stream.cork();
        stream.cork();
        stream.write("a").unwrap();
        stream.write("b").unwrap();
        stream.write("c").unwrap();
        stream.uncork();
        assert!(calls.borrow().is_empty());
        assert_eq!(stream.writable_corked(), 1);
        stream.uncork();
        assert_eq!(*calls.borrow(), vec![3]);
        assert_eq!(stream.writable_length(), 0);
    }

    #[test]
    fn test_write_error_fails_buffered_callbacks() {
        let (stream, held) = held_sink(StreamOptions::default());
        stream.on_error(|_| {});
        let results = Rc::new(RefCell::new(Vec::new()));
        for tag in ["a", "b"] {
            let r = Rc::clone(&results);
            stream
                .write_with(tag, move |res| r.borrow_mut().push((tag, res.is_ok())))
                .unwrap();
        }
        let (_, done) = held.borrow_mut().remove(0);
        done.complete(Err(Error::custom("broken pipe")));
        run_until_idle();

        assert_eq!(*results.borrow(), vec![("a", false), ("b", false)]);
        assert!(stream.is_destroyed());
        assert_eq!(stream.errored().map(|e| e.to_string()).as_deref(), Some("broken pipe"));
    }

    #[test]
    fn test_object_chunk_needs_object_mode() {
        let (stream, _) = held_sink(StreamOptions::default());
        assert!(matches!(
            stream.write(Chunk::object(5u8)),
            Err(Error::InvalidChunk("write"))
        ));
        assert!(!stream.is_destroyed());

        let (objects, held) = held_sink(StreamOptions::objects().high_water_mark(2));
        assert!(objects.write(Chunk::object(5u8)).unwrap());
        assert!(!objects.write(Chunk::object(6u8)).unwrap());
        assert_eq!(objects.writable_length(), 2);
        assert_eq!(held.borrow()[0].0.downcast_ref::<u8>(), Some(&5));
    }

    #[test]
    fn test_text_encoded_with_default_encoding() {
        let (stream, held) = held_sink(StreamOptions::default());
        stream.set_default_encoding(Encoding::Hex);
        stream.write("cafe").unwrap();
        assert_eq!(held.borrow()[0].0.as_bytes(), Some(&[0xca, 0xfe][..]));
    }

    #[test]
    fn test_malformed_hex_write_is_rejected() {
        let (stream, held) = held_sink(StreamOptions::default());
        stream.set_default_encoding(Encoding::Hex);
        assert!(matches!(stream.write("abzz"), Err(Error::InvalidChunk("hex"))));
        assert!(held.borrow().is_empty());
        assert_eq!(stream.writable_length(), 0);
        assert!(!stream.is_destroyed());
    }

    #[tokio::test]
    async fn test_ready_resolves_on_drain() {
        let (stream, held) = held_sink(StreamOptions::default().high_water_mark(1));
        stream.write("xy").unwrap();
        let ready = stream.ready();
        complete_next(&held);
        ready.await.unwrap();
        assert!(!stream.writable_need_drain());
    }
}
