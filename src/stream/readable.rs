//! The readable side: push, read, flowing/paused modes and `readable`.

use super::Stream;
use super::pipe::PipeLink;
use crate::chunk::{Chunk, Encoding};
use crate::decoder::StringDecoder;
use crate::error::{Error, Result};
use crate::event::{EventKind, StreamEvent};
use crate::flow::has_capacity;
use crate::observability;
use crate::options::StreamOptions;
use crate::queue::{BufferQueue, SizeMode};
use crate::runtime::next_tick;
use smallvec::SmallVec;
use std::cell::RefCell;

/// Largest watermark `read(n)` may raise the readable side to.
const MAX_HIGH_WATER_MARK: usize = 1 << 30;

pub(crate) struct ReadableState {
    pub(crate) buffer: BufferQueue<Chunk>,
    pub(crate) high_water_mark: usize,
    pub(crate) object_mode: bool,
    /// `None` until a consumer picks a mode.
    pub(crate) flowing: Option<bool>,
    /// Explicit `pause()`/`resume()` calls; `None` if neither was called.
    pub(crate) paused: Option<bool>,
    pub(crate) ended: bool,
    pub(crate) end_emitted: bool,
    pub(crate) reading: bool,
    pub(crate) sync: bool,
    pub(crate) need_readable: bool,
    pub(crate) emitted_readable: bool,
    pub(crate) readable_listening: bool,
    pub(crate) data_listening: bool,
    pub(crate) resume_scheduled: bool,
    pub(crate) reading_more: bool,
    pub(crate) decoder: Option<StringDecoder>,
    pub(crate) default_encoding: Encoding,
    pub(crate) pipes: Vec<PipeLink>,
    /// Pipe destinations (by stream id) that reported backpressure.
    pub(crate) await_drain: SmallVec<[u64; 2]>,
}

impl ReadableState {
    pub(crate) fn new(options: &StreamOptions) -> Self {
        let config = options.readable_config();
        Self {
            buffer: BufferQueue::new(SizeMode::for_object_mode(config.object_mode)),
            high_water_mark: config.high_water_mark,
            object_mode: config.object_mode,
            flowing: None,
            paused: None,
            ended: false,
            end_emitted: false,
            reading: false,
            sync: true,
            need_readable: false,
            emitted_readable: false,
            readable_listening: false,
            data_listening: false,
            resume_scheduled: false,
            reading_more: false,
            decoder: options.encoding.map(StringDecoder::new),
            default_encoding: options.default_encoding,
            pipes: Vec::new(),
            await_drain: SmallVec::new(),
        }
    }

    fn can_push_more(&self) -> bool {
        !self.ended && has_capacity(self.buffer.length(), self.high_water_mark)
    }

    /// How much a `read(n)` may take right now.
    fn how_much_to_read(&self, n: Option<usize>) -> usize {
        let length = self.buffer.length();
        if n == Some(0) || (length == 0 && self.ended) {
            return 0;
        }
        if self.object_mode {
            return 1;
        }
        match n {
            // One chunk at a time while flowing, everything otherwise
            None if self.flowing == Some(true) && length > 0 => self.buffer.head_size(),
            None => length,
            Some(n) if n <= length => n,
            Some(_) if self.ended => length,
            Some(_) => 0,
        }
    }

    /// Convert a byte-mode push into the representation stored in the buffer.
    fn prepare_push(&self, chunk: Chunk, op: &'static str) -> Result<Chunk> {
        match chunk {
            Chunk::Object(_) => Err(Error::InvalidChunk(op)),
            Chunk::Text(s) => match &self.decoder {
                Some(decoder) if decoder.encoding() == self.default_encoding => Ok(Chunk::Text(s)),
                _ => self.default_encoding.encode(&s).map(Chunk::Bytes),
            },
            bytes => Ok(bytes),
        }
    }
}

fn compute_new_high_water_mark(n: usize) -> usize {
    n.min(MAX_HIGH_WATER_MARK).next_power_of_two()
}

impl Stream {
    fn readable_cell(&self) -> Result<&RefCell<ReadableState>> {
        self.inner.readable.as_ref().ok_or(Error::NotReadable)
    }

    // ========================================================================
    // Producer API
    // ========================================================================

    /// Queue a chunk for consumers.
    ///
    /// Returns `Ok(false)` once the buffered length reached the high water
    /// mark (or the stream ended, or is destroyed): the producer should stop
    /// until the next `read` request.
    ///
    /// Pushing after [`push_eof`](Self::push_eof) fails with
    /// [`Error::PushAfterEof`] and errors the stream.
    pub fn push(&self, chunk: impl Into<Chunk>) -> Result<bool> {
        let cell = self.readable_cell()?;
        let chunk = chunk.into();
        let dead = self.is_destroyed_or_errored();
        let mut st = cell.borrow_mut();
        tracing::trace!(stream = %self.name(), len = chunk.len(), "push");

        let chunk = if st.object_mode {
            chunk
        } else {
            match st.prepare_push(chunk, "push") {
                Ok(chunk) => chunk,
                Err(err) => {
                    drop(st);
                    return self.fail_push(err);
                }
            }
        };

        if !st.object_mode && chunk.is_empty() {
            st.reading = false;
            let more = st.can_push_more();
            drop(st);
            self.maybe_read_more();
            return Ok(more);
        }
        if st.ended {
            drop(st);
            return self.fail_push(Error::PushAfterEof);
        }
        if dead {
            return Ok(false);
        }

        st.reading = false;
        let chunk = match (st.decoder.as_mut(), chunk) {
            (Some(decoder), Chunk::Bytes(bytes)) => Chunk::Text(decoder.write(&bytes)),
            (_, chunk) => chunk,
        };
        if !st.object_mode && chunk.is_empty() {
            // Only part of a multibyte character so far
            let more = st.can_push_more();
            drop(st);
            self.maybe_read_more();
            return Ok(more);
        }
        drop(st);

        self.add_chunk(chunk, false);
        Ok(cell.borrow().can_push_more())
    }

    /// Signal that no more data will be pushed.
    ///
    /// `end` is emitted once the consumer drained the buffer. Always
    /// returns `false`.
    pub fn push_eof(&self) -> bool {
        if let Some(cell) = self.inner.readable.as_ref() {
            cell.borrow_mut().reading = false;
            self.on_eof_chunk();
        }
        false
    }

    /// Put a chunk back at the head of the buffer.
    ///
    /// Fails with [`Error::UnshiftAfterEndEvent`] once `end` was emitted.
    pub fn unshift(&self, chunk: impl Into<Chunk>) -> Result<bool> {
        let cell = self.readable_cell()?;
        let chunk = chunk.into();
        let dead = self.is_destroyed_or_errored();
        let st = cell.borrow();

        let chunk = if st.object_mode {
            chunk
        } else {
            match st.prepare_push(chunk, "unshift") {
                Err(err) => {
                    drop(st);
                    return self.fail_push(err);
                }
                // Stored data is already decoded, so decode whole
                Ok(Chunk::Bytes(bytes)) => match &st.decoder {
                    Some(decoder) => Chunk::Text(decoder.encoding().decode(&bytes)),
                    None => Chunk::Bytes(bytes),
                },
                Ok(other) => other,
            }
        };

        if !st.object_mode && chunk.is_empty() {
            return Ok(st.can_push_more());
        }
        if st.end_emitted {
            drop(st);
            return self.fail_push(Error::UnshiftAfterEndEvent);
        }
        if dead {
            return Ok(false);
        }
        drop(st);

        self.add_chunk(chunk, true);
        Ok(cell.borrow().can_push_more())
    }

    fn fail_push(&self, err: Error) -> Result<bool> {
        tracing::debug!(stream = %self.name(), error = %err, "push rejected");
        self.error_or_destroy(err.clone(), false);
        Err(err)
    }

    fn add_chunk(&self, chunk: Chunk, to_front: bool) {
        let Some(cell) = self.inner.readable.as_ref() else {
            return;
        };
        observability::record_pushed(self.name(), chunk.len());
        observability::trace_chunk(self.name(), "push", chunk.len());

        let direct = {
            let mut st = cell.borrow_mut();
            let direct = st.flowing == Some(true)
                && !st.sync
                && st.data_listening
                && st.buffer.is_empty();
            if direct {
                st.await_drain.clear();
            }
            direct
        };

        if direct {
            self.emit(StreamEvent::Data(chunk));
        } else {
            let need_readable = {
                let mut st = cell.borrow_mut();
                if to_front {
                    st.buffer.unshift(chunk);
                } else {
                    st.buffer.push(chunk);
                }
                st.need_readable
            };
            if need_readable {
                self.emit_readable();
            }
        }
        self.maybe_read_more();
    }

    fn on_eof_chunk(&self) {
        let Some(cell) = self.inner.readable.as_ref() else {
            return;
        };
        let sync = {
            let mut st = cell.borrow_mut();
            if st.ended {
                return;
            }
            if let Some(tail) = st.decoder.as_mut().and_then(StringDecoder::end) {
                st.buffer.push(Chunk::Text(tail));
            }
            st.ended = true;
            st.sync
        };
        tracing::debug!(stream = %self.name(), "eof");

        if sync {
            self.emit_readable();
        } else {
            {
                let mut st = cell.borrow_mut();
                st.need_readable = false;
                st.emitted_readable = true;
            }
            self.emit_readable_now();
        }
    }

    // ========================================================================
    // Consumer API
    // ========================================================================

    /// Pull data out of the buffer.
    ///
    /// - `None`: one chunk while flowing, everything buffered otherwise
    /// - `Some(0)`: only refill the buffer (may trigger `Source::read`)
    /// - `Some(n)`: exactly `n` units, or nothing if fewer are buffered and
    ///   the stream has not ended
    ///
    /// Returns `None` when nothing is available yet; a `readable` event
    /// follows once there is.
    pub fn read(&self, n: Option<usize>) -> Option<Chunk> {
        let cell = self.inner.readable.as_ref()?;
        tracing::trace!(stream = %self.name(), ?n, "read");

        {
            let mut st = cell.borrow_mut();
            if let Some(n) = n.filter(|&n| n > st.high_water_mark) {
                st.high_water_mark = compute_new_high_water_mark(n);
            }
            if n != Some(0) {
                st.emitted_readable = false;
            }

            // read(0) with enough buffered only re-announces `readable`
            if n == Some(0) && st.need_readable {
                let length = st.buffer.length();
                let full = if st.high_water_mark != 0 {
                    length >= st.high_water_mark
                } else {
                    length > 0
                };
                if full || st.ended {
                    let at_end = length == 0 && st.ended;
                    drop(st);
                    if at_end {
                        self.end_readable();
                    } else {
                        self.emit_readable();
                    }
                    return None;
                }
            }
        }

        let dead = self.is_destroyed_or_errored();
        let mut st = cell.borrow_mut();
        let mut amount = st.how_much_to_read(n);

        if amount == 0 && st.ended {
            let empty = st.buffer.length() == 0;
            drop(st);
            if empty {
                self.end_readable();
            }
            return None;
        }

        let length = st.buffer.length();
        let mut do_read = st.need_readable;
        if length == 0 || length.saturating_sub(amount) < st.high_water_mark {
            do_read = true;
        }
        if do_read && !(st.reading || st.ended || dead) {
            st.reading = true;
            st.sync = true;
            if length == 0 {
                st.need_readable = true;
            }
            let size = st.high_water_mark;
            drop(st);
            self.call_source(size);
            st = cell.borrow_mut();
            st.sync = false;
            // A synchronous push may have provided what was asked for
            if !st.reading {
                amount = st.how_much_to_read(n);
            }
        }

        let ret = if amount > 0 {
            st.buffer.take(amount)
        } else {
            None
        };

        if ret.is_none() {
            if st.buffer.length() <= st.high_water_mark {
                st.need_readable = true;
            }
        } else {
            st.await_drain.clear();
        }

        let mut at_end = false;
        if st.buffer.length() == 0 {
            if !st.ended {
                st.need_readable = true;
            }
            let delivered = if ret.is_some() { amount } else { 0 };
            at_end = st.ended && n != Some(delivered);
        }
        drop(st);

        if at_end {
            self.end_readable();
        }
        if let Some(chunk) = &ret {
            let silent = {
                let common = self.inner.common.borrow();
                common.error_emitted || common.close_emitted
            };
            if !silent {
                self.emit(StreamEvent::Data(chunk.clone()));
            }
        }
        ret
    }

    fn call_source(&self, size: usize) {
        let result = match self.inner.source.try_borrow_mut() {
            Ok(mut slot) => match slot.as_mut() {
                Some(source) => source.read(self, size),
                None => Ok(()),
            },
            Err(_) => {
                // Re-entered from inside `Source::read`; ask again later
                if let Some(cell) = self.inner.readable.as_ref() {
                    cell.borrow_mut().reading = false;
                }
                let stream = self.clone();
                next_tick(move || {
                    stream.read(Some(0));
                });
                Ok(())
            }
        };
        if let Err(err) = result {
            tracing::debug!(stream = %self.name(), error = %err, "source read failed");
            self.error_or_destroy(err, false);
        }
    }

    fn emit_readable(&self) {
        let Some(cell) = self.inner.readable.as_ref() else {
            return;
        };
        let schedule = {
            let mut st = cell.borrow_mut();
            st.need_readable = false;
            if st.emitted_readable {
                false
            } else {
                st.emitted_readable = true;
                true
            }
        };
        if schedule {
            let stream = self.clone();
            next_tick(move || stream.emit_readable_now());
        }
    }

    fn emit_readable_now(&self) {
        let Some(cell) = self.inner.readable.as_ref() else {
            return;
        };
        let dead = self.is_destroyed_or_errored();
        let announce = {
            let st = cell.borrow();
            !dead && (st.buffer.length() > 0 || st.ended)
        };
        if announce {
            self.emit(StreamEvent::Readable);
            cell.borrow_mut().emitted_readable = false;
        }
        {
            let mut st = cell.borrow_mut();
            if st.flowing != Some(true) && !st.ended && st.buffer.length() <= st.high_water_mark {
                st.need_readable = true;
            }
        }
        self.flow();
    }

    fn maybe_read_more(&self) {
        let Some(cell) = self.inner.readable.as_ref() else {
            return;
        };
        let schedule = {
            let mut st = cell.borrow_mut();
            !std::mem::replace(&mut st.reading_more, true)
        };
        if schedule {
            let stream = self.clone();
            next_tick(move || stream.maybe_read_more_now());
        }
    }

    fn maybe_read_more_now(&self) {
        let Some(cell) = self.inner.readable.as_ref() else {
            return;
        };
        loop {
            let before = {
                let st = cell.borrow();
                let length = st.buffer.length();
                let wanted = length < st.high_water_mark
                    || (st.flowing == Some(true) && length == 0);
                if st.reading || st.ended || !wanted {
                    break;
                }
                length
            };
            self.read(Some(0));
            if before == cell.borrow().buffer.length() {
                break;
            }
        }
        cell.borrow_mut().reading_more = false;
    }

    pub(crate) fn end_readable(&self) {
        let Some(cell) = self.inner.readable.as_ref() else {
            return;
        };
        let schedule = {
            let mut st = cell.borrow_mut();
            if st.end_emitted {
                false
            } else {
                st.ended = true;
                true
            }
        };
        if schedule {
            let stream = self.clone();
            next_tick(move || stream.end_readable_now());
        }
    }

    fn end_readable_now(&self) {
        let Some(cell) = self.inner.readable.as_ref() else {
            return;
        };
        let (blocked, allow_half_open, auto_destroy) = {
            let common = self.inner.common.borrow();
            (
                common.errored.is_some() || common.close_emitted,
                common.allow_half_open,
                common.auto_destroy,
            )
        };
        {
            let mut st = cell.borrow_mut();
            if blocked || st.end_emitted || st.buffer.length() != 0 {
                return;
            }
            st.end_emitted = true;
        }
        tracing::debug!(stream = %self.name(), "end");
        self.emit(StreamEvent::End);

        if self.is_writable() && !allow_half_open {
            let stream = self.clone();
            next_tick(move || stream.end_writable_after_readable());
        } else if auto_destroy {
            let writable_done = self
                .inner
                .writable
                .as_ref()
                .is_none_or(|w| w.borrow().finished);
            if writable_done {
                self.destroy(None);
            }
        }
    }

    fn flow(&self) {
        let Some(cell) = self.inner.readable.as_ref() else {
            return;
        };
        while cell.borrow().flowing == Some(true) && self.read(None).is_some() {}
    }

    // ========================================================================
    // Flowing mode
    // ========================================================================

    /// Switch into flowing mode: buffered and future data is emitted as
    /// `data` events.
    pub fn resume(&self) {
        let Some(cell) = self.inner.readable.as_ref() else {
            return;
        };
        let schedule = {
            let mut st = cell.borrow_mut();
            let mut schedule = false;
            if st.flowing != Some(true) {
                // `readable` listeners keep the stream in pull mode
                st.flowing = Some(!st.readable_listening);
                schedule = !std::mem::replace(&mut st.resume_scheduled, true);
            }
            st.paused = Some(false);
            schedule
        };
        if schedule {
            tracing::debug!(stream = %self.name(), "resume");
            let stream = self.clone();
            next_tick(move || stream.resume_now());
        }
    }

    fn resume_now(&self) {
        let Some(cell) = self.inner.readable.as_ref() else {
            return;
        };
        if !cell.borrow().reading {
            self.read(Some(0));
        }
        cell.borrow_mut().resume_scheduled = false;
        self.emit(StreamEvent::Resume);
        self.flow();
        let refill = {
            let st = cell.borrow();
            st.flowing == Some(true) && !st.reading
        };
        if refill {
            self.read(Some(0));
        }
    }

    /// Leave flowing mode. Data stays buffered until resumed or read.
    pub fn pause(&self) {
        let Some(cell) = self.inner.readable.as_ref() else {
            return;
        };
        let emit = {
            let mut st = cell.borrow_mut();
            st.paused = Some(true);
            st.flowing != Some(false) && {
                st.flowing = Some(false);
                true
            }
        };
        if emit {
            tracing::debug!(stream = %self.name(), "pause");
            self.emit(StreamEvent::Pause);
        }
    }

    /// Whether the stream was explicitly paused (or left flowing mode).
    pub fn is_paused(&self) -> bool {
        self.inner.readable.as_ref().is_some_and(|cell| {
            let st = cell.borrow();
            st.paused == Some(true) || st.flowing == Some(false)
        })
    }

    /// The flowing state: `None` until a consumer chose a mode.
    pub fn readable_flowing(&self) -> Option<bool> {
        self.inner.readable.as_ref().and_then(|cell| cell.borrow().flowing)
    }

    /// Decode readable output as text.
    ///
    /// Bytes already buffered are decoded immediately.
    pub fn set_encoding(&self, encoding: Encoding) -> &Self {
        let Some(cell) = self.inner.readable.as_ref() else {
            return self;
        };
        let mut st = cell.borrow_mut();
        let mut decoder = StringDecoder::new(encoding);
        let buffered = st.buffer.clear();
        if st.object_mode {
            for chunk in buffered {
                let chunk = match chunk {
                    Chunk::Bytes(bytes) => Chunk::Text(decoder.write(&bytes)),
                    other => other,
                };
                st.buffer.push(chunk);
            }
        } else {
            let mut content = String::new();
            for chunk in buffered {
                match chunk {
                    Chunk::Bytes(bytes) => content.push_str(&decoder.write(&bytes)),
                    Chunk::Text(text) => content.push_str(&text),
                    Chunk::Object(_) => {}
                }
            }
            if !content.is_empty() {
                st.buffer.push(Chunk::Text(content));
            }
        }
        st.decoder = Some(decoder);
        self
    }

    // ========================================================================
    // Listener bookkeeping
    // ========================================================================

    pub(super) fn listener_added(&self, kind: EventKind) {
        let Some(cell) = self.inner.readable.as_ref() else {
            return;
        };
        match kind {
            EventKind::Data => {
                let has_readable = self.listener_count(EventKind::Readable) > 0;
                let resume = {
                    let mut st = cell.borrow_mut();
                    st.data_listening = true;
                    if has_readable {
                        st.readable_listening = true;
                    }
                    st.flowing != Some(false)
                };
                if resume {
                    self.resume();
                }
            }
            EventKind::Readable => {
                let (announce, refill) = {
                    let mut st = cell.borrow_mut();
                    if st.end_emitted || st.readable_listening {
                        (false, false)
                    } else {
                        st.readable_listening = true;
                        st.need_readable = true;
                        st.flowing = Some(false);
                        st.emitted_readable = false;
                        let buffered = st.buffer.length() > 0;
                        (buffered, !buffered && !st.reading)
                    }
                };
                if announce {
                    self.emit_readable();
                } else if refill {
                    let stream = self.clone();
                    next_tick(move || {
                        stream.read(Some(0));
                    });
                }
            }
            _ => {}
        }
    }

    pub(super) fn listener_removed(&self, kind: EventKind) {
        let Some(cell) = self.inner.readable.as_ref() else {
            return;
        };
        match kind {
            EventKind::Readable => {
                let stream = self.clone();
                next_tick(move || stream.update_readable_listening());
            }
            EventKind::Data if self.listener_count(EventKind::Data) == 0 => {
                cell.borrow_mut().data_listening = false;
            }
            _ => {}
        }
    }

    fn update_readable_listening(&self) {
        let Some(cell) = self.inner.readable.as_ref() else {
            return;
        };
        let listening = self.listener_count(EventKind::Readable) > 0;
        let resume = {
            let mut st = cell.borrow_mut();
            st.readable_listening = listening;
            if st.paused == Some(false) && st.resume_scheduled {
                st.flowing = Some(true);
                false
            } else if st.data_listening {
                true
            } else {
                if !st.readable_listening {
                    st.flowing = None;
                }
                false
            }
        };
        if resume {
            self.resume();
        }
    }

    // ========================================================================
    // Introspection
    // ========================================================================

    /// Buffered length of the readable side.
    pub fn readable_length(&self) -> usize {
        self.inner
            .readable
            .as_ref()
            .map_or(0, |cell| cell.borrow().buffer.length())
    }

    /// The readable side's high water mark.
    pub fn readable_high_water_mark(&self) -> usize {
        self.inner
            .readable
            .as_ref()
            .map_or(0, |cell| cell.borrow().high_water_mark)
    }

    /// Whether `end` was emitted.
    pub fn readable_ended(&self) -> bool {
        self.inner
            .readable
            .as_ref()
            .is_some_and(|cell| cell.borrow().end_emitted)
    }

    /// Whether the readable side is in object mode.
    pub fn readable_object_mode(&self) -> bool {
        self.inner
            .readable
            .as_ref()
            .is_some_and(|cell| cell.borrow().object_mode)
    }

    /// The encoding set with [`set_encoding`](Self::set_encoding), if any.
    pub fn readable_encoding(&self) -> Option<Encoding> {
        self.inner
            .readable
            .as_ref()
            .and_then(|cell| cell.borrow().decoder.as_ref().map(StringDecoder::encoding))
    }

    /// Whether reading from the stream can still produce data.
    pub fn is_readable(&self) -> bool {
        let Some(cell) = self.inner.readable.as_ref() else {
            return false;
        };
        let common = self.inner.common.borrow();
        !common.destroyed && !common.error_emitted && !cell.borrow().end_emitted
    }
}
