//! Ordered chunk buffering with length accounting.
//!
//! [`BufferQueue`] backs both sides of a stream:
//! - the readable side queues pushed chunks until a consumer reads them
//! - the writable side queues `(chunk, callback)` entries while a write is
//!   in flight or the stream is corked
//!
//! Every entry is measured once when it enters the queue, according to the
//! queue's [`SizeMode`]. The running `length` is always the sum of the sizes
//! of the queued entries.

use crate::chunk::Chunk;
use bytes::BytesMut;
use std::collections::VecDeque;

/// How queued chunks are measured.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SizeMode {
    /// Byte length of the chunk (buffer mode).
    #[default]
    Bytes,
    /// Every entry counts as one (object mode).
    Objects,
}

impl SizeMode {
    /// Select the mode for a stream side.
    pub fn for_object_mode(object_mode: bool) -> Self {
        if object_mode {
            SizeMode::Objects
        } else {
            SizeMode::Bytes
        }
    }

    /// Measure a chunk.
    #[inline]
    pub fn measure(&self, chunk: &Chunk) -> usize {
        match self {
            SizeMode::Bytes => chunk.len(),
            SizeMode::Objects => 1,
        }
    }
}

/// An entry that can be stored in a [`BufferQueue`].
pub trait QueueItem {
    /// The chunk carried by this entry.
    fn chunk(&self) -> &Chunk;
}

impl QueueItem for Chunk {
    fn chunk(&self) -> &Chunk {
        self
    }
}

struct Entry<T> {
    item: T,
    size: usize,
}

/// FIFO queue of chunks with a running measured length.
///
/// # Example
///
/// ```rust
/// use sluice::chunk::Chunk;
/// use sluice::queue::{BufferQueue, SizeMode};
///
/// let mut queue = BufferQueue::new(SizeMode::Bytes);
/// queue.push(Chunk::from("hello, "));
/// queue.push(Chunk::from("world"));
/// assert_eq!(queue.length(), 12);
///
/// let head = queue.shift().unwrap();
/// assert_eq!(head.as_text(), Some("hello, "));
/// assert_eq!(queue.length(), 5);
/// ```
pub struct BufferQueue<T = Chunk> {
    entries: VecDeque<Entry<T>>,
    length: usize,
    mode: SizeMode,
    total_pushed: u64,
    total_shifted: u64,
}

impl<T: QueueItem> BufferQueue<T> {
    /// Create an empty queue.
    pub fn new(mode: SizeMode) -> Self {
        Self {
            entries: VecDeque::new(),
            length: 0,
            mode,
            total_pushed: 0,
            total_shifted: 0,
        }
    }

    /// The measuring mode.
    pub fn mode(&self) -> SizeMode {
        self.mode
    }

    /// Append an entry at the tail. Returns the new length.
    pub fn push(&mut self, item: T) -> usize {
        let size = self.mode.measure(item.chunk());
        self.entries.push_back(Entry { item, size });
        self.length += size;
        self.total_pushed += 1;
        self.length
    }

    /// Insert an entry at the head. Returns the new length.
    pub fn unshift(&mut self, item: T) -> usize {
        let size = self.mode.measure(item.chunk());
        self.entries.push_front(Entry { item, size });
        self.length += size;
        self.total_pushed += 1;
        self.length
    }

    /// Remove and return the head entry.
    pub fn shift(&mut self) -> Option<T> {
        let entry = self.entries.pop_front()?;
        self.length -= entry.size;
        self.total_shifted += 1;
        Some(entry.item)
    }

    /// Borrow the head entry.
    pub fn peek(&self) -> Option<&T> {
        self.entries.front().map(|e| &e.item)
    }

    /// Measured size of the head entry (0 when empty).
    pub fn head_size(&self) -> usize {
        self.entries.front().map_or(0, |e| e.size)
    }

    /// Remove everything, returning the removed entries in order.
    pub fn clear(&mut self) -> Vec<T> {
        self.length = 0;
        self.entries.drain(..).map(|e| e.item).collect()
    }

    /// Sum of the sizes of all queued entries.
    pub fn length(&self) -> usize {
        self.length
    }

    /// Number of queued entries.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Check if the queue is empty.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Iterate over the queued entries, head first.
    pub fn iter(&self) -> impl Iterator<Item = &T> {
        self.entries.iter().map(|e| &e.item)
    }

    /// Get statistics about queue usage.
    pub fn stats(&self) -> QueueStats {
        QueueStats {
            current_entries: self.entries.len(),
            current_length: self.length,
            total_pushed: self.total_pushed,
            total_shifted: self.total_shifted,
        }
    }
}

impl BufferQueue<Chunk> {
    /// Remove up to `n` measured units from the head.
    ///
    /// - In object mode, or when `n` equals the head size, the head entry is
    ///   returned as is.
    /// - When `n` covers the whole queue, all entries are joined.
    /// - Otherwise the result is assembled from (and splits) head entries.
    ///
    /// Text entries are split on character boundaries, so slightly more or
    /// fewer than `n` bytes may be taken; `length` stays exact either way.
    pub fn take(&mut self, n: usize) -> Option<Chunk> {
        if self.entries.is_empty() {
            return None;
        }
        if self.mode == SizeMode::Objects || n == self.head_size() {
            return self.shift();
        }
        if n >= self.length {
            return self.take_all();
        }
        if n < self.head_size() {
            return Some(self.split_head(n));
        }

        let text = matches!(self.peek(), Some(Chunk::Text(_)));
        let mut remaining = n;
        let mut text_out = String::new();
        let mut bytes_out = BytesMut::with_capacity(n);
        while remaining > 0 {
            let piece = if self.head_size() <= remaining {
                match self.shift() {
                    Some(chunk) => chunk,
                    None => break,
                }
            } else {
                self.split_head(remaining)
            };
            remaining = remaining.saturating_sub(piece.len());
            append(&mut text_out, &mut bytes_out, text, &piece);
        }
        Some(if text {
            Chunk::Text(text_out)
        } else {
            Chunk::Bytes(bytes_out.freeze())
        })
    }

    /// Remove every entry and join them into one chunk.
    pub fn take_all(&mut self) -> Option<Chunk> {
        match self.entries.len() {
            0 => None,
            1 => self.shift(),
            _ => {
                let text = matches!(self.peek(), Some(Chunk::Text(_)));
                let mut text_out = String::new();
                let mut bytes_out = BytesMut::with_capacity(self.length);
                for chunk in self.clear() {
                    append(&mut text_out, &mut bytes_out, text, &chunk);
                }
                self.total_shifted += 1;
                Some(if text {
                    Chunk::Text(text_out)
                } else {
                    Chunk::Bytes(bytes_out.freeze())
                })
            }
        }
    }

    fn split_head(&mut self, n: usize) -> Chunk {
        let Some(entry) = self.entries.front_mut() else {
            return Chunk::Bytes(bytes::Bytes::new());
        };
        let taken = match &mut entry.item {
            Chunk::Bytes(b) => Chunk::Bytes(b.split_to(n)),
            Chunk::Text(s) => {
                let mut at = n.min(s.len());
                while !s.is_char_boundary(at) {
                    at -= 1;
                }
                if at == 0 {
                    at = s.chars().next().map_or(s.len(), char::len_utf8);
                }
                let rest = s.split_off(at);
                Chunk::Text(std::mem::replace(s, rest))
            }
            Chunk::Object(o) => Chunk::Object(o.clone()),
        };
        let size = self.mode.measure(&taken).min(entry.size);
        entry.size -= size;
        self.length -= size;
        taken
    }
}

fn append(text_out: &mut String, bytes_out: &mut BytesMut, text: bool, chunk: &Chunk) {
    match (text, chunk) {
        (true, Chunk::Text(s)) => text_out.push_str(s),
        (true, other) => {
            if let Some(b) = other.as_bytes() {
                text_out.push_str(&String::from_utf8_lossy(b));
            }
        }
        (false, other) => {
            if let Some(b) = other.as_bytes() {
                bytes_out.extend_from_slice(b);
            }
        }
    }
}

/// Statistics about queue usage.
#[derive(Debug, Clone, Copy, Default)]
pub struct QueueStats {
    /// Current number of entries.
    pub current_entries: usize,
    /// Current measured length.
    pub current_length: usize,
    /// Total entries pushed (tail or head).
    pub total_pushed: u64,
    /// Total entries removed from the head.
    pub total_shifted: u64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;

    fn bytes(s: &'static [u8]) -> Chunk {
        Chunk::Bytes(Bytes::from_static(s))
    }

    #[test]
    fn test_queue_push_shift_accounting() {
        let mut queue = BufferQueue::new(SizeMode::Bytes);
        assert_eq!(queue.push(bytes(b"abc")), 3);
        assert_eq!(queue.push(bytes(b"de")), 5);
        assert_eq!(queue.len(), 2);

        assert_eq!(queue.shift(), Some(bytes(b"abc")));
        assert_eq!(queue.length(), 2);
        assert_eq!(queue.shift(), Some(bytes(b"de")));
        assert_eq!(queue.length(), 0);
        assert!(queue.shift().is_none());
    }

    #[test]
    fn test_queue_object_mode_counts_entries() {
        let mut queue = BufferQueue::new(SizeMode::Objects);
        queue.push(Chunk::object(1u32));
        queue.push(bytes(b"a long byte chunk"));
        assert_eq!(queue.length(), 2);
    }

    #[test]
    fn test_queue_clear_resets_length() {
        let mut queue = BufferQueue::new(SizeMode::Bytes);
        queue.push(bytes(b"abc"));
        queue.push(bytes(b"def"));
        let drained = queue.clear();
        assert_eq!(drained.len(), 2);
        assert_eq!(queue.length(), 0);
        assert!(queue.is_empty());
    }

    #[test]
    fn test_queue_unshift_goes_first() {
        let mut queue = BufferQueue::new(SizeMode::Bytes);
        queue.push(bytes(b"world"));
        queue.unshift(bytes(b"hello "));
        assert_eq!(queue.length(), 11);
        assert_eq!(queue.take_all(), Some(bytes(b"hello world")));
    }

    #[test]
    fn test_queue_take_splits_head() {
        let mut queue = BufferQueue::new(SizeMode::Bytes);
        queue.push(bytes(b"abcdef"));
        assert_eq!(queue.take(2), Some(bytes(b"ab")));
        assert_eq!(queue.length(), 4);
        assert_eq!(queue.take(4), Some(bytes(b"cdef")));
        assert!(queue.is_empty());
    }

    #[test]
    fn test_queue_take_spans_entries() {
        let mut queue = BufferQueue::new(SizeMode::Bytes);
        queue.push(bytes(b"ab"));
        queue.push(bytes(b"cd"));
        queue.push(bytes(b"ef"));
        assert_eq!(queue.take(3), Some(bytes(b"abc")));
        assert_eq!(queue.length(), 3);
        assert_eq!(queue.take(3), Some(bytes(b"def")));
    }

    #[test]
    fn test_queue_take_text_respects_char_boundaries() {
        let mut queue = BufferQueue::new(SizeMode::Bytes);
        queue.push(Chunk::from("é!"));
        // 1 byte would cut the two-byte 'é'; the whole character is taken.
        assert_eq!(queue.take(1), Some(Chunk::from("é")));
        assert_eq!(queue.length(), 1);
        assert_eq!(queue.take(1), Some(Chunk::from("!")));
    }

    #[test]
    fn test_queue_stats() {
        let mut queue = BufferQueue::new(SizeMode::Bytes);
        queue.push(bytes(b"a"));
        queue.push(bytes(b"b"));
        queue.shift();
        let stats = queue.stats();
        assert_eq!(stats.total_pushed, 2);
        assert_eq!(stats.total_shifted, 1);
        assert_eq!(stats.current_entries, 1);
        assert_eq!(stats.current_length, 1);
    }
}
