//! Consume a readable side into one value.

use super::Stream;
use crate::chunk::Chunk;
use crate::error::{Error, Result};
use crate::event::{EventKind, ListenerId};
use crate::runtime::{Deferred, Resolver, deferred};
use bytes::{Bytes, BytesMut};
use std::cell::RefCell;
use std::rc::Rc;

/// Everything a stream produced, in the representation of its readable side.
#[derive(Debug, Clone, PartialEq)]
pub enum Collected {
    /// Byte mode output.
    Bytes(Bytes),
    /// Output of a stream with an encoding set.
    Text(String),
    /// Object mode output, one entry per chunk.
    Objects(Vec<Chunk>),
}

impl Collected {
    /// Measured size: bytes, or entries in object mode.
    pub fn len(&self) -> usize {
        match self {
            Collected::Bytes(b) => b.len(),
            Collected::Text(s) => s.len(),
            Collected::Objects(v) => v.len(),
        }
    }

    /// Check if nothing was collected.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// View byte or text output as bytes.
    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            Collected::Bytes(b) => Some(b),
            Collected::Text(s) => Some(s.as_bytes()),
            Collected::Objects(_) => None,
        }
    }

    /// View text output.
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Collected::Text(s) => Some(s),
            _ => None,
        }
    }
}

#[derive(Clone, Copy)]
enum Shape {
    Bytes,
    Text,
    Objects,
}

struct Collector {
    shape: Shape,
    limit: Option<usize>,
    received: usize,
    parts: Vec<Chunk>,
    resolver: Resolver<Collected>,
    listeners: Vec<ListenerId>,
}

impl Collector {
    fn assemble(&mut self) -> Collected {
        let parts = std::mem::take(&mut self.parts);
        match self.shape {
            Shape::Objects => Collected::Objects(parts),
            Shape::Text => Collected::Text(
                parts
                    .iter()
                    .map(|chunk| match chunk {
                        Chunk::Text(s) => s.clone(),
                        other => String::from_utf8_lossy(other.as_bytes().unwrap_or_default()).into_owned(),
                    })
                    .collect(),
            ),
            Shape::Bytes => {
                let mut out = BytesMut::with_capacity(self.received);
                for chunk in &parts {
                    out.extend_from_slice(chunk.as_bytes().unwrap_or_default());
                }
                Collected::Bytes(out.freeze())
            }
        }
    }
}

/// Resolve the collector once and detach its listeners.
fn settle(stream: &Stream, collector: &Rc<RefCell<Collector>>, result: impl FnOnce(&mut Collector) -> Result<Collected>) {
    let listeners = {
        let mut c = collector.borrow_mut();
        if c.resolver.is_resolved() {
            return;
        }
        let value = result(&mut c);
        c.resolver.resolve(value);
        std::mem::take(&mut c.listeners)
    };
    for id in listeners {
        stream.off(id);
    }
}

impl Stream {
    /// Read the whole stream into memory.
    ///
    /// The result is bytes, text (when an encoding is set) or a list of
    /// objects (object mode). With a `limit`, the future rejects with
    /// [`Error::CollectLimit`] as soon as more than `limit` bytes (entries
    /// in object mode) arrived, and the stream is destroyed.
    ///
    /// # Example
    ///
    /// ```rust
    /// use sluice::prelude::*;
    ///
    /// # #[tokio::main(flavor = "current_thread")]
    /// # async fn main() {
    /// let stream = Stream::from_iter(["hello, ", "world"]);
    /// let collected = stream.collect(None).await.unwrap();
    /// assert_eq!(collected.len(), 2);
    /// # }
    /// ```
    pub fn collect(&self, limit: Option<usize>) -> Deferred<Collected> {
        let Some(cell) = self.inner.readable.as_ref() else {
            return Deferred::ready(Err(Error::NotReadable));
        };
        if let Some(err) = self.errored() {
            return Deferred::ready(Err(err));
        }
        let shape = {
            let st = cell.borrow();
            if st.object_mode {
                Shape::Objects
            } else if st.decoder.is_some() {
                Shape::Text
            } else {
                Shape::Bytes
            }
        };
        let (resolver, future) = deferred();
        let collector = Rc::new(RefCell::new(Collector {
            shape,
            limit,
            received: 0,
            parts: Vec::new(),
            resolver,
            listeners: Vec::new(),
        }));
        if self.readable_ended() {
            settle(self, &collector, |c| Ok(c.assemble()));
            return future;
        }
        if self.is_destroyed() {
            return Deferred::ready(Err(Error::PrematureClose));
        }

        let weak = self.downgrade();
        let c = Rc::clone(&collector);
        let on_data = self.on(EventKind::Data, move |event| {
            let (Some(stream), Some(chunk)) = (weak.upgrade(), event.chunk()) else {
                return;
            };
            let exceeded = {
                let mut c = c.borrow_mut();
                c.received += match c.shape {
                    Shape::Objects => 1,
                    _ => chunk.len(),
                };
                c.parts.push(chunk.clone());
                c.limit.filter(|limit| c.received > *limit).map(|limit| (limit, c.received))
            };
            if let Some((limit, received)) = exceeded {
                tracing::debug!(stream = %stream.name(), limit, received, "collect limit exceeded");
                crate::observability::record_collect_rejected(stream.name());
                settle(&stream, &c, |_| Err(Error::CollectLimit { limit, received }));
                stream.destroy(None);
            }
        });

        let weak = self.downgrade();
        let c = Rc::clone(&collector);
        let on_end = self.once(EventKind::End, move |_| {
            if let Some(stream) = weak.upgrade() {
                settle(&stream, &c, |c| Ok(c.assemble()));
            }
        });

        let weak = self.downgrade();
        let c = Rc::clone(&collector);
        let on_error = self.on(EventKind::Error, move |event| {
            if let (Some(stream), Some(err)) = (weak.upgrade(), event.error()) {
                let err = err.clone();
                settle(&stream, &c, |_| Err(err));
            }
        });

        let weak = self.downgrade();
        let c = Rc::clone(&collector);
        let on_close = self.once(EventKind::Close, move |_| {
            if let Some(stream) = weak.upgrade() {
                settle(&stream, &c, |_| Err(Error::PrematureClose));
            }
        });

        collector
            .borrow_mut()
            .listeners
            .extend([on_data, on_end, on_error, on_close]);
        future
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chunk::Encoding;
    use crate::options::StreamOptions;
    use crate::stream::ManualSource;

    fn hello_world(options: StreamOptions) -> Stream {
        let stream = Stream::readable(ManualSource, options);
        stream.push("hello, ").unwrap();
        stream.push("world").unwrap();
        stream.push_eof();
        stream
    }

    #[tokio::test]
    async fn test_collect_bytes() {
        let stream = hello_world(StreamOptions::default());
        let collected = stream.collect(None).await.unwrap();
        assert_eq!(collected, Collected::Bytes(Bytes::from_static(b"hello, world")));
    }

    #[tokio::test]
    async fn test_collect_text_with_encoding() {
        let stream = hello_world(StreamOptions::default().encoding(Encoding::Utf8));
        let collected = stream.collect(None).await.unwrap();
        assert_eq!(collected.as_text(), Some("hello, world"));
    }

    #[tokio::test]
    async fn test_collect_limit_rejects_and_destroys() {
        let stream = hello_world(StreamOptions::default());
        let err = stream.collect(Some(6)).await.unwrap_err();
        assert!(matches!(err, Error::CollectLimit { limit: 6, .. }));
        assert!(stream.is_destroyed());
        assert!(stream.errored().is_none());
    }

    #[tokio::test]
    async fn test_collect_rejects_on_error() {
        let stream = Stream::readable(ManualSource, StreamOptions::default());
        let pending = stream.collect(None);
        stream.destroy(Some(Error::custom("gone")));
        let err = pending.await.unwrap_err();
        assert_eq!(err.to_string(), "gone");
    }

    #[tokio::test]
    async fn test_collect_rejects_on_premature_close() {
        let stream = Stream::readable(ManualSource, StreamOptions::default());
        let pending = stream.collect(None);
        stream.destroy(None);
        assert!(matches!(pending.await, Err(Error::PrematureClose)));
    }
}
