//! IterSource - a readable fed by an iterator.

use crate::chunk::Chunk;
use crate::error::Result;
use crate::options::StreamOptions;
use crate::stream::{Source, Stream};

/// A source that pushes the items of an iterator, then ends.
///
/// Each `read` pushes items until the stream reports a full buffer, so a
/// slow consumer keeps the iterator suspended.
pub struct IterSource {
    items: Box<dyn Iterator<Item = Chunk>>,
    produced: u64,
}

impl IterSource {
    /// Create a source over `items`.
    pub fn new<I>(items: I) -> Self
    where
        I: IntoIterator,
        I::Item: Into<Chunk> + 'static,
        I::IntoIter: 'static,
    {
        Self {
            items: Box::new(items.into_iter().map(Into::into)),
            produced: 0,
        }
    }

    /// Number of items pushed so far.
    pub fn produced(&self) -> u64 {
        self.produced
    }
}

impl Source for IterSource {
    fn read(&mut self, stream: &Stream, _size: usize) -> Result<()> {
        loop {
            let Some(chunk) = self.items.next() else {
                tracing::trace!(stream = %stream.name(), produced = self.produced, "iterator exhausted");
                stream.push_eof();
                return Ok(());
            };
            self.produced += 1;
            if !stream.push(chunk)? {
                return Ok(());
            }
        }
    }

    fn name(&self) -> &str {
        "itersource"
    }
}

impl Stream {
    /// Create an object-mode readable over `items`.
    ///
    /// # Example
    ///
    /// ```rust
    /// use sluice::prelude::*;
    ///
    /// let stream = Stream::from_iter((1..=3u32).map(Chunk::object));
    /// let mut seen = Vec::new();
    /// while let Some(chunk) = stream.read(None) {
    ///     seen.push(*chunk.downcast_ref::<u32>().unwrap());
    /// }
    /// assert_eq!(seen, vec![1, 2, 3]);
    /// ```
    #[allow(clippy::should_implement_trait)]
    pub fn from_iter<I>(items: I) -> Self
    where
        I: IntoIterator,
        I::Item: Into<Chunk> + 'static,
        I::IntoIter: 'static,
    {
        Self::readable(IterSource::new(items), StreamOptions::objects())
    }
}
