//! Duplex streams: an independent readable and writable side on one handle.

use super::traits::{Sink, Source};
use super::{Stream, StreamKind};
use crate::options::StreamOptions;

impl Stream {
    /// Create a duplex stream reading from `source` and writing into `sink`.
    ///
    /// The sides keep separate buffers, watermarks and object modes (see
    /// `readable_high_water_mark`/`writable_object_mode` and friends in
    /// [`StreamOptions`]). With `allow_half_open(false)` the end of either
    /// side ends the other.
    ///
    /// # Example
    ///
    /// ```rust
    /// use sluice::prelude::*;
    ///
    /// let duplex = Stream::duplex(
    ///     ManualSource,
    ///     FnSink(|_: &Stream, _: Chunk, done: WriteCallback| done.complete(Ok(()))),
    ///     StreamOptions::default().readable_object_mode(true),
    /// );
    /// assert!(duplex.readable_object_mode());
    /// assert!(!duplex.writable_object_mode());
    /// ```
    pub fn duplex(
        source: impl Source + 'static,
        sink: impl Sink + 'static,
        options: StreamOptions,
    ) -> Self {
        Self::build(
            StreamKind::Duplex,
            Some(Box::new(source)),
            Some(Box::new(sink)),
            &options,
        )
    }
}
