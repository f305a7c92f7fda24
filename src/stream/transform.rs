//! Transform streams: written chunks come out of the readable side after
//! passing through a [`Transformer`].
//!
//! The two sides are glued together by a pair of adapters:
//!
//! - [`TransformSink`] hands each written chunk to the transformer and
//!   runs its `flush` on finalize
//! - [`TransformSource`] releases a write completion that was held back
//!   because the readable side was full
//!
//! Holding the write completion is what propagates backpressure from the
//! readable consumer back to the writer.

use super::traits::{
    FinalCallback, FlushCallback, Sink, Source, TransformCallback, TransformCore, Transformer,
    WriteCallback,
};
use super::{Stream, StreamKind};
use crate::chunk::Chunk;
use crate::error::{Error, Result};
use crate::options::StreamOptions;
use std::cell::RefCell;
use std::rc::Rc;

struct TransformSource {
    core: Rc<RefCell<TransformCore>>,
}

impl Source for TransformSource {
    fn read(&mut self, _stream: &Stream, _size: usize) -> Result<()> {
        let pending = self.core.borrow_mut().pending.take();
        if let Some(done) = pending {
            done.complete(Ok(()));
        }
        Ok(())
    }
}

struct TransformSink {
    core: Rc<RefCell<TransformCore>>,
    transformer: Box<dyn Transformer>,
}

impl Sink for TransformSink {
    fn write(&mut self, stream: &Stream, chunk: Chunk, done: WriteCallback) {
        {
            let mut core = self.core.borrow_mut();
            if core.in_progress {
                drop(core);
                done.complete(Err(Error::TransformInProgress));
                return;
            }
            core.in_progress = true;
        }
        tracing::trace!(
            stream = %stream.name(),
            transformer = self.transformer.name(),
            len = chunk.len(),
            "transform"
        );
        let callback = TransformCallback::new(stream, Rc::clone(&self.core), done);
        self.transformer.transform(chunk, callback);
    }

    fn finalize(&mut self, stream: &Stream, done: FinalCallback) {
        tracing::debug!(stream = %stream.name(), transformer = self.transformer.name(), "flush");
        self.transformer.flush(FlushCallback::new(stream, done));
    }

    fn destroy(&mut self, error: Option<Error>) -> Option<Error> {
        self.core.borrow_mut().pending = None;
        self.transformer.destroy(error)
    }

    fn name(&self) -> &str {
        self.transformer.name()
    }
}

impl Stream {
    /// Create a transform stream driven by `transformer`.
    ///
    /// # Example
    ///
    /// ```rust
    /// use sluice::prelude::*;
    ///
    /// let upper = Stream::transform(
    ///     FnTransformer(|chunk: Chunk| {
    ///         let text = String::from_utf8_lossy(chunk.as_bytes().unwrap_or_default());
    ///         Ok(Some(Chunk::from(text.to_uppercase())))
    ///     }),
    ///     StreamOptions::default(),
    /// );
    /// upper.write("shout").unwrap();
    /// run_until_idle();
    /// let out = upper.read(None).unwrap();
    /// assert_eq!(out.as_bytes(), Some(&b"SHOUT"[..]));
    /// ```
    pub fn transform(transformer: impl Transformer + 'static, options: StreamOptions) -> Self {
        let core = Rc::new(RefCell::new(TransformCore::default()));
        let stream = Self::build(
            StreamKind::Transform,
            Some(Box::new(TransformSource {
                core: Rc::clone(&core),
            })),
            Some(Box::new(TransformSink {
                core,
                transformer: Box::new(transformer),
            })),
            &options,
        );
        // Writes may push before the first read
        if let Some(cell) = stream.inner.readable.as_ref() {
            cell.borrow_mut().sync = false;
        }
        stream
    }

    /// Create a transform stream that forwards every chunk unchanged.
    pub fn pass_through(options: StreamOptions) -> Self {
        Self::transform(crate::elements::PassThrough::new(), options)
    }
}
