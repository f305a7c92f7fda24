//! PassThrough transformer - forwards chunks unchanged.

use crate::chunk::Chunk;
use crate::stream::{TransformCallback, Transformer};

/// A transformer that forwards every chunk unchanged.
///
/// This is useful for:
/// - Observing data in the middle of a pipe chain
/// - Testing pipe and backpressure infrastructure
///
/// # Example
///
/// ```rust
/// use sluice::prelude::*;
///
/// let stream = Stream::pass_through(StreamOptions::default());
/// stream.write("unchanged").unwrap();
/// run_until_idle();
/// assert_eq!(stream.read(None).unwrap().as_bytes(), Some(&b"unchanged"[..]));
/// ```
pub struct PassThrough {
    name: String,
}

impl PassThrough {
    /// Create a new PassThrough with the default name.
    pub fn new() -> Self {
        Self {
            name: "passthrough".to_string(),
        }
    }

    /// Create a new PassThrough with a custom name.
    pub fn with_name(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }
}

impl Default for PassThrough {
    fn default() -> Self {
        Self::new()
    }
}

impl Transformer for PassThrough {
    fn transform(&mut self, chunk: Chunk, done: TransformCallback) {
        done.complete(Ok(Some(chunk)));
    }

    fn name(&self) -> &str {
        &self.name
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::options::StreamOptions;
    use crate::runtime::run_until_idle;
    use crate::stream::Stream;

    #[test]
    fn test_passthrough_keeps_order() {
        let stream = Stream::transform(PassThrough::with_name("tap"), StreamOptions::objects());
        for i in 0..5u32 {
            stream.write(Chunk::object(i)).unwrap();
        }
        stream.end().unwrap();
        run_until_idle();

        let mut seen = Vec::new();
        while let Some(chunk) = stream.read(None) {
            seen.extend(chunk.downcast_ref::<u32>().copied());
        }
        assert_eq!(seen, vec![0, 1, 2, 3, 4]);
    }

    #[test]
    fn test_passthrough_flowing_reaches_end() {
        let stream = Stream::transform(PassThrough::with_name("tap"), StreamOptions::default());
        stream.on_data(|_| {});
        stream.write("x").unwrap();
        stream.end().unwrap();
        run_until_idle();
        assert!(stream.readable_ended());
    }
}
