//! # Sluice
//!
//! Flow-controlled byte and object streams with backpressure.
//!
//! Sluice provides readable, writable, duplex and transform streams that
//! exchange chunks through bounded buffers. Producers learn when to stop
//! from the return value of `push`/`write`; consumers resume them with
//! `read` requests and `drain` events. `pipe` wires the two together.
//!
//! ## Features
//!
//! - **Backpressure**: high-water marks in bytes or objects, `drain` and
//!   `ready()` signalling
//! - **Two reading modes**: flowing (`data` events) and paused (`read`)
//! - **Pipes**: multi-destination fan-out that waits for the slowest sink
//! - **Transforms**: chunk-by-chunk mapping with trailing `flush`
//! - **Deterministic scheduling**: a single-threaded tick queue, drivable by
//!   hand or from a current-thread tokio runtime
//!
//! ## Quick Start
//!
//! ```rust
//! use sluice::prelude::*;
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() -> sluice::Result<()> {
//! let source = Stream::readable(ManualSource, StreamOptions::default());
//! let upper = Stream::transform(
//!     FnTransformer(|chunk: Chunk| {
//!         let text = String::from_utf8_lossy(chunk.as_bytes().unwrap_or_default());
//!         Ok(Some(Chunk::from(text.to_uppercase())))
//!     }),
//!     StreamOptions::default(),
//! );
//!
//! source.pipe(&upper);
//! source.push("hello, ")?;
//! source.push("world")?;
//! source.push_eof();
//!
//! let collected = upper.collect(None).await?;
//! assert_eq!(collected.as_bytes(), Some(&b"HELLO, WORLD"[..]));
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod chunk;
pub mod decoder;
pub mod elements;
pub mod error;
pub mod event;
pub mod flow;
pub mod observability;
pub mod options;
pub mod queue;
pub mod runtime;
pub mod stream;

/// Prelude for convenient imports
pub mod prelude {
    pub use crate::chunk::{Chunk, Encoding};
    pub use crate::error::{Error, Result};
    pub use crate::event::{EventKind, StreamEvent};
    pub use crate::options::StreamOptions;
    pub use crate::runtime::run_until_idle;
    pub use crate::stream::{
        Collected, FinalCallback, FlushCallback, FnSink, FnSource, FnTransformer, ManualSource,
        PipeOptions, Sink, Source, Stream, TransformCallback, Transformer, WriteCallback,
    };
}

pub use error::{Error, Result};
