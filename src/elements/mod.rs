//! Built-in sources, sinks and transformers.
//!
//! ## Sources
//! - [`IterSource`]: Pushes the items of an iterator (see [`Stream::from_iter`](crate::stream::Stream::from_iter))
//!
//! ## Sinks
//! - [`AppSink`]: Hands written chunks to application code, optionally
//!   holding each write until the application releases it
//! - [`NullSink`]: Discards all chunks (useful for benchmarking)
//!
//! ## Transforms
//! - [`PassThrough`]: Forwards chunks unchanged

mod app;
mod iter;
mod null;
mod passthrough;

// Sources
pub use iter::IterSource;

// Sinks
pub use app::{AppSink, AppSinkHandle, AppSinkStats};
pub use null::NullSink;

// Transforms
pub use passthrough::PassThrough;
