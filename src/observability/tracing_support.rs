//! Tracing integration for structured logging and spans.

use std::cell::Cell;
use tracing::{Level, Span, span};

/// Configuration for tracing behavior.
#[derive(Debug, Clone, Copy)]
pub struct TracingConfig {
    /// Whether to create spans around pipe setup.
    pub pipe_spans: bool,
    /// Whether to create spans for individual streams.
    pub stream_spans: bool,
    /// Whether to log every pushed and written chunk.
    pub chunk_events: bool,
    /// Default span level.
    pub level: Level,
}

impl Default for TracingConfig {
    fn default() -> Self {
        Self {
            pipe_spans: true,
            stream_spans: true,
            chunk_events: false, // Can be expensive
            level: Level::DEBUG,
        }
    }
}

impl TracingConfig {
    /// Create a new tracing config with everything enabled.
    pub fn all() -> Self {
        Self {
            pipe_spans: true,
            stream_spans: true,
            chunk_events: true,
            level: Level::TRACE,
        }
    }

    /// Create a minimal config (pipe spans only).
    pub fn minimal() -> Self {
        Self {
            pipe_spans: true,
            stream_spans: false,
            chunk_events: false,
            level: Level::INFO,
        }
    }

    /// Disable all spans and chunk events.
    pub fn none() -> Self {
        Self {
            pipe_spans: false,
            stream_spans: false,
            chunk_events: false,
            level: Level::INFO,
        }
    }
}

thread_local! {
    static CONFIG: Cell<TracingConfig> = Cell::new(TracingConfig::default());
}

/// Replace the tracing configuration of the current thread.
pub fn set_tracing_config(config: TracingConfig) {
    CONFIG.with(|c| c.set(config));
}

/// Get the tracing configuration of the current thread.
pub fn tracing_config() -> TracingConfig {
    CONFIG.with(Cell::get)
}

/// Create a span covering a pipe from `src` to `dest`.
///
/// Returns a disabled span when pipe spans are turned off.
#[inline]
pub fn span_pipe(src: &str, dest: &str) -> Span {
    let config = tracing_config();
    if !config.pipe_spans {
        return Span::none();
    }
    match config.level {
        Level::TRACE => span!(Level::TRACE, "pipe", src = %src, dest = %dest),
        Level::DEBUG => span!(Level::DEBUG, "pipe", src = %src, dest = %dest),
        _ => span!(Level::INFO, "pipe", src = %src, dest = %dest),
    }
}

/// Create a span for work done on behalf of one stream.
///
/// # Example
///
/// ```rust
/// use sluice::observability::span_stream;
///
/// let span = span_stream("upload", "writable");
/// let _guard = span.enter();
/// // Calls into the stream are now attributed to it
/// ```
#[inline]
pub fn span_stream(name: &str, kind: &str) -> Span {
    if !tracing_config().stream_spans {
        return Span::none();
    }
    span!(Level::DEBUG, "stream", name = %name, kind = %kind)
}

/// Log a chunk moving through a stream when chunk events are enabled.
#[inline]
pub fn trace_chunk(stream: &str, op: &'static str, size: usize) {
    if tracing_config().chunk_events {
        tracing::trace!(stream = %stream, op, size, "chunk");
    }
}
