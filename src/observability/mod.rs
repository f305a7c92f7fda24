//! Observability features: metrics and tracing.
//!
//! Streams report through two facades and never install a backend:
//!
//! - **Metrics**: counters via `metrics-rs`
//! - **Tracing**: structured events and spans via `tracing`
//!
//! ## Metrics
//!
//! Every counter carries a `stream` label holding the stream name.
//!
//! | Metric | Type | Description |
//! |--------|------|-------------|
//! | `sluice_chunks_pushed` | Counter | Chunks added to a readable buffer |
//! | `sluice_bytes_pushed` | Counter | Measured size of pushed chunks |
//! | `sluice_chunks_written` | Counter | Chunks accepted by `write` |
//! | `sluice_bytes_written` | Counter | Measured size of written chunks |
//! | `sluice_backpressure_total` | Counter | Writes that crossed the high-water mark |
//! | `sluice_drain_total` | Counter | `drain` events emitted |
//! | `sluice_destroyed_total` | Counter | Destroyed streams, by `errored` label |
//! | `sluice_collect_rejected_total` | Counter | Collections that hit their limit |
//!
//! ## Tracing
//!
//! Lifecycle transitions are logged at `debug`, per-chunk events at `trace`
//! (see [`TracingConfig`]), and each pipe runs its setup inside a `pipe`
//! span.
//!
//! ## Example
//!
//! ```rust
//! use sluice::observability::{TracingConfig, init_metrics, set_tracing_config};
//!
//! // Describe metrics once at startup, then install any exporter
//! init_metrics();
//! set_tracing_config(TracingConfig::minimal());
//! ```

mod metrics;
mod tracing_support;

pub use metrics::{
    init_metrics, record_backpressure, record_collect_rejected, record_destroyed,
    record_drain, record_pushed, record_written,
};
pub use tracing_support::{
    TracingConfig, set_tracing_config, span_pipe, span_stream, trace_chunk, tracing_config,
};
