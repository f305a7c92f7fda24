//! Metrics collection using metrics-rs.

use metrics::{Unit, counter};
use std::sync::atomic::{AtomicBool, Ordering};

/// Whether metrics have been initialized.
static METRICS_INITIALIZED: AtomicBool = AtomicBool::new(false);

// Metric names as constants for consistency
const CHUNKS_PUSHED: &str = "sluice_chunks_pushed";
const BYTES_PUSHED: &str = "sluice_bytes_pushed";
const CHUNKS_WRITTEN: &str = "sluice_chunks_written";
const BYTES_WRITTEN: &str = "sluice_bytes_written";
const BACKPRESSURE_TOTAL: &str = "sluice_backpressure_total";
const DRAIN_TOTAL: &str = "sluice_drain_total";
const DESTROYED_TOTAL: &str = "sluice_destroyed_total";
const COLLECT_REJECTED_TOTAL: &str = "sluice_collect_rejected_total";

/// Initialize metrics descriptions.
///
/// Safe to call multiple times (subsequent calls are no-ops).
pub fn init_metrics() {
    if METRICS_INITIALIZED.swap(true, Ordering::SeqCst) {
        return;
    }

    metrics::describe_counter!(
        CHUNKS_PUSHED,
        Unit::Count,
        "Chunks added to a readable buffer"
    );
    metrics::describe_counter!(
        BYTES_PUSHED,
        Unit::Bytes,
        "Measured size of chunks added to a readable buffer"
    );
    metrics::describe_counter!(CHUNKS_WRITTEN, Unit::Count, "Chunks accepted by write");
    metrics::describe_counter!(
        BYTES_WRITTEN,
        Unit::Bytes,
        "Measured size of chunks accepted by write"
    );
    metrics::describe_counter!(
        BACKPRESSURE_TOTAL,
        Unit::Count,
        "Writes that pushed a writable buffer to its high-water mark"
    );
    metrics::describe_counter!(DRAIN_TOTAL, Unit::Count, "Drain events emitted");
    metrics::describe_counter!(DESTROYED_TOTAL, Unit::Count, "Streams destroyed");
    metrics::describe_counter!(
        COLLECT_REJECTED_TOTAL,
        Unit::Count,
        "Collections rejected for exceeding their limit"
    );
}

/// Record a chunk added to a readable buffer.
#[inline]
pub fn record_pushed(stream: &str, size: usize) {
    counter!(CHUNKS_PUSHED, "stream" => stream.to_string()).increment(1);
    counter!(BYTES_PUSHED, "stream" => stream.to_string()).increment(size as u64);
}

/// Record a chunk accepted by `write`.
#[inline]
pub fn record_written(stream: &str, size: usize) {
    counter!(CHUNKS_WRITTEN, "stream" => stream.to_string()).increment(1);
    counter!(BYTES_WRITTEN, "stream" => stream.to_string()).increment(size as u64);
}

/// Record a write that reached the high-water mark.
#[inline]
pub fn record_backpressure(stream: &str) {
    counter!(BACKPRESSURE_TOTAL, "stream" => stream.to_string()).increment(1);
}

/// Record a `drain` event.
#[inline]
pub fn record_drain(stream: &str) {
    counter!(DRAIN_TOTAL, "stream" => stream.to_string()).increment(1);
}

/// Record a destroyed stream.
#[inline]
pub fn record_destroyed(stream: &str, errored: bool) {
    counter!(
        DESTROYED_TOTAL,
        "stream" => stream.to_string(),
        "errored" => if errored { "true" } else { "false" }
    )
    .increment(1);
}

/// Record a collection rejected by its limit.
#[inline]
pub fn record_collect_rejected(stream: &str) {
    counter!(COLLECT_REJECTED_TOTAL, "stream" => stream.to_string()).increment(1);
}
