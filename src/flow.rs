//! Flow control for stream backpressure.
//!
//! Backpressure between a producer and a writable stream is a half-duplex
//! protocol: `write()` reports whether the producer may continue, and a later
//! `drain` event releases a producer that was told to stop.
//!
//! ```text
//! Producer ──write──> Writable ──_write──> Sink
//!     ^                   │
//!     └──── drain ────────┘   (length back to 0 after Backpressured)
//! ```
//!
//! [`FlowGate`] models that protocol explicitly as a two-state machine
//! instead of leaving it implicit in boolean returns.

/// Flow control signal from a stream to its producer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[repr(u8)]
pub enum FlowSignal {
    /// Normal operation: keep producing.
    #[default]
    Ready = 0,

    /// Buffered data reached the high water mark: stop until drained.
    Backpressured = 1,
}

impl FlowSignal {
    /// Check if production should continue.
    #[inline]
    pub fn should_produce(&self) -> bool {
        matches!(self, FlowSignal::Ready)
    }

    /// Check if the signal indicates backpressure.
    #[inline]
    pub fn is_backpressure(&self) -> bool {
        matches!(self, FlowSignal::Backpressured)
    }
}

/// Check whether a buffer of `length` still has room under `high_water_mark`.
///
/// An empty buffer always has room, so a zero high water mark still lets
/// one chunk through at a time.
#[inline]
pub fn has_capacity(length: usize, high_water_mark: usize) -> bool {
    length < high_water_mark || length == 0
}

/// Ready/Backpressured state machine with episode statistics.
#[derive(Debug, Clone, Default)]
pub struct FlowGate {
    signal: FlowSignal,
    stats: FlowStats,
}

impl FlowGate {
    /// Create a gate in the `Ready` state.
    pub fn new() -> Self {
        Self::default()
    }

    /// Current signal.
    #[inline]
    pub fn signal(&self) -> FlowSignal {
        self.signal
    }

    /// Record the buffered length after accepting a chunk.
    ///
    /// Returns `true` if the producer may continue. Entering the
    /// backpressured state counts one backpressure episode.
    pub fn on_accept(&mut self, length: usize, high_water_mark: usize) -> bool {
        let ok = has_capacity(length, high_water_mark);
        if !ok && self.signal == FlowSignal::Ready {
            self.signal = FlowSignal::Backpressured;
            self.stats.backpressure_events += 1;
        }
        ok
    }

    /// Release backpressure.
    ///
    /// Returns `true` if this was a Backpressured -> Ready transition, i.e.
    /// a `drain` is due.
    pub fn release(&mut self) -> bool {
        if self.signal == FlowSignal::Backpressured {
            self.signal = FlowSignal::Ready;
            self.stats.drains += 1;
            true
        } else {
            false
        }
    }

    /// Get flow statistics.
    pub fn stats(&self) -> &FlowStats {
        &self.stats
    }
}

/// Statistics about flow control behavior.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FlowStats {
    /// Number of times backpressure was entered.
    pub backpressure_events: u64,
    /// Number of drains (backpressure released).
    pub drains: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_has_capacity() {
        assert!(has_capacity(0, 0));
        assert!(has_capacity(4, 5));
        assert!(!has_capacity(5, 5));
        assert!(!has_capacity(1, 0));
    }

    #[test]
    fn test_gate_single_episode() {
        let mut gate = FlowGate::new();
        assert!(gate.on_accept(3, 5));
        assert_eq!(gate.signal(), FlowSignal::Ready);

        assert!(!gate.on_accept(6, 5));
        assert!(!gate.on_accept(9, 5));
        assert!(gate.signal().is_backpressure());
        assert_eq!(gate.stats().backpressure_events, 1);

        assert!(gate.release());
        assert!(!gate.release());
        assert!(gate.signal().should_produce());
        assert_eq!(gate.stats().drains, 1);
    }
}
