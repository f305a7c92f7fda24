//! Stream construction options.
//!
//! [`StreamOptions`] follows the builder style used throughout the crate:
//! start from [`StreamOptions::default()`] and chain setters.
//!
//! ```rust
//! use sluice::options::StreamOptions;
//!
//! let options = StreamOptions::default()
//!     .high_water_mark(5)
//!     .name("slow-sink");
//! assert_eq!(options.writable_config().high_water_mark, 5);
//! ```
//!
//! When no watermark is given, the process-wide default for the side's mode
//! applies (64 KiB for byte streams, 16 entries for object streams). The
//! defaults can be changed with [`set_default_high_water_mark`].

use crate::chunk::Encoding;
use std::sync::atomic::{AtomicUsize, Ordering};

/// Default watermark for byte streams.
pub const DEFAULT_BYTE_HIGH_WATER_MARK: usize = 64 * 1024;

/// Default watermark for object streams.
pub const DEFAULT_OBJECT_HIGH_WATER_MARK: usize = 16;

static BYTE_HWM: AtomicUsize = AtomicUsize::new(DEFAULT_BYTE_HIGH_WATER_MARK);
static OBJECT_HWM: AtomicUsize = AtomicUsize::new(DEFAULT_OBJECT_HIGH_WATER_MARK);

/// Current default watermark for byte (`false`) or object (`true`) streams.
pub fn default_high_water_mark(object_mode: bool) -> usize {
    if object_mode {
        OBJECT_HWM.load(Ordering::Relaxed)
    } else {
        BYTE_HWM.load(Ordering::Relaxed)
    }
}

/// Change the default watermark for streams created afterwards.
pub fn set_default_high_water_mark(object_mode: bool, value: usize) {
    if object_mode {
        OBJECT_HWM.store(value, Ordering::Relaxed);
    } else {
        BYTE_HWM.store(value, Ordering::Relaxed);
    }
}

/// Options accepted by every stream constructor.
///
/// Side-specific fields (`readable_*`, `writable_*`) only matter for duplex
/// and transform streams; the shared `high_water_mark`/`object_mode` take
/// precedence when set.
#[derive(Debug, Clone)]
pub struct StreamOptions {
    /// Watermark for both sides.
    pub high_water_mark: Option<usize>,
    /// Watermark for the readable side.
    pub readable_high_water_mark: Option<usize>,
    /// Watermark for the writable side.
    pub writable_high_water_mark: Option<usize>,
    /// Object mode for both sides.
    pub object_mode: bool,
    /// Object mode for the readable side only.
    pub readable_object_mode: bool,
    /// Object mode for the writable side only.
    pub writable_object_mode: bool,
    /// Decode readable output into text with this encoding.
    pub encoding: Option<Encoding>,
    /// Encoding used to convert text written to the writable side.
    pub default_encoding: Encoding,
    /// Convert text chunks to bytes before they reach the sink.
    pub decode_strings: bool,
    /// Keep the writable side open after the readable side ended.
    pub allow_half_open: bool,
    /// Destroy the stream automatically once it ended and finished.
    pub auto_destroy: bool,
    /// Emit `close` after destruction.
    pub emit_close: bool,
    /// Name used in logs and metrics.
    pub name: Option<String>,
}

impl Default for StreamOptions {
    fn default() -> Self {
        Self {
            high_water_mark: None,
            readable_high_water_mark: None,
            writable_high_water_mark: None,
            object_mode: false,
            readable_object_mode: false,
            writable_object_mode: false,
            encoding: None,
            default_encoding: Encoding::Utf8,
            decode_strings: true,
            allow_half_open: true,
            auto_destroy: true,
            emit_close: true,
            name: None,
        }
    }
}

/// Resolved configuration for one side of a stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SideConfig {
    /// Watermark for the side's buffer.
    pub high_water_mark: usize,
    /// Whether the side carries objects.
    pub object_mode: bool,
}

impl StreamOptions {
    /// Options for an object-mode stream.
    pub fn objects() -> Self {
        Self::default().object_mode(true)
    }

    /// Set the watermark for both sides.
    pub fn high_water_mark(mut self, value: usize) -> Self {
        self.high_water_mark = Some(value);
        self
    }

    /// Set the readable side's watermark.
    pub fn readable_high_water_mark(mut self, value: usize) -> Self {
        self.readable_high_water_mark = Some(value);
        self
    }

    /// Set the writable side's watermark.
    pub fn writable_high_water_mark(mut self, value: usize) -> Self {
        self.writable_high_water_mark = Some(value);
        self
    }

    /// Enable or disable object mode on both sides.
    pub fn object_mode(mut self, enabled: bool) -> Self {
        self.object_mode = enabled;
        self
    }

    /// Enable or disable object mode on the readable side.
    pub fn readable_object_mode(mut self, enabled: bool) -> Self {
        self.readable_object_mode = enabled;
        self
    }

    /// Enable or disable object mode on the writable side.
    pub fn writable_object_mode(mut self, enabled: bool) -> Self {
        self.writable_object_mode = enabled;
        self
    }

    /// Decode readable output with `encoding`.
    pub fn encoding(mut self, encoding: Encoding) -> Self {
        self.encoding = Some(encoding);
        self
    }

    /// Set the encoding for text written to the stream.
    pub fn default_encoding(mut self, encoding: Encoding) -> Self {
        self.default_encoding = encoding;
        self
    }

    /// Control whether written text is converted to bytes.
    pub fn decode_strings(mut self, enabled: bool) -> Self {
        self.decode_strings = enabled;
        self
    }

    /// Control whether a duplex stays writable after its readable side ends.
    pub fn allow_half_open(mut self, enabled: bool) -> Self {
        self.allow_half_open = enabled;
        self
    }

    /// Control automatic destruction after end/finish.
    pub fn auto_destroy(mut self, enabled: bool) -> Self {
        self.auto_destroy = enabled;
        self
    }

    /// Control whether `close` is emitted.
    pub fn emit_close(mut self, enabled: bool) -> Self {
        self.emit_close = enabled;
        self
    }

    /// Name the stream for logs and metrics.
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Resolve the readable side.
    pub fn readable_config(&self) -> SideConfig {
        let object_mode = self.object_mode || self.readable_object_mode;
        SideConfig {
            high_water_mark: self
                .high_water_mark
                .or(self.readable_high_water_mark)
                .unwrap_or_else(|| default_high_water_mark(object_mode)),
            object_mode,
        }
    }

    /// Resolve the writable side.
    pub fn writable_config(&self) -> SideConfig {
        let object_mode = self.object_mode || self.writable_object_mode;
        SideConfig {
            high_water_mark: self
                .high_water_mark
                .or(self.writable_high_water_mark)
                .unwrap_or_else(|| default_high_water_mark(object_mode)),
            object_mode,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let options = StreamOptions::default();
        assert!(options.decode_strings);
        assert!(options.allow_half_open);
        assert!(options.auto_destroy);
        assert!(options.emit_close);
        assert_eq!(options.readable_config().high_water_mark, DEFAULT_BYTE_HIGH_WATER_MARK);
        assert_eq!(
            StreamOptions::objects().writable_config().high_water_mark,
            DEFAULT_OBJECT_HIGH_WATER_MARK
        );
    }

    #[test]
    fn test_shared_watermark_wins() {
        let options = StreamOptions::default()
            .readable_high_water_mark(100)
            .writable_high_water_mark(200);
        assert_eq!(options.readable_config().high_water_mark, 100);
        assert_eq!(options.writable_config().high_water_mark, 200);

        let options = options.high_water_mark(7);
        assert_eq!(options.readable_config().high_water_mark, 7);
        assert_eq!(options.writable_config().high_water_mark, 7);
    }

    #[test]
    fn test_side_object_modes() {
        let options = StreamOptions::default().readable_object_mode(true);
        assert!(options.readable_config().object_mode);
        assert!(!options.writable_config().object_mode);
        assert_eq!(options.readable_config().high_water_mark, DEFAULT_OBJECT_HIGH_WATER_MARK);
        assert_eq!(options.writable_config().high_water_mark, DEFAULT_BYTE_HIGH_WATER_MARK);
    }

    #[test]
    fn test_zero_watermark_is_kept() {
        let options = StreamOptions::default().high_water_mark(0);
        assert_eq!(options.writable_config().high_water_mark, 0);
    }
}
