//! Error types for sluice.

use std::sync::Arc;
use thiserror::Error;

/// Result type alias using sluice's Error.
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for stream operations.
///
/// Errors are cheap to clone: a single failure is delivered to every `error`
/// listener and to every pending write or end callback.
#[derive(Error, Debug, Clone)]
pub enum Error {
    /// A chunk was pushed after the end-of-stream marker.
    #[error("stream.push() after EOF")]
    PushAfterEof,

    /// A chunk was unshifted after the `end` event was emitted.
    #[error("stream.unshift() after end event")]
    UnshiftAfterEndEvent,

    /// A chunk was written after `end()` was called.
    #[error("write after end")]
    WriteAfterEnd,

    /// The operation was attempted on a destroyed stream.
    #[error("cannot call {0} after a stream was destroyed")]
    Destroyed(&'static str),

    /// The operation was attempted on a stream that already finished.
    #[error("cannot call {0} after a stream was finished")]
    AlreadyFinished(&'static str),

    /// A transform was started while another one was still in flight.
    #[error("transform started while another transform is in progress")]
    TransformInProgress,

    /// A chunk the side cannot accept: an object outside object mode, or
    /// text that is not valid in the side's encoding.
    #[error("invalid chunk for {0}")]
    InvalidChunk(&'static str),

    /// The stream has no readable side.
    #[error("stream is not readable")]
    NotReadable,

    /// The stream has no writable side.
    #[error("stream is not writable")]
    NotWritable,

    /// The requested encoding is not supported.
    #[error("unknown encoding: {0}")]
    UnknownEncoding(String),

    /// `collect` received more data than its limit allows.
    #[error("collected {received} units, exceeding the limit of {limit}")]
    CollectLimit {
        /// Configured limit (bytes, or entries in object mode).
        limit: usize,
        /// Amount received when the limit was crossed.
        received: usize,
    },

    /// The stream closed before it ended or finished.
    #[error("premature close")]
    PrematureClose,

    /// I/O error reported by an underlying resource.
    #[error("I/O error: {0}")]
    Io(Arc<std::io::Error>),

    /// Error raised by a user-provided source, sink or transformer.
    #[error("{0}")]
    Custom(String),
}

/// Coarse classification of [`Error`] values.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    /// Programmer misuse (write after end, push after EOF, ...).
    Usage,
    /// A collection limit was exceeded.
    Limit,
    /// Failure reported by the underlying resource.
    Io,
    /// The stream was torn down before the operation could complete.
    Cancelled,
}

impl Error {
    /// Create a custom error from a message.
    pub fn custom(message: impl Into<String>) -> Self {
        Error::Custom(message.into())
    }

    /// Classify this error.
    pub fn category(&self) -> ErrorCategory {
        match self {
            Error::PushAfterEof
            | Error::UnshiftAfterEndEvent
            | Error::WriteAfterEnd
            | Error::AlreadyFinished(_)
            | Error::TransformInProgress
            | Error::NotReadable
            | Error::NotWritable
            | Error::InvalidChunk(_)
            | Error::UnknownEncoding(_) => ErrorCategory::Usage,
            Error::CollectLimit { .. } => ErrorCategory::Limit,
            Error::Destroyed(_) | Error::PrematureClose => ErrorCategory::Cancelled,
            Error::Io(_) | Error::Custom(_) => ErrorCategory::Io,
        }
    }

    /// Check whether this is a collection-limit error.
    pub fn is_limit(&self) -> bool {
        self.category() == ErrorCategory::Limit
    }
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Error::Io(Arc::new(err))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_categories() {
        assert_eq!(Error::WriteAfterEnd.category(), ErrorCategory::Usage);
        assert_eq!(Error::PushAfterEof.category(), ErrorCategory::Usage);
        assert_eq!(
            Error::CollectLimit {
                limit: 6,
                received: 12
            }
            .category(),
            ErrorCategory::Limit
        );
        assert_eq!(Error::Destroyed("write").category(), ErrorCategory::Cancelled);
        assert_eq!(Error::custom("boom").category(), ErrorCategory::Io);
    }

    #[test]
    fn test_io_error_is_shared_on_clone() {
        let err: Error = std::io::Error::other("disk gone").into();
        let copy = err.clone();
        match (err, copy) {
            (Error::Io(a), Error::Io(b)) => assert!(Arc::ptr_eq(&a, &b)),
            _ => panic!("expected Io errors"),
        }
    }

    #[test]
    fn test_error_display() {
        assert_eq!(
            Error::Destroyed("write").to_string(),
            "cannot call write after a stream was destroyed"
        );
        assert!(
            Error::CollectLimit {
                limit: 2,
                received: 3
            }
            .is_limit()
        );
    }
}
