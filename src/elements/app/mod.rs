//! Application-facing elements.

mod appsink;

pub use appsink::{AppSink, AppSinkHandle, AppSinkStats};
