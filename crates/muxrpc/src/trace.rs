//! # Call Tracing
//!
//! Optional hooks around the request write of a single call.

use crate::error::Error;

/// Observer notified around each request write.
///
/// For every call, `write_request_start` fires exactly once, followed by
/// exactly one `write_request_done`. When the write fails, the error passed to
/// `write_request_done` is the same error the call returns.
pub trait ClientTrace: Send + Sync + 'static {
    /// Fires immediately before the request is written.
    fn write_request_start(&self) {}

    /// Fires once the write completed (`None`) or failed (`Some`).
    fn write_request_done(&self, _error: Option<&Error>) {}
}
