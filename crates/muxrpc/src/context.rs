//! # Call Context
//!
//! Per-call state supplied by the caller: a cancellation token and an
//! optional trace observer.

use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use crate::error::Error;
use crate::trace::ClientTrace;

/// Cancellation and tracing for one call.
///
/// Cancellation is advisory. It only wins if it fires before a response has
/// been matched to the call; a request already on the wire is never aborted.
#[derive(Clone, Default)]
pub struct CallContext {
    cancel: CancellationToken,
    trace: Option<Arc<dyn ClientTrace>>,
}

impl CallContext {
    /// A context that is never cancelled and carries no trace.
    pub fn background() -> Self {
        Self::default()
    }

    /// A context cancelled together with `token`.
    pub fn with_cancel(token: CancellationToken) -> Self {
        Self { cancel: token, trace: None }
    }

    /// Attaches a trace observer.
    pub fn with_trace(mut self, trace: Arc<dyn ClientTrace>) -> Self {
        self.trace = Some(trace);
        self
    }

    pub fn token(&self) -> &CancellationToken {
        &self.cancel
    }

    pub(crate) async fn cancelled(&self) {
        self.cancel.cancelled().await
    }

    pub(crate) fn trace_start(&self) {
        if let Some(trace) = &self.trace {
            trace.write_request_start();
        }
    }

    pub(crate) fn trace_done(&self, error: Option<&Error>) {
        if let Some(trace) = &self.trace {
            trace.write_request_done(error);
        }
    }
}

impl std::fmt::Debug for CallContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CallContext")
            .field("cancelled", &self.cancel.is_cancelled())
            .field("traced", &self.trace.is_some())
            .finish()
    }
}
