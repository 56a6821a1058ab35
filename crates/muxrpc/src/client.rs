//! # Call Multiplexer
//!
//! This module provides the `Client` abstraction for issuing many concurrent calls
//! over a single connection. A background reader task demultiplexes incoming
//! responses and correlates them with pending calls via sequence numbers.
//!
//! ## Invariants
//!
//! - Sequence numbers are assigned from a counter that only increases, so a
//!   number is never in the pending table twice and is never reused.
//! - A pending call leaves the table exactly once. Whoever removes it (the
//!   reader, a failed write, a cancellation, or shutdown) is the one that
//!   finalizes it; everyone else backs off.
//! - When the reader stops, every call still pending is finalized, so no
//!   caller waits forever on a dead connection.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::MutexGuard;
use std::sync::PoisonError;

use serde::Serialize;
use serde::de::DeserializeOwned;
use tokio::io::AsyncRead;
use tokio::io::AsyncWrite;
use tokio::sync::oneshot;
use tracing::debug;
use tracing::error;
use tracing::trace;

use crate::Value;
use crate::codec;
use crate::codec::ClientCodec;
use crate::context::CallContext;
use crate::error::Error;
use crate::error::Result;
use crate::frame::Request;
use crate::json::JsonClientCodec;

/// A call waiting for its response.
struct PendingCall {
    method: String,
    tx: oneshot::Sender<Result<Value>>,
}

impl PendingCall {
    fn finish(self, result: Result<Value>) {
        // The caller may have given up already; nothing to do then.
        let _ = self.tx.send(result);
    }
}

/// State guarded by the table lock.
#[derive(Default)]
struct Table {
    seq: u64,
    pending: HashMap<u64, PendingCall>,
    /// `close` was called by the user.
    closing: bool,
    /// The reader task has stopped.
    shutdown: bool,
    /// Someone already invoked `codec.close()`.
    codec_closed: bool,
}

struct Shared {
    codec: Arc<dyn ClientCodec>,
    table: Mutex<Table>,
    /// Serializes request writes so frames never interleave.
    sending: tokio::sync::Mutex<()>,
}

impl Shared {
    fn table(&self) -> MutexGuard<'_, Table> {
        self.table.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn remove(&self, seq: u64) -> Option<PendingCall> {
        self.table().pending.remove(&seq)
    }

    /// Closes the codec unless someone else already did.
    async fn close_codec(&self) -> codec::Result<()> {
        {
            let mut table = self.table();
            if table.codec_closed {
                return Ok(());
            }
            table.codec_closed = true;
        }
        self.codec.close().await
    }
}

/// RPC client multiplexing concurrent calls over one codec.
///
/// Cloning is cheap; clones share the connection.
#[derive(Clone)]
pub struct Client {
    shared: Arc<Shared>,
}

impl Client {
    /// Creates a client and spawns its response reader on the current tokio runtime.
    pub fn new(codec: Arc<dyn ClientCodec>) -> Self {
        let shared = Arc::new(Shared {
            codec,
            table: Mutex::new(Table::default()),
            sending: tokio::sync::Mutex::new(()),
        });

        tokio::spawn(read_responses(shared.clone()));

        Self { shared }
    }

    /// Creates a client speaking JSON-RPC over `stream`.
    pub fn from_stream<S>(stream: S) -> Self
    where
        S: AsyncRead + AsyncWrite + Send + 'static,
    {
        Self::new(Arc::new(JsonClientCodec::new(stream)))
    }

    /// Calls `method` with typed arguments and decodes the typed reply.
    pub async fn call<A, R>(&self, ctx: &CallContext, method: &str, args: &A) -> Result<R>
    where
        A: Serialize + ?Sized,
        R: DeserializeOwned,
    {
        let args = serde_json::to_value(args).map_err(|e| Error::Encode(e.to_string()))?;
        let reply = self.call_value(ctx, method, args).await?;
        serde_json::from_value(reply).map_err(|e| Error::Reply(e.to_string()))
    }

    /// Calls `method` and waits for its reply, a failure, or cancellation.
    pub async fn call_value(&self, ctx: &CallContext, method: &str, args: Value) -> Result<Value> {
        let (seq, mut rx) = match self.send(ctx, method, &args).await? {
            Sent::Waiting(seq, rx) => (seq, rx),
            Sent::Finished(rx) => return rx.await.unwrap_or(Err(Error::Shutdown)),
        };

        tokio::select! {
            biased;
            result = &mut rx => result.unwrap_or(Err(Error::Shutdown)),
            _ = ctx.cancelled() => {
                if self.shared.remove(seq).is_some() {
                    debug!(seq, method, "call cancelled before its response");
                    return Err(Error::Cancelled);
                }
                // The reader claimed the call first; its result is on the way.
                rx.await.unwrap_or(Err(Error::Shutdown))
            }
        }
    }

    /// Registers a pending call and writes its request.
    async fn send(&self, ctx: &CallContext, method: &str, args: &Value) -> Result<Sent> {
        let _sending = self.shared.sending.lock().await;

        let (tx, rx) = oneshot::channel();
        let seq = {
            let mut table = self.shared.table();
            if table.closing || table.shutdown {
                drop(table);
                ctx.trace_start();
                ctx.trace_done(Some(&Error::Shutdown));
                return Err(Error::Shutdown);
            }
            let seq = table.seq;
            table.seq += 1;
            table.pending.insert(seq, PendingCall { method: method.to_string(), tx });
            seq
        };

        let request = Request::new(method, seq);
        ctx.trace_start();
        let written = self.shared.codec.write_request(&request, args).await;
        let error = written.err().map(Error::Codec);
        ctx.trace_done(error.as_ref());

        match error {
            None => {
                trace!(seq, method, "request written");
                Ok(Sent::Waiting(seq, rx))
            }
            Some(e) => match self.shared.remove(seq) {
                // No response will ever arrive for a request that never left.
                Some(_) => Err(e),
                // Shutdown already finalized it.
                None => Ok(Sent::Finished(rx)),
            },
        }
    }

    /// Closes the client and its codec.
    ///
    /// Pending calls fail with `Error::Shutdown`. A second call returns
    /// `Error::AlreadyClosed`.
    pub async fn close(&self) -> Result<()> {
        {
            let mut table = self.shared.table();
            if table.closing {
                return Err(Error::AlreadyClosed);
            }
            table.closing = true;
        }
        self.shared.close_codec().await.map_err(Error::Codec)
    }

    /// Number of calls waiting for a response.
    pub fn pending(&self) -> usize {
        self.shared.table().pending.len()
    }

    /// Whether the connection is no longer usable.
    pub fn is_shut_down(&self) -> bool {
        let table = self.shared.table();
        table.closing || table.shutdown
    }
}

enum Sent {
    Waiting(u64, oneshot::Receiver<Result<Value>>),
    Finished(oneshot::Receiver<Result<Value>>),
}

/// Reads responses until the codec fails, then shuts the client down.
async fn read_responses(shared: Arc<Shared>) {
    let failure = loop {
        let response = match shared.codec.read_response_header().await {
            Ok(response) => response,
            Err(e) => break e,
        };
        let seq = response.seq;

        let Some(call) = shared.remove(seq) else {
            // Cancelled, failed to write, or never ours. Keep the framing aligned.
            if let Some(message) = &response.error {
                debug!(seq, error = %message, "discarding error response for unknown call");
            } else {
                debug!(seq, "discarding response for unknown call");
            }
            match shared.codec.read_response_body(None).await {
                Ok(()) => continue,
                Err(e) => break e,
            }
        };

        match response.error {
            Some(message) => match shared.codec.read_response_body(None).await {
                Ok(()) => call.finish(Err(Error::Remote(message))),
                Err(e) => {
                    call.finish(Err(broken(&e)));
                    break e;
                }
            },
            None => {
                let mut reply = Value::Null;
                match shared.codec.read_response_body(Some(&mut reply)).await {
                    Ok(()) => {
                        trace!(seq, method = %call.method, "response delivered");
                        call.finish(Ok(reply));
                    }
                    Err(e) => {
                        call.finish(Err(broken(&e)));
                        break e;
                    }
                }
            }
        }
    };

    terminate(&shared, failure).await;
}

/// Finalizes every pending call and releases the codec.
async fn terminate(shared: &Shared, failure: codec::Error) {
    let (closing, drained) = {
        let mut table = shared.table();
        table.shutdown = true;
        let drained: Vec<(u64, PendingCall)> = table.pending.drain().collect();
        (table.closing, drained)
    };

    let error = if closing || failure.is_closed() {
        Error::Shutdown
    } else {
        error!(error = %failure, "client connection failed");
        broken(&failure)
    };

    if !drained.is_empty() {
        debug!(count = drained.len(), error = %error, "failing pending calls");
    }
    for (_, call) in drained {
        call.finish(Err(error.clone()));
    }

    if let Err(e) = shared.close_codec().await {
        debug!(error = %e, "closing client codec");
    }
}

fn broken(e: &codec::Error) -> Error {
    Error::ConnectionBroken(e.to_string())
}
