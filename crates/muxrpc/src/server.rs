//! # Dispatch Loop
//!
//! Serves calls arriving on a connection. Requests are read one at a time;
//! each resolved request runs in its own task so a slow handler never holds up
//! the reader, and responses are written back in completion order.
//!
//! ## Failure handling
//!
//! - **Resolution failure**: the body is read and discarded, an error response
//!   is sent, and the loop carries on.
//! - **Recoverable body failure** (e.g. missing params): answered with an
//!   error response; the loop carries on.
//! - **Handler panic**: answered with [`HANDLER_PANICKED`]; the loop carries on.
//! - **Fatal body failure**: the framing can no longer be trusted. The loop
//!   stops, the codec is closed, and `serve_codec` returns the error. Handlers
//!   already dispatched still run; their writes fail quietly against the
//!   closed codec.

use std::sync::Arc;
use std::sync::atomic::AtomicU64;
use std::sync::atomic::Ordering;

use tokio::io::AsyncRead;
use tokio::io::AsyncWrite;
use tokio::net::TcpListener;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::Instrument;
use tracing::debug;
use tracing::error;
use tracing::info;
use tracing::info_span;
use tracing::warn;

use crate::Value;
use crate::codec;
use crate::codec::ServerCodec;
use crate::frame::Response;
use crate::json::JsonServerCodec;
use crate::registry::Registry;

/// Why a connection stopped being served.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ServeError {
    /// A request header could not be read for a reason other than the peer leaving.
    #[error("reading request header: {0}")]
    Header(codec::Error),
    /// A request body could not be decoded; the connection was dropped.
    #[error("reading request body: {0}")]
    BodyDecode(codec::Error),
    /// The listener stopped accepting connections.
    #[error("accept: {0}")]
    Accept(String),
}

pub type Result<T> = std::result::Result<T, ServeError>;

/// Error text sent back when a handler task dies without producing a result.
pub const HANDLER_PANICKED: &str = "rpc: handler panicked";

/// Serves registered methods on any number of connections.
///
/// Cloning is cheap; clones share the registry and shutdown token.
#[derive(Clone)]
pub struct Server {
    registry: Arc<dyn Registry>,
    name: Arc<str>,
    shutdown: CancellationToken,
    next_conn: Arc<AtomicU64>,
}

impl Server {
    pub fn new(registry: impl Registry) -> Self {
        Self {
            registry: Arc::new(registry),
            name: Arc::from("rpc"),
            shutdown: CancellationToken::new(),
            next_conn: Arc::new(AtomicU64::new(1)),
        }
    }

    /// Label used in log output.
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Arc::from(name.into());
        self
    }

    /// Token whose children are handed to every handler.
    ///
    /// Cancelling it is a request for handlers to wind down; the server
    /// itself never cancels a dispatched handler.
    pub fn with_shutdown(mut self, token: CancellationToken) -> Self {
        self.shutdown = token;
        self
    }

    pub fn shutdown_token(&self) -> &CancellationToken {
        &self.shutdown
    }

    /// Accepts connections until the listener fails, serving each with the JSON codec.
    pub async fn accept(&self, listener: TcpListener) -> Result<()> {
        loop {
            let (stream, peer) = tokio::select! {
                accepted = listener.accept() => accepted.map_err(|e| ServeError::Accept(e.to_string()))?,
                _ = self.shutdown.cancelled() => {
                    info!(server = %self.name, "listener stopped");
                    return Ok(());
                }
            };
            debug!(server = %self.name, %peer, "accepted connection");

            let server = self.clone();
            tokio::spawn(async move {
                if let Err(e) = server.serve_conn(stream).await {
                    warn!(server = %server.name, %peer, error = %e, "connection ended with error");
                }
            });
        }
    }

    /// Serves one stream with the JSON codec.
    pub async fn serve_conn<S>(&self, stream: S) -> Result<()>
    where
        S: AsyncRead + AsyncWrite + Send + 'static,
    {
        self.serve_codec(Arc::new(JsonServerCodec::new(stream))).await
    }

    /// Runs the dispatch loop on `codec` until the connection ends.
    pub async fn serve_codec(&self, codec: Arc<dyn ServerCodec>) -> Result<()> {
        let conn = self.next_conn.fetch_add(1, Ordering::Relaxed);
        let span = info_span!("conn", server = %self.name, conn);
        self.dispatch(codec, conn).instrument(span).await
    }

    async fn dispatch(&self, codec: Arc<dyn ServerCodec>, conn: u64) -> Result<()> {
        let sending = Arc::new(Mutex::new(()));

        let outcome = loop {
            let request = match codec.read_request_header().await {
                Ok(request) => request,
                Err(e) if e.is_closed() => {
                    debug!("connection closed");
                    break Ok(());
                }
                Err(e) => {
                    warn!(error = %e, "reading request header");
                    break Err(ServeError::Header(e));
                }
            };

            let handler = match self.registry.resolve(&request.service_method) {
                Ok(handler) => handler,
                Err(e) => {
                    debug!(seq = request.seq, method = %request.service_method, error = %e, "unresolved method");
                    if let Err(body) = codec.read_request_body(None).await {
                        if body.is_fatal() {
                            error!(error = %body, "discarding request body");
                            break Err(ServeError::BodyDecode(body));
                        }
                    }
                    respond(&*codec, &sending, Response::failed(&request, e.to_string()), &Value::Null).await;
                    continue;
                }
            };

            let mut args = Value::Null;
            if let Err(e) = codec.read_request_body(Some(&mut args)).await {
                if e.is_fatal() {
                    error!(seq = request.seq, method = %request.service_method, error = %e, "request body unreadable, dropping connection");
                    break Err(ServeError::BodyDecode(e));
                }
                warn!(seq = request.seq, method = %request.service_method, error = %e, "bad request body");
                respond(&*codec, &sending, Response::failed(&request, e.to_string()), &Value::Null).await;
                continue;
            }

            debug!(seq = request.seq, method = %request.service_method, "dispatching");
            let codec = codec.clone();
            let sending = sending.clone();
            let ctx = self.shutdown.child_token();
            tokio::spawn(
                async move {
                    // The handler runs in its own task so a panic still gets an answer.
                    let call = tokio::spawn(async move { handler.call(ctx, args).await }.in_current_span());
                    let response = match call.await {
                        Ok(Ok(reply)) => return respond(&*codec, &sending, Response::ok(&request), &reply).await,
                        Ok(Err(message)) => Response::failed(&request, message),
                        Err(e) => {
                            error!(seq = request.seq, method = %request.service_method, error = %e, "handler panicked");
                            Response::failed(&request, HANDLER_PANICKED)
                        }
                    };
                    respond(&*codec, &sending, response, &Value::Null).await
                }
                .in_current_span(),
            );
        };

        if let Err(e) = codec.close().await {
            debug!(conn, error = %e, "closing server codec");
        }
        outcome
    }
}

/// Writes one response while holding the connection's write lock.
async fn respond(codec: &dyn ServerCodec, sending: &Mutex<()>, response: Response, reply: &Value) {
    let _sending = sending.lock().await;
    match codec.write_response(&response, reply).await {
        Ok(()) => {}
        // The connection went away while the handler ran.
        Err(e) if e.is_closed() => {
            debug!(seq = response.seq, "dropping response on closed connection")
        }
        Err(e) => warn!(seq = response.seq, error = %e, "writing response"),
    }
}
