//! # Codec Contract
//!
//! The only boundary between the engine and a concrete wire format.
//!
//! ## Philosophy
//!
//! - **Header, then body**: a header is read first so the engine can decide
//!   where the body goes. Passing `None` for the body slot still consumes the
//!   body, keeping the framing aligned.
//! - **No locking policy**: the engine serializes writes itself. A codec only
//!   has to keep its own read and write halves consistent.
//! - **Broken bodies are fatal**: once a header has been read the stream
//!   position has moved on, so a body that fails to decode may have
//!   desynchronized every message after it. [`Error::is_fatal`] tells the
//!   engine when to give up on the connection.

use async_trait::async_trait;

use crate::Value;
use crate::frame::Request;
use crate::frame::Response;

/// Errors raised by a codec.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum Error {
    /// The underlying stream failed.
    #[error("i/o error: {0}")]
    Io(String),
    /// The codec was closed locally.
    #[error("codec is closed")]
    Closed,
    /// The peer closed the stream.
    #[error("unexpected end of stream")]
    Eof,
    /// A header or body could not be decoded; the framing can no longer be trusted.
    #[error("decoding: {0}")]
    Decode(String),
    /// A value could not be encoded.
    #[error("encoding: {0}")]
    Encode(String),
    /// The request carried no parameters but a body was expected.
    #[error("jsonrpc: request body missing params")]
    MissingParams,
    /// A response was written for a request that is not pending.
    #[error("invalid sequence number in response: {0}")]
    InvalidSequence(u64),
}

impl Error {
    /// Whether the connection must be torn down after this error.
    ///
    /// Protocol violations scoped to one request are recoverable; everything
    /// else leaves the stream in an unknown state.
    pub fn is_fatal(&self) -> bool {
        !matches!(self, Self::MissingParams | Self::InvalidSequence(_))
    }

    /// Whether this error only reports that the stream is gone.
    pub fn is_closed(&self) -> bool {
        matches!(self, Self::Closed | Self::Eof)
    }
}

impl From<std::io::Error> for Error {
    fn from(e: std::io::Error) -> Self {
        match e.kind() {
            std::io::ErrorKind::UnexpectedEof
            | std::io::ErrorKind::BrokenPipe
            | std::io::ErrorKind::ConnectionReset => Self::Eof,
            _ => Self::Io(e.to_string()),
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;

/// Client half of a connection: writes requests, reads responses.
///
/// This trait is object-safe (`Arc<dyn ClientCodec>`).
#[async_trait]
pub trait ClientCodec: Send + Sync + 'static {
    /// Serializes and flushes one request.
    async fn write_request(&self, request: &Request, args: &Value) -> Result<()>;

    /// Waits for the next response header.
    ///
    /// Returns `Closed` or `Eof` once the connection is gone.
    async fn read_response_header(&self) -> Result<Response>;

    /// Decodes the body belonging to the most recently read header.
    ///
    /// With `None` the body is consumed and discarded.
    async fn read_response_body(&self, reply: Option<&mut Value>) -> Result<()>;

    /// Releases the connection. Idempotent.
    ///
    /// A reader blocked in `read_response_header` must wake up with `Closed`.
    async fn close(&self) -> Result<()>;
}

/// Server half of a connection: reads requests, writes responses.
///
/// This trait is object-safe (`Arc<dyn ServerCodec>`).
#[async_trait]
pub trait ServerCodec: Send + Sync + 'static {
    /// Waits for the next request header.
    async fn read_request_header(&self) -> Result<Request>;

    /// Decodes the body belonging to the most recently read header.
    ///
    /// With `None` the body is consumed and discarded.
    async fn read_request_body(&self, args: Option<&mut Value>) -> Result<()>;

    /// Serializes and flushes one response.
    ///
    /// On error responses `reply` is ignored.
    async fn write_response(&self, response: &Response, reply: &Value) -> Result<()>;

    /// Releases the connection. Idempotent.
    async fn close(&self) -> Result<()>;
}
