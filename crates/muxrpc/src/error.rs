//! # Error Definitions
//!
//! Failures a caller of [`Client`](crate::Client) can observe.
//!
//! Every pending call resolves to exactly one outcome. The variants separate
//! who failed: the connection (`Shutdown`, `ConnectionBroken`, `Codec`), the
//! remote handler (`Remote`), or the caller itself (`Cancelled`, `Encode`,
//! `Reply`, `AlreadyClosed`).

use crate::codec;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum Error {
    /// The client was closed or the connection ended cleanly.
    #[error("connection is shut down")]
    Shutdown,
    /// The connection failed in a way that leaves its framing untrusted.
    #[error("connection broken: {0}")]
    ConnectionBroken(String),
    /// The caller's cancellation token fired before a response arrived.
    #[error("call cancelled")]
    Cancelled,
    /// `Client::close` was called more than once.
    #[error("client is already closed")]
    AlreadyClosed,
    /// The server answered with an error.
    #[error("{0}")]
    Remote(String),
    /// Writing the request failed.
    #[error(transparent)]
    Codec(codec::Error),
    /// The call arguments could not be turned into a body value.
    #[error("encoding arguments: {0}")]
    Encode(String),
    /// The reply body did not fit the caller's type.
    #[error("decoding reply: {0}")]
    Reply(String),
}

impl Error {
    /// True for failures that end the whole connection, not just one call.
    pub fn is_connection_error(&self) -> bool {
        matches!(self, Self::Shutdown | Self::ConnectionBroken(_))
    }
}

impl From<codec::Error> for Error {
    fn from(e: codec::Error) -> Self {
        Self::Codec(e)
    }
}

/// A specialized Result type for client calls.
pub type Result<T> = std::result::Result<T, Error>;
