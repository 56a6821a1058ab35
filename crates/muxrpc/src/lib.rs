//! # muxrpc
//!
//! Named remote calls over a single duplex byte stream.
//!
//! ## Architecture
//!
//! ```text
//! caller ─> Client ─> ClientCodec ─> wire ─> ServerCodec ─> Server ─> Registry ─> Handler
//!   ^                                                          │
//!   └──────── Client <─ ClientCodec <─ wire <─ ServerCodec <───┘
//! ```
//!
//! - The [`Client`] multiplexes many concurrent calls onto one connection and
//!   correlates responses back to callers by sequence number.
//! - The [`Server`] reads requests sequentially and dispatches each one to its
//!   own task, serializing the responses back onto the connection.
//! - Codecs own byte-level framing. Nothing above [`codec`] knows the wire format.
//! - [`json`] provides a JSON-RPC adapter for both sides.

pub mod client;
pub mod codec;
pub mod context;
pub mod error;
pub mod frame;
pub mod json;
pub mod registry;
pub mod server;
pub mod trace;

#[cfg(test)]
mod mock_codec;

/// Dynamic value carried in request and response bodies.
pub type Value = serde_json::Value;

pub use client::Client;
pub use codec::ClientCodec;
pub use codec::ServerCodec;
pub use context::CallContext;
pub use error::Error;
pub use error::Result;
pub use frame::Request;
pub use frame::Response;
pub use registry::Handler;
pub use registry::Registry;
pub use registry::ServiceMap;
pub use server::Server;
pub use trace::ClientTrace;
pub use tokio_util::sync::CancellationToken;
