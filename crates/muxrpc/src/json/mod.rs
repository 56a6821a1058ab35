//! # JSON-RPC Wire Adapter
//!
//! Codecs that frame requests and responses as newline-delimited JSON values.
//!
//! ```text
//! request:  {"method": "Arith.Multiply", "params": [{"a": 3, "b": 4}], "id": 7}
//! response: {"id": 7, "result": {"c": 12}, "error": null}
//! ```
//!
//! JSON-RPC clients may use any JSON value as a request id, while the engine
//! correlates by `u64` sequence number. The server codec hands out its own
//! sequence numbers and keeps the original ids on the side until the matching
//! response is written.

mod client;
mod server;
mod stream;

pub use client::JsonClientCodec;
pub use server::JsonServerCodec;
