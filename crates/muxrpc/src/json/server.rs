//! Server side of the JSON-RPC adapter.

use std::collections::HashMap;
use std::sync::Mutex;
use std::sync::MutexGuard;
use std::sync::PoisonError;

use async_trait::async_trait;
use serde::Deserialize;
use serde::Serialize;
use tokio::io::AsyncRead;
use tokio::io::AsyncWrite;
use tracing::trace;

use super::stream::LineStream;
use crate::Value;
use crate::codec::Error;
use crate::codec::Result;
use crate::codec::ServerCodec;
use crate::frame::Request;
use crate::frame::Response;

#[derive(Deserialize)]
struct WireRequest {
    #[serde(default)]
    method: String,
    #[serde(default)]
    params: Option<Value>,
    #[serde(default)]
    id: Option<Value>,
}

#[derive(Serialize)]
struct WireResponse<'a> {
    id: &'a Value,
    result: Option<&'a Value>,
    error: Option<&'a str>,
}

/// Sequence numbers handed to the engine, mapped back to client ids.
#[derive(Default)]
struct PendingIds {
    seq: u64,
    ids: HashMap<u64, Option<Value>>,
}

/// `ServerCodec` speaking JSON-RPC.
pub struct JsonServerCodec {
    stream: LineStream,
    /// Params of the most recently read request, waiting for `read_request_body`.
    params: Mutex<Option<Value>>,
    pending: Mutex<PendingIds>,
}

impl JsonServerCodec {
    pub fn new<S>(stream: S) -> Self
    where
        S: AsyncRead + AsyncWrite + Send + 'static,
    {
        Self {
            stream: LineStream::new(stream),
            params: Mutex::new(None),
            pending: Mutex::new(PendingIds::default()),
        }
    }

    fn params(&self) -> MutexGuard<'_, Option<Value>> {
        self.params.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn pending(&self) -> MutexGuard<'_, PendingIds> {
        self.pending.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Number of requests read but not yet answered.
    pub fn in_flight(&self) -> usize {
        self.pending().ids.len()
    }
}

#[async_trait]
impl ServerCodec for JsonServerCodec {
    async fn read_request_header(&self) -> Result<Request> {
        *self.params() = None;
        let wire: WireRequest = self.stream.read().await?;

        // The id can be any JSON value; only the sequence number reaches the engine.
        let seq = {
            let mut pending = self.pending();
            pending.seq += 1;
            let seq = pending.seq;
            pending.ids.insert(seq, wire.id);
            seq
        };
        *self.params() = wire.params;

        trace!(seq, method = %wire.method, "request header decoded");
        Ok(Request::new(wire.method, seq))
    }

    async fn read_request_body(&self, args: Option<&mut Value>) -> Result<()> {
        let params = self.params().take();
        let Some(args) = args else {
            return Ok(());
        };
        let Some(params) = params else {
            return Err(Error::MissingParams);
        };

        // Arguments travel as a single-element array.
        match params {
            Value::Array(items) => {
                *args = items.into_iter().next().unwrap_or(Value::Null);
                Ok(())
            }
            other => Err(Error::Decode(format!(
                "params must be an array, got {}",
                kind(&other)
            ))),
        }
    }

    async fn write_response(&self, response: &Response, reply: &Value) -> Result<()> {
        let id = self
            .pending()
            .ids
            .remove(&response.seq)
            .ok_or(Error::InvalidSequence(response.seq))?;

        // A request without an id is answered with a null id.
        let id = id.unwrap_or(Value::Null);
        let wire = match &response.error {
            None => WireResponse { id: &id, result: Some(reply), error: None },
            Some(message) => WireResponse { id: &id, result: None, error: Some(message.as_str()) },
        };
        self.stream.write(&wire).await
    }

    async fn close(&self) -> Result<()> {
        self.stream.close().await
    }
}

fn kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
