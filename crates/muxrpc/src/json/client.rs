//! Client side of the JSON-RPC adapter.

use std::collections::HashMap;
use std::sync::Mutex;
use std::sync::MutexGuard;
use std::sync::PoisonError;

use async_trait::async_trait;
use serde::Deserialize;
use serde::Serialize;
use tokio::io::AsyncRead;
use tokio::io::AsyncWrite;

use super::stream::LineStream;
use crate::Value;
use crate::codec::ClientCodec;
use crate::codec::Error;
use crate::codec::Result;
use crate::frame::Request;
use crate::frame::Response;

#[derive(Serialize)]
struct WireRequest<'a> {
    method: &'a str,
    params: [&'a Value; 1],
    id: u64,
}

#[derive(Deserialize)]
struct WireResponse {
    id: u64,
    #[serde(default)]
    result: Option<Value>,
    #[serde(default)]
    error: Option<Value>,
}

/// `ClientCodec` speaking JSON-RPC.
pub struct JsonClientCodec {
    stream: LineStream,
    /// Result of the most recently read response, waiting for `read_response_body`.
    result: Mutex<Option<Value>>,
    /// Method of each request in flight, keyed by id.
    methods: Mutex<HashMap<u64, String>>,
}

impl JsonClientCodec {
    pub fn new<S>(stream: S) -> Self
    where
        S: AsyncRead + AsyncWrite + Send + 'static,
    {
        Self {
            stream: LineStream::new(stream),
            result: Mutex::new(None),
            methods: Mutex::new(HashMap::new()),
        }
    }

    fn result(&self) -> MutexGuard<'_, Option<Value>> {
        self.result.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn methods(&self) -> MutexGuard<'_, HashMap<u64, String>> {
        self.methods.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Number of requests written and not yet answered.
    pub fn in_flight(&self) -> usize {
        self.methods().len()
    }
}

#[async_trait]
impl ClientCodec for JsonClientCodec {
    async fn write_request(&self, request: &Request, args: &Value) -> Result<()> {
        self.methods().insert(request.seq, request.service_method.clone());

        let wire = WireRequest {
            method: &request.service_method,
            params: [args],
            id: request.seq,
        };
        let written = self.stream.write(&wire).await;
        if written.is_err() {
            self.methods().remove(&request.seq);
        }
        written
    }

    async fn read_response_header(&self) -> Result<Response> {
        *self.result() = None;
        let wire: WireResponse = self.stream.read().await?;

        let service_method = self.methods().remove(&wire.id).unwrap_or_default();
        let error = match wire.error {
            None | Some(Value::Null) => None,
            Some(Value::String(message)) if message.is_empty() => {
                Some("unspecified error".to_string())
            }
            Some(Value::String(message)) => Some(message),
            Some(other) => return Err(Error::Decode(format!("invalid error {other}"))),
        };

        if error.is_none() {
            *self.result() = Some(wire.result.unwrap_or(Value::Null));
        }

        Ok(Response { service_method, seq: wire.id, error })
    }

    async fn read_response_body(&self, reply: Option<&mut Value>) -> Result<()> {
        let result = self.result().take();
        if let Some(reply) = reply {
            *reply = result.unwrap_or(Value::Null);
        }
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        // Nothing still in flight can be answered now.
        self.methods().clear();
        self.stream.close().await
    }
}
