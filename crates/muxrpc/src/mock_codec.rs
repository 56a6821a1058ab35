//! Scripted codecs for testing.
//!
//! These are used internally by the test suite and are not part of the public API.
//! Each codec comes with a remote handle through which a test plays the other
//! side of the connection frame by frame.

use std::sync::Arc;
use std::sync::Mutex as StdMutex;
use std::sync::atomic::AtomicUsize;
use std::sync::atomic::Ordering;

use async_trait::async_trait;
use tokio::sync::Mutex;
use tokio::sync::Notify;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::Value;
use crate::codec;
use crate::codec::ClientCodec;
use crate::codec::ServerCodec;
use crate::frame::Request;
use crate::frame::Response;

/// Something the remote side puts on the wire for the client to read.
pub enum Inbound {
    /// A response header and the outcome of decoding its body.
    Frame(Response, codec::Result<Value>),
    /// The next header read fails.
    Fail(codec::Error),
}

pub struct ScriptedClientCodec {
    written: mpsc::UnboundedSender<(Request, Value)>,
    inbound: Mutex<mpsc::UnboundedReceiver<Inbound>>,
    body: StdMutex<Option<codec::Result<Value>>>,
    write_error: Option<codec::Error>,
    body_gate: StdMutex<Option<Arc<Notify>>>,
    closed: CancellationToken,
    closes: AtomicUsize,
    discarded: AtomicUsize,
}

/// The server's view of a `ScriptedClientCodec`.
pub struct ClientRemote {
    written: mpsc::UnboundedReceiver<(Request, Value)>,
    inbound: mpsc::UnboundedSender<Inbound>,
}

impl ScriptedClientCodec {
    pub fn new() -> (Self, ClientRemote) {
        Self::build(None)
    }

    /// A codec whose every write fails with `error`.
    pub fn failing_writes(error: codec::Error) -> (Self, ClientRemote) {
        Self::build(Some(error))
    }

    fn build(write_error: Option<codec::Error>) -> (Self, ClientRemote) {
        let (written_tx, written_rx) = mpsc::unbounded_channel();
        let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();
        let codec = Self {
            written: written_tx,
            inbound: Mutex::new(inbound_rx),
            body: StdMutex::new(None),
            write_error,
            body_gate: StdMutex::new(None),
            closed: CancellationToken::new(),
            closes: AtomicUsize::new(0),
            discarded: AtomicUsize::new(0),
        };
        let remote = ClientRemote { written: written_rx, inbound: inbound_tx };
        (codec, remote)
    }

    pub fn closes(&self) -> usize {
        self.closes.load(Ordering::SeqCst)
    }

    /// Makes the next body read wait until the returned `Notify` fires.
    pub fn hold_next_body(&self) -> Arc<Notify> {
        let gate = Arc::new(Notify::new());
        *self.body_gate.lock().unwrap() = Some(gate.clone());
        gate
    }

    pub fn discarded(&self) -> usize {
        self.discarded.load(Ordering::SeqCst)
    }
}

impl ClientRemote {
    /// Waits for the next request the client wrote.
    pub async fn next_request(&mut self) -> (Request, Value) {
        self.written.recv().await.expect("client stopped writing")
    }

    pub fn reply(&self, seq: u64, reply: Value) {
        let response = Response { service_method: String::new(), seq, error: None };
        self.push(Inbound::Frame(response, Ok(reply)));
    }

    pub fn reply_error(&self, seq: u64, message: &str) {
        let response = Response { service_method: String::new(), seq, error: Some(message.into()) };
        self.push(Inbound::Frame(response, Ok(Value::Null)));
    }

    pub fn push(&self, inbound: Inbound) {
        let _ = self.inbound.send(inbound);
    }
}

#[async_trait]
impl ClientCodec for ScriptedClientCodec {
    async fn write_request(&self, request: &Request, args: &Value) -> codec::Result<()> {
        if let Some(e) = &self.write_error {
            return Err(e.clone());
        }
        if self.closed.is_cancelled() {
            return Err(codec::Error::Closed);
        }
        self.written
            .send((request.clone(), args.clone()))
            .map_err(|_| codec::Error::Eof)
    }

    async fn read_response_header(&self) -> codec::Result<Response> {
        let mut inbound = self.inbound.lock().await;
        let next = tokio::select! {
            biased;
            _ = self.closed.cancelled() => return Err(codec::Error::Closed),
            next = inbound.recv() => next,
        };
        match next {
            None => Err(codec::Error::Eof),
            Some(Inbound::Fail(e)) => Err(e),
            Some(Inbound::Frame(response, body)) => {
                *self.body.lock().unwrap() = Some(body);
                Ok(response)
            }
        }
    }

    async fn read_response_body(&self, reply: Option<&mut Value>) -> codec::Result<()> {
        let gate = self.body_gate.lock().unwrap().take();
        if let Some(gate) = gate {
            gate.notified().await;
        }
        let body = self.body.lock().unwrap().take().unwrap_or(Ok(Value::Null));
        match reply {
            None => {
                self.discarded.fetch_add(1, Ordering::SeqCst);
                body.map(|_| ())
            }
            Some(slot) => {
                *slot = body?;
                Ok(())
            }
        }
    }

    async fn close(&self) -> codec::Result<()> {
        self.closes.fetch_add(1, Ordering::SeqCst);
        self.closed.cancel();
        Ok(())
    }
}

/// A request header and the outcome of decoding its body, or a failed header read.
type InboundRequest = codec::Result<(Request, codec::Result<Value>)>;

pub struct ScriptedServerCodec {
    inbound: Mutex<mpsc::UnboundedReceiver<InboundRequest>>,
    body: StdMutex<Option<codec::Result<Value>>>,
    responses: mpsc::UnboundedSender<(Response, Value)>,
    closed: CancellationToken,
    closes: AtomicUsize,
}

/// The client's view of a `ScriptedServerCodec`.
pub struct ServerRemote {
    inbound: mpsc::UnboundedSender<InboundRequest>,
    responses: mpsc::UnboundedReceiver<(Response, Value)>,
}

impl ScriptedServerCodec {
    pub fn new() -> (Self, ServerRemote) {
        let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();
        let (responses_tx, responses_rx) = mpsc::unbounded_channel();
        let codec = Self {
            inbound: Mutex::new(inbound_rx),
            body: StdMutex::new(None),
            responses: responses_tx,
            closed: CancellationToken::new(),
            closes: AtomicUsize::new(0),
        };
        let remote = ServerRemote { inbound: inbound_tx, responses: responses_rx };
        (codec, remote)
    }

    pub fn closes(&self) -> usize {
        self.closes.load(Ordering::SeqCst)
    }
}

impl ServerRemote {
    pub fn request(&self, method: &str, seq: u64, args: Value) {
        let _ = self.inbound.send(Ok((Request::new(method, seq), Ok(args))));
    }

    pub fn request_with_body(&self, method: &str, seq: u64, body: codec::Result<Value>) {
        let _ = self.inbound.send(Ok((Request::new(method, seq), body)));
    }

    /// The next header read fails with `error`.
    pub fn fail_header(&self, error: codec::Error) {
        let _ = self.inbound.send(Err(error));
    }

    /// Waits for the next response the server wrote.
    pub async fn next_response(&mut self) -> (Response, Value) {
        self.responses.recv().await.expect("server stopped writing")
    }

    /// Ends the inbound stream; the server sees EOF once the queue drains.
    pub fn hang_up(self) -> mpsc::UnboundedReceiver<(Response, Value)> {
        self.responses
    }
}

#[async_trait]
impl ServerCodec for ScriptedServerCodec {
    async fn read_request_header(&self) -> codec::Result<Request> {
        let mut inbound = self.inbound.lock().await;
        let next = tokio::select! {
            biased;
            _ = self.closed.cancelled() => return Err(codec::Error::Closed),
            next = inbound.recv() => next,
        };
        match next {
            None => Err(codec::Error::Eof),
            Some(Err(e)) => Err(e),
            Some(Ok((request, body))) => {
                *self.body.lock().unwrap() = Some(body);
                Ok(request)
            }
        }
    }

    async fn read_request_body(&self, args: Option<&mut Value>) -> codec::Result<()> {
        let body = self.body.lock().unwrap().take().unwrap_or(Ok(Value::Null));
        match args {
            None => match body {
                Err(e) if e.is_fatal() => Err(e),
                _ => Ok(()),
            },
            Some(slot) => {
                *slot = body?;
                Ok(())
            }
        }
    }

    async fn write_response(&self, response: &Response, reply: &Value) -> codec::Result<()> {
        if self.closed.is_cancelled() {
            return Err(codec::Error::Closed);
        }
        self.responses
            .send((response.clone(), reply.clone()))
            .map_err(|_| codec::Error::Eof)
    }

    async fn close(&self) -> codec::Result<()> {
        self.closes.fetch_add(1, Ordering::SeqCst);
        self.closed.cancel();
        Ok(())
    }
}
