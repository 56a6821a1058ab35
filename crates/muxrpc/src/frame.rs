//! # Frames
//!
//! Headers exchanged between the engine and a codec. Bodies travel separately,
//! so a codec can decode a body only after the engine has decided where it goes
//! (or that it should be thrown away).

/// Header preceding every request body.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Request {
    /// Dotted `Service.Method` name.
    pub service_method: String,
    /// Sequence number chosen by the client.
    pub seq: u64,
}

impl Request {
    pub fn new(service_method: impl Into<String>, seq: u64) -> Self {
        Self { service_method: service_method.into(), seq }
    }
}

/// Header preceding every response body.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Response {
    /// Echoes the request's method, when the codec can recover it.
    pub service_method: String,
    /// Echoes the request's sequence number.
    pub seq: u64,
    /// `None` on success, otherwise the failure text reported by the server.
    pub error: Option<String>,
}

impl Response {
    pub fn ok(request: &Request) -> Self {
        Self {
            service_method: request.service_method.clone(),
            seq: request.seq,
            error: None,
        }
    }

    pub fn failed(request: &Request, error: impl Into<String>) -> Self {
        Self {
            service_method: request.service_method.clone(),
            seq: request.seq,
            error: Some(error.into()),
        }
    }
}
