//! # Method Registry
//!
//! Resolves a dotted `Service.Method` name to an invocable handler.
//!
//! The dispatch loop only depends on [`Registry`]. [`ServiceMap`] is the
//! registry most applications want: an explicit object built at startup and
//! handed to the [`Server`](crate::Server). Nothing here is process-global.

use std::collections::HashMap;
use std::future::Future;
use std::marker::PhantomData;
use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use serde::Serialize;
use serde::de::DeserializeOwned;
use tokio_util::sync::CancellationToken;

use crate::Value;

/// Why a method name could not be resolved.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ResolveError {
    #[error("rpc: service/method request ill-formed: {0}")]
    IllFormed(String),
    #[error("rpc: can't find service {0}")]
    ServiceNotFound(String),
    #[error("rpc: can't find method {0}")]
    MethodNotFound(String),
}

/// Why a handler could not be registered.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RegisterError {
    #[error("rpc: method name must look like Service.Method: {0}")]
    IllFormed(String),
    #[error("rpc: method already defined: {0}")]
    Duplicate(String),
}

/// A callable method.
///
/// The returned value fills the reply slot; an `Err` is sent back to the
/// caller as the response's error text.
#[async_trait]
pub trait Handler: Send + Sync + 'static {
    async fn call(&self, ctx: CancellationToken, args: Value) -> Result<Value, String>;
}

/// Maps method names to handlers.
pub trait Registry: Send + Sync + 'static {
    fn resolve(&self, service_method: &str) -> Result<Arc<dyn Handler>, ResolveError>;
}

/// Splits `Service.Method` at the last dot.
fn split_name(service_method: &str) -> Option<(&str, &str)> {
    let (service, method) = service_method.rsplit_once('.')?;
    if service.is_empty() || method.is_empty() {
        return None;
    }
    Some((service, method))
}

/// Concurrent registry of services and their methods.
#[derive(Default)]
pub struct ServiceMap {
    services: DashMap<String, HashMap<String, Arc<dyn Handler>>>,
}

impl ServiceMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `handler` under `Service.Method`.
    pub fn register(&self, service_method: &str, handler: Arc<dyn Handler>) -> Result<(), RegisterError> {
        let (service, method) = split_name(service_method)
            .ok_or_else(|| RegisterError::IllFormed(service_method.to_string()))?;

        let mut methods = self.services.entry(service.to_string()).or_default();
        if methods.contains_key(method) {
            return Err(RegisterError::Duplicate(service_method.to_string()));
        }
        methods.insert(method.to_string(), handler);
        Ok(())
    }

    /// Registers an async closure taking typed arguments and returning a typed reply.
    ///
    /// ```ignore
    /// services.register_fn("Arith.Multiply", |_ctx, args: Args| async move {
    ///     Ok::<_, String>(Product { c: args.a * args.b })
    /// })?;
    /// ```
    pub fn register_fn<A, R, F, Fut>(&self, service_method: &str, f: F) -> Result<(), RegisterError>
    where
        A: DeserializeOwned + Send + 'static,
        R: Serialize + Send + 'static,
        F: Fn(CancellationToken, A) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<R, String>> + Send + 'static,
    {
        self.register(service_method, Arc::new(FnHandler { f, _types: PhantomData }))
    }

    /// Names of all registered methods, sorted.
    pub fn methods(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .services
            .iter()
            .flat_map(|entry| {
                let service = entry.key().clone();
                entry
                    .value()
                    .keys()
                    .map(move |method| format!("{service}.{method}"))
                    .collect::<Vec<_>>()
            })
            .collect();
        names.sort();
        names
    }
}

impl Registry for ServiceMap {
    fn resolve(&self, service_method: &str) -> Result<Arc<dyn Handler>, ResolveError> {
        let (service, method) = split_name(service_method)
            .ok_or_else(|| ResolveError::IllFormed(service_method.to_string()))?;

        let methods = self
            .services
            .get(service)
            .ok_or_else(|| ResolveError::ServiceNotFound(service_method.to_string()))?;

        methods
            .get(method)
            .cloned()
            .ok_or_else(|| ResolveError::MethodNotFound(service_method.to_string()))
    }
}

impl<T: Registry> Registry for Arc<T> {
    fn resolve(&self, service_method: &str) -> Result<Arc<dyn Handler>, ResolveError> {
        (**self).resolve(service_method)
    }
}

/// Adapts a typed async closure to [`Handler`].
struct FnHandler<F, A, R> {
    f: F,
    _types: PhantomData<fn(A) -> R>,
}

#[async_trait]
impl<F, Fut, A, R> Handler for FnHandler<F, A, R>
where
    A: DeserializeOwned + Send + 'static,
    R: Serialize + Send + 'static,
    F: Fn(CancellationToken, A) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<R, String>> + Send + 'static,
{
    async fn call(&self, ctx: CancellationToken, args: Value) -> Result<Value, String> {
        let args: A = serde_json::from_value(args).map_err(|e| format!("rpc: decoding arguments: {e}"))?;
        let reply = (self.f)(ctx, args).await?;
        serde_json::to_value(reply).map_err(|e| format!("rpc: encoding reply: {e}"))
    }
}
