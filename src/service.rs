//! Service host - maps method names to handlers.
//!
//! The connection's dispatch path looks methods up here by the
//! `method_name` carried in the message headers. Handlers receive the
//! raw payload bytes and either return response bytes or an
//! [`ErrorData`] that travels back as an error response. Payload
//! (de)serialization is the application's concern.
//!
//! # Example
//!
//! ```
//! use bytes::Bytes;
//! use epoxy_transport::{ErrorData, ServiceHost};
//!
//! let host = ServiceHost::new();
//! host.register_method("echo", |payload: Bytes| async move {
//!     Ok::<_, ErrorData>(payload)
//! })
//! .unwrap();
//!
//! assert!(host.is_registered("echo"));
//! ```

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use bytes::Bytes;
use parking_lot::RwLock;

use crate::error::{EpoxyError, Result};
use crate::message::ErrorData;

/// Boxed future returned by handlers.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Outcome of a handler invocation: response payload bytes, or an
/// application error delivered as an error response.
pub type HandlerResult = std::result::Result<Bytes, ErrorData>;

/// A method handler.
///
/// Implemented for any `Fn(Bytes) -> impl Future<Output = HandlerResult>`
/// closure, so plain async closures register directly.
pub trait Handler: Send + Sync + 'static {
    /// Handle a request or event with raw payload bytes.
    fn call(&self, payload: Bytes) -> BoxFuture<'static, HandlerResult>;
}

impl<F, Fut> Handler for F
where
    F: Fn(Bytes) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = HandlerResult> + Send + 'static,
{
    fn call(&self, payload: Bytes) -> BoxFuture<'static, HandlerResult> {
        Box::pin((self)(payload))
    }
}

/// A bundle of methods registered as a unit.
///
/// [`Listener::add_service`](crate::EpoxyListener::add_service) calls
/// [`register_methods`](Service::register_methods) with the listener's
/// host.
pub trait Service: Send + Sync + 'static {
    /// Register this service's methods on `host`.
    fn register_methods(&self, host: &ServiceHost) -> Result<()>;
}

/// Registry mapping method names to handlers.
///
/// Shared between the listener and every server-side connection;
/// registration and lookup may interleave freely.
pub struct ServiceHost {
    methods: RwLock<HashMap<String, Arc<dyn Handler>>>,
}

impl ServiceHost {
    /// Create an empty host.
    pub fn new() -> Self {
        Self {
            methods: RwLock::new(HashMap::new()),
        }
    }

    /// Register a handler under `method`.
    ///
    /// # Errors
    ///
    /// Fails with `InvalidOperation` if the name is already taken.
    pub fn register_method<H: Handler>(&self, method: &str, handler: H) -> Result<()> {
        let mut methods = self.methods.write();
        if methods.contains_key(method) {
            return Err(EpoxyError::InvalidOperation(format!(
                "method already registered: {method}"
            )));
        }
        methods.insert(method.to_string(), Arc::new(handler));
        Ok(())
    }

    /// Whether a handler is registered under `method`.
    pub fn is_registered(&self, method: &str) -> bool {
        self.methods.read().contains_key(method)
    }

    /// Look up the handler for `method`.
    pub fn get(&self, method: &str) -> Option<Arc<dyn Handler>> {
        self.methods.read().get(method).cloned()
    }

    /// Number of registered methods.
    pub fn method_count(&self) -> usize {
        self.methods.read().len()
    }
}

impl Default for ServiceHost {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_register_and_lookup() {
        let host = ServiceHost::new();
        host.register_method("echo", |payload: Bytes| async move { Ok(payload) })
            .unwrap();

        assert!(host.is_registered("echo"));
        assert!(!host.is_registered("missing"));
        assert!(host.get("echo").is_some());
        assert!(host.get("missing").is_none());
        assert_eq!(host.method_count(), 1);
    }

    #[test]
    fn test_duplicate_registration_fails() {
        let host = ServiceHost::new();
        host.register_method("echo", |payload: Bytes| async move { Ok(payload) })
            .unwrap();

        let result = host.register_method("echo", |payload: Bytes| async move { Ok(payload) });
        assert!(matches!(result, Err(EpoxyError::InvalidOperation(_))));
        assert_eq!(host.method_count(), 1);
    }

    #[tokio::test]
    async fn test_handler_invocation() {
        let host = ServiceHost::new();
        host.register_method("upper", |payload: Bytes| async move {
            let text = String::from_utf8_lossy(&payload).to_uppercase();
            Ok(Bytes::from(text.into_bytes()))
        })
        .unwrap();

        let handler = host.get("upper").unwrap();
        let result = handler.call(Bytes::from_static(b"hello")).await.unwrap();
        assert_eq!(&result[..], b"HELLO");
    }

    #[tokio::test]
    async fn test_handler_error_result() {
        let host = ServiceHost::new();
        host.register_method("fail", |_payload: Bytes| async move {
            Err(ErrorData::new(99, "handler says no"))
        })
        .unwrap();

        let handler = host.get("fail").unwrap();
        let err = handler.call(Bytes::from_static(b"x")).await.unwrap_err();
        assert_eq!(err.error_code, 99);
    }

    #[test]
    fn test_service_bundle_registration() {
        struct Calculator;

        impl Service for Calculator {
            fn register_methods(&self, host: &ServiceHost) -> Result<()> {
                host.register_method("calc.add", |p: Bytes| async move { Ok(p) })?;
                host.register_method("calc.sub", |p: Bytes| async move { Ok(p) })?;
                Ok(())
            }
        }

        let host = ServiceHost::new();
        Calculator.register_methods(&host).unwrap();
        assert!(host.is_registered("calc.add"));
        assert!(host.is_registered("calc.sub"));
    }
}
