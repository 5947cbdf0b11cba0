//! Layer stack seam.
//!
//! A layer stack is a pluggable transform that runs around every
//! message a connection sends or receives. On the send side it may
//! produce bytes that travel in a LayerData framelet between the
//! headers and the payload; on the receive side it observes the
//! headers and whatever LayerData the peer attached.
//!
//! The transport itself ships no layers. A connection without a stack
//! sends no LayerData framelet and ignores none arriving.

use bytes::Bytes;

use crate::error::Result;
use crate::protocol::EpoxyHeaders;

/// Pre/post-send transform pipeline applied to every message.
pub trait LayerStack: Send + Sync + 'static {
    /// Called before a message is written.
    ///
    /// Returning `Ok(Some(bytes))` attaches a LayerData framelet;
    /// `Ok(None)` attaches nothing. An error aborts the send.
    fn on_send(&self, headers: &EpoxyHeaders) -> Result<Option<Bytes>>;

    /// Called when a message arrives, before it is dispatched.
    ///
    /// `layer_data` is the peer's LayerData framelet contents, if any.
    /// An error on a request produces an error response; an error on a
    /// response resolves the pending exchange with a protocol error.
    fn on_receive(&self, headers: &EpoxyHeaders, layer_data: Option<&[u8]>) -> Result<()>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingStack {
        sends: AtomicUsize,
        receives: AtomicUsize,
    }

    impl LayerStack for CountingStack {
        fn on_send(&self, _headers: &EpoxyHeaders) -> Result<Option<Bytes>> {
            self.sends.fetch_add(1, Ordering::SeqCst);
            Ok(Some(Bytes::from_static(b"trace")))
        }

        fn on_receive(&self, _headers: &EpoxyHeaders, layer_data: Option<&[u8]>) -> Result<()> {
            assert_eq!(layer_data, Some(&b"trace"[..]));
            self.receives.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    #[test]
    fn test_layer_stack_contract() {
        let stack = CountingStack {
            sends: AtomicUsize::new(0),
            receives: AtomicUsize::new(0),
        };
        let headers = EpoxyHeaders::request(1, "m");

        let data = stack.on_send(&headers).unwrap().unwrap();
        stack.on_receive(&headers, Some(&data)).unwrap();

        assert_eq!(stack.sends.load(Ordering::SeqCst), 1);
        assert_eq!(stack.receives.load(Ordering::SeqCst), 1);
    }
}
