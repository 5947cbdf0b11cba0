//! Transport factory.
//!
//! The transport is a thin shell: it holds the process-wide layer
//! stack and constructs client connections and listeners from address
//! strings.

use std::sync::Arc;

use tokio::net::TcpStream;

use crate::address::parse_address;
use crate::connection::EpoxyConnection;
use crate::error::Result;
use crate::layer::LayerStack;
use crate::listener::EpoxyListener;
use crate::logging::{self, Severity};

/// Builder for [`EpoxyTransport`].
#[derive(Default)]
pub struct EpoxyTransportBuilder {
    layer_stack: Option<Arc<dyn LayerStack>>,
}

impl EpoxyTransportBuilder {
    /// Create a builder with no layer stack.
    pub fn new() -> Self {
        Self::default()
    }

    /// Install the layer stack applied to every connection this
    /// transport creates.
    pub fn layer_stack(mut self, stack: Arc<dyn LayerStack>) -> Self {
        self.layer_stack = Some(stack);
        self
    }

    /// Build the transport.
    pub fn build(self) -> EpoxyTransport {
        EpoxyTransport {
            layer_stack: self.layer_stack,
        }
    }
}

/// Factory for client connections and listeners.
pub struct EpoxyTransport {
    layer_stack: Option<Arc<dyn LayerStack>>,
}

impl EpoxyTransport {
    /// Create a builder.
    pub fn builder() -> EpoxyTransportBuilder {
        EpoxyTransportBuilder::new()
    }

    /// Connect to `address` (`host-or-ip[:port]`, port defaulting to
    /// [`DEFAULT_PORT`](crate::DEFAULT_PORT)) and drive the handshake.
    ///
    /// # Errors
    ///
    /// Fails with `InvalidArgument` on a malformed address, with the
    /// socket error if the connect fails, and with
    /// `HandshakeRejected` if the server turns the connection away.
    pub async fn connect(&self, address: &str) -> Result<Arc<EpoxyConnection>> {
        let (host, port) = parse_address(address)?;
        let stream = TcpStream::connect((host.as_str(), port)).await?;

        let conn = EpoxyConnection::new_client(stream, self.layer_stack.clone())?;
        conn.start_client().await?;

        logging::emit(
            Severity::Information,
            &format!(
                "connected {} -> {}",
                conn.local_endpoint(),
                conn.remote_endpoint()
            ),
        );
        Ok(conn)
    }

    /// Construct a listener for `address`. The listener binds when
    /// [`start`](EpoxyListener::start) is called.
    ///
    /// # Errors
    ///
    /// Fails with `InvalidArgument` on a malformed address.
    pub fn make_listener(&self, address: &str) -> Result<EpoxyListener> {
        let (host, port) = parse_address(address)?;
        Ok(EpoxyListener::new(host, port, self.layer_stack.clone()))
    }

    /// Stop the transport.
    ///
    /// Outstanding connections and listeners are not tracked by the
    /// transport and keep running; shut them down individually.
    pub async fn stop(&self) -> Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::EpoxyError;

    #[test]
    fn test_builder_without_layers() {
        let transport = EpoxyTransport::builder().build();
        assert!(transport.layer_stack.is_none());
    }

    #[test]
    fn test_make_listener_rejects_bad_address() {
        let transport = EpoxyTransport::builder().build();
        let result = transport.make_listener("host:notaport");
        assert!(matches!(result, Err(EpoxyError::InvalidArgument(_))));
    }

    #[tokio::test]
    async fn test_connect_rejects_bad_address() {
        let transport = EpoxyTransport::builder().build();
        let result = transport.connect("").await;
        assert!(matches!(result, Err(EpoxyError::InvalidArgument(_))));
    }

    #[tokio::test]
    async fn test_stop_is_a_noop() {
        let transport = EpoxyTransport::builder().build();
        transport.stop().await.unwrap();
    }
}
