//! TCP listener producing server-side connections.
//!
//! The listener owns the bound acceptor, the service host, and the set
//! of live server connections. Two observable events bracket each
//! connection's life: `Connected` fires after the wire handshake and
//! may reject the connection; `Disconnected` fires exactly once when a
//! connection that completed its handshake reaches its terminal state.
//!
//! Event callbacks are held in ordered lists under a mutex; invocation
//! snapshots the list and runs the callbacks outside the lock.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::connection::EpoxyConnection;
use crate::error::{EpoxyError, Result};
use crate::layer::LayerStack;
use crate::logging::{self, Severity};
use crate::message::ErrorData;
use crate::service::{Service, ServiceHost};

/// Arguments passed to `Connected` event handlers.
///
/// Setting [`disconnect_error`](Self::disconnect_error) rejects the
/// connection: the peer receives the error in a protocol-error frame
/// and the connection closes. The first handler to set it wins;
/// handlers after it are not invoked.
pub struct ConnectedEventArgs<'a> {
    /// The listener-side endpoint of the new connection.
    pub local_endpoint: SocketAddr,
    /// The peer's endpoint.
    pub remote_endpoint: SocketAddr,
    /// Set to reject the connection.
    pub disconnect_error: &'a mut Option<ErrorData>,
}

type ConnectedCallback = Arc<dyn Fn(&mut ConnectedEventArgs<'_>) + Send + Sync>;
type DisconnectedCallback = Arc<dyn Fn(&EpoxyConnection, Option<&ErrorData>) + Send + Sync>;

/// State shared between the listener handle, the accept task, and the
/// per-connection disconnect hooks.
struct ListenerShared {
    service_host: Arc<ServiceHost>,
    layer_stack: Option<Arc<dyn LayerStack>>,
    connections: Mutex<HashMap<SocketAddr, Arc<EpoxyConnection>>>,
    connected: Mutex<Vec<ConnectedCallback>>,
    disconnected: Mutex<Vec<DisconnectedCallback>>,
    listen_endpoint: Mutex<Option<SocketAddr>>,
}

/// Accepts inbound TCP connections and hosts services on them.
pub struct EpoxyListener {
    host: String,
    port: u16,
    shared: Arc<ListenerShared>,
    cancel_tx: watch::Sender<bool>,
    accept_task: Mutex<Option<JoinHandle<()>>>,
}

impl EpoxyListener {
    pub(crate) fn new(host: String, port: u16, layer_stack: Option<Arc<dyn LayerStack>>) -> Self {
        let (cancel_tx, _) = watch::channel(false);
        Self {
            host,
            port,
            shared: Arc::new(ListenerShared {
                service_host: Arc::new(ServiceHost::new()),
                layer_stack,
                connections: Mutex::new(HashMap::new()),
                connected: Mutex::new(Vec::new()),
                disconnected: Mutex::new(Vec::new()),
                listen_endpoint: Mutex::new(None),
            }),
            cancel_tx,
            accept_task: Mutex::new(None),
        }
    }

    /// Register a service's methods on this listener.
    pub fn add_service(&self, service: &dyn Service) -> Result<()> {
        service.register_methods(&self.shared.service_host)
    }

    /// Whether a handler is registered under `method`.
    pub fn is_registered(&self, method: &str) -> bool {
        self.shared.service_host.is_registered(method)
    }

    /// Install a `Connected` event handler.
    pub fn on_connected<F>(&self, callback: F)
    where
        F: Fn(&mut ConnectedEventArgs<'_>) + Send + Sync + 'static,
    {
        self.shared.connected.lock().push(Arc::new(callback));
    }

    /// Install a `Disconnected` event handler.
    pub fn on_disconnected<F>(&self, callback: F)
    where
        F: Fn(&EpoxyConnection, Option<&ErrorData>) + Send + Sync + 'static,
    {
        self.shared.disconnected.lock().push(Arc::new(callback));
    }

    /// The endpoint the listener is bound to. Available once
    /// [`start`](Self::start) returns; a requested port of 0 reports
    /// the OS-assigned port here.
    pub fn listen_endpoint(&self) -> Option<SocketAddr> {
        *self.shared.listen_endpoint.lock()
    }

    /// Number of live server connections.
    pub fn connection_count(&self) -> usize {
        self.shared.connections.lock().len()
    }

    /// Bind the acceptor and spawn the accept task.
    ///
    /// # Errors
    ///
    /// Fails with `InvalidOperation` if already started, or with the
    /// bind error.
    pub async fn start(&self) -> Result<()> {
        {
            let task = self.accept_task.lock();
            if task.is_some() {
                return Err(EpoxyError::InvalidOperation(
                    "listener already started".to_string(),
                ));
            }
        }

        let acceptor = TcpListener::bind((self.host.as_str(), self.port)).await?;
        let endpoint = acceptor.local_addr()?;

        let shared = self.shared.clone();
        let cancel_rx = self.cancel_tx.subscribe();
        {
            let mut slot = self.accept_task.lock();
            if slot.is_some() {
                // Lost a start/start race; the bound socket is dropped.
                return Err(EpoxyError::InvalidOperation(
                    "listener already started".to_string(),
                ));
            }
            *self.shared.listen_endpoint.lock() = Some(endpoint);
            *slot = Some(tokio::spawn(accept_loop(acceptor, shared, cancel_rx)));
        }

        logging::emit(Severity::Information, &format!("listening on {endpoint}"));
        Ok(())
    }

    /// Stop accepting and wait for the accept task to exit. Open
    /// connections are not closed here; shut them down individually.
    pub async fn stop(&self) {
        self.cancel_tx.send_replace(true);
        let task = self.accept_task.lock().take();
        if let Some(task) = task {
            let _ = task.await;
        }
    }
}

async fn accept_loop(
    acceptor: TcpListener,
    shared: Arc<ListenerShared>,
    mut cancel_rx: watch::Receiver<bool>,
) {
    loop {
        let accepted = tokio::select! {
            _ = cancel_rx.changed() => break,
            accepted = acceptor.accept() => accepted,
        };

        match accepted {
            Ok((socket, peer)) => {
                logging::emit(Severity::Debug, &format!("accepted connection from {peer}"));
                let shared = shared.clone();
                tokio::spawn(async move {
                    if let Err(e) = serve_connection(socket, shared).await {
                        logging::emit(
                            Severity::Warning,
                            &format!("connection from {peer} did not start: {e}"),
                        );
                    }
                });
            }
            Err(e) => {
                logging::emit(Severity::Fatal, &format!("accept failed: {e}"));
            }
        }
    }
    // Dropping the acceptor closes it; in-flight connections keep
    // their own sockets.
}

/// Handshake an accepted socket and register the resulting connection.
async fn serve_connection(socket: TcpStream, shared: Arc<ListenerShared>) -> Result<()> {
    let conn = EpoxyConnection::new_server(
        socket,
        shared.service_host.clone(),
        shared.layer_stack.clone(),
    )?;

    let gate_shared = shared.clone();
    let gate = Box::new(move |conn: &Arc<EpoxyConnection>| -> Option<ErrorData> {
        let snapshot: Vec<_> = gate_shared.connected.lock().clone();
        let mut disconnect_error = None;
        for callback in snapshot {
            let mut args = ConnectedEventArgs {
                local_endpoint: conn.local_endpoint(),
                remote_endpoint: conn.remote_endpoint(),
                disconnect_error: &mut disconnect_error,
            };
            callback(&mut args);
            if disconnect_error.is_some() {
                break;
            }
        }
        disconnect_error
    });

    let ready_shared = shared.clone();
    let ready = Box::new(move |conn: &Arc<EpoxyConnection>| {
        ready_shared
            .connections
            .lock()
            .insert(conn.remote_endpoint(), conn.clone());

        // The hook holds the connection weakly so the listener's set
        // stays the only strong reference from this side.
        let weak = Arc::downgrade(conn);
        let hook_shared = ready_shared.clone();
        conn.set_disconnect_hook(Box::new(move |error: Option<ErrorData>| {
            let Some(conn) = weak.upgrade() else {
                return;
            };
            hook_shared
                .connections
                .lock()
                .remove(&conn.remote_endpoint());
            let snapshot: Vec<_> = hook_shared.disconnected.lock().clone();
            for callback in snapshot {
                callback(&conn, error.as_ref());
            }
        }));
    });

    conn.start_server(gate, ready).await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_listener_unstarted_state() {
        let listener = EpoxyListener::new("127.0.0.1".to_string(), 0, None);
        assert!(listener.listen_endpoint().is_none());
        assert_eq!(listener.connection_count(), 0);
        assert!(!listener.is_registered("anything"));
    }

    #[tokio::test]
    async fn test_start_reports_assigned_port() {
        let listener = EpoxyListener::new("127.0.0.1".to_string(), 0, None);
        listener.start().await.unwrap();

        let endpoint = listener.listen_endpoint().unwrap();
        assert_ne!(endpoint.port(), 0);

        listener.stop().await;
    }

    #[tokio::test]
    async fn test_double_start_fails() {
        let listener = EpoxyListener::new("127.0.0.1".to_string(), 0, None);
        listener.start().await.unwrap();

        let second = listener.start().await;
        assert!(matches!(second, Err(EpoxyError::InvalidOperation(_))));

        listener.stop().await;
    }

    #[tokio::test]
    async fn test_stop_without_start_is_quiet() {
        let listener = EpoxyListener::new("127.0.0.1".to_string(), 0, None);
        listener.stop().await;
    }
}
