//! Connection state machine.
//!
//! A connection begins with the config handshake, then enters a
//! bidirectional service phase where requests, responses, and events
//! interleave, and ends with orderly or abrupt shutdown:
//!
//! ```text
//! Created -> ClientSendConfig | ServerAwaitConfig
//!         -> ClientAwaitConfig | ServerSendConfig
//!         -> Connected
//!         -> SendProtocolError (optional)
//!         -> Disconnecting
//!         -> Disconnected
//! ```
//!
//! One task reads the socket (the read loop, which also runs terminal
//! cleanup exactly once); the writer task serializes all output. Both
//! halves of the socket are owned here exclusively.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use bytes::Bytes;
use parking_lot::Mutex;
use tokio::net::tcp::OwnedReadHalf;
use tokio::net::TcpStream;
use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::codec::MsgPackCodec;
use crate::error::{EpoxyError, ProtocolViolation, Result};
use crate::layer::LayerStack;
use crate::logging::{self, Severity};
use crate::message::{error_code, ErrorData, Message};
use crate::protocol::{
    ConnectionConfig, EpoxyHeaders, Frame, Framelet, FrameletType, PayloadType,
};
use crate::response_map::{ResponseHandle, ResponseMap};
use crate::service::{HandlerResult, ServiceHost};
use crate::writer::{spawn_writer_task, FrameWriter};

/// Which side of the connection this endpoint is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionRole {
    /// Originated the connection; owns the response map.
    Client,
    /// Accepted the connection; owns the service host reference.
    Server,
}

/// Lifecycle state of a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// Socket owned, handshake not yet started.
    Created,
    /// Client is writing its config frame.
    ClientSendConfig,
    /// Client is waiting for the server's config or rejection.
    ClientAwaitConfig,
    /// Server is waiting for the client's config frame.
    ServerAwaitConfig,
    /// Server is writing its config frame.
    ServerSendConfig,
    /// Service phase: requests, responses, and events flow.
    Connected,
    /// A protocol-error frame is being sent before termination.
    SendProtocolError,
    /// Cleanup in progress.
    Disconnecting,
    /// Terminal.
    Disconnected,
}

/// Invoked once when the connection reaches its terminal state.
pub(crate) type DisconnectHook = Box<dyn FnOnce(Option<ErrorData>) + Send>;

/// Decides whether an accepted connection is allowed to proceed.
/// Returning an error rejects the handshake.
pub(crate) type ConnectedGate<'a> =
    Box<dyn FnOnce(&Arc<EpoxyConnection>) -> Option<ErrorData> + Send + 'a>;

/// Runs after the server handshake succeeds, before frames are
/// dispatched. The listener uses it to track the connection and to
/// install the disconnect hook.
pub(crate) type ReadyHook<'a> = Box<dyn FnOnce(&Arc<EpoxyConnection>) + Send + 'a>;

/// A multiplexed Epoxy connection over TCP.
pub struct EpoxyConnection {
    role: ConnectionRole,
    local: std::net::SocketAddr,
    remote: std::net::SocketAddr,
    state: Mutex<ConnectionState>,
    writer: FrameWriter,
    writer_task: Mutex<Option<JoinHandle<()>>>,
    read_half: Mutex<Option<OwnedReadHalf>>,
    response_map: Option<Arc<ResponseMap>>,
    service_host: Option<Arc<ServiceHost>>,
    layer_stack: Option<Arc<dyn LayerStack>>,
    next_request_id: AtomicU64,
    cleanup_done: AtomicBool,
    disconnect_hook: Mutex<Option<DisconnectHook>>,
    term_tx: watch::Sender<bool>,
}

/// What the read loop does after handling one frame.
enum FrameOutcome {
    /// Keep reading.
    Continue,
    /// Peer announced an orderly shutdown.
    PeerShutDown,
    /// Peer signalled a protocol failure.
    PeerError(ErrorData),
    /// The inbound frame violated the protocol on our side.
    LocalViolation(ProtocolViolation),
}

/// A message frame decomposed into its parts.
struct InboundMessage {
    headers: EpoxyHeaders,
    layer_data: Option<Bytes>,
    payload: Bytes,
}

impl EpoxyConnection {
    fn new(
        stream: TcpStream,
        role: ConnectionRole,
        service_host: Option<Arc<ServiceHost>>,
        layer_stack: Option<Arc<dyn LayerStack>>,
    ) -> Result<Arc<Self>> {
        let local = stream.local_addr()?;
        let remote = stream.peer_addr()?;
        let _ = stream.set_nodelay(true);

        let (read_half, write_half) = stream.into_split();
        let (writer, writer_task) = spawn_writer_task(write_half);
        let (term_tx, _term_rx) = watch::channel(false);

        let response_map = match role {
            ConnectionRole::Client => Some(Arc::new(ResponseMap::new())),
            ConnectionRole::Server => None,
        };

        Ok(Arc::new(Self {
            role,
            local,
            remote,
            state: Mutex::new(ConnectionState::Created),
            writer,
            writer_task: Mutex::new(Some(writer_task)),
            read_half: Mutex::new(Some(read_half)),
            response_map,
            service_host,
            layer_stack,
            next_request_id: AtomicU64::new(0),
            cleanup_done: AtomicBool::new(false),
            disconnect_hook: Mutex::new(None),
            term_tx,
        }))
    }

    /// Wrap an outbound TCP stream as a client-side connection. The
    /// handshake has not run yet; `start_client` drives it.
    pub(crate) fn new_client(
        stream: TcpStream,
        layer_stack: Option<Arc<dyn LayerStack>>,
    ) -> Result<Arc<Self>> {
        Self::new(stream, ConnectionRole::Client, None, layer_stack)
    }

    /// Wrap an accepted TCP stream as a server-side connection.
    pub(crate) fn new_server(
        stream: TcpStream,
        service_host: Arc<ServiceHost>,
        layer_stack: Option<Arc<dyn LayerStack>>,
    ) -> Result<Arc<Self>> {
        Self::new(stream, ConnectionRole::Server, Some(service_host), layer_stack)
    }

    /// This endpoint's address.
    pub fn local_endpoint(&self) -> std::net::SocketAddr {
        self.local
    }

    /// The peer's address.
    pub fn remote_endpoint(&self) -> std::net::SocketAddr {
        self.remote
    }

    /// Which side of the connection this is.
    pub fn role(&self) -> ConnectionRole {
        self.role
    }

    /// Current lifecycle state.
    pub fn state(&self) -> ConnectionState {
        *self.state.lock()
    }

    /// Whether the connection is in the service phase.
    pub fn is_connected(&self) -> bool {
        self.state() == ConnectionState::Connected
    }

    fn set_state(&self, state: ConnectionState) {
        *self.state.lock() = state;
    }

    fn take_read_half(&self) -> Result<OwnedReadHalf> {
        self.read_half.lock().take().ok_or_else(|| {
            EpoxyError::InvalidOperation("connection already started".to_string())
        })
    }

    pub(crate) fn set_disconnect_hook(&self, hook: DisconnectHook) {
        *self.disconnect_hook.lock() = Some(hook);
    }

    // ------------------------------------------------------------------
    // Handshake
    // ------------------------------------------------------------------

    /// Drive the client side of the handshake, then enter the service
    /// phase.
    pub(crate) async fn start_client(self: &Arc<Self>) -> Result<()> {
        let mut reader = self.take_read_half()?;

        self.set_state(ConnectionState::ClientSendConfig);
        let config = ConnectionConfig::default();
        if let Err(e) = self.writer.send(&config_frame(&config)?).await {
            self.cleanup(Some(ErrorData::new(
                error_code::TRANSPORT_ERROR,
                e.to_string(),
            )))
            .await;
            return Err(e);
        }

        self.set_state(ConnectionState::ClientAwaitConfig);
        let frame = match Frame::read_from(&mut reader).await {
            Ok(Some(frame)) => frame,
            Ok(None) => {
                let violation = ProtocolViolation::UnexpectedEndOfStream;
                self.cleanup(Some(violation_error(&violation))).await;
                return Err(violation.into());
            }
            Err(e) => {
                self.cleanup(Some(ErrorData::new(
                    error_code::TRANSPORT_ERROR,
                    e.to_string(),
                )))
                .await;
                return Err(e);
            }
        };

        match expect_handshake_frame(&frame) {
            Ok(peer_config) => {
                logging::emit(
                    Severity::Debug,
                    &format!(
                        "{} -> {}: handshake complete, peer protocol version {}",
                        self.local, self.remote, peer_config.protocol_version
                    ),
                );
            }
            Err(EpoxyError::Protocol(ProtocolViolation::HandshakeRejected(error))) => {
                self.cleanup(Some(error.clone())).await;
                return Err(ProtocolViolation::HandshakeRejected(error).into());
            }
            Err(e) => {
                self.cleanup(Some(ErrorData::new(
                    error_code::PROTOCOL_ERROR,
                    e.to_string(),
                )))
                .await;
                return Err(e);
            }
        }

        self.set_state(ConnectionState::Connected);
        self.spawn_read_loop(reader);
        Ok(())
    }

    /// Drive the server side of the handshake, then enter the service
    /// phase. `gate` runs the listener's Connected event; `ready` runs
    /// once the handshake is accepted, before any frame is dispatched.
    pub(crate) async fn start_server(
        self: &Arc<Self>,
        gate: ConnectedGate<'_>,
        ready: ReadyHook<'_>,
    ) -> Result<()> {
        let mut reader = self.take_read_half()?;

        self.set_state(ConnectionState::ServerAwaitConfig);
        let frame = match Frame::read_from(&mut reader).await {
            Ok(Some(frame)) => frame,
            Ok(None) => {
                let violation = ProtocolViolation::UnexpectedEndOfStream;
                self.cleanup(Some(violation_error(&violation))).await;
                return Err(violation.into());
            }
            Err(e) => {
                let code = match &e {
                    EpoxyError::Protocol(violation) => {
                        self.send_protocol_error(violation).await;
                        error_code::PROTOCOL_ERROR
                    }
                    _ => error_code::TRANSPORT_ERROR,
                };
                self.cleanup(Some(ErrorData::new(code, e.to_string()))).await;
                return Err(e);
            }
        };

        let framelets = frame.framelets();
        let config: ConnectionConfig = if framelets.len() == 1
            && framelets[0].framelet_type() == FrameletType::EpoxyConfig
        {
            match MsgPackCodec::decode(framelets[0].contents()) {
                Ok(config) => config,
                Err(_) => {
                    let violation = ProtocolViolation::MalformedFramelet("EpoxyConfig");
                    self.send_protocol_error(&violation).await;
                    self.cleanup(Some(violation_error(&violation))).await;
                    return Err(violation.into());
                }
            }
        } else {
            let violation = ProtocolViolation::UnexpectedFrameShape;
            self.send_protocol_error(&violation).await;
            self.cleanup(Some(violation_error(&violation))).await;
            return Err(violation.into());
        };

        logging::emit(
            Severity::Debug,
            &format!(
                "{} <- {}: client config, protocol version {}",
                self.local, self.remote, config.protocol_version
            ),
        );

        if let Some(error) = gate(self) {
            self.set_state(ConnectionState::SendProtocolError);
            if let Ok(frame) = protocol_error_frame(&error) {
                let _ = self.writer.send(&frame).await;
            }
            self.cleanup(Some(error.clone())).await;
            return Err(ProtocolViolation::HandshakeRejected(error).into());
        }

        self.set_state(ConnectionState::ServerSendConfig);
        if let Err(e) = self.writer.send(&config_frame(&ConnectionConfig::default())?).await {
            self.cleanup(Some(ErrorData::new(
                error_code::TRANSPORT_ERROR,
                e.to_string(),
            )))
            .await;
            return Err(e);
        }

        self.set_state(ConnectionState::Connected);
        ready(self);
        self.spawn_read_loop(reader);
        Ok(())
    }

    // ------------------------------------------------------------------
    // Service phase
    // ------------------------------------------------------------------

    fn spawn_read_loop(self: &Arc<Self>, reader: OwnedReadHalf) {
        let conn = self.clone();
        tokio::spawn(async move {
            conn.read_loop(reader).await;
        });
    }

    async fn read_loop(self: Arc<Self>, mut reader: OwnedReadHalf) {
        let error = loop {
            let frame = match Frame::read_from(&mut reader).await {
                Ok(Some(frame)) => frame,
                // Peer closed at a frame boundary.
                Ok(None) => break None,
                Err(EpoxyError::Protocol(violation)) => {
                    self.send_protocol_error(&violation).await;
                    break Some(violation_error(&violation));
                }
                Err(e) => {
                    break Some(ErrorData::new(error_code::TRANSPORT_ERROR, e.to_string()))
                }
            };

            match self.handle_frame(frame) {
                FrameOutcome::Continue => {}
                FrameOutcome::PeerShutDown => break None,
                FrameOutcome::PeerError(error) => {
                    logging::emit(
                        Severity::Error,
                        &format!("{} <- {}: peer reported {error}", self.local, self.remote),
                    );
                    break Some(error);
                }
                FrameOutcome::LocalViolation(violation) => {
                    self.send_protocol_error(&violation).await;
                    break Some(violation_error(&violation));
                }
            }
        };

        self.cleanup(error).await;
    }

    fn handle_frame(self: &Arc<Self>, frame: Frame) -> FrameOutcome {
        let framelets = frame.framelets();
        if framelets.len() == 1 && framelets[0].framelet_type() == FrameletType::ProtocolError {
            return match MsgPackCodec::decode::<ErrorData>(framelets[0].contents()) {
                Ok(error) if error.error_code == error_code::CONNECTION_SHUT_DOWN => {
                    FrameOutcome::PeerShutDown
                }
                Ok(error) => FrameOutcome::PeerError(error),
                Err(_) => {
                    FrameOutcome::LocalViolation(ProtocolViolation::MalformedFramelet(
                        "ProtocolError",
                    ))
                }
            };
        }

        let inbound = match parse_message_frame(&frame) {
            Ok(inbound) => inbound,
            Err(violation) => return FrameOutcome::LocalViolation(violation),
        };

        match inbound.headers.payload_type {
            PayloadType::Response => self.deliver_response(inbound),
            PayloadType::Request => match self.service_host.clone() {
                Some(host) => {
                    self.spawn_request_dispatch(host, inbound);
                    FrameOutcome::Continue
                }
                None => FrameOutcome::LocalViolation(ProtocolViolation::UnexpectedFrameShape),
            },
            PayloadType::Event => {
                match self.service_host.clone() {
                    Some(host) => self.spawn_event_dispatch(host, inbound),
                    None => logging::emit(
                        Severity::Warning,
                        &format!(
                            "{} <- {}: discarding event {:?}, no services hosted",
                            self.local, self.remote, inbound.headers.method_name
                        ),
                    ),
                }
                FrameOutcome::Continue
            }
        }
    }

    fn deliver_response(&self, inbound: InboundMessage) -> FrameOutcome {
        let Some(map) = &self.response_map else {
            return FrameOutcome::LocalViolation(ProtocolViolation::UnexpectedFrameShape);
        };

        let headers = &inbound.headers;
        let message = if let Err(e) = self.layer_on_receive(headers, inbound.layer_data.as_deref())
        {
            Message::from_error(ErrorData::new(
                error_code::PROTOCOL_ERROR,
                format!("layer rejected response: {e}"),
            ))
        } else if headers.is_error {
            match MsgPackCodec::decode::<ErrorData>(&inbound.payload) {
                Ok(error) => Message::from_error(error),
                Err(_) => Message::from_error(ErrorData::new(
                    error_code::PROTOCOL_ERROR,
                    "malformed error response",
                )),
            }
        } else {
            Message::from_payload(inbound.payload)
        };

        if !map.complete(headers.request_id, message) {
            logging::emit(
                Severity::Warning,
                &format!(
                    "{} <- {}: discarding response for unknown request {}",
                    self.local, self.remote, headers.request_id
                ),
            );
        }
        FrameOutcome::Continue
    }

    fn spawn_request_dispatch(self: &Arc<Self>, host: Arc<ServiceHost>, inbound: InboundMessage) {
        let conn = self.clone();
        tokio::spawn(async move {
            let headers = inbound.headers.clone();
            let result = conn.invoke_handler(&host, inbound).await;
            if let Err(e) = conn
                .send_response(headers.request_id, &headers.method_name, result)
                .await
            {
                logging::emit(
                    Severity::Error,
                    &format!(
                        "{} -> {}: failed to send response for request {}: {e}",
                        conn.local, conn.remote, headers.request_id
                    ),
                );
            }
        });
    }

    fn spawn_event_dispatch(self: &Arc<Self>, host: Arc<ServiceHost>, inbound: InboundMessage) {
        let conn = self.clone();
        tokio::spawn(async move {
            let method = inbound.headers.method_name.clone();
            match conn.invoke_handler(&host, inbound).await {
                Ok(_) => {}
                Err(error) => logging::emit(
                    Severity::Warning,
                    &format!("{} <- {}: event {method:?} failed: {error}", conn.local, conn.remote),
                ),
            }
        });
    }

    async fn invoke_handler(&self, host: &ServiceHost, inbound: InboundMessage) -> HandlerResult {
        let headers = &inbound.headers;
        if let Err(e) = self.layer_on_receive(headers, inbound.layer_data.as_deref()) {
            return Err(ErrorData::new(
                error_code::PROTOCOL_ERROR,
                format!("layer rejected message: {e}"),
            ));
        }

        let Some(handler) = host.get(&headers.method_name) else {
            return Err(ErrorData::method_not_found(&headers.method_name));
        };

        // The handler runs in its own task so a panic is contained and
        // surfaces as an application error instead of a lost response.
        match tokio::spawn(handler.call(inbound.payload)).await {
            Ok(result) => result,
            Err(e) => {
                logging::emit(
                    Severity::Error,
                    &format!("handler for {:?} panicked: {e}", headers.method_name),
                );
                Err(ErrorData::new(
                    error_code::INTERNAL_SERVER_ERROR,
                    format!("handler for {:?} failed", headers.method_name),
                ))
            }
        }
    }

    async fn send_response(
        &self,
        request_id: u64,
        method_name: &str,
        result: HandlerResult,
    ) -> Result<()> {
        let (is_error, body) = match result {
            Ok(body) if body.is_empty() => (
                true,
                Bytes::from(MsgPackCodec::encode(&ErrorData::new(
                    error_code::INTERNAL_SERVER_ERROR,
                    format!("handler for {method_name:?} returned an empty payload"),
                ))?),
            ),
            Ok(body) => (false, body),
            Err(error) => (true, Bytes::from(MsgPackCodec::encode(&error)?)),
        };

        let headers = EpoxyHeaders::response(request_id, method_name, is_error);
        let frame = self.message_frame(&headers, body)?;
        self.writer.send(&frame).await
    }

    // ------------------------------------------------------------------
    // Outbound API
    // ------------------------------------------------------------------

    /// Send a request and return the handle its response resolves.
    ///
    /// The handle is also resolved (with the connection-shut-down
    /// error) if the connection terminates first. Compose timeouts
    /// around [`ResponseHandle::response`].
    ///
    /// # Errors
    ///
    /// Fails with `InvalidOperation` on a server-side connection, with
    /// `InvalidArgument` on an empty payload, and with the write error
    /// if the frame cannot be queued.
    pub async fn send_request(&self, method: &str, payload: Bytes) -> Result<ResponseHandle> {
        let map = self.response_map.as_ref().ok_or_else(|| {
            EpoxyError::InvalidOperation(
                "server-side connections cannot originate requests".to_string(),
            )
        })?;

        let request_id = self.next_request_id.fetch_add(1, Ordering::Relaxed) + 1;
        let headers = EpoxyHeaders::request(request_id, method);
        let frame = self.message_frame(&headers, payload)?;

        let handle = map.add(request_id)?;
        if let Err(e) = self.writer.send(&frame).await {
            map.complete(
                request_id,
                Message::from_error(ErrorData::new(error_code::TRANSPORT_ERROR, e.to_string())),
            );
            return Err(e);
        }
        Ok(handle)
    }

    /// Send a fire-and-forget event. No response is ever delivered.
    ///
    /// # Errors
    ///
    /// Fails with `InvalidArgument` on an empty payload, and with the
    /// write error if the frame cannot be queued.
    pub async fn send_event(&self, method: &str, payload: Bytes) -> Result<()> {
        let request_id = self.next_request_id.fetch_add(1, Ordering::Relaxed) + 1;
        let headers = EpoxyHeaders::event(request_id, method);
        let frame = self.message_frame(&headers, payload)?;
        self.writer.send(&frame).await
    }

    fn message_frame(&self, headers: &EpoxyHeaders, payload: Bytes) -> Result<Frame> {
        if payload.is_empty() {
            return Err(EpoxyError::InvalidArgument(
                "message payload must not be empty".to_string(),
            ));
        }

        let layer_data = match &self.layer_stack {
            Some(stack) => stack.on_send(headers)?,
            None => None,
        };

        let mut frame = Frame::new();
        frame.append(Framelet::new(
            FrameletType::EpoxyHeaders,
            Bytes::from(MsgPackCodec::encode(headers)?),
        )?)?;
        if let Some(data) = layer_data {
            if !data.is_empty() {
                frame.append(Framelet::new(FrameletType::LayerData, data)?)?;
            }
        }
        frame.append(Framelet::new(FrameletType::PayloadData, payload)?)?;
        Ok(frame)
    }

    fn layer_on_receive(&self, headers: &EpoxyHeaders, layer_data: Option<&[u8]>) -> Result<()> {
        match &self.layer_stack {
            Some(stack) => stack.on_receive(headers, layer_data),
            None => Ok(()),
        }
    }

    // ------------------------------------------------------------------
    // Shutdown
    // ------------------------------------------------------------------

    /// Orderly shutdown: announce it to the peer, close the write
    /// half, drain inbound frames until the peer closes, then finish
    /// cleanup. Idempotent; returns once the connection is terminal.
    pub async fn stop(&self) {
        let announce = {
            let mut state = self.state.lock();
            match *state {
                ConnectionState::Disconnecting | ConnectionState::Disconnected => false,
                _ => {
                    *state = ConnectionState::Disconnecting;
                    true
                }
            }
        };

        if announce {
            if let Ok(frame) = protocol_error_frame(&ErrorData::connection_shut_down()) {
                let _ = self.writer.send(&frame).await;
            }
            self.writer.close().await;
        }

        self.wait_terminated().await;
    }

    async fn wait_terminated(&self) {
        let mut term_rx = self.term_tx.subscribe();
        if *term_rx.borrow() {
            return;
        }
        while term_rx.changed().await.is_ok() {
            if *term_rx.borrow() {
                return;
            }
        }
    }

    async fn send_protocol_error(&self, violation: &ProtocolViolation) {
        self.set_state(ConnectionState::SendProtocolError);
        if let Ok(frame) = protocol_error_frame(&violation_error(violation)) {
            let _ = self.writer.send(&frame).await;
        }
    }

    /// Terminal cleanup. Runs exactly once regardless of how many
    /// paths race into it.
    async fn cleanup(&self, error: Option<ErrorData>) {
        if self.cleanup_done.swap(true, Ordering::SeqCst) {
            return;
        }

        self.set_state(ConnectionState::Disconnecting);
        self.writer.close().await;
        let writer_task = self.writer_task.lock().take();
        if let Some(task) = writer_task {
            let _ = task.await;
        }

        if let Some(map) = &self.response_map {
            map.shutdown();
        }

        self.set_state(ConnectionState::Disconnected);

        match &error {
            Some(e) => logging::emit(
                Severity::Information,
                &format!("{} -> {}: disconnected: {e}", self.local, self.remote),
            ),
            None => logging::emit(
                Severity::Information,
                &format!("{} -> {}: disconnected", self.local, self.remote),
            ),
        }

        let hook = self.disconnect_hook.lock().take();
        if let Some(hook) = hook {
            hook(error);
        }

        // send_replace stores the value even with no receiver yet, so a
        // later stop() still observes the terminal state.
        self.term_tx.send_replace(true);
    }
}

impl std::fmt::Debug for EpoxyConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EpoxyConnection")
            .field("role", &self.role)
            .field("local", &self.local)
            .field("remote", &self.remote)
            .field("state", &self.state())
            .finish()
    }
}

fn violation_error(violation: &ProtocolViolation) -> ErrorData {
    ErrorData::new(error_code::PROTOCOL_ERROR, violation.to_string())
}

/// Build the handshake frame carrying `config`.
fn config_frame(config: &ConnectionConfig) -> Result<Frame> {
    Ok(Frame::with_framelet(Framelet::new(
        FrameletType::EpoxyConfig,
        Bytes::from(MsgPackCodec::encode(config)?),
    )?))
}

/// Build a `[ProtocolError]` frame carrying `error`.
fn protocol_error_frame(error: &ErrorData) -> Result<Frame> {
    Ok(Frame::with_framelet(Framelet::new(
        FrameletType::ProtocolError,
        Bytes::from(MsgPackCodec::encode(error)?),
    )?))
}

/// Interpret the server's handshake reply: its config, or a rejection.
fn expect_handshake_frame(frame: &Frame) -> Result<ConnectionConfig> {
    let framelets = frame.framelets();
    if framelets.len() != 1 {
        return Err(ProtocolViolation::UnexpectedFrameShape.into());
    }

    let framelet = &framelets[0];
    match framelet.framelet_type() {
        FrameletType::EpoxyConfig => MsgPackCodec::decode(framelet.contents())
            .map_err(|_| ProtocolViolation::MalformedFramelet("EpoxyConfig").into()),
        FrameletType::ProtocolError => {
            let error: ErrorData = MsgPackCodec::decode(framelet.contents())
                .map_err(|_| ProtocolViolation::MalformedFramelet("ProtocolError"))?;
            Err(ProtocolViolation::HandshakeRejected(error).into())
        }
        _ => Err(ProtocolViolation::UnexpectedFrameShape.into()),
    }
}

/// Decompose a service-phase frame into headers, optional layer data,
/// and payload. Shapes other than `[EpoxyHeaders, LayerData?,
/// PayloadData]` are violations.
fn parse_message_frame(frame: &Frame) -> std::result::Result<InboundMessage, ProtocolViolation> {
    let framelets = frame.framelets();
    let valid_shape = matches!(
        framelets
            .iter()
            .map(Framelet::framelet_type)
            .collect::<Vec<_>>()
            .as_slice(),
        [FrameletType::EpoxyHeaders, FrameletType::PayloadData]
            | [
                FrameletType::EpoxyHeaders,
                FrameletType::LayerData,
                FrameletType::PayloadData
            ]
    );
    if !valid_shape {
        return Err(ProtocolViolation::UnexpectedFrameShape);
    }

    let headers: EpoxyHeaders = MsgPackCodec::decode(framelets[0].contents())
        .map_err(|_| ProtocolViolation::MalformedFramelet("EpoxyHeaders"))?;

    let (layer_data, payload) = if framelets.len() == 3 {
        (
            Some(framelets[1].contents().clone()),
            framelets[2].contents().clone(),
        )
    } else {
        (None, framelets[1].contents().clone())
    };

    Ok(InboundMessage {
        headers,
        layer_data,
        payload,
    })
}
