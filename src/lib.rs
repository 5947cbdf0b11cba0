//! # epoxy-transport
//!
//! Binary RPC transport over TCP: length-delimited, framelet-structured
//! frames carrying multiplexed request/response exchanges.
//!
//! ## Architecture
//!
//! - **Frame codec**: a frame is an ordered sequence of typed framelets
//!   with a length-prefixed count; reading and writing are bit-exact
//!   and malformed input fails deterministically.
//! - **Connection**: a config handshake (with optional rejection)
//!   followed by a bidirectional service phase; one reader task and one
//!   serialized writer task per connection.
//! - **Response map**: correlates outbound request ids with the
//!   one-shot slots awaiting their responses; at-most-once completion,
//!   failure propagation on connection loss.
//!
//! ## Example
//!
//! ```ignore
//! use bytes::Bytes;
//! use epoxy_transport::{EpoxyTransport, ErrorData};
//!
//! #[tokio::main]
//! async fn main() -> epoxy_transport::Result<()> {
//!     let transport = EpoxyTransport::builder().build();
//!
//!     let listener = transport.make_listener("127.0.0.1:0")?;
//!     listener.add_service(&EchoService)?;
//!     listener.start().await?;
//!
//!     let address = listener.listen_endpoint().unwrap().to_string();
//!     let conn = transport.connect(&address).await?;
//!
//!     let handle = conn.send_request("echo", Bytes::from_static(b"hi")).await?;
//!     let response = handle.response().await?;
//!     println!("{:?}", response.payload()?);
//!
//!     conn.stop().await;
//!     listener.stop().await;
//!     Ok(())
//! }
//! # struct EchoService;
//! # impl epoxy_transport::Service for EchoService {
//! #     fn register_methods(&self, host: &epoxy_transport::ServiceHost) -> epoxy_transport::Result<()> {
//! #         host.register_method("echo", |p: Bytes| async move { Ok::<_, ErrorData>(p) })
//! #     }
//! # }
//! ```

pub mod codec;
pub mod logging;
pub mod protocol;

mod address;
mod connection;
mod error;
mod layer;
mod listener;
mod message;
mod response_map;
mod service;
mod transport;
mod writer;

pub use address::{parse_address, DEFAULT_PORT};
pub use connection::{ConnectionRole, ConnectionState, EpoxyConnection};
pub use error::{EpoxyError, ProtocolViolation, Result};
pub use layer::LayerStack;
pub use listener::{ConnectedEventArgs, EpoxyListener};
pub use logging::{LogHandler, Severity};
pub use message::{error_code, ErrorData, Message};
pub use protocol::{Frame, Framelet, FrameletType};
pub use response_map::{ResponseHandle, ResponseMap};
pub use service::{BoxFuture, Handler, HandlerResult, Service, ServiceHost};
pub use transport::{EpoxyTransport, EpoxyTransportBuilder};
