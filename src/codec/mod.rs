//! Codec module - serialization for structured framelet bodies.
//!
//! The config record, message headers, and error records travel as
//! MessagePack maps inside their framelets; user payloads stay opaque
//! bytes and never pass through this module.

mod msgpack;

pub use msgpack::MsgPackCodec;
