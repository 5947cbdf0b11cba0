//! Message envelope and wire-level error record.
//!
//! A [`Message`] is what a completed exchange resolves to: either the
//! peer's payload bytes or an [`ErrorData`] record. The envelope never
//! coerces one side into the other; asking for the wrong side is an
//! [`InvalidOperation`](crate::EpoxyError::InvalidOperation) failure.

use bytes::Bytes;
use serde::{Deserialize, Serialize};

use crate::error::{EpoxyError, Result};

/// Well-known error codes carried in [`ErrorData::error_code`].
///
/// The space is open: applications may use any other value for their own
/// errors.
pub mod error_code {
    /// The connection shut down before the exchange completed.
    pub const CONNECTION_SHUT_DOWN: i32 = 1;
    /// The requested method is not registered on the receiving side.
    pub const METHOD_NOT_FOUND: i32 = 2;
    /// A socket-level failure interrupted the exchange.
    pub const TRANSPORT_ERROR: i32 = 3;
    /// The peer violated the wire protocol.
    pub const PROTOCOL_ERROR: i32 = 4;
    /// The handler failed in a way it could not report itself.
    pub const INTERNAL_SERVER_ERROR: i32 = 5;
}

/// Error record as it travels on the wire.
///
/// Serialized with MessagePack into ProtocolError framelets and into the
/// PayloadData framelet of error responses.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorData {
    /// Numeric error code, see [`error_code`] for well-known values.
    pub error_code: i32,
    /// Human-readable description.
    #[serde(default)]
    pub message: String,
}

impl ErrorData {
    /// Create a new error record.
    pub fn new(error_code: i32, message: impl Into<String>) -> Self {
        Self {
            error_code,
            message: message.into(),
        }
    }

    /// The error every pending exchange resolves with when its
    /// connection shuts down.
    pub fn connection_shut_down() -> Self {
        Self::new(error_code::CONNECTION_SHUT_DOWN, "connection shut down")
    }

    /// The error returned for a request naming an unregistered method.
    pub fn method_not_found(method: &str) -> Self {
        Self::new(
            error_code::METHOD_NOT_FOUND,
            format!("method not found: {method}"),
        )
    }
}

impl std::fmt::Display for ErrorData {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "error {}: {}", self.error_code, self.message)
    }
}

/// The resolution of an exchange: a user payload or an error.
#[derive(Debug, Clone, PartialEq)]
pub enum Message {
    /// Raw payload bytes; the transport never interprets them.
    Payload(Bytes),
    /// An error record, from the peer or synthesized locally.
    Error(ErrorData),
}

impl Message {
    /// Wrap payload bytes.
    pub fn from_payload(payload: Bytes) -> Self {
        Message::Payload(payload)
    }

    /// Wrap an error record.
    pub fn from_error(error: ErrorData) -> Self {
        Message::Error(error)
    }

    /// Whether this message carries an error.
    #[inline]
    pub fn is_error(&self) -> bool {
        matches!(self, Message::Error(_))
    }

    /// Borrow the payload bytes.
    ///
    /// # Errors
    ///
    /// Fails with `InvalidOperation` if this message is an error.
    pub fn payload(&self) -> Result<&Bytes> {
        match self {
            Message::Payload(p) => Ok(p),
            Message::Error(e) => Err(EpoxyError::InvalidOperation(format!(
                "message is an error, not a payload: {e}"
            ))),
        }
    }

    /// Borrow the error record.
    ///
    /// # Errors
    ///
    /// Fails with `InvalidOperation` if this message is a payload.
    pub fn error(&self) -> Result<&ErrorData> {
        match self {
            Message::Error(e) => Ok(e),
            Message::Payload(_) => Err(EpoxyError::InvalidOperation(
                "message is a payload, not an error".to_string(),
            )),
        }
    }

    /// Consume the message, yielding the payload bytes.
    ///
    /// # Errors
    ///
    /// Fails with `InvalidOperation` if this message is an error.
    pub fn into_payload(self) -> Result<Bytes> {
        match self {
            Message::Payload(p) => Ok(p),
            Message::Error(e) => Err(EpoxyError::InvalidOperation(format!(
                "message is an error, not a payload: {e}"
            ))),
        }
    }

    /// Consume the message, yielding the error record.
    ///
    /// # Errors
    ///
    /// Fails with `InvalidOperation` if this message is a payload.
    pub fn into_error(self) -> Result<ErrorData> {
        match self {
            Message::Error(e) => Ok(e),
            Message::Payload(_) => Err(EpoxyError::InvalidOperation(
                "message is a payload, not an error".to_string(),
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_payload_message() {
        let msg = Message::from_payload(Bytes::from_static(b"data"));
        assert!(!msg.is_error());
        assert_eq!(msg.payload().unwrap(), &Bytes::from_static(b"data"));
        assert!(msg.error().is_err());
        assert_eq!(msg.into_payload().unwrap(), Bytes::from_static(b"data"));
    }

    #[test]
    fn test_error_message() {
        let msg = Message::from_error(ErrorData::new(7, "boom"));
        assert!(msg.is_error());
        assert_eq!(msg.error().unwrap().error_code, 7);
        assert!(msg.payload().is_err());

        let err = msg.into_error().unwrap();
        assert_eq!(err.message, "boom");
    }

    #[test]
    fn test_wrong_side_is_invalid_operation() {
        let msg = Message::from_payload(Bytes::from_static(b"x"));
        assert!(matches!(
            msg.into_error(),
            Err(EpoxyError::InvalidOperation(_))
        ));

        let msg = Message::from_error(ErrorData::connection_shut_down());
        assert!(matches!(
            msg.into_payload(),
            Err(EpoxyError::InvalidOperation(_))
        ));
    }

    #[test]
    fn test_error_data_roundtrip() {
        use crate::codec::MsgPackCodec;

        let data = ErrorData::new(100, "Go away!");
        let bytes = MsgPackCodec::encode(&data).unwrap();
        let back: ErrorData = MsgPackCodec::decode(&bytes).unwrap();
        assert_eq!(back, data);
    }

    #[test]
    fn test_well_known_helpers() {
        let shut = ErrorData::connection_shut_down();
        assert_eq!(shut.error_code, error_code::CONNECTION_SHUT_DOWN);

        let missing = ErrorData::method_not_found("ping");
        assert_eq!(missing.error_code, error_code::METHOD_NOT_FOUND);
        assert!(missing.message.contains("ping"));
    }
}
