//! Error types for the Epoxy transport.

use thiserror::Error;

use crate::message::ErrorData;

/// Main error type for all Epoxy operations.
#[derive(Debug, Error)]
pub enum EpoxyError {
    /// API misuse: bad address, empty framelet contents, empty payload.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// Lifecycle misuse: writing an empty frame, duplicate request id,
    /// installing a second log handler.
    #[error("invalid operation: {0}")]
    InvalidOperation(String),

    /// The peer violated the wire protocol, or rejected the handshake.
    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolViolation),

    /// Socket I/O failure.
    #[error("transport error: {0}")]
    Transport(#[from] std::io::Error),

    /// The connection closed before the operation could complete.
    #[error("connection closed")]
    ConnectionClosed,

    /// MessagePack serialization error for a structured framelet body.
    #[error("encode error: {0}")]
    Encode(#[from] rmp_serde::encode::Error),

    /// MessagePack deserialization error for a structured framelet body.
    #[error("decode error: {0}")]
    Decode(#[from] rmp_serde::decode::Error),
}

/// Specific reasons a frame or connection violates the protocol.
///
/// Every reader failure maps to exactly one of these, so callers (and
/// logs) can tell a truncated stream from a corrupt one.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProtocolViolation {
    /// A frame declared zero framelets.
    #[error("frame contains zero framelets")]
    ZeroFramelets,

    /// A framelet type code outside the known enumeration.
    #[error("unknown framelet type 0x{0:04X}")]
    UnknownFrameletType(u16),

    /// A framelet length outside [1, 2^31 - 1].
    #[error("framelet length {0} out of range")]
    FrameletLengthOutOfRange(u32),

    /// The stream ended inside a frame.
    #[error("stream ended inside a frame")]
    UnexpectedEndOfStream,

    /// A structured framelet body failed to decode.
    #[error("malformed {0} framelet")]
    MalformedFramelet(&'static str),

    /// A frame whose framelet sequence matches no known message shape.
    #[error("unexpected frame shape")]
    UnexpectedFrameShape,

    /// The peer rejected the handshake with the given error.
    #[error("handshake rejected: code {}: {}", .0.error_code, .0.message)]
    HandshakeRejected(ErrorData),
}

/// Result type alias using [`EpoxyError`].
pub type Result<T> = std::result::Result<T, EpoxyError>;

impl EpoxyError {
    /// Map an I/O error to the protocol/transport split the reader needs:
    /// an unexpected EOF inside a frame is a protocol violation, anything
    /// else is a transport fault.
    pub(crate) fn from_read_error(e: std::io::Error) -> Self {
        if e.kind() == std::io::ErrorKind::UnexpectedEof {
            EpoxyError::Protocol(ProtocolViolation::UnexpectedEndOfStream)
        } else {
            EpoxyError::Transport(e)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_violation_display() {
        let v = ProtocolViolation::UnknownFrameletType(0x1234);
        assert_eq!(v.to_string(), "unknown framelet type 0x1234");

        let v = ProtocolViolation::FrameletLengthOutOfRange(0);
        assert!(v.to_string().contains("out of range"));
    }

    #[test]
    fn test_eof_maps_to_protocol_violation() {
        let eof = std::io::Error::new(std::io::ErrorKind::UnexpectedEof, "eof");
        let err = EpoxyError::from_read_error(eof);
        assert!(matches!(
            err,
            EpoxyError::Protocol(ProtocolViolation::UnexpectedEndOfStream)
        ));

        let refused = std::io::Error::new(std::io::ErrorKind::ConnectionRefused, "no");
        let err = EpoxyError::from_read_error(refused);
        assert!(matches!(err, EpoxyError::Transport(_)));
    }

    #[test]
    fn test_rejection_carries_error_details() {
        let data = ErrorData::new(100, "Go away!");
        let err = EpoxyError::from(ProtocolViolation::HandshakeRejected(data.clone()));
        match err {
            EpoxyError::Protocol(ProtocolViolation::HandshakeRejected(e)) => {
                assert_eq!(e, data);
            }
            other => panic!("unexpected error: {other}"),
        }
    }
}
