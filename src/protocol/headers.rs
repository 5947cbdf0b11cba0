//! Structured records carried inside config and header framelets.
//!
//! Both records travel as MessagePack maps (see
//! [`MsgPackCodec`](crate::codec::MsgPackCodec)), which keeps them
//! forward-compatible: unknown fields are ignored, missing fields take
//! their defaults.

use serde::{Deserialize, Serialize};

/// Current protocol version advertised in [`ConnectionConfig`].
pub const PROTOCOL_VERSION: u16 = 1;

/// Connection parameters exchanged during the handshake.
///
/// Carried in the EpoxyConfig framelet by both sides.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectionConfig {
    /// Protocol version the sender speaks.
    #[serde(default = "default_protocol_version")]
    pub protocol_version: u16,
}

fn default_protocol_version() -> u16 {
    PROTOCOL_VERSION
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            protocol_version: PROTOCOL_VERSION,
        }
    }
}

/// How the receiver should treat a message's payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PayloadType {
    /// A call expecting a correlated response.
    Request,
    /// The response to an earlier request with the same id.
    Response,
    /// Fire-and-forget; no response is ever sent.
    Event,
}

/// Message headers, carried in the EpoxyHeaders framelet.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EpoxyHeaders {
    /// Correlates a response with its request. Unique per connection,
    /// assigned monotonically by the requesting side.
    pub request_id: u64,
    /// Request, response, or event.
    pub payload_type: PayloadType,
    /// The method this message addresses.
    pub method_name: String,
    /// True when the PayloadData framelet holds a serialized
    /// [`ErrorData`](crate::message::ErrorData) instead of a user payload.
    #[serde(default)]
    pub is_error: bool,
}

impl EpoxyHeaders {
    /// Headers for an outbound request.
    pub fn request(request_id: u64, method_name: impl Into<String>) -> Self {
        Self {
            request_id,
            payload_type: PayloadType::Request,
            method_name: method_name.into(),
            is_error: false,
        }
    }

    /// Headers for a response to `request_id`.
    pub fn response(request_id: u64, method_name: impl Into<String>, is_error: bool) -> Self {
        Self {
            request_id,
            payload_type: PayloadType::Response,
            method_name: method_name.into(),
            is_error,
        }
    }

    /// Headers for a fire-and-forget event.
    pub fn event(request_id: u64, method_name: impl Into<String>) -> Self {
        Self {
            request_id,
            payload_type: PayloadType::Event,
            method_name: method_name.into(),
            is_error: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::MsgPackCodec;

    #[test]
    fn test_config_roundtrip() {
        let config = ConnectionConfig::default();
        let bytes = MsgPackCodec::encode(&config).unwrap();
        let back: ConnectionConfig = MsgPackCodec::decode(&bytes).unwrap();
        assert_eq!(back, config);
        assert_eq!(back.protocol_version, PROTOCOL_VERSION);
    }

    #[test]
    fn test_config_tolerates_unknown_fields() {
        #[derive(Serialize)]
        struct FutureConfig {
            protocol_version: u16,
            compression: String,
        }

        let bytes = MsgPackCodec::encode(&FutureConfig {
            protocol_version: 2,
            compression: "lz4".to_string(),
        })
        .unwrap();

        let config: ConnectionConfig = MsgPackCodec::decode(&bytes).unwrap();
        assert_eq!(config.protocol_version, 2);
    }

    #[test]
    fn test_headers_roundtrip() {
        let headers = EpoxyHeaders::request(42, "calc.add");
        let bytes = MsgPackCodec::encode(&headers).unwrap();
        let back: EpoxyHeaders = MsgPackCodec::decode(&bytes).unwrap();
        assert_eq!(back, headers);
        assert_eq!(back.payload_type, PayloadType::Request);
        assert!(!back.is_error);
    }

    #[test]
    fn test_response_headers_carry_error_flag() {
        let headers = EpoxyHeaders::response(7, "calc.add", true);
        assert_eq!(headers.payload_type, PayloadType::Response);
        assert!(headers.is_error);
        assert_eq!(headers.request_id, 7);
    }

    #[test]
    fn test_event_headers() {
        let headers = EpoxyHeaders::event(0, "telemetry.tick");
        assert_eq!(headers.payload_type, PayloadType::Event);
        assert_eq!(headers.method_name, "telemetry.tick");
    }
}
