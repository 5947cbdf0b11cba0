//! MessagePack codec using `rmp-serde`.
//!
//! Always encodes with `to_vec_named` so records serialize as maps keyed
//! by field name. Combined with serde's default of ignoring unknown map
//! keys on decode, this keeps the config and header records
//! forward-compatible: a peer may add fields without breaking older
//! readers.
//!
//! # Example
//!
//! ```
//! use epoxy_transport::codec::MsgPackCodec;
//! use serde::{Serialize, Deserialize};
//!
//! #[derive(Serialize, Deserialize, PartialEq, Debug)]
//! struct Record {
//!     id: u32,
//!     name: String,
//! }
//!
//! let rec = Record { id: 42, name: "hello".to_string() };
//! let encoded = MsgPackCodec::encode(&rec).unwrap();
//! let decoded: Record = MsgPackCodec::decode(&encoded).unwrap();
//! assert_eq!(decoded, rec);
//! ```

use crate::error::Result;

/// MessagePack codec for structured records.
///
/// Uses `rmp_serde::to_vec_named` so structs are serialized as maps
/// (with field names) rather than positional arrays.
pub struct MsgPackCodec;

impl MsgPackCodec {
    /// Encode a value to MessagePack bytes (struct-as-map format).
    ///
    /// # Errors
    ///
    /// Returns error if the value cannot be serialized.
    #[inline]
    pub fn encode<T: serde::Serialize>(value: &T) -> Result<Vec<u8>> {
        Ok(rmp_serde::to_vec_named(value)?)
    }

    /// Decode a value from MessagePack bytes.
    ///
    /// Unknown fields are ignored, missing fields take their serde
    /// defaults.
    ///
    /// # Errors
    ///
    /// Returns error if the bytes are not valid MessagePack for `T`.
    #[inline]
    pub fn decode<T: serde::de::DeserializeOwned>(data: &[u8]) -> Result<T> {
        Ok(rmp_serde::from_slice(data)?)
    }
}
