//! Framelet: the smallest unit on the wire.
//!
//! A framelet is an immutable `(type, contents)` pair. The type is drawn
//! from a closed enumeration with fixed 16-bit wire codes; the contents
//! are a non-empty byte range backed by `bytes::Bytes` for zero-copy
//! sharing between the parser and handlers.

use bytes::Bytes;

use crate::error::{EpoxyError, Result};

/// Maximum framelet content length on the wire (2^31 - 1 bytes).
pub const MAX_FRAMELET_LENGTH: u32 = i32::MAX as u32;

/// Typed framelet kinds with their on-wire codes (little-endian u16).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u16)]
pub enum FrameletType {
    /// Connection config record, exchanged during the handshake.
    EpoxyConfig = 0x4743,
    /// Message headers: request id, method name, payload type.
    EpoxyHeaders = 0x5248,
    /// Opaque data produced and consumed by the layer stack.
    LayerData = 0x594C,
    /// The message payload itself.
    PayloadData = 0x5444,
    /// A serialized error record signalling protocol failure or shutdown.
    ProtocolError = 0x5245,
}

impl FrameletType {
    /// Map a wire code to a framelet type, if known.
    pub fn from_wire(value: u16) -> Option<Self> {
        match value {
            0x4743 => Some(FrameletType::EpoxyConfig),
            0x5248 => Some(FrameletType::EpoxyHeaders),
            0x594C => Some(FrameletType::LayerData),
            0x5444 => Some(FrameletType::PayloadData),
            0x5245 => Some(FrameletType::ProtocolError),
            _ => None,
        }
    }

    /// The on-wire code for this type.
    #[inline]
    pub fn to_wire(self) -> u16 {
        self as u16
    }

    /// Whether a 16-bit code belongs to the enumeration.
    #[inline]
    pub fn is_known_type(value: u16) -> bool {
        Self::from_wire(value).is_some()
    }
}

/// An immutable typed byte segment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Framelet {
    framelet_type: FrameletType,
    contents: Bytes,
}

impl Framelet {
    /// Create a framelet.
    ///
    /// # Errors
    ///
    /// Fails with `InvalidArgument` if `contents` is empty or longer
    /// than [`MAX_FRAMELET_LENGTH`].
    pub fn new(framelet_type: FrameletType, contents: Bytes) -> Result<Self> {
        if contents.is_empty() {
            return Err(EpoxyError::InvalidArgument(
                "framelet contents must not be empty".to_string(),
            ));
        }
        if contents.len() > MAX_FRAMELET_LENGTH as usize {
            return Err(EpoxyError::InvalidArgument(format!(
                "framelet contents of {} bytes exceed the maximum of {}",
                contents.len(),
                MAX_FRAMELET_LENGTH
            )));
        }
        Ok(Self {
            framelet_type,
            contents,
        })
    }

    /// The framelet's type.
    #[inline]
    pub fn framelet_type(&self) -> FrameletType {
        self.framelet_type
    }

    /// The framelet's contents.
    #[inline]
    pub fn contents(&self) -> &Bytes {
        &self.contents
    }

    /// The content length in bytes. Always in [1, 2^31 - 1].
    #[inline]
    pub fn len(&self) -> usize {
        self.contents.len()
    }

    /// Always false; empty framelets cannot be constructed.
    #[inline]
    pub fn is_empty(&self) -> bool {
        false
    }
}
