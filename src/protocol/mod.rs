//! Protocol module - the framelet-structured wire format.
//!
//! This module implements the on-wire representation:
//! - typed, non-empty framelets with 16-bit wire codes
//! - length-delimited frames (an ordered sequence of framelets)
//! - the structured records carried inside config, header, and error
//!   framelets

mod frame;
mod framelet;
mod headers;

pub use frame::{Frame, MAX_FRAMELET_COUNT};
pub use framelet::{Framelet, FrameletType, MAX_FRAMELET_LENGTH};
pub use headers::{ConnectionConfig, EpoxyHeaders, PayloadType, PROTOCOL_VERSION};
