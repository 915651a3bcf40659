//! Stable categorical encoding.
//!
//! Codes are assigned on first sight in stream order and never change, so a
//! value keeps its code across chunk boundaries and, through an exported
//! [`CodecState`], across runs.

mod codec;

pub use codec::{CategoryCodec, CodecState, UNKNOWN_CODE};
