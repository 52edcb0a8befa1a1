//! Protocol module - wire format, framing, and frame types.
//!
//! This module turns a byte stream into discrete frames and back:
//! - 4-byte big-endian length prefix encoding/decoding
//! - Frame buffer for accumulating partial reads
//! - Frame struct wrapping the payload bytes

mod frame;
mod frame_buffer;
mod wire_format;

pub use frame::{build_frame, Frame};
pub use frame_buffer::FrameBuffer;
pub use wire_format::{
    decode_length_prefix, encode_length_prefix, validate_length, DEFAULT_MAX_FRAME_SIZE,
    DEFAULT_MAX_RESYNC_ATTEMPTS, LENGTH_PREFIX_SIZE,
};
