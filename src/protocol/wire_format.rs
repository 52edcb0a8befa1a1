//! Wire format encoding and decoding.
//!
//! Every frame on the byte stream is a 4-byte length prefix followed by
//! exactly that many payload bytes:
//! ```text
//! ┌──────────────┬──────────────────────┐
//! │ Length       │ Payload              │
//! │ 4 bytes      │ Length bytes         │
//! │ uint32 BE    │ opaque               │
//! └──────────────┴──────────────────────┘
//! ```
//!
//! The prefix is transport metadata and is never encrypted; only the
//! payload (a sealed record once a session is established) is protected.

use crate::error::{Result, SerialwireError};

/// Length prefix size in bytes (fixed, exactly 4).
pub const LENGTH_PREFIX_SIZE: usize = 4;

/// Default maximum frame payload size.
///
/// Matches the serial read buffer of the deployed devices; large enough for
/// a 1024-byte record plus sealing overhead.
pub const DEFAULT_MAX_FRAME_SIZE: usize = 2048;

/// Default number of consecutive oversized prefixes tolerated before the
/// stream is considered desynchronized.
pub const DEFAULT_MAX_RESYNC_ATTEMPTS: u32 = 3;

/// Encode a payload length as a big-endian prefix.
///
/// # Example
///
/// ```
/// use serialwire::protocol::encode_length_prefix;
///
/// assert_eq!(encode_length_prefix(0x0102), [0, 0, 1, 2]);
/// ```
#[inline]
pub fn encode_length_prefix(len: u32) -> [u8; LENGTH_PREFIX_SIZE] {
    len.to_be_bytes()
}

/// Decode a big-endian length prefix.
///
/// Returns `None` if the buffer is too short.
#[inline]
pub fn decode_length_prefix(buf: &[u8]) -> Option<u32> {
    if buf.len() < LENGTH_PREFIX_SIZE {
        return None;
    }
    Some(u32::from_be_bytes([buf[0], buf[1], buf[2], buf[3]]))
}

/// Validate a payload length against the configured maximum.
pub fn validate_length(len: usize, max_frame_size: usize) -> Result<()> {
    if len > max_frame_size || len > u32::MAX as usize {
        return Err(SerialwireError::FrameTooLarge {
            size: len,
            max: max_frame_size,
        });
    }
    Ok(())
}
