//! Frame struct and frame building.
//!
//! A frame is one length-delimited unit on the byte stream. Uses
//! `bytes::Bytes` for zero-copy payload sharing.
//!
//! # Example
//!
//! ```
//! use serialwire::protocol::{build_frame, Frame, LENGTH_PREFIX_SIZE};
//!
//! let bytes = build_frame(b"hello");
//! assert_eq!(bytes.len(), LENGTH_PREFIX_SIZE + 5);
//!
//! let frame = Frame::from_slice(b"hello");
//! assert_eq!(frame.payload(), b"hello");
//! ```

use bytes::Bytes;

use super::wire_format::{encode_length_prefix, LENGTH_PREFIX_SIZE};

/// A complete frame payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    /// Payload bytes (zero-copy via `bytes::Bytes`).
    pub payload: Bytes,
}

impl Frame {
    /// Create a new frame from payload bytes.
    pub fn new(payload: Bytes) -> Self {
        Self { payload }
    }

    /// Create a frame from a slice (copies data).
    pub fn from_slice(payload: &[u8]) -> Self {
        Self {
            payload: Bytes::copy_from_slice(payload),
        }
    }

    /// Get a reference to the payload bytes.
    #[inline]
    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    /// Get the payload length.
    #[inline]
    pub fn len(&self) -> usize {
        self.payload.len()
    }

    /// Check if the payload is empty.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.payload.is_empty()
    }

    /// Consume the frame, returning its payload.
    #[inline]
    pub fn into_payload(self) -> Bytes {
        self.payload
    }
}

/// Build a complete frame (prefix + payload) as a single byte vector.
///
/// The caller is responsible for checking the payload against the maximum
/// frame size; see [`validate_length`](super::validate_length).
pub fn build_frame(payload: &[u8]) -> Vec<u8> {
    let mut buf = Vec::with_capacity(LENGTH_PREFIX_SIZE + payload.len());
    buf.extend_from_slice(&encode_length_prefix(payload.len() as u32));
    buf.extend_from_slice(payload);
    buf
}
