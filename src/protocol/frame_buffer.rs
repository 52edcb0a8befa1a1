//! Frame buffer for accumulating partial reads.
//!
//! Uses `bytes::BytesMut` for zero-copy buffer management.
//! Implements a state machine for handling fragmented frames:
//! - `WaitingForHeader`: Need at least 4 bytes of length prefix
//! - `WaitingForPayload`: Prefix parsed, need N more payload bytes
//! - `Discarding`: Prefix was oversized, skipping its declared payload
//!
//! A serial line hands out bytes in whatever chunks the driver felt like,
//! so the same byte sequence split at any points must produce the same
//! frames.
//!
//! # Example
//!
//! ```
//! use serialwire::protocol::{build_frame, FrameBuffer};
//!
//! let mut buffer = FrameBuffer::new();
//! let bytes = build_frame(b"ping");
//!
//! assert!(buffer.push(&bytes[..3]).unwrap().is_empty());
//! let frames = buffer.push(&bytes[3..]).unwrap();
//! assert_eq!(frames[0].payload(), b"ping");
//! ```

use bytes::{Buf, Bytes, BytesMut};

use super::wire_format::{
    decode_length_prefix, DEFAULT_MAX_FRAME_SIZE, DEFAULT_MAX_RESYNC_ATTEMPTS, LENGTH_PREFIX_SIZE,
};
use super::Frame;
use crate::error::{Result, SerialwireError};

/// Bytes reserved up front; larger frames grow the buffer on demand.
const INITIAL_CAPACITY: usize = 4096;

/// State machine for frame parsing.
#[derive(Debug, Clone, Copy)]
enum State {
    /// Waiting for a complete length prefix.
    WaitingForHeader,
    /// Prefix parsed, waiting for payload bytes.
    WaitingForPayload { remaining: usize },
    /// Skipping the payload of an oversized frame.
    Discarding { remaining: usize },
}

/// Buffer for accumulating incoming bytes and extracting complete frames.
pub struct FrameBuffer {
    /// Accumulated bytes from stream reads.
    buffer: BytesMut,
    /// Current parsing state.
    state: State,
    /// Maximum allowed payload size.
    max_frame_size: usize,
    /// Consecutive oversized prefixes tolerated.
    max_resync_attempts: u32,
    /// Consecutive oversized prefixes seen so far.
    strikes: u32,
    /// Error hit after frames were already extracted by `push`.
    deferred: Option<SerialwireError>,
}

impl FrameBuffer {
    /// Create a new frame buffer with default limits.
    pub fn new() -> Self {
        Self::with_limits(DEFAULT_MAX_FRAME_SIZE, DEFAULT_MAX_RESYNC_ATTEMPTS)
    }

    /// Create a new frame buffer with a custom max frame size.
    pub fn with_max_frame_size(max_frame_size: usize) -> Self {
        Self::with_limits(max_frame_size, DEFAULT_MAX_RESYNC_ATTEMPTS)
    }

    /// Create a new frame buffer with custom frame size and resync limits.
    pub fn with_limits(max_frame_size: usize, max_resync_attempts: u32) -> Self {
        Self {
            buffer: BytesMut::with_capacity(
                LENGTH_PREFIX_SIZE + max_frame_size.min(INITIAL_CAPACITY),
            ),
            state: State::WaitingForHeader,
            max_frame_size,
            max_resync_attempts,
            strikes: 0,
            deferred: None,
        }
    }

    /// Maximum payload size accepted by this buffer.
    pub fn max_frame_size(&self) -> usize {
        self.max_frame_size
    }

    /// Push data into the buffer and extract all complete frames.
    ///
    /// Partial data is kept for the next push. If a framing error occurs
    /// after some frames were already extracted, those frames are returned
    /// and the error is reported by the next call to `push` or
    /// [`next_frame`](Self::next_frame).
    ///
    /// # Errors
    ///
    /// - `FrameTooLarge` for a prefix above the maximum (recoverable, the
    ///   declared payload is skipped)
    /// - `StreamDesynchronized` once oversized prefixes keep coming
    pub fn push(&mut self, data: &[u8]) -> Result<Vec<Frame>> {
        self.buffer.extend_from_slice(data);

        let mut frames = Vec::new();
        loop {
            match self.next_frame() {
                Ok(Some(frame)) => frames.push(frame),
                Ok(None) => break,
                Err(e) if frames.is_empty() => return Err(e),
                Err(e) => {
                    self.deferred = Some(e);
                    break;
                }
            }
        }

        Ok(frames)
    }

    /// Try to extract a single frame from the buffered bytes.
    ///
    /// Returns:
    /// - `Ok(Some(frame))` if a complete frame was extracted
    /// - `Ok(None)` if more data is needed
    /// - `Err(...)` on a framing violation
    pub fn next_frame(&mut self) -> Result<Option<Frame>> {
        if let Some(err) = self.deferred.take() {
            return Err(err);
        }

        loop {
            match self.state {
                State::WaitingForHeader => {
                    let Some(len) = decode_length_prefix(&self.buffer) else {
                        return Ok(None);
                    };
                    self.buffer.advance(LENGTH_PREFIX_SIZE);
                    let len = len as usize;

                    if len > self.max_frame_size {
                        return Err(self.reject_oversized(len));
                    }

                    if len == 0 {
                        self.strikes = 0;
                        return Ok(Some(Frame::new(Bytes::new())));
                    }

                    self.state = State::WaitingForPayload { remaining: len };
                }

                State::WaitingForPayload { remaining } => {
                    if self.buffer.len() < remaining {
                        return Ok(None);
                    }

                    let payload = self.buffer.split_to(remaining).freeze();
                    self.state = State::WaitingForHeader;
                    self.strikes = 0;
                    return Ok(Some(Frame::new(payload)));
                }

                State::Discarding { remaining } => {
                    let n = remaining.min(self.buffer.len());
                    self.buffer.advance(n);
                    let remaining = remaining - n;

                    if remaining > 0 {
                        self.state = State::Discarding { remaining };
                        return Ok(None);
                    }
                    self.state = State::WaitingForHeader;
                }
            }
        }
    }

    fn reject_oversized(&mut self, len: usize) -> SerialwireError {
        self.strikes += 1;

        if self.strikes > self.max_resync_attempts {
            tracing::error!(
                strikes = self.strikes,
                "Length prefixes out of bounds, stream desynchronized"
            );
            self.buffer.clear();
            self.state = State::WaitingForHeader;
            return SerialwireError::StreamDesynchronized {
                strikes: self.strikes,
            };
        }

        tracing::warn!(
            size = len,
            max = self.max_frame_size,
            "Oversized frame, skipping declared payload"
        );
        self.state = State::Discarding { remaining: len };
        SerialwireError::FrameTooLarge {
            size: len,
            max: self.max_frame_size,
        }
    }

    /// Signal end of stream.
    ///
    /// Returns `TruncatedFrame` if a partial frame was buffered; the partial
    /// data is discarded either way.
    pub fn finish(&mut self) -> Result<()> {
        let buffered = self.buffer.len();
        let mid_frame = match self.state {
            State::WaitingForHeader => buffered > 0,
            State::WaitingForPayload { .. } => true,
            State::Discarding { .. } => false,
        };
        self.clear();

        if mid_frame {
            return Err(SerialwireError::TruncatedFrame { buffered });
        }
        Ok(())
    }

    /// Append data to the buffer without extracting frames.
    ///
    /// Follow with [`next_frame`](Self::next_frame) to drain.
    pub fn extend(&mut self, data: &[u8]) {
        self.buffer.extend_from_slice(data);
    }

    /// Get the number of buffered bytes.
    pub fn len(&self) -> usize {
        self.buffer.len()
    }

    /// Check if the buffer is empty.
    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }

    /// Clear the buffer and reset state.
    pub fn clear(&mut self) {
        self.buffer.clear();
        self.state = State::WaitingForHeader;
        self.strikes = 0;
        self.deferred = None;
    }

    /// Get the current state for debugging.
    #[cfg(test)]
    fn state_name(&self) -> &'static str {
        match &self.state {
            State::WaitingForHeader => "WaitingForHeader",
            State::WaitingForPayload { .. } => "WaitingForPayload",
            State::Discarding { .. } => "Discarding",
        }
    }
}

impl Default for FrameBuffer {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{build_frame, encode_length_prefix};

    #[test]
    fn test_single_complete_frame() {
        let mut buffer = FrameBuffer::new();
        let frames = buffer.push(&build_frame(b"hello")).unwrap();

        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].payload(), b"hello");
        assert!(buffer.is_empty());
    }

    #[test]
    fn test_multiple_frames_in_one_push() {
        let mut buffer = FrameBuffer::new();

        let mut combined = build_frame(b"first");
        combined.extend_from_slice(&build_frame(b"second"));
        combined.extend_from_slice(&build_frame(b"third"));

        let frames = buffer.push(&combined).unwrap();

        assert_eq!(frames.len(), 3);
        assert_eq!(frames[0].payload(), b"first");
        assert_eq!(frames[1].payload(), b"second");
        assert_eq!(frames[2].payload(), b"third");
        assert!(buffer.is_empty());
    }

    #[test]
    fn test_fragmented_prefix() {
        let mut buffer = FrameBuffer::new();
        let bytes = build_frame(b"test");

        let frames = buffer.push(&bytes[..2]).unwrap();
        assert!(frames.is_empty());
        assert_eq!(buffer.state_name(), "WaitingForHeader");

        let frames = buffer.push(&bytes[2..]).unwrap();
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].payload(), b"test");
        assert!(buffer.is_empty());
    }

    #[test]
    fn test_fragmented_payload() {
        let mut buffer = FrameBuffer::new();
        let payload = b"this is a longer payload that will be fragmented";
        let bytes = build_frame(payload);

        let partial_len = LENGTH_PREFIX_SIZE + 10;
        let frames = buffer.push(&bytes[..partial_len]).unwrap();
        assert!(frames.is_empty());
        assert_eq!(buffer.state_name(), "WaitingForPayload");

        let frames = buffer.push(&bytes[partial_len..]).unwrap();
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].payload(), payload);
    }

    #[test]
    fn test_empty_payload() {
        let mut buffer = FrameBuffer::new();
        let frames = buffer.push(&build_frame(b"")).unwrap();

        assert_eq!(frames.len(), 1);
        assert!(frames[0].is_empty());
    }

    #[test]
    fn test_byte_at_a_time() {
        let mut buffer = FrameBuffer::new();
        let mut bytes = build_frame(b"hi");
        bytes.extend_from_slice(&build_frame(b"there"));

        let mut all_frames = Vec::new();
        for byte in &bytes {
            all_frames.extend(buffer.push(&[*byte]).unwrap());
        }

        assert_eq!(all_frames.len(), 2);
        assert_eq!(all_frames[0].payload(), b"hi");
        assert_eq!(all_frames[1].payload(), b"there");
    }

    #[test]
    fn test_max_size_frame_accepted() {
        let mut buffer = FrameBuffer::with_max_frame_size(16);
        let frames = buffer.push(&build_frame(&[7u8; 16])).unwrap();
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].len(), 16);
    }

    #[test]
    fn test_oversized_frame_is_skipped() {
        let mut buffer = FrameBuffer::with_max_frame_size(8);

        let mut data = build_frame(&[0xEE; 20]);
        data.extend_from_slice(&build_frame(b"after"));

        let err = buffer.push(&data).unwrap_err();
        assert!(matches!(err, SerialwireError::FrameTooLarge { size: 20, max: 8 }));

        // The next frame after the skipped payload is intact.
        let frame = buffer.next_frame().unwrap().unwrap();
        assert_eq!(frame.payload(), b"after");
        assert!(buffer.is_empty());
    }

    #[test]
    fn test_oversized_payload_arriving_in_pieces() {
        let mut buffer = FrameBuffer::with_max_frame_size(4);

        let err = buffer.push(&encode_length_prefix(10)).unwrap_err();
        assert!(matches!(err, SerialwireError::FrameTooLarge { .. }));
        assert_eq!(buffer.state_name(), "Discarding");

        assert!(buffer.push(&[1, 2, 3, 4, 5, 6]).unwrap().is_empty());
        assert_eq!(buffer.state_name(), "Discarding");

        let mut rest = vec![7, 8, 9, 10];
        rest.extend_from_slice(&build_frame(b"ok"));
        let frames = buffer.push(&rest).unwrap();
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].payload(), b"ok");
    }

    #[test]
    fn test_error_after_frames_is_deferred() {
        let mut buffer = FrameBuffer::with_max_frame_size(8);

        let mut data = build_frame(b"good");
        data.extend_from_slice(&encode_length_prefix(100));

        let frames = buffer.push(&data).unwrap();
        assert_eq!(frames.len(), 1);

        let err = buffer.next_frame().unwrap_err();
        assert!(matches!(err, SerialwireError::FrameTooLarge { size: 100, .. }));
    }

    #[test]
    fn test_repeated_oversize_desynchronizes() {
        let mut buffer = FrameBuffer::with_limits(8, 2);

        for _ in 0..2 {
            let mut data = encode_length_prefix(9).to_vec();
            data.extend_from_slice(&[0u8; 9]);
            let err = buffer.push(&data).unwrap_err();
            assert!(matches!(err, SerialwireError::FrameTooLarge { .. }));
        }

        let err = buffer.push(&encode_length_prefix(0xFFFF_FFFF)).unwrap_err();
        assert!(matches!(err, SerialwireError::StreamDesynchronized { strikes: 3 }));
        assert!(err.is_fatal());
    }

    #[test]
    fn test_good_frame_resets_strikes() {
        let mut buffer = FrameBuffer::with_limits(8, 1);

        let mut oversized = encode_length_prefix(9).to_vec();
        oversized.extend_from_slice(&[0u8; 9]);

        assert!(buffer.push(&oversized).is_err());
        assert_eq!(buffer.push(&build_frame(b"x")).unwrap().len(), 1);

        let err = buffer.push(&oversized).unwrap_err();
        assert!(matches!(err, SerialwireError::FrameTooLarge { .. }));
    }

    #[test]
    fn test_finish_with_partial_frame() {
        let mut buffer = FrameBuffer::new();
        let bytes = build_frame(b"unfinished");
        buffer.push(&bytes[..7]).unwrap();

        let err = buffer.finish().unwrap_err();
        assert!(matches!(err, SerialwireError::TruncatedFrame { buffered: 3 }));
        assert!(buffer.is_empty());
    }

    #[test]
    fn test_finish_with_partial_prefix() {
        let mut buffer = FrameBuffer::new();
        buffer.push(&[0, 0]).unwrap();
        assert!(matches!(
            buffer.finish(),
            Err(SerialwireError::TruncatedFrame { buffered: 2 })
        ));
    }

    #[test]
    fn test_finish_on_boundary() {
        let mut buffer = FrameBuffer::new();
        buffer.push(&build_frame(b"done")).unwrap();
        assert!(buffer.finish().is_ok());
    }

    #[test]
    fn test_clear_resets_state() {
        let mut buffer = FrameBuffer::new();
        let bytes = build_frame(b"test");
        buffer.push(&bytes[..LENGTH_PREFIX_SIZE + 1]).unwrap();
        assert_eq!(buffer.state_name(), "WaitingForPayload");

        buffer.clear();

        assert_eq!(buffer.state_name(), "WaitingForHeader");
        assert!(buffer.is_empty());
    }

    #[test]
    fn test_extend_then_drain() {
        let mut buffer = FrameBuffer::new();
        buffer.extend(&build_frame(b"a"));
        buffer.extend(&build_frame(b"b"));

        assert_eq!(buffer.next_frame().unwrap().unwrap().payload(), b"a");
        assert_eq!(buffer.next_frame().unwrap().unwrap().payload(), b"b");
        assert!(buffer.next_frame().unwrap().is_none());
    }

    #[test]
    fn test_large_limit_does_not_preallocate() {
        let mut buffer = FrameBuffer::with_max_frame_size(u32::MAX as usize);
        assert!(buffer.buffer.capacity() < 1 << 20);

        let payload = vec![3u8; 3 * INITIAL_CAPACITY];
        let frames = buffer.push(&build_frame(&payload)).unwrap();
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].payload(), payload.as_slice());
    }
}
