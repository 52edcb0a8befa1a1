//! Error types for serialwire.

use std::time::Duration;

use thiserror::Error;

use crate::session::SessionState;

/// Main error type for all serialwire operations.
#[derive(Debug, Error)]
pub enum SerialwireError {
    /// I/O error on the underlying byte stream.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization error (config and JSON payloads).
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// A configuration value is out of range.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// A frame length exceeds the configured maximum.
    #[error("Frame size {size} exceeds maximum {max}")]
    FrameTooLarge { size: usize, max: usize },

    /// The stream ended (or failed) while a frame was partially buffered.
    #[error("Truncated frame: {buffered} bytes buffered at end of stream")]
    TruncatedFrame { buffered: usize },

    /// Length prefixes kept exceeding sane bounds; framing cannot recover.
    #[error("Stream desynchronized after {strikes} oversized frames")]
    StreamDesynchronized { strikes: u32 },

    /// A received packet does not fit the caller's buffer.
    #[error("Buffer too small: packet is {needed} bytes, buffer holds {available}")]
    BufferTooSmall { needed: usize, available: usize },

    /// The transport cannot enforce deadlines itself.
    #[error("Deadlines not supported by this transport")]
    DeadlineUnsupported,

    /// A read or write deadline passed.
    #[error("Deadline exceeded")]
    DeadlineExceeded,

    /// The handshake did not complete in time.
    #[error("Handshake timeout after {elapsed:?} ({retransmits} retransmissions)")]
    HandshakeTimeout { elapsed: Duration, retransmits: u32 },

    /// The handshake engine rejected the exchange.
    #[error("Handshake failed: {0}")]
    Handshake(String),

    /// A received record failed authentication/decryption.
    #[error("Record authentication failed: {0}")]
    RecordAuthFailure(String),

    /// An application message could not be decoded or encoded.
    #[error("Malformed message: {0}")]
    MalformedMessage(String),

    /// No handler is registered for the request path.
    #[error("No route for path: {0}")]
    NoRoute(String),

    /// The operation was cancelled through its cancellation token.
    #[error("Operation cancelled")]
    Cancelled,

    /// The transport or session is closed.
    #[error("Transport closed")]
    TransportClosed,

    /// Operation not allowed in the current session state.
    #[error("Cannot {operation} in session state {state:?}")]
    InvalidState {
        state: SessionState,
        operation: &'static str,
    },

    /// No response arrived for a request.
    #[error("No response for message ID {message_id}")]
    ResponseTimeout { message_id: u16 },

    /// The peer rejected a message with a reset.
    #[error("Peer reset message ID {message_id}")]
    Reset { message_id: u16 },
}

impl SerialwireError {
    /// Returns true if the error ends the session.
    ///
    /// Recoverable errors concern a single inbound unit (one frame, one
    /// record, one message) and the caller may keep reading.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            SerialwireError::Io(_)
                | SerialwireError::TruncatedFrame { .. }
                | SerialwireError::StreamDesynchronized { .. }
                | SerialwireError::HandshakeTimeout { .. }
                | SerialwireError::Handshake(_)
                | SerialwireError::TransportClosed
        )
    }
}

/// Result type alias using SerialwireError.
pub type Result<T> = std::result::Result<T, SerialwireError>;
