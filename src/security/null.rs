//! Plaintext engine for unsecured serial links.

use bytes::Bytes;

use crate::error::Result;
use crate::session::{Flight, HandshakeEngine, Opened, PeerIdentity, Progress};

/// Engine that performs no handshake and passes records through unchanged.
///
/// Use it when the serial line itself is trusted; the session still gets
/// framing, state tracking and teardown.
#[derive(Debug, Clone, Copy, Default)]
pub struct NullHandshake;

impl NullHandshake {
    /// Create a plaintext engine.
    pub fn new() -> Self {
        Self
    }
}

impl HandshakeEngine for NullHandshake {
    fn produce_flight(&mut self) -> Result<Flight> {
        Ok(Flight::Complete)
    }

    fn consume_flight(&mut self, _packet: &[u8]) -> Result<Progress> {
        Ok(Progress::FlightComplete)
    }

    fn seal(&mut self, _seq: u64, plaintext: &[u8]) -> Result<Vec<u8>> {
        Ok(plaintext.to_vec())
    }

    fn open(&mut self, record: &[u8]) -> Result<Opened> {
        Ok(Opened::Data(Bytes::copy_from_slice(record)))
    }

    fn close_notify(&mut self, _seq: u64) -> Option<Vec<u8>> {
        None
    }

    fn peer_identity(&self) -> Option<PeerIdentity> {
        None
    }
}
