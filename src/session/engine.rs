//! Handshake engine abstraction.
//!
//! The session manager owns timing (retransmission, deadlines) and I/O; the
//! engine owns the cryptography. An engine only ever sees whole packets and
//! never touches the transport, so a DTLS implementation, the PSK engine in
//! [`crate::security`], or a scripted test double all plug in the same way.

use bytes::Bytes;

use crate::error::Result;

/// Which side of the handshake an engine plays.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    /// Initiates the handshake.
    Client,
    /// Answers the handshake.
    Server,
}

/// Authenticated identity of the remote peer.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PeerIdentity {
    /// Identity name as presented during the handshake.
    pub name: String,
}

impl PeerIdentity {
    /// Create a new peer identity.
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }
}

/// What the engine wants to do next.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Flight {
    /// Send these packets, then wait for the peer's next flight.
    Send(Vec<Bytes>),
    /// Send these packets; the handshake is complete on this side.
    Final(Vec<Bytes>),
    /// Nothing to send yet, wait for the peer.
    Await,
    /// Handshake complete, nothing left to send.
    Complete,
}

/// Result of feeding one handshake packet to the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Progress {
    /// Packet absorbed (or ignored); the peer's flight is not finished.
    NeedMore,
    /// The peer's flight is complete; ask for the next flight.
    FlightComplete,
    /// The peer resent an earlier flight, so ours was probably lost.
    PeerRetransmitted,
}

/// Result of opening one record after the handshake.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Opened {
    /// Authenticated application data.
    Data(Bytes),
    /// The peer repeated its last handshake flight; resend our final flight.
    HandshakeRetransmit,
    /// The peer is closing the session.
    CloseNotify,
    /// Nothing for the application (stale handshake packet, keepalive).
    Ignore,
}

/// Cryptographic half of a secure session.
///
/// Implementations keep all key material; the session manager drives them
/// packet by packet. Any error from [`open`](Self::open) is treated as a
/// failed record.
pub trait HandshakeEngine: Send + 'static {
    /// Next handshake action.
    fn produce_flight(&mut self) -> Result<Flight>;

    /// Feed one inbound handshake packet.
    fn consume_flight(&mut self, packet: &[u8]) -> Result<Progress>;

    /// Seal application data into one record. `seq` increases by one for
    /// every record sent on the session.
    fn seal(&mut self, seq: u64, plaintext: &[u8]) -> Result<Vec<u8>>;

    /// Bytes a sealed record adds on top of its plaintext.
    fn record_overhead(&self) -> usize {
        0
    }

    /// Open one inbound record.
    fn open(&mut self, record: &[u8]) -> Result<Opened>;

    /// Sealed close notification, if the protocol has one.
    fn close_notify(&mut self, seq: u64) -> Option<Vec<u8>>;

    /// Peer identity once the handshake has completed.
    fn peer_identity(&self) -> Option<PeerIdentity>;
}
