//! Session timing and size limits.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Default maximum plaintext size of one record.
pub const DEFAULT_MTU: usize = 1024;

/// Default handshake flight retransmission interval.
pub const DEFAULT_FLIGHT_INTERVAL_MS: u64 = 5_000;

/// Default number of flight retransmissions before giving up.
pub const DEFAULT_MAX_RETRANSMITS: u32 = 4;

/// Default overall handshake deadline.
pub const DEFAULT_HANDSHAKE_TIMEOUT_MS: u64 = 60_000;

/// Session configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Maximum plaintext bytes per record.
    pub mtu: usize,
    /// Time to wait for the peer's flight before resending ours.
    pub flight_interval_ms: u64,
    /// Retransmissions of one flight before `HandshakeTimeout`.
    pub max_retransmits: u32,
    /// Overall handshake deadline in milliseconds.
    pub handshake_timeout_ms: u64,
    /// Treat a record that fails authentication as session-fatal.
    pub fatal_record_auth_failures: bool,
}

impl SessionConfig {
    /// Flight retransmission interval.
    pub fn flight_interval(&self) -> Duration {
        Duration::from_millis(self.flight_interval_ms)
    }

    /// Overall handshake deadline.
    pub fn handshake_timeout(&self) -> Duration {
        Duration::from_millis(self.handshake_timeout_ms)
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            mtu: DEFAULT_MTU,
            flight_interval_ms: DEFAULT_FLIGHT_INTERVAL_MS,
            max_retransmits: DEFAULT_MAX_RETRANSMITS,
            handshake_timeout_ms: DEFAULT_HANDSHAKE_TIMEOUT_MS,
            fatal_record_auth_failures: false,
        }
    }
}
