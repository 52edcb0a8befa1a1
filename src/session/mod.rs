//! Session module - secure session lifecycle.
//!
//! Provides:
//! - [`SecureSession`]: handshake driving, record exchange, teardown
//! - [`HandshakeEngine`]: the seam for the cryptographic collaborator
//! - [`SessionConfig`]: MTU and retransmission timing

mod config;
mod engine;
mod manager;

pub use config::{
    SessionConfig, DEFAULT_FLIGHT_INTERVAL_MS, DEFAULT_HANDSHAKE_TIMEOUT_MS,
    DEFAULT_MAX_RETRANSMITS, DEFAULT_MTU,
};
pub use engine::{Flight, HandshakeEngine, Opened, PeerIdentity, Progress, Role};
pub use manager::{RecordSender, SecureSession, SessionState};
