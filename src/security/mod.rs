//! Security module - handshake engines.
//!
//! Provides:
//! - [`NullHandshake`]: plaintext records for trusted serial links
//! - [`PskHandshake`]: pre-shared-key handshake with AEAD records
//!
//! Any other engine (a DTLS implementation, a hardware secure element)
//! implements [`HandshakeEngine`](crate::session::HandshakeEngine) the same
//! way.

mod null;
mod psk;

pub use null::NullHandshake;
pub use psk::PskHandshake;
