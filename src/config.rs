//! Link configuration.
//!
//! [`LinkConfig`] gathers the settings of every layer so a whole link can be
//! described in one JSON document. Missing fields keep their defaults.
//!
//! ```
//! use serialwire::config::LinkConfig;
//!
//! let config = LinkConfig::from_json(r#"{ "session": { "mtu": 512 } }"#).unwrap();
//! assert_eq!(config.session.mtu, 512);
//! assert_eq!(config.adapter.max_frame_size, 2048);
//! ```

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Result, SerialwireError};
use crate::session::{HandshakeEngine, SessionConfig};
use crate::transport::AdapterConfig;

/// Default time to wait for the ACK of a confirmable request.
pub const DEFAULT_ACK_TIMEOUT_MS: u64 = 2_000;

/// Default retransmissions of a confirmable request.
pub const DEFAULT_MAX_RETRANSMIT: u32 = 4;

/// Request retransmission settings for the client.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RequestConfig {
    /// Initial wait for a response, doubled after every retransmission.
    pub ack_timeout_ms: u64,
    /// Retransmissions before `ResponseTimeout`.
    pub max_retransmit: u32,
}

impl RequestConfig {
    /// Initial response timeout.
    pub fn ack_timeout(&self) -> Duration {
        Duration::from_millis(self.ack_timeout_ms)
    }

    /// Wait after the `attempt`-th transmission (0 = first send).
    pub fn timeout_for(&self, attempt: u32) -> Duration {
        self.ack_timeout().saturating_mul(1u32 << attempt.min(16))
    }
}

impl Default for RequestConfig {
    fn default() -> Self {
        Self {
            ack_timeout_ms: DEFAULT_ACK_TIMEOUT_MS,
            max_retransmit: DEFAULT_MAX_RETRANSMIT,
        }
    }
}

/// Settings for every layer of a link.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LinkConfig {
    /// Framing and transport.
    pub adapter: AdapterConfig,
    /// Handshake timing and record limits.
    pub session: SessionConfig,
    /// Client request retransmission.
    pub request: RequestConfig,
}

impl LinkConfig {
    /// Parse and validate a JSON document.
    pub fn from_json(json: &str) -> Result<Self> {
        let config: LinkConfig = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Serialize to pretty-printed JSON.
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Check that the values can work together.
    pub fn validate(&self) -> Result<()> {
        if self.adapter.max_frame_size == 0 || self.adapter.max_frame_size > u32::MAX as usize {
            return Err(invalid(format!(
                "adapter.max_frame_size {} must be between 1 and {}",
                self.adapter.max_frame_size,
                u32::MAX
            )));
        }
        if self.adapter.channel_capacity == 0 {
            return Err(invalid("adapter.channel_capacity must be at least 1"));
        }
        if self.session.mtu == 0 {
            return Err(invalid("session.mtu must be at least 1"));
        }
        if self.session.mtu > self.adapter.max_frame_size {
            return Err(invalid(format!(
                "session.mtu {} exceeds adapter.max_frame_size {}",
                self.session.mtu, self.adapter.max_frame_size
            )));
        }
        if self.session.flight_interval_ms == 0 {
            return Err(invalid("session.flight_interval_ms must be positive"));
        }
        if self.session.handshake_timeout_ms < self.session.flight_interval_ms {
            return Err(invalid(format!(
                "session.handshake_timeout_ms {} is shorter than one flight interval",
                self.session.handshake_timeout_ms
            )));
        }
        if self.request.ack_timeout_ms == 0 {
            return Err(invalid("request.ack_timeout_ms must be positive"));
        }
        Ok(())
    }

    /// [`validate`](Self::validate), then check that a full-MTU record
    /// sealed by `engine` still fits in one frame.
    pub fn validate_for<E: HandshakeEngine>(&self, engine: &E) -> Result<()> {
        self.validate()?;

        let overhead = engine.record_overhead();
        if self.session.mtu + overhead > self.adapter.max_frame_size {
            return Err(invalid(format!(
                "session.mtu {} plus {} bytes of record overhead exceeds adapter.max_frame_size {}",
                self.session.mtu, overhead, self.adapter.max_frame_size
            )));
        }
        Ok(())
    }
}

fn invalid(reason: impl Into<String>) -> SerialwireError {
    SerialwireError::InvalidConfig(reason.into())
}
