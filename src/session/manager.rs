//! Secure session lifecycle over a packet adapter.
//!
//! # State Machine
//!
//! ```text
//! ┌──────┐ handshake ┌─────────────┐  final flight  ┌─────────────┐
//! │ Idle │──────────>│ Handshaking │───────────────>│ Established │
//! └──────┘           └─────────────┘                └─────────────┘
//!                          │ timeout/error                │ close / peer close
//!                          ↓                              ↓
//!                     ┌────────┐                     ┌────────┐
//!                     │ Failed │                     │ Closed │
//!                     └────────┘                     └────────┘
//! ```
//!
//! # Retransmission
//!
//! The last outbound flight is kept verbatim. If no packet arrives within
//! the flight interval it is resent, up to `max_retransmits` times. A peer
//! that repeats its own flight gets ours again immediately. Independently,
//! the whole handshake must finish before `handshake_timeout`.
//!
//! # Record order
//!
//! Sealing assigns the next sequence number. A record is sealed and written
//! under one per-session send lock, so sequence numbers reach the wire in
//! the order they were assigned even with several concurrent senders.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use bytes::Bytes;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use super::config::SessionConfig;
use super::engine::{Flight, HandshakeEngine, Opened, PeerIdentity, Progress};
use crate::error::{Result, SerialwireError};
use crate::handler::{BoxFuture, RecordSink};
use crate::protocol::Frame;
use crate::transport::{PacketSender, StreamPacketAdapter};

/// Session lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Created, handshake not started.
    Idle,
    /// Handshake in progress.
    Handshaking,
    /// Keys agreed, records flow.
    Established,
    /// Closed by either side.
    Closed,
    /// Handshake or transport failure.
    Failed,
}

impl SessionState {
    /// Returns true for `Closed` and `Failed`.
    pub fn is_terminal(self) -> bool {
        matches!(self, SessionState::Closed | SessionState::Failed)
    }
}

/// State shared between the session and its record senders.
struct Shared<E> {
    engine: E,
    state: SessionState,
    send_seq: u64,
}

fn lock<E>(shared: &Mutex<Shared<E>>) -> MutexGuard<'_, Shared<E>> {
    shared.lock().unwrap_or_else(PoisonError::into_inner)
}

fn state_error(state: SessionState, operation: &'static str) -> SerialwireError {
    if state.is_terminal() {
        SerialwireError::TransportClosed
    } else {
        SerialwireError::InvalidState { state, operation }
    }
}

/// A secure session over a [`StreamPacketAdapter`].
pub struct SecureSession<S, E> {
    adapter: StreamPacketAdapter<S>,
    shared: Arc<Mutex<Shared<E>>>,
    send_order: Arc<tokio::sync::Mutex<()>>,
    packets: PacketSender,
    config: SessionConfig,
    last_flight: Vec<Bytes>,
    peer_identity: Option<PeerIdentity>,
    software_timers: bool,
}

impl<S, E> SecureSession<S, E>
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    E: HandshakeEngine,
{
    /// Create an idle session.
    pub fn new(mut adapter: StreamPacketAdapter<S>, engine: E, config: SessionConfig) -> Self {
        let software_timers = matches!(
            adapter.set_read_deadline(None),
            Err(SerialwireError::DeadlineUnsupported)
        );
        if software_timers {
            tracing::debug!("Transport has no deadlines, using software timers");
        }

        let packets = adapter.packet_sender();
        Self {
            adapter,
            shared: Arc::new(Mutex::new(Shared {
                engine,
                state: SessionState::Idle,
                send_seq: 0,
            })),
            send_order: Arc::new(tokio::sync::Mutex::new(())),
            packets,
            config,
            last_flight: Vec::new(),
            peer_identity: None,
            software_timers,
        }
    }

    /// Current state.
    pub fn state(&self) -> SessionState {
        lock(&self.shared).state
    }

    /// Peer identity, available once established.
    pub fn peer_identity(&self) -> Option<&PeerIdentity> {
        self.peer_identity.as_ref()
    }

    /// Session configuration.
    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// Cloneable handle for sending records from other tasks.
    pub fn sender(&self) -> RecordSender<E> {
        RecordSender {
            shared: self.shared.clone(),
            send_order: self.send_order.clone(),
            packets: self.packets.clone(),
            mtu: self.config.mtu,
        }
    }

    fn set_state(&self, state: SessionState) {
        lock(&self.shared).state = state;
    }

    /// Run the handshake to completion.
    ///
    /// # Errors
    ///
    /// - `HandshakeTimeout` when retransmissions are exhausted or the
    ///   overall deadline passes
    /// - `Handshake` when the engine rejects the peer
    /// - `Cancelled` when `cancel` fires
    /// - `InvalidConfig` when a full-MTU record would not fit in one frame;
    ///   the session stays `Idle`
    ///
    /// Any other error leaves the session `Failed`.
    pub async fn handshake(&mut self, cancel: &CancellationToken) -> Result<()> {
        {
            let mut shared = lock(&self.shared);
            if shared.state != SessionState::Idle {
                return Err(state_error(shared.state, "handshake"));
            }

            let record_size = self.config.mtu + shared.engine.record_overhead();
            let max_frame_size = self.packets.max_frame_size();
            if record_size > max_frame_size {
                return Err(SerialwireError::InvalidConfig(format!(
                    "mtu {} plus {} bytes of record overhead exceeds max_frame_size {}",
                    self.config.mtu,
                    record_size - self.config.mtu,
                    max_frame_size
                )));
            }
            shared.state = SessionState::Handshaking;
        }

        match self.run_handshake(cancel).await {
            Ok(()) => {
                self.peer_identity = lock(&self.shared).engine.peer_identity();
                self.set_state(SessionState::Established);
                tracing::debug!(peer = ?self.peer_identity, "Session established");
                Ok(())
            }
            Err(e) => {
                tracing::warn!(error = %e, "Handshake failed");
                self.set_state(SessionState::Failed);
                self.adapter.close();
                Err(e)
            }
        }
    }

    async fn run_handshake(&mut self, cancel: &CancellationToken) -> Result<()> {
        let started = Instant::now();
        let deadline = started + self.config.handshake_timeout();
        let interval = self.config.flight_interval();

        loop {
            let flight = lock(&self.shared).engine.produce_flight()?;
            match flight {
                Flight::Send(packets) => {
                    self.last_flight = packets;
                    self.send_last_flight().await?;
                }
                Flight::Final(packets) => {
                    self.last_flight = packets;
                    self.send_last_flight().await?;
                    return Ok(());
                }
                Flight::Await => {}
                Flight::Complete => return Ok(()),
            }

            let mut retransmits = 0u32;
            let mut retransmit_at = Instant::now() + interval;

            loop {
                // A steady stream of ignorable packets never lets the timer fire.
                let now = Instant::now();
                if now >= deadline {
                    return Err(SerialwireError::HandshakeTimeout {
                        elapsed: now - started,
                        retransmits,
                    });
                }

                let wake_at = retransmit_at.min(deadline);
                let packet = match self.receive_until(wake_at, cancel).await {
                    Ok(packet) => packet,
                    Err(e) if e.is_fatal() || matches!(e, SerialwireError::Cancelled) => {
                        return Err(e)
                    }
                    Err(e) => {
                        tracing::warn!(error = %e, "Handshake packet dropped");
                        continue;
                    }
                };

                let Some(frame) = packet else {
                    let now = Instant::now();
                    if now >= deadline {
                        continue;
                    }
                    if self.last_flight.is_empty() {
                        retransmit_at = now + interval;
                        continue;
                    }
                    if retransmits >= self.config.max_retransmits {
                        return Err(SerialwireError::HandshakeTimeout {
                            elapsed: now - started,
                            retransmits,
                        });
                    }
                    retransmits += 1;
                    tracing::debug!(retransmits, "No reply to flight, retransmitting");
                    self.send_last_flight().await?;
                    retransmit_at = Instant::now() + interval;
                    continue;
                };

                let progress = lock(&self.shared).engine.consume_flight(frame.payload())?;
                match progress {
                    Progress::NeedMore => {}
                    Progress::FlightComplete => break,
                    Progress::PeerRetransmitted => {
                        tracing::debug!("Peer repeated its flight, resending ours");
                        self.send_last_flight().await?;
                    }
                }
            }
        }
    }

    /// Receive one frame, or `None` once `at` passes.
    async fn receive_until(
        &mut self,
        at: Instant,
        cancel: &CancellationToken,
    ) -> Result<Option<Frame>> {
        if self.software_timers {
            return match tokio::time::timeout_at(at, self.adapter.receive_frame(cancel)).await {
                Ok(result) => result.map(Some),
                Err(_) => Ok(None),
            };
        }

        self.adapter.set_read_deadline(Some(at))?;
        let result = self.adapter.receive_frame(cancel).await;
        self.adapter.set_read_deadline(None)?;

        match result {
            Ok(frame) => Ok(Some(frame)),
            Err(SerialwireError::DeadlineExceeded) => Ok(None),
            Err(e) => Err(e),
        }
    }

    async fn send_last_flight(&self) -> Result<()> {
        for packet in &self.last_flight {
            self.packets.send(packet.clone()).await?;
        }
        tracing::debug!(packets = self.last_flight.len(), "Flight sent");
        Ok(())
    }

    /// Seal and send one record.
    pub async fn send(&self, plaintext: &[u8]) -> Result<()> {
        self.sender().send(Bytes::copy_from_slice(plaintext)).await
    }

    /// Receive and open one record.
    ///
    /// Handshake repeats and stale packets are handled internally. A record
    /// that fails authentication is dropped and reported as
    /// `RecordAuthFailure`; the session stays usable unless configured
    /// otherwise. A peer close notification closes the session and returns
    /// `TransportClosed`.
    pub async fn recv(&mut self, cancel: &CancellationToken) -> Result<Bytes> {
        loop {
            let state = self.state();
            if state != SessionState::Established {
                return Err(state_error(state, "recv"));
            }

            let frame = match self.adapter.receive_frame(cancel).await {
                Ok(frame) => frame,
                Err(e) => return Err(self.fail_on(e)),
            };

            let opened = lock(&self.shared).engine.open(frame.payload());
            match opened {
                Ok(Opened::Data(data)) => return Ok(data),
                Ok(Opened::HandshakeRetransmit) => {
                    tracing::debug!("Peer repeated handshake, resending final flight");
                    if let Err(e) = self.send_last_flight().await {
                        return Err(self.fail_on(e));
                    }
                }
                Ok(Opened::CloseNotify) => {
                    tracing::debug!("Peer closed session");
                    self.set_state(SessionState::Closed);
                    self.adapter.close();
                    return Err(SerialwireError::TransportClosed);
                }
                Ok(Opened::Ignore) => {}
                Err(e) => {
                    let reason = match e {
                        SerialwireError::RecordAuthFailure(reason) => reason,
                        other => other.to_string(),
                    };
                    tracing::warn!(reason = %reason, "Record failed authentication, dropped");

                    if self.config.fatal_record_auth_failures {
                        self.set_state(SessionState::Failed);
                        self.adapter.close();
                    }
                    return Err(SerialwireError::RecordAuthFailure(reason));
                }
            }
        }
    }

    fn fail_on(&mut self, err: SerialwireError) -> SerialwireError {
        if err.is_fatal() {
            let state = match err {
                SerialwireError::TransportClosed => SessionState::Closed,
                _ => SessionState::Failed,
            };
            tracing::debug!(error = %err, ?state, "Session ended");
            self.set_state(state);
            self.adapter.close();
        }
        err
    }

    /// Close the session. Idempotent.
    ///
    /// An established session first sends a sealed close notification on a
    /// best-effort basis.
    pub async fn close(&mut self) {
        let _order = self.send_order.lock().await;
        let notify = {
            let mut shared = lock(&self.shared);
            if shared.state.is_terminal() {
                None
            } else {
                let notify = if shared.state == SessionState::Established {
                    let seq = shared.send_seq;
                    shared.send_seq += 1;
                    shared.engine.close_notify(seq)
                } else {
                    None
                };
                shared.state = SessionState::Closed;
                notify
            }
        };

        if let Some(record) = notify {
            if let Err(e) = self.packets.send(Bytes::from(record)).await {
                tracing::debug!(error = %e, "Close notification not delivered");
            }
        }
        self.adapter.close();
    }
}

/// Cloneable send side of a [`SecureSession`].
pub struct RecordSender<E> {
    shared: Arc<Mutex<Shared<E>>>,
    send_order: Arc<tokio::sync::Mutex<()>>,
    packets: PacketSender,
    mtu: usize,
}

impl<E> Clone for RecordSender<E> {
    fn clone(&self) -> Self {
        Self {
            shared: self.shared.clone(),
            send_order: self.send_order.clone(),
            packets: self.packets.clone(),
            mtu: self.mtu,
        }
    }
}

impl<E: HandshakeEngine> RecordSender<E> {
    /// Seal and send one record.
    ///
    /// # Errors
    ///
    /// - `FrameTooLarge` if the plaintext exceeds the session MTU, or the
    ///   sealed record would exceed the frame limit; no sequence number is
    ///   used
    /// - `InvalidState` before the handshake completes
    /// - `TransportClosed` once the session is closed or failed
    pub async fn send(&self, plaintext: Bytes) -> Result<()> {
        if plaintext.len() > self.mtu {
            return Err(SerialwireError::FrameTooLarge {
                size: plaintext.len(),
                max: self.mtu,
            });
        }

        let _order = self.send_order.lock().await;
        let record = {
            let mut shared = lock(&self.shared);
            if shared.state != SessionState::Established {
                return Err(state_error(shared.state, "send"));
            }
            let size = plaintext.len() + shared.engine.record_overhead();
            if size > self.packets.max_frame_size() {
                return Err(SerialwireError::FrameTooLarge {
                    size,
                    max: self.packets.max_frame_size(),
                });
            }
            let seq = shared.send_seq;
            shared.send_seq += 1;
            shared.engine.seal(seq, &plaintext)?
        };

        let result = self.packets.send(Bytes::from(record)).await;
        if let Err(e) = &result {
            if e.is_fatal() {
                lock(&self.shared).state = SessionState::Failed;
            }
        }
        result
    }
}

impl<E: HandshakeEngine> RecordSink for RecordSender<E> {
    fn send_record(&self, payload: Bytes) -> BoxFuture<'_, Result<()>> {
        Box::pin(self.send(payload))
    }
}
