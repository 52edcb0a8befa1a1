//! Requesting endpoint.
//!
//! The [`ClientBuilder`] collects configuration and the [`Client`] runs the
//! lifecycle:
//! 1. Wrap the stream in a packet adapter
//! 2. Run the handshake
//! 3. Send requests and wait for the matching response
//!
//! Confirmable requests are retransmitted with exponential back-off until a
//! response (or empty ACK) arrives. A piggybacked response is matched by
//! message ID, a separate response by token. Requests without a token get a
//! fresh random one, so a late reply to an earlier request never matches.
//!
//! # Example
//!
//! ```ignore
//! use serialwire::{Client, PskHandshake};
//! use tokio_util::sync::CancellationToken;
//!
//! let cancel = CancellationToken::new();
//! let port = serialwire::transport::open_device("/dev/ttyUSB0").await?;
//! let engine = PskHandshake::client("client", b"secret");
//!
//! let mut client = Client::builder().connect(port, engine, &cancel).await?;
//! let response = client.get("/a", &cancel).await?;
//! println!("{} {}", response.code, String::from_utf8_lossy(&response.payload));
//! client.close().await;
//! ```

use bytes::Bytes;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::codec::{CoapCodec, Code, Message, MessageType};
use crate::config::{LinkConfig, RequestConfig};
use crate::error::{Result, SerialwireError};
use crate::session::{HandshakeEngine, SecureSession, SessionConfig, SessionState};
use crate::transport::{AdapterConfig, StreamPacketAdapter};

/// Length of the tokens generated for requests that carry none.
pub const REQUEST_TOKEN_LEN: usize = 4;

/// Builder for configuring and connecting a [`Client`].
pub struct ClientBuilder {
    config: LinkConfig,
    first_message_id: Option<u16>,
}

impl ClientBuilder {
    /// Create a builder with default configuration.
    pub fn new() -> Self {
        Self {
            config: LinkConfig::default(),
            first_message_id: None,
        }
    }

    /// Replace the whole link configuration.
    pub fn config(mut self, config: LinkConfig) -> Self {
        self.config = config;
        self
    }

    /// Set the adapter configuration.
    pub fn adapter(mut self, adapter: AdapterConfig) -> Self {
        self.config.adapter = adapter;
        self
    }

    /// Set the session configuration.
    pub fn session(mut self, session: SessionConfig) -> Self {
        self.config.session = session;
        self
    }

    /// Set the request retransmission configuration.
    pub fn request(mut self, request: RequestConfig) -> Self {
        self.config.request = request;
        self
    }

    /// Message ID of the first request.
    ///
    /// Default: random
    pub fn first_message_id(mut self, id: u16) -> Self {
        self.first_message_id = Some(id);
        self
    }

    /// Validate the configuration, wrap `stream` and run the handshake.
    pub async fn connect<S, E>(
        self,
        stream: S,
        engine: E,
        cancel: &CancellationToken,
    ) -> Result<Client<S, E>>
    where
        S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
        E: HandshakeEngine,
    {
        self.config.validate_for(&engine)?;

        let adapter = StreamPacketAdapter::new(stream, self.config.adapter);
        let mut session = SecureSession::new(adapter, engine, self.config.session);
        session.handshake(cancel).await?;

        let mut client = Client::new(session, self.config.request);
        if let Some(id) = self.first_message_id {
            client.next_message_id = id;
        }
        Ok(client)
    }
}

impl Default for ClientBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// A connected client.
///
/// One request is in flight at a time; `request` takes `&mut self`.
pub struct Client<S, E> {
    session: SecureSession<S, E>,
    config: RequestConfig,
    next_message_id: u16,
}

impl Client<(), ()> {
    /// Create a new client builder.
    pub fn builder() -> ClientBuilder {
        ClientBuilder::new()
    }
}

impl<S, E> Client<S, E>
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    E: HandshakeEngine,
{
    /// Wrap an established session.
    pub fn new(session: SecureSession<S, E>, config: RequestConfig) -> Self {
        Self {
            session,
            config,
            next_message_id: rand::random(),
        }
    }

    /// The underlying session.
    pub fn session(&self) -> &SecureSession<S, E> {
        &self.session
    }

    /// Request retransmission settings.
    pub fn config(&self) -> &RequestConfig {
        &self.config
    }

    /// Allocate the next message ID.
    pub fn next_message_id(&mut self) -> u16 {
        let id = self.next_message_id;
        self.next_message_id = self.next_message_id.wrapping_add(1);
        id
    }

    /// GET `path`.
    pub async fn get(&mut self, path: &str, cancel: &CancellationToken) -> Result<Message> {
        self.request(Message::request(Code::GET, path), cancel).await
    }

    /// POST `payload` to `path`.
    pub async fn post(
        &mut self,
        path: &str,
        payload: impl Into<Bytes>,
        cancel: &CancellationToken,
    ) -> Result<Message> {
        let msg = Message::request(Code::POST, path).with_payload(payload);
        self.request(msg, cancel).await
    }

    /// PUT `payload` to `path`.
    pub async fn put(
        &mut self,
        path: &str,
        payload: impl Into<Bytes>,
        cancel: &CancellationToken,
    ) -> Result<Message> {
        let msg = Message::request(Code::PUT, path).with_payload(payload);
        self.request(msg, cancel).await
    }

    /// DELETE `path`.
    pub async fn delete(&mut self, path: &str, cancel: &CancellationToken) -> Result<Message> {
        self.request(Message::request(Code::DELETE, path), cancel).await
    }

    /// Send a request and wait for its response.
    ///
    /// The message ID is allocated here, and so is a random token when `msg`
    /// has none. Type, code, options and payload come from `msg`.
    ///
    /// # Errors
    ///
    /// - `ResponseTimeout` when no response arrives after all retransmissions
    /// - `Reset` when the peer rejects the request
    /// - any session-fatal error from the link
    pub async fn request(&mut self, mut msg: Message, cancel: &CancellationToken) -> Result<Message> {
        msg.message_id = self.next_message_id();
        if msg.token.is_empty() {
            msg.token = Bytes::copy_from_slice(&rand::random::<[u8; REQUEST_TOKEN_LEN]>());
        }
        let reply = self.exchange(&msg, cancel).await?;

        if reply.msg_type == MessageType::Reset {
            return Err(SerialwireError::Reset {
                message_id: msg.message_id,
            });
        }
        Ok(reply)
    }

    /// Send an empty confirmable message and wait for the peer's RST or ACK.
    pub async fn ping(&mut self, cancel: &CancellationToken) -> Result<()> {
        let msg = Message::new(MessageType::Confirmable, Code::EMPTY, self.next_message_id());
        self.exchange(&msg, cancel).await.map(|_| ())
    }

    async fn exchange(&mut self, msg: &Message, cancel: &CancellationToken) -> Result<Message> {
        let encoded = CoapCodec::encode(msg)?;
        let message_id = msg.message_id;
        let is_ping = msg.code.is_empty();
        let mut retransmit = msg.is_confirmable();

        self.session.send(&encoded).await?;
        tracing::debug!(message_id, code = %msg.code, "Request sent");

        let mut attempt = 0u32;
        let mut wait_until = Instant::now() + self.config.timeout_for(attempt);

        loop {
            let record = match tokio::time::timeout_at(wait_until, self.session.recv(cancel)).await
            {
                Ok(Ok(record)) => record,
                Ok(Err(e)) if e.is_fatal() || matches!(e, SerialwireError::Cancelled) => {
                    return Err(e)
                }
                Ok(Err(e)) => {
                    tracing::warn!(error = %e, "Record dropped while awaiting response");
                    continue;
                }
                Err(_) => {
                    if attempt >= self.config.max_retransmit {
                        tracing::warn!(message_id, attempts = attempt + 1, "No response");
                        return Err(SerialwireError::ResponseTimeout { message_id });
                    }
                    attempt += 1;
                    if retransmit {
                        tracing::debug!(message_id, attempt, "Retransmitting request");
                        self.session.send(&encoded).await?;
                    }
                    wait_until = Instant::now() + self.config.timeout_for(attempt);
                    continue;
                }
            };

            let reply = match CoapCodec::decode(&record) {
                Ok(reply) => reply,
                Err(e) => {
                    tracing::warn!(error = %e, "Malformed message ignored");
                    continue;
                }
            };

            match reply.msg_type {
                MessageType::Acknowledgement | MessageType::Reset
                    if reply.message_id == message_id =>
                {
                    if reply.msg_type == MessageType::Reset || is_ping || !reply.code.is_empty() {
                        return Ok(reply);
                    }
                    // Empty ACK: the response will follow separately.
                    tracing::debug!(message_id, "Request acknowledged, awaiting response");
                    retransmit = false;
                }
                MessageType::Confirmable | MessageType::NonConfirmable
                    if !is_ping && reply.code.is_response() && reply.token == msg.token =>
                {
                    if reply.is_confirmable() {
                        self.send_empty(MessageType::Acknowledgement, reply.message_id)
                            .await?;
                    }
                    return Ok(reply);
                }
                MessageType::Confirmable => {
                    tracing::debug!(message_id = reply.message_id, "Rejecting unexpected message");
                    self.send_empty(MessageType::Reset, reply.message_id).await?;
                }
                _ => {
                    tracing::debug!(
                        message_id = reply.message_id,
                        msg_type = ?reply.msg_type,
                        "Unmatched message ignored"
                    );
                }
            }
        }
    }

    async fn send_empty(&self, msg_type: MessageType, message_id: u16) -> Result<()> {
        let msg = Message::new(msg_type, Code::EMPTY, message_id);
        self.session.send(&CoapCodec::encode(&msg)?).await
    }

    /// Current session state.
    pub fn state(&self) -> SessionState {
        self.session.state()
    }

    /// Close the session. Idempotent.
    pub async fn close(&mut self) {
        self.session.close().await;
    }
}
