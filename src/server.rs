//! Serving endpoint.
//!
//! The [`ServerBuilder`] registers handlers and the [`Server`] runs the
//! receive loop of one session:
//! 1. Receive and open a record
//! 2. Decode it as a message
//! 3. Dispatch requests to their handler, which replies through a
//!    [`Responder`]
//!
//! Handlers run inline, one request at a time per session. Malformed
//! messages and records that fail authentication are logged and skipped.
//!
//! # Example
//!
//! ```ignore
//! use serialwire::codec::Code;
//! use serialwire::{PskHandshake, Server};
//! use tokio_util::sync::CancellationToken;
//!
//! let server = Server::builder()
//!     .handle("/a", |_req, responder| async move {
//!         responder.respond(Code::CONTENT, "Hello World").await
//!     })
//!     .build();
//!
//! let port = serialwire::transport::open_device("/dev/ttyUSB0").await?;
//! let engine = PskHandshake::server("server", b"secret");
//! server.run(port, engine, &CancellationToken::new()).await?;
//! ```

use std::future::Future;
use std::sync::Arc;

use serde::de::DeserializeOwned;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio_util::sync::CancellationToken;

use crate::codec::{CoapCodec, Code, Message, MessageType};
use crate::config::LinkConfig;
use crate::error::{Result, SerialwireError};
use crate::handler::{Dispatcher, HandlerResult, RecordSink, Responder};
use crate::session::{HandshakeEngine, SecureSession};
use crate::transport::StreamPacketAdapter;

/// Builder for configuring a [`Server`].
pub struct ServerBuilder {
    dispatcher: Dispatcher,
    config: LinkConfig,
}

impl ServerBuilder {
    /// Create a new server builder.
    pub fn new() -> Self {
        Self {
            dispatcher: Dispatcher::new(),
            config: LinkConfig::default(),
        }
    }

    /// Register a handler for `path`.
    pub fn handle<F, Fut>(mut self, path: &str, handler: F) -> Self
    where
        F: Fn(Message, Responder) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = HandlerResult> + Send + 'static,
    {
        self.dispatcher.register(path, handler);
        self
    }

    /// Register a handler that receives the JSON-decoded payload.
    pub fn handle_json<F, T, Fut>(mut self, path: &str, handler: F) -> Self
    where
        F: Fn(T, Responder) -> Fut + Send + Sync + 'static,
        T: DeserializeOwned + Send + 'static,
        Fut: Future<Output = HandlerResult> + Send + 'static,
    {
        self.dispatcher.register_json(path, handler);
        self
    }

    /// Set the link configuration used by [`Server::accept`].
    pub fn config(mut self, config: LinkConfig) -> Self {
        self.config = config;
        self
    }

    /// Build the server.
    pub fn build(self) -> Server {
        Server {
            dispatcher: self.dispatcher,
            config: self.config,
        }
    }
}

impl Default for ServerBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Request server for point-to-point sessions.
pub struct Server {
    dispatcher: Dispatcher,
    config: LinkConfig,
}

impl Server {
    /// Create a new server builder.
    pub fn builder() -> ServerBuilder {
        ServerBuilder::new()
    }

    /// Routing table.
    pub fn dispatcher(&self) -> &Dispatcher {
        &self.dispatcher
    }

    /// Link configuration.
    pub fn config(&self) -> &LinkConfig {
        &self.config
    }

    /// Wrap `stream` and run the handshake.
    pub async fn accept<S, E>(
        &self,
        stream: S,
        engine: E,
        cancel: &CancellationToken,
    ) -> Result<SecureSession<S, E>>
    where
        S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
        E: HandshakeEngine,
    {
        self.config.validate_for(&engine)?;

        let adapter = StreamPacketAdapter::new(stream, self.config.adapter.clone());
        let mut session = SecureSession::new(adapter, engine, self.config.session.clone());
        session.handshake(cancel).await?;
        Ok(session)
    }

    /// Accept a session on `stream` and serve it until the peer closes.
    ///
    /// Cancellation, during the handshake or while serving, closes the
    /// session and returns `Ok`.
    pub async fn run<S, E>(&self, stream: S, engine: E, cancel: &CancellationToken) -> Result<()>
    where
        S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
        E: HandshakeEngine,
    {
        let mut session = match self.accept(stream, engine, cancel).await {
            Ok(session) => session,
            Err(SerialwireError::Cancelled) => {
                tracing::debug!("Cancelled before the handshake completed");
                return Ok(());
            }
            Err(e) => return Err(e),
        };
        let result = self.serve(&mut session, cancel).await;
        session.close().await;

        match result {
            Err(SerialwireError::Cancelled) => Ok(()),
            other => other,
        }
    }

    /// Serve requests on an established session.
    ///
    /// Returns `Ok` when the peer closes the session.
    ///
    /// # Errors
    ///
    /// `Cancelled` when `cancel` fires, or the session-fatal error that ended
    /// the loop.
    pub async fn serve<S, E>(
        &self,
        session: &mut SecureSession<S, E>,
        cancel: &CancellationToken,
    ) -> Result<()>
    where
        S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
        E: HandshakeEngine,
    {
        let sink: Arc<dyn RecordSink> = Arc::new(session.sender());
        let mut reply_message_id: u16 = rand::random();

        loop {
            let record = match session.recv(cancel).await {
                Ok(record) => record,
                Err(SerialwireError::TransportClosed) => {
                    tracing::debug!("Peer closed session");
                    return Ok(());
                }
                Err(SerialwireError::Cancelled) => return Err(SerialwireError::Cancelled),
                Err(e) if e.is_fatal() => {
                    tracing::error!(error = %e, "Serve loop ended");
                    return Err(e);
                }
                Err(e) => {
                    tracing::warn!(error = %e, "Record dropped");
                    continue;
                }
            };

            let request = match CoapCodec::decode(&record) {
                Ok(msg) => msg,
                Err(e) => {
                    tracing::warn!(error = %e, "Malformed message ignored");
                    continue;
                }
            };

            match request.msg_type {
                MessageType::Confirmable if request.code.is_empty() => {
                    tracing::debug!(message_id = request.message_id, "Ping, answering with reset");
                    let rst = Message::new(MessageType::Reset, Code::EMPTY, request.message_id);
                    sink.send_record(CoapCodec::encode(&rst)?).await?;
                }
                MessageType::Confirmable | MessageType::NonConfirmable
                    if request.code.is_request() =>
                {
                    let responder =
                        Responder::with_sink(&request, sink.clone(), reply_message_id);
                    if !request.is_confirmable() {
                        reply_message_id = reply_message_id.wrapping_add(1);
                    }

                    match self.dispatcher.dispatch(request, responder).await {
                        Ok(()) | Err(SerialwireError::NoRoute(_)) => {}
                        Err(e) if e.is_fatal() => {
                            tracing::error!(error = %e, "Serve loop ended");
                            return Err(e);
                        }
                        Err(e) => tracing::warn!(error = %e, "Handler failed"),
                    }
                }
                _ => {
                    tracing::debug!(
                        message_id = request.message_id,
                        msg_type = ?request.msg_type,
                        code = %request.code,
                        "Non-request message ignored"
                    );
                }
            }
        }
    }
}
