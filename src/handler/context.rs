//! Response handle for request handlers.
//!
//! A [`Responder`] is created per inbound request and consumed by the first
//! `respond*` call, so a handler can answer at most once. The reply is
//! correlated with the request:
//! - confirmable request: piggybacked ACK with the same message ID and token
//! - non-confirmable request: NON with a fresh message ID and the same token
//!
//! # Example
//!
//! ```ignore
//! async fn hello(_req: Message, responder: Responder) -> Result<()> {
//!     responder.respond(Code::CONTENT, "Hello World").await
//! }
//! ```

use std::sync::Arc;

use bytes::Bytes;
use serde::Serialize;

use super::BoxFuture;
use crate::codec::{CoapCodec, Code, Message, MessageType};
use crate::error::Result;

/// Destination for encoded response records.
///
/// Implemented by [`RecordSender`](crate::session::RecordSender); tests
/// plug in capturing sinks.
pub trait RecordSink: Send + Sync + 'static {
    /// Send one record.
    fn send_record(&self, payload: Bytes) -> BoxFuture<'_, Result<()>>;
}

/// One-shot reply handle for a single request.
pub struct Responder {
    /// Message ID of the request.
    message_id: u16,
    /// Token of the request.
    token: Bytes,
    /// Whether the request was confirmable.
    confirmable: bool,
    /// Message ID used for a non-confirmable reply.
    reply_message_id: u16,
    /// Record sink (None in testing mode).
    sink: Option<Arc<dyn RecordSink>>,
}

impl Responder {
    /// Create a responder without a sink (for testing).
    pub fn new(request: &Message) -> Self {
        Self {
            message_id: request.message_id,
            token: request.token.clone(),
            confirmable: request.is_confirmable(),
            reply_message_id: request.message_id,
            sink: None,
        }
    }

    /// Create a responder that sends through `sink`.
    ///
    /// `reply_message_id` is used only when the request was not confirmable.
    pub fn with_sink(request: &Message, sink: Arc<dyn RecordSink>, reply_message_id: u16) -> Self {
        Self {
            reply_message_id,
            sink: Some(sink),
            ..Self::new(request)
        }
    }

    /// Message ID of the request being answered.
    #[inline]
    pub fn message_id(&self) -> u16 {
        self.message_id
    }

    /// Token of the request being answered.
    #[inline]
    pub fn token(&self) -> &Bytes {
        &self.token
    }

    /// Whether the reply will be a piggybacked ACK.
    #[inline]
    pub fn is_confirmable(&self) -> bool {
        self.confirmable
    }

    /// The reply message for `code` and `payload`, without sending it.
    pub fn response(&self, code: Code, payload: impl Into<Bytes>) -> Message {
        self.correlate(Message::new(MessageType::Acknowledgement, code, 0).with_payload(payload))
    }

    fn correlate(&self, mut msg: Message) -> Message {
        if self.confirmable {
            msg.msg_type = MessageType::Acknowledgement;
            msg.message_id = self.message_id;
        } else {
            msg.msg_type = MessageType::NonConfirmable;
            msg.message_id = self.reply_message_id;
        }
        msg.token = self.token.clone();
        msg
    }

    /// Send a response with the given code and payload.
    pub async fn respond(self, code: Code, payload: impl Into<Bytes>) -> Result<()> {
        let msg = self.response(code, payload);
        self.send(msg).await
    }

    /// Send a prepared message as the response.
    ///
    /// Type, message ID and token are overwritten to match the request; code,
    /// options and payload are kept.
    pub async fn respond_with(self, msg: Message) -> Result<()> {
        let msg = self.correlate(msg);
        self.send(msg).await
    }

    /// Send `value` as a JSON payload with the JSON content format.
    pub async fn respond_json<T: Serialize>(self, code: Code, value: &T) -> Result<()> {
        let mut msg = Message::new(MessageType::Acknowledgement, code, 0);
        msg.set_json(value)?;
        self.respond_with(msg).await
    }

    async fn send(self, msg: Message) -> Result<()> {
        let encoded = CoapCodec::encode(&msg)?;

        let sink = match self.sink {
            Some(sink) => sink,
            None => {
                // No sink configured (testing mode)
                return Ok(());
            }
        };

        tracing::debug!(
            code = %msg.code,
            message_id = msg.message_id,
            len = encoded.len(),
            "Sending response"
        );
        sink.send_record(encoded).await
    }
}
