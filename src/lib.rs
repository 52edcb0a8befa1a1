//! # serialwire
//!
//! Secure request/response messaging over serial byte streams.
//!
//! A serial line delivers bytes with no packet boundaries and no security.
//! This crate layers, bottom up:
//!
//! - **Framing** ([`protocol`]): a 4-byte big-endian length prefix per packet
//! - **Transport** ([`transport`]): packet semantics over any duplex stream
//! - **Session** ([`session`], [`security`]): handshake with retransmission,
//!   then sealed records
//! - **Messages** ([`codec`]): CoAP (RFC 7252) encoding
//! - **Routing** ([`handler`]): path dispatch to async handlers
//!
//! [`Client`] and [`Server`] tie the layers together.
//!
//! ## Example
//!
//! ```ignore
//! use serialwire::codec::Code;
//! use serialwire::{Client, PskHandshake, Server};
//! use tokio_util::sync::CancellationToken;
//!
//! #[tokio::main]
//! async fn main() -> serialwire::Result<()> {
//!     let cancel = CancellationToken::new();
//!     let (a, b) = tokio::io::duplex(4096);
//!
//!     let server = Server::builder()
//!         .handle("/a", |_req, responder| async move {
//!             responder.respond(Code::CONTENT, "Hello World").await
//!         })
//!         .build();
//!     let token = cancel.clone();
//!     tokio::spawn(async move {
//!         server.run(b, PskHandshake::server("server", b"secret"), &token).await
//!     });
//!
//!     let mut client = Client::builder()
//!         .connect(a, PskHandshake::client("client", b"secret"), &cancel)
//!         .await?;
//!     let response = client.get("/a", &cancel).await?;
//!     assert_eq!(&response.payload[..], b"Hello World");
//!     client.close().await;
//!     Ok(())
//! }
//! ```

pub mod codec;
pub mod config;
pub mod error;
pub mod handler;
pub mod protocol;
pub mod security;
pub mod session;
pub mod transport;

mod client;
mod server;
mod writer;

pub use client::{Client, ClientBuilder, REQUEST_TOKEN_LEN};
pub use config::{LinkConfig, RequestConfig};
pub use error::{Result, SerialwireError};
pub use handler::{Dispatcher, Responder};
pub use security::{NullHandshake, PskHandshake};
pub use server::{Server, ServerBuilder};
pub use session::{SecureSession, SessionConfig, SessionState};
pub use transport::{AdapterConfig, StreamPacketAdapter};
