//! Shared helpers for integration tests.

#![allow(dead_code)]

use std::io;
use std::pin::Pin;
use std::task::{ready, Context, Poll};

use bytes::Bytes;
use serialwire::codec::Code;
use serialwire::error::{Result, SerialwireError};
use serialwire::protocol::FrameBuffer;
use serialwire::session::{Flight, HandshakeEngine, Opened, PeerIdentity, Progress};
use serialwire::Server;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, ReadBuf};
use tokio::task::JoinHandle;

pub const PSK: &[u8] = b"serialwire-test-psk";

/// Stream wrapper that moves at most `chunk` bytes per read and per write.
pub struct ChunkedStream<S> {
    inner: S,
    chunk: usize,
}

impl<S> ChunkedStream<S> {
    pub fn new(inner: S, chunk: usize) -> Self {
        Self {
            inner,
            chunk: chunk.max(1),
        }
    }
}

impl<S: AsyncRead + Unpin> AsyncRead for ChunkedStream<S> {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        let this = self.get_mut();
        let max = this.chunk.min(buf.remaining());
        let mut limited = ReadBuf::new(buf.initialize_unfilled_to(max));
        ready!(Pin::new(&mut this.inner).poll_read(cx, &mut limited))?;
        let n = limited.filled().len();
        buf.advance(n);
        Poll::Ready(Ok(()))
    }
}

impl<S: AsyncWrite + Unpin> AsyncWrite for ChunkedStream<S> {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        let this = self.get_mut();
        let n = this.chunk.min(buf.len());
        Pin::new(&mut this.inner).poll_write(cx, &buf[..n])
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.get_mut().inner).poll_flush(cx)
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.get_mut().inner).poll_shutdown(cx)
    }
}

/// Tag byte prepended by [`TaggedEngine`].
pub const TAG: u8 = 0xA5;

/// Engine with no handshake whose records must start with [`TAG`].
///
/// Anything else fails authentication, which lets tests inject bad records
/// from a plaintext peer.
#[derive(Default)]
pub struct TaggedEngine;

impl HandshakeEngine for TaggedEngine {
    fn produce_flight(&mut self) -> Result<Flight> {
        Ok(Flight::Complete)
    }

    fn consume_flight(&mut self, _packet: &[u8]) -> Result<Progress> {
        Ok(Progress::FlightComplete)
    }

    fn seal(&mut self, _seq: u64, plaintext: &[u8]) -> Result<Vec<u8>> {
        let mut record = Vec::with_capacity(plaintext.len() + 1);
        record.push(TAG);
        record.extend_from_slice(plaintext);
        Ok(record)
    }

    fn record_overhead(&self) -> usize {
        1
    }

    fn open(&mut self, record: &[u8]) -> Result<Opened> {
        match record.split_first() {
            Some((&TAG, rest)) => Ok(Opened::Data(Bytes::copy_from_slice(rest))),
            _ => Err(SerialwireError::RecordAuthFailure("missing tag".into())),
        }
    }

    fn close_notify(&mut self, _seq: u64) -> Option<Vec<u8>> {
        None
    }

    fn peer_identity(&self) -> Option<PeerIdentity> {
        Some(PeerIdentity::new("tagged"))
    }
}

/// Wrap a plaintext message the way [`TaggedEngine`] seals it.
pub fn tagged(payload: &[u8]) -> Vec<u8> {
    let mut record = vec![TAG];
    record.extend_from_slice(payload);
    record
}

/// Server answering `GET /a` with `2.05 "Hello World"`.
pub fn hello_server() -> Server {
    Server::builder()
        .handle("/a", |_req, responder| async move {
            responder.respond(Code::CONTENT, "Hello World").await
        })
        .build()
}

/// Read raw frames from `stream` until it ends, returning their payloads.
pub fn collect_frames<S>(mut stream: S) -> JoinHandle<Vec<Bytes>>
where
    S: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut buffer = FrameBuffer::new();
        let mut frames = Vec::new();
        let mut buf = [0u8; 1024];
        loop {
            match stream.read(&mut buf).await {
                Ok(0) | Err(_) => return frames,
                Ok(n) => {
                    for frame in buffer.push(&buf[..n]).unwrap() {
                        frames.push(frame.into_payload());
                    }
                }
            }
        }
    })
}
