//! Packet-oriented view of a duplex byte stream.
//!
//! The session layer above expects datagrams: one send is one packet, one
//! receive is one packet. A serial line has no such boundaries, so the
//! adapter puts a length prefix in front of every outbound packet and
//! reassembles inbound bytes into whole frames before handing them up.
//!
//! # Example
//!
//! ```ignore
//! use serialwire::transport::{AdapterConfig, StreamPacketAdapter};
//! use tokio_util::sync::CancellationToken;
//!
//! let (a, b) = tokio::io::duplex(4096);
//! let left = StreamPacketAdapter::new(a, AdapterConfig::default());
//! let mut right = StreamPacketAdapter::new(b, AdapterConfig::default());
//!
//! left.send_packet(b"hello").await?;
//!
//! let mut buf = [0u8; 64];
//! let (n, _addr) = right.receive_packet(&mut buf, &CancellationToken::new()).await?;
//! assert_eq!(&buf[..n], b"hello");
//! ```

use std::future::Future;
use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4};
use std::sync::{Arc, Mutex, PoisonError};

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, ReadHalf};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::error::{Result, SerialwireError};
use crate::protocol::{
    validate_length, Frame, FrameBuffer, DEFAULT_MAX_FRAME_SIZE, DEFAULT_MAX_RESYNC_ATTEMPTS,
};
use crate::writer::{spawn_writer_task, WriterConfig, WriterHandle, DEFAULT_CHANNEL_CAPACITY};

/// Largest single read from the stream.
const READ_CHUNK_SIZE: usize = 4096;

/// Address reported for the other end of a point-to-point stream.
///
/// A serial line has no addressing; every packet comes from `0.0.0.0:0`.
pub fn synthetic_peer_addr() -> SocketAddr {
    SocketAddr::V4(SocketAddrV4::new(Ipv4Addr::UNSPECIFIED, 0))
}

/// Whether the adapter enforces read/write deadlines itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeadlineMode {
    /// Deadlines are honoured by the adapter.
    #[default]
    Enforced,
    /// Deadline setters fail with `DeadlineUnsupported`; callers run their
    /// own timers.
    Unsupported,
}

/// Configuration for a [`StreamPacketAdapter`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AdapterConfig {
    /// Largest packet accepted in either direction.
    pub max_frame_size: usize,
    /// Consecutive oversized frames tolerated before giving up on the stream.
    pub max_resync_attempts: u32,
    /// Deadline support.
    pub deadlines: DeadlineMode,
    /// Outbound frame queue capacity.
    pub channel_capacity: usize,
}

impl Default for AdapterConfig {
    fn default() -> Self {
        Self {
            max_frame_size: DEFAULT_MAX_FRAME_SIZE,
            max_resync_attempts: DEFAULT_MAX_RESYNC_ATTEMPTS,
            deadlines: DeadlineMode::Enforced,
            channel_capacity: DEFAULT_CHANNEL_CAPACITY,
        }
    }
}

/// Cloneable send side of an adapter.
#[derive(Clone)]
pub struct PacketSender {
    writer: WriterHandle,
    max_frame_size: usize,
    write_deadline: Arc<Mutex<Option<Instant>>>,
}

impl PacketSender {
    /// Send one packet as one frame.
    ///
    /// Fails with `FrameTooLarge` before anything is written if the packet
    /// exceeds the maximum frame size.
    pub async fn send(&self, packet: Bytes) -> Result<()> {
        validate_length(packet.len(), self.max_frame_size)?;

        if self.writer.is_closed() {
            return Err(SerialwireError::TransportClosed);
        }

        let deadline = *self
            .write_deadline
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        with_deadline(deadline, self.writer.send(packet)).await?
    }

    /// Maximum packet size accepted by [`send`](Self::send).
    pub fn max_frame_size(&self) -> usize {
        self.max_frame_size
    }
}

/// Adapter from a duplex byte stream to a packet connection.
pub struct StreamPacketAdapter<S> {
    reader: ReadHalf<S>,
    frames: FrameBuffer,
    scratch: Vec<u8>,
    sender: PacketSender,
    deadlines: DeadlineMode,
    read_deadline: Option<Instant>,
    closed: bool,
    _writer_task: JoinHandle<Result<()>>,
}

impl<S> StreamPacketAdapter<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    /// Wrap a stream. Spawns the writer task, so this must run inside a
    /// tokio runtime.
    pub fn new(stream: S, config: AdapterConfig) -> Self {
        let (reader, write_half) = tokio::io::split(stream);
        let (writer, writer_task) = spawn_writer_task(
            write_half,
            WriterConfig {
                channel_capacity: config.channel_capacity,
            },
        );

        Self {
            reader,
            frames: FrameBuffer::with_limits(config.max_frame_size, config.max_resync_attempts),
            scratch: vec![0u8; config.max_frame_size.clamp(64, READ_CHUNK_SIZE)],
            sender: PacketSender {
                writer,
                max_frame_size: config.max_frame_size,
                write_deadline: Arc::new(Mutex::new(None)),
            },
            deadlines: config.deadlines,
            read_deadline: None,
            closed: false,
            _writer_task: writer_task,
        }
    }

    /// Send one packet, returning once it is fully written.
    pub async fn send_packet(&self, packet: &[u8]) -> Result<()> {
        if self.closed {
            return Err(SerialwireError::TransportClosed);
        }
        self.sender.send(Bytes::copy_from_slice(packet)).await
    }

    /// Receive exactly one packet into `buf`.
    ///
    /// Returns the packet length and the synthetic peer address. A packet
    /// longer than `buf` is dropped with `BufferTooSmall`. Cancel safe:
    /// bytes already read stay buffered for the next call.
    pub async fn receive_packet(
        &mut self,
        buf: &mut [u8],
        cancel: &CancellationToken,
    ) -> Result<(usize, SocketAddr)> {
        let frame = self.receive_frame(cancel).await?;

        if frame.len() > buf.len() {
            tracing::warn!(
                size = frame.len(),
                buffer = buf.len(),
                "Packet does not fit receive buffer, dropped"
            );
            return Err(SerialwireError::BufferTooSmall {
                needed: frame.len(),
                available: buf.len(),
            });
        }

        buf[..frame.len()].copy_from_slice(frame.payload());
        Ok((frame.len(), synthetic_peer_addr()))
    }

    /// Receive exactly one frame without copying.
    pub async fn receive_frame(&mut self, cancel: &CancellationToken) -> Result<Frame> {
        loop {
            if self.closed {
                return Err(SerialwireError::TransportClosed);
            }

            match self.frames.next_frame() {
                Ok(Some(frame)) => {
                    tracing::debug!(size = frame.len(), "Frame received");
                    return Ok(frame);
                }
                Ok(None) => {}
                Err(e) => return Err(self.fail_if_fatal(e)),
            }

            let n = self.read_chunk(cancel).await?;
            if n == 0 {
                self.closed = true;
                self.frames.finish()?;
                tracing::debug!("Stream closed by peer");
                return Err(SerialwireError::TransportClosed);
            }
            self.frames.extend(&self.scratch[..n]);
        }
    }

    async fn read_chunk(&mut self, cancel: &CancellationToken) -> Result<usize> {
        let read = self.reader.read(&mut self.scratch);

        let result = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(SerialwireError::Cancelled),
            r = with_deadline(self.read_deadline, read) => r?,
        };

        match result {
            Ok(n) => Ok(n),
            Err(e) => {
                self.closed = true;
                self.frames.finish()?;
                Err(SerialwireError::Io(e))
            }
        }
    }

    fn fail_if_fatal(&mut self, err: SerialwireError) -> SerialwireError {
        if err.is_fatal() {
            self.closed = true;
            self.frames.clear();
        }
        err
    }

    /// Close the adapter. Idempotent.
    ///
    /// Pending outbound frames are flushed, then the write half is shut
    /// down; further operations return `TransportClosed`.
    pub fn close(&mut self) {
        if self.closed && self.sender.writer.is_closed() {
            return;
        }
        self.closed = true;
        self.frames.clear();
        self.sender.writer.shutdown();
        tracing::debug!("Packet adapter closed");
    }

    /// Returns true once the adapter is closed.
    pub fn is_closed(&self) -> bool {
        self.closed
    }

    /// Local address (synthetic).
    pub fn local_addr(&self) -> SocketAddr {
        synthetic_peer_addr()
    }

    /// Cloneable send side of this adapter.
    pub fn packet_sender(&self) -> PacketSender {
        self.sender.clone()
    }

    /// Maximum packet size in either direction.
    pub fn max_frame_size(&self) -> usize {
        self.sender.max_frame_size
    }

    /// Set or clear the read deadline.
    pub fn set_read_deadline(&mut self, deadline: Option<Instant>) -> Result<()> {
        self.check_deadlines()?;
        self.read_deadline = deadline;
        Ok(())
    }

    /// Set or clear the write deadline.
    pub fn set_write_deadline(&mut self, deadline: Option<Instant>) -> Result<()> {
        self.check_deadlines()?;
        *self
            .sender
            .write_deadline
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = deadline;
        Ok(())
    }

    /// Set or clear both deadlines.
    pub fn set_deadline(&mut self, deadline: Option<Instant>) -> Result<()> {
        self.set_read_deadline(deadline)?;
        self.set_write_deadline(deadline)
    }

    fn check_deadlines(&self) -> Result<()> {
        match self.deadlines {
            DeadlineMode::Enforced => Ok(()),
            DeadlineMode::Unsupported => Err(SerialwireError::DeadlineUnsupported),
        }
    }
}

impl<S> Drop for StreamPacketAdapter<S> {
    fn drop(&mut self) {
        self.sender.writer.shutdown();
    }
}

async fn with_deadline<F: Future>(deadline: Option<Instant>, fut: F) -> Result<F::Output> {
    match deadline {
        Some(at) => tokio::time::timeout_at(at, fut)
            .await
            .map_err(|_| SerialwireError::DeadlineExceeded),
        None => Ok(fut.await),
    }
}
