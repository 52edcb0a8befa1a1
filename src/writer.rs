//! Dedicated writer task for frame sending.
//!
//! Every session owns exactly one writer task, which owns the write half of
//! the byte stream. All outbound frames (handshake flights, retransmissions,
//! application records, close notifications) go through its channel, so two
//! frames can never interleave on the wire.
//!
//! # Architecture
//!
//! ```text
//! Session ────────┐
//! Retransmit ─────┼─► mpsc::Sender<OutboundFrame> ─► Writer Task ─► Stream
//! Responder ──────┘
//! ```
//!
//! Each frame carries a completion channel; [`WriterHandle::send`] returns
//! only once the whole frame (prefix + payload) has been written and
//! flushed, continuing short writes as needed.

use std::io::IoSlice;

use bytes::Bytes;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::error::{Result, SerialwireError};
use crate::protocol::{encode_length_prefix, LENGTH_PREFIX_SIZE};

/// Default channel capacity.
pub const DEFAULT_CHANNEL_CAPACITY: usize = 64;

/// Maximum frames to batch in a single write operation.
const MAX_BATCH_SIZE: usize = 16;

/// A frame ready to be written to the stream.
#[derive(Debug)]
pub struct OutboundFrame {
    /// Pre-encoded length prefix.
    pub prefix: [u8; LENGTH_PREFIX_SIZE],
    /// Payload bytes.
    pub payload: Bytes,
    /// Completion notification, fired after the frame is flushed.
    done: Option<oneshot::Sender<Result<()>>>,
}

impl OutboundFrame {
    /// Create a new outbound frame without completion notification.
    #[inline]
    pub fn new(payload: Bytes) -> Self {
        Self {
            prefix: encode_length_prefix(payload.len() as u32),
            payload,
            done: None,
        }
    }

    /// Total size of this frame (prefix + payload).
    #[inline]
    pub fn size(&self) -> usize {
        LENGTH_PREFIX_SIZE + self.payload.len()
    }

    fn complete(&mut self, result: Result<()>) {
        if let Some(done) = self.done.take() {
            let _ = done.send(result);
        }
    }
}

/// Configuration for the writer task.
#[derive(Debug, Clone)]
pub struct WriterConfig {
    /// Channel capacity for frame queue.
    pub channel_capacity: usize,
}

impl Default for WriterConfig {
    fn default() -> Self {
        Self {
            channel_capacity: DEFAULT_CHANNEL_CAPACITY,
        }
    }
}

/// Handle for sending frames to the writer task.
///
/// This is cheaply cloneable.
#[derive(Clone)]
pub struct WriterHandle {
    tx: mpsc::Sender<OutboundFrame>,
    shutdown: CancellationToken,
}

impl WriterHandle {
    /// Queue a payload as one frame and wait until it is fully written.
    ///
    /// Returns `TransportClosed` if the writer task is gone or the write
    /// failed. Dropping the returned future does not cancel the frame once
    /// queued; it is still written whole.
    pub async fn send(&self, payload: Bytes) -> Result<()> {
        let (done_tx, done_rx) = oneshot::channel();
        let mut frame = OutboundFrame::new(payload);
        frame.done = Some(done_tx);

        self.tx
            .send(frame)
            .await
            .map_err(|_| SerialwireError::TransportClosed)?;

        done_rx
            .await
            .map_err(|_| SerialwireError::TransportClosed)?
    }

    /// Stop the writer task and shut down the write half of the stream.
    ///
    /// Frames already handed to the task finish writing first.
    pub fn shutdown(&self) {
        self.shutdown.cancel();
    }

    /// Returns true once the writer task has stopped accepting frames.
    pub fn is_closed(&self) -> bool {
        self.shutdown.is_cancelled() || self.tx.is_closed()
    }
}

/// Spawn the writer task and return a handle for sending frames.
///
/// # Returns
///
/// A tuple of `(WriterHandle, JoinHandle)` where the JoinHandle can be used
/// to wait for the writer task to complete.
pub fn spawn_writer_task<W>(
    writer: W,
    config: WriterConfig,
) -> (WriterHandle, JoinHandle<Result<()>>)
where
    W: AsyncWrite + Unpin + Send + 'static,
{
    let (tx, rx) = mpsc::channel(config.channel_capacity.max(1));
    let shutdown = CancellationToken::new();

    let handle = WriterHandle {
        tx,
        shutdown: shutdown.clone(),
    };

    let task = tokio::spawn(writer_loop(rx, writer, shutdown));

    (handle, task)
}

/// Main writer loop - receives frames and writes them to the stream.
async fn writer_loop<W>(
    mut rx: mpsc::Receiver<OutboundFrame>,
    mut writer: W,
    shutdown: CancellationToken,
) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    loop {
        let first = tokio::select! {
            biased;
            frame = rx.recv() => match frame {
                Some(f) => f,
                None => break,
            },
            _ = shutdown.cancelled() => break,
        };

        // Collect additional ready frames (non-blocking)
        let mut batch = Vec::with_capacity(MAX_BATCH_SIZE);
        batch.push(first);

        while batch.len() < MAX_BATCH_SIZE {
            match rx.try_recv() {
                Ok(frame) => batch.push(frame),
                Err(_) => break,
            }
        }

        if let Err(e) = write_batch(&mut writer, &batch).await {
            tracing::error!(error = %e, frames = batch.len(), "Stream write failed");
            for frame in &mut batch {
                frame.complete(Err(SerialwireError::TransportClosed));
            }
            rx.close();
            while let Ok(mut frame) = rx.try_recv() {
                frame.complete(Err(SerialwireError::TransportClosed));
            }
            return Err(e);
        }

        tracing::debug!(frames = batch.len(), "Frames written");
        for frame in &mut batch {
            frame.complete(Ok(()));
        }
    }

    rx.close();
    while let Ok(mut frame) = rx.try_recv() {
        frame.complete(Err(SerialwireError::TransportClosed));
    }
    if let Err(e) = writer.shutdown().await {
        tracing::debug!(error = %e, "Write half shutdown failed");
    }
    Ok(())
}

/// Write a batch of frames using scatter/gather I/O (write_vectored).
///
/// Short writes are continued until every byte of every frame is out.
async fn write_batch<W>(writer: &mut W, batch: &[OutboundFrame]) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    if batch.is_empty() {
        return Ok(());
    }

    let total_size: usize = batch.iter().map(|f| f.size()).sum();
    let mut total_written = 0;

    while total_written < total_size {
        let slices = build_remaining_slices(batch, total_written);
        if slices.is_empty() {
            break;
        }

        let written = writer.write_vectored(&slices).await?;
        if written == 0 {
            return Err(SerialwireError::Io(std::io::Error::new(
                std::io::ErrorKind::WriteZero,
                "write_vectored returned 0",
            )));
        }

        total_written += written;
    }

    writer.flush().await?;
    Ok(())
}

/// Build IoSlice array for remaining data after partial write.
fn build_remaining_slices(batch: &[OutboundFrame], skip_bytes: usize) -> Vec<IoSlice<'_>> {
    let mut slices = Vec::with_capacity(batch.len() * 2);
    let mut offset = 0;

    for frame in batch {
        let prefix_end = offset + LENGTH_PREFIX_SIZE;
        if skip_bytes < prefix_end {
            let start = skip_bytes.saturating_sub(offset);
            slices.push(IoSlice::new(&frame.prefix[start..]));
        }
        offset = prefix_end;

        if !frame.payload.is_empty() {
            let payload_end = offset + frame.payload.len();
            if skip_bytes < payload_end {
                let start = skip_bytes.saturating_sub(offset);
                slices.push(IoSlice::new(&frame.payload[start..]));
            }
            offset = payload_end;
        }
    }

    slices
}
