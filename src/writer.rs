//! Dedicated writer task for serialized frame output.
//!
//! Each connection owns one writer task fed by an mpsc channel. Every
//! queued item is a fully encoded frame, so the bytes of one frame are
//! always emitted contiguously and never interleaved with another
//! frame's bytes. Ready frames are batched into a single
//! scatter/gather write when the channel has several queued.
//!
//! ```text
//! request task  ─┐
//! dispatch task ─┼─► mpsc::Sender<WriteOp> ─► writer task ─► socket
//! shutdown path ─┘
//! ```
//!
//! The channel is bounded; a slow socket applies the transport's
//! natural flow control back onto senders.

use std::io::IoSlice;

use bytes::Bytes;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::error::{EpoxyError, Result};
use crate::protocol::Frame;

/// Queue capacity of the writer channel.
const CHANNEL_CAPACITY: usize = 256;

/// Maximum frames folded into a single vectored write.
const MAX_BATCH_SIZE: usize = 64;

enum WriteOp {
    /// A fully encoded frame.
    Frame(Bytes),
    /// Flush, send FIN on the write half, and exit.
    Shutdown,
}

/// Handle for queueing frames onto a connection's writer task.
///
/// Cheaply cloneable; shared by the request path, dispatch tasks, and
/// the shutdown path.
#[derive(Clone)]
pub(crate) struct FrameWriter {
    tx: mpsc::Sender<WriteOp>,
}

impl FrameWriter {
    /// Encode `frame` and queue it for writing.
    ///
    /// # Errors
    ///
    /// Fails with `ConnectionClosed` once the writer task has exited.
    pub async fn send(&self, frame: &Frame) -> Result<()> {
        let bytes = frame.encode()?;
        self.tx
            .send(WriteOp::Frame(bytes))
            .await
            .map_err(|_| EpoxyError::ConnectionClosed)
    }

    /// Queue an orderly close: previously queued frames are written,
    /// the socket's write half is shut down, and the task exits.
    ///
    /// Safe to call more than once; later calls are no-ops.
    pub async fn close(&self) {
        let _ = self.tx.send(WriteOp::Shutdown).await;
    }
}

/// Spawn the writer task over the given write half.
pub(crate) fn spawn_writer_task<W>(writer: W) -> (FrameWriter, JoinHandle<()>)
where
    W: AsyncWrite + Unpin + Send + 'static,
{
    let (tx, rx) = mpsc::channel(CHANNEL_CAPACITY);
    let task = tokio::spawn(writer_loop(rx, writer));
    (FrameWriter { tx }, task)
}

async fn writer_loop<W>(mut rx: mpsc::Receiver<WriteOp>, mut writer: W)
where
    W: AsyncWrite + Unpin,
{
    let mut batch: Vec<Bytes> = Vec::with_capacity(MAX_BATCH_SIZE);

    loop {
        let first = match rx.recv().await {
            Some(op) => op,
            // All handles dropped: flush what we have and stop.
            None => {
                let _ = writer.shutdown().await;
                return;
            }
        };

        let mut shutdown = false;
        batch.clear();
        match first {
            WriteOp::Frame(bytes) => batch.push(bytes),
            WriteOp::Shutdown => shutdown = true,
        }

        while !shutdown && batch.len() < MAX_BATCH_SIZE {
            match rx.try_recv() {
                Ok(WriteOp::Frame(bytes)) => batch.push(bytes),
                Ok(WriteOp::Shutdown) => shutdown = true,
                Err(_) => break,
            }
        }

        if !batch.is_empty() {
            if let Err(e) = write_batch(&mut writer, &batch).await {
                tracing::debug!("frame write failed: {e}");
                rx.close();
                let _ = writer.shutdown().await;
                return;
            }
        }

        if shutdown {
            rx.close();
            let _ = writer.shutdown().await;
            return;
        }
    }
}

/// Write a batch of encoded frames with a single vectored write where
/// the kernel buffer allows, continuing from the partial-write offset
/// otherwise.
async fn write_batch<W>(writer: &mut W, batch: &[Bytes]) -> std::io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    let total: usize = batch.iter().map(Bytes::len).sum();
    let mut written = 0usize;

    while written < total {
        let slices = remaining_slices(batch, written);
        let n = writer.write_vectored(&slices).await?;
        if n == 0 {
            return Err(std::io::Error::new(
                std::io::ErrorKind::WriteZero,
                "socket accepted no bytes",
            ));
        }
        written += n;
    }

    writer.flush().await
}

/// Slices for the unwritten tail of the batch.
fn remaining_slices(batch: &[Bytes], skip_bytes: usize) -> Vec<IoSlice<'_>> {
    let mut slices = Vec::with_capacity(batch.len());
    let mut offset = 0usize;

    for frame in batch {
        let end = offset + frame.len();
        if skip_bytes < end {
            let start = skip_bytes.saturating_sub(offset);
            slices.push(IoSlice::new(&frame[start..]));
        }
        offset = end;
    }

    slices
}
