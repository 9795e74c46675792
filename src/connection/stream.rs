//! The accepted engine connection.
//!
//! Reads hand back whatever bytes the socket currently holds, unfiltered;
//! the reader task scrubs them before they reach the demuxer. Writes are
//! whole commands. Only the session controller writes, so no locking is
//! needed here.

use std::net::SocketAddr;

use bytes::{Bytes, BytesMut};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::connection::scrub_nuls;
use crate::{AppError, Result};

/// Bytes requested per socket read.
pub const READ_CHUNK_BYTES: usize = 1024;

/// Result of a single read.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReadOutcome {
    /// Raw bytes, possibly containing NULs.
    Data(Bytes),
    /// The peer closed its end.
    Closed,
}

/// Messages from the reader task to the session controller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Inbound {
    /// A sanitized, non-empty chunk.
    Chunk(Vec<u8>),
    /// The stream ended, cleanly or with the given error.
    Closed {
        /// Why the stream ended.
        reason: String,
    },
}

/// An accepted engine connection.
#[derive(Debug)]
pub struct Connection {
    reader: ChunkReader,
    writer: ChunkWriter,
}

/// Read half of a [`Connection`].
#[derive(Debug)]
pub struct ChunkReader {
    inner: OwnedReadHalf,
    peer: SocketAddr,
}

/// Write half of a [`Connection`].
#[derive(Debug)]
pub struct ChunkWriter {
    inner: OwnedWriteHalf,
    peer: SocketAddr,
}

impl Connection {
    pub(crate) fn new(stream: TcpStream, peer: SocketAddr) -> Self {
        if let Err(err) = stream.set_nodelay(true) {
            debug!(%peer, %err, "connection: failed to disable nagle");
        }
        let (read_half, write_half) = stream.into_split();
        Self {
            reader: ChunkReader {
                inner: read_half,
                peer,
            },
            writer: ChunkWriter {
                inner: write_half,
                peer,
            },
        }
    }

    /// Address the engine connected from.
    #[must_use]
    pub fn peer_addr(&self) -> SocketAddr {
        self.reader.peer
    }

    /// See [`ChunkReader::read_chunk`].
    ///
    /// # Errors
    ///
    /// Returns `AppError::Io` on socket failure.
    pub async fn read_chunk(&mut self) -> Result<ReadOutcome> {
        self.reader.read_chunk().await
    }

    /// See [`ChunkWriter::write_all`].
    ///
    /// # Errors
    ///
    /// Returns `AppError::Io` on socket failure.
    pub async fn write_all(&mut self, bytes: &[u8]) -> Result<()> {
        self.writer.write_all(bytes).await
    }

    /// Split into independently owned halves.
    #[must_use]
    pub fn into_split(self) -> (ChunkReader, ChunkWriter) {
        (self.reader, self.writer)
    }
}

impl ChunkReader {
    /// Read whatever bytes are available, waiting until at least one arrives.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Io` on socket failure.
    pub async fn read_chunk(&mut self) -> Result<ReadOutcome> {
        let mut buf = BytesMut::with_capacity(READ_CHUNK_BYTES);
        let n = self
            .inner
            .read_buf(&mut buf)
            .await
            .map_err(|err| AppError::Io(format!("read from {} failed: {err}", self.peer)))?;
        if n == 0 {
            Ok(ReadOutcome::Closed)
        } else {
            Ok(ReadOutcome::Data(buf.freeze()))
        }
    }
}

impl ChunkWriter {
    /// Write `bytes` completely and flush.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Io` on socket failure.
    pub async fn write_all(&mut self, bytes: &[u8]) -> Result<()> {
        self.inner
            .write_all(bytes)
            .await
            .map_err(|err| AppError::Io(format!("write to {} failed: {err}", self.peer)))?;
        self.inner
            .flush()
            .await
            .map_err(|err| AppError::Io(format!("flush to {} failed: {err}", self.peer)))
    }

    /// Close the write direction.
    pub async fn shutdown(&mut self) {
        if let Err(err) = self.inner.shutdown().await {
            debug!(peer = %self.peer, %err, "connection: write shutdown failed");
        }
    }
}

/// Reader task: drains the socket and forwards sanitized chunks.
///
/// Chunks that consist only of NUL bytes vanish after scrubbing and are not
/// forwarded. When the stream ends, [`Inbound::Closed`] is sent exactly once
/// before returning.
///
/// # Cancellation
///
/// Respects `cancel`: the task exits without sending `Closed`.
pub async fn run_reader(
    mut reader: ChunkReader,
    inbound_tx: mpsc::Sender<Inbound>,
    cancel: CancellationToken,
) {
    loop {
        tokio::select! {
            biased;

            () = cancel.cancelled() => {
                debug!(peer = %reader.peer, "reader: cancellation received, stopping");
                return;
            }

            outcome = reader.read_chunk() => {
                let message = match outcome {
                    Ok(ReadOutcome::Data(raw)) => {
                        let clean = scrub_nuls(&raw);
                        if clean.len() != raw.len() {
                            debug!(dropped = raw.len() - clean.len(), "reader: scrubbed NUL bytes");
                        }
                        if clean.is_empty() {
                            continue;
                        }
                        Inbound::Chunk(clean)
                    }
                    Ok(ReadOutcome::Closed) => Inbound::Closed {
                        reason: "stream closed".into(),
                    },
                    Err(err) => {
                        warn!(error = %err, "reader: stream error, stopping");
                        Inbound::Closed {
                            reason: err.to_string(),
                        }
                    }
                };

                let closed = matches!(message, Inbound::Closed { .. });
                if inbound_tx.send(message).await.is_err() {
                    debug!("reader: inbound channel closed, stopping");
                    return;
                }
                if closed {
                    return;
                }
            }
        }
    }
}
