//! Diagnostic capture of the engine's stdout and stderr.
//!
//! The engine talks protocol over the socket; anything it prints on its
//! standard streams (startup failures, lisp crashes, library warnings) is
//! split on newlines with an [`AnyDelimiterCodec`] capped at
//! [`MAX_LINE_BYTES`] and forwarded to the session controller. Lines are
//! decoded lossily: the engine's console encoding is not guaranteed to be
//! UTF-8.

use futures_util::StreamExt;
use serde::Serialize;
use tokio::io::AsyncRead;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::codec::{AnyDelimiterCodec, AnyDelimiterCodecError, FramedRead};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::backend::process::DiagnosticPipes;

/// Longest diagnostic line kept; longer lines are skipped.
pub const MAX_LINE_BYTES: usize = 1_048_576;

/// Which standard stream a diagnostic line came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DiagnosticStream {
    /// The engine's stdout.
    Stdout,
    /// The engine's stderr.
    Stderr,
}

/// One line printed by the engine outside the socket protocol.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiagnosticLine {
    /// Origin stream.
    pub stream: DiagnosticStream,
    /// Line content without its terminator.
    pub line: String,
}

/// Spawn one drain task per available pipe.
#[must_use]
pub fn spawn_drains(
    pipes: DiagnosticPipes,
    line_tx: mpsc::Sender<DiagnosticLine>,
    cancel: CancellationToken,
) -> Vec<JoinHandle<()>> {
    let mut handles = Vec::with_capacity(2);
    if let Some(stdout) = pipes.stdout {
        handles.push(tokio::spawn(run_drain(
            DiagnosticStream::Stdout,
            stdout,
            line_tx.clone(),
            cancel.clone(),
        )));
    }
    if let Some(stderr) = pipes.stderr {
        handles.push(tokio::spawn(run_drain(
            DiagnosticStream::Stderr,
            stderr,
            line_tx,
            cancel,
        )));
    }
    handles
}

/// Drain task: forwards every line of `source` until EOF or cancellation.
pub async fn run_drain<R>(
    stream: DiagnosticStream,
    source: R,
    line_tx: mpsc::Sender<DiagnosticLine>,
    cancel: CancellationToken,
) where
    R: AsyncRead + Unpin + Send,
{
    let codec = AnyDelimiterCodec::new_with_max_length(b"\n".to_vec(), Vec::new(), MAX_LINE_BYTES);
    let mut framed = FramedRead::new(source, codec);

    loop {
        tokio::select! {
            biased;

            () = cancel.cancelled() => {
                debug!(?stream, "diagnostics: cancellation received, stopping");
                break;
            }

            item = framed.next() => {
                match item {
                    None => {
                        debug!(?stream, "diagnostics: EOF");
                        break;
                    }
                    Some(Err(AnyDelimiterCodecError::MaxChunkLengthExceeded)) => {
                        warn!(?stream, limit = MAX_LINE_BYTES, "diagnostics: line too long, skipping");
                    }
                    Some(Err(AnyDelimiterCodecError::Io(err))) => {
                        warn!(?stream, %err, "diagnostics: read error, stopping");
                        break;
                    }
                    Some(Ok(bytes)) => {
                        let line = String::from_utf8_lossy(&bytes).trim_end_matches('\r').to_owned();
                        debug!(?stream, line = %line, "engine output");
                        if line_tx.send(DiagnosticLine { stream, line }).await.is_err() {
                            break;
                        }
                    }
                }
            }
        }
    }
}
