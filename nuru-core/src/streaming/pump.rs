//! Bounded producer between an engine read stream and a response body.
//!
//! The producer task pulls from the engine and pushes into a bounded
//! channel. When the client stops draining, the channel fills and the
//! producer parks on `send`; when the client goes away, the receiver is
//! dropped and the producer drops the engine stream with it. A terminal
//! error only waits [`TERMINAL_GRACE`] for room, so a stalled client never
//! pins the producer after cancellation.

use std::io;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use bytes::Bytes;
use futures::StreamExt;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio_stream::wrappers::ReceiverStream;
use tokio_util::sync::CancellationToken;

use crate::engine::ByteStream;
use crate::torrent::InfoHash;

/// How long a terminal error may wait for room in a full channel.
pub const TERMINAL_GRACE: Duration = Duration::from_millis(100);

/// Response body fed by a pump.
pub type BodyStream = ReceiverStream<io::Result<Bytes>>;

/// Count of response bodies currently being produced.
#[derive(Debug, Clone, Default)]
pub struct OpenStreams {
    count: Arc<AtomicUsize>,
}

impl OpenStreams {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn count(&self) -> usize {
        self.count.load(Ordering::Relaxed)
    }

    pub(crate) fn track(&self) -> StreamGuard {
        self.count.fetch_add(1, Ordering::Relaxed);
        StreamGuard {
            count: Arc::clone(&self.count),
        }
    }
}

/// Decrements the open stream count when the producer exits.
#[derive(Debug)]
pub(crate) struct StreamGuard {
    count: Arc<AtomicUsize>,
}

impl Drop for StreamGuard {
    fn drop(&mut self) {
        self.count.fetch_sub(1, Ordering::Relaxed);
    }
}

/// Producer settings for one response.
#[derive(Debug, Clone, Copy)]
pub struct PumpLimits {
    pub chunk_size: usize,
    pub channel_capacity: usize,
}

enum Exit {
    Finished,
    ClientGone,
    Cancelled,
    ReadFailed,
}

/// Spawns the producer and returns the receiving end as a body stream.
///
/// `cancel` ends the body early with a `ConnectionAborted` error; the
/// session's cleanup cascade holds the parent token.
pub(crate) fn spawn_pump(
    info_hash: InfoHash,
    source: ByteStream,
    limits: PumpLimits,
    cancel: CancellationToken,
    guard: StreamGuard,
) -> BodyStream {
    let (tx, rx) = mpsc::channel(limits.channel_capacity.max(1));
    let chunk_size = limits.chunk_size.max(1);

    tokio::spawn(async move {
        let mut source = source;
        let mut sent: u64 = 0;

        let exit = loop {
            let next = tokio::select! {
                biased;
                _ = cancel.cancelled() => break Exit::Cancelled,
                _ = tx.closed() => break Exit::ClientGone,
                next = source.next() => next,
            };

            let mut data = match next {
                None => break Exit::Finished,
                Some(Ok(data)) => data,
                Some(Err(e)) => {
                    tracing::warn!(%info_hash, sent, "Engine read failed mid-stream: {e}");
                    if !send_terminal(&tx, e).await {
                        tracing::debug!(%info_hash, "Read error not delivered, client stalled");
                    }
                    break Exit::ReadFailed;
                }
            };

            let mut gone = None;
            while !data.is_empty() {
                let piece = data.split_to(chunk_size.min(data.len()));
                let piece_len = piece.len() as u64;
                tokio::select! {
                    biased;
                    _ = cancel.cancelled() => {
                        gone = Some(Exit::Cancelled);
                        break;
                    }
                    result = tx.send(Ok(piece)) => {
                        if result.is_err() {
                            gone = Some(Exit::ClientGone);
                            break;
                        }
                        sent += piece_len;
                    }
                }
            }
            if let Some(exit) = gone {
                break exit;
            }
        };

        // Drop the engine stream before anything else so its reader stops.
        drop(source);

        match exit {
            Exit::Finished => tracing::trace!(%info_hash, sent, "Stream finished"),
            Exit::ClientGone => tracing::debug!(%info_hash, sent, "Client disconnected"),
            Exit::Cancelled => {
                tracing::debug!(%info_hash, sent, "Stream cancelled by session teardown");
                let aborted = io::Error::new(io::ErrorKind::ConnectionAborted, "session removed");
                if !send_terminal(&tx, aborted).await {
                    tracing::debug!(%info_hash, "Abort not delivered, client stalled");
                }
            }
            Exit::ReadFailed => {}
        }
        // Closing the sender ends the body once buffered chunks are read.
        drop(tx);
        drop(guard);
    });

    ReceiverStream::new(rx)
}

/// Queues `error` as the last item, waiting at most [`TERMINAL_GRACE`].
///
/// Returns whether it was queued.
async fn send_terminal(tx: &mpsc::Sender<io::Result<Bytes>>, error: io::Error) -> bool {
    match tx.try_send(Err(error)) {
        Ok(()) => true,
        Err(TrySendError::Closed(_)) => false,
        Err(TrySendError::Full(item)) => {
            matches!(tokio::time::timeout(TERMINAL_GRACE, tx.send(item)).await, Ok(Ok(())))
        }
    }
}

/// A body that ends immediately, for zero-length files.
pub(crate) fn empty_body() -> BodyStream {
    let (_, rx) = mpsc::channel(1);
    ReceiverStream::new(rx)
}
