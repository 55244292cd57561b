//! Hand-off queue between the receive task and the playback thread
//!
//! A FIFO of chunks, either bounded (file sink, capacity 1 by default) or
//! unbounded (device sink). The receive side is async, the playback side
//! blocks on its own thread. Queue depth is tracked separately so the drift
//! filter can read it while the receiver is owned by the frame pipeline.

use bytes::Bytes;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::{SendTimeoutError, TrySendError};

use crate::error::QueueError;

/// What to do when a chunk does not fit into the queue
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OverrunPolicy {
    /// Wait this long for space; `None` fails immediately
    pub put_timeout: Option<Duration>,
    /// Drop the chunk with a warning instead of failing
    pub ignore_overruns: bool,
}

impl Default for OverrunPolicy {
    fn default() -> Self {
        Self {
            put_timeout: None,
            ignore_overruns: true,
        }
    }
}

/// Outcome of a successful [`ChunkSender::put`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Enqueued {
    Delivered,
    /// Queue was full and the policy allowed dropping the chunk
    Dropped,
}

/// Counters shared by both ends of the queue
#[derive(Debug, Default)]
struct Shared {
    depth: AtomicUsize,
    delivered: AtomicU64,
    overruns: AtomicU64,
}

/// Snapshot of queue statistics
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct QueueStats {
    pub depth: usize,
    pub delivered: u64,
    pub overruns: u64,
}

/// Read-only view of the queue depth, usable without owning the receiver
#[derive(Debug, Clone)]
pub struct QueueProbe {
    shared: Arc<Shared>,
}

impl QueueProbe {
    /// Chunks currently waiting in the queue
    pub fn len(&self) -> usize {
        self.shared.depth.load(Ordering::Relaxed)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn stats(&self) -> QueueStats {
        QueueStats {
            depth: self.len(),
            delivered: self.shared.delivered.load(Ordering::Relaxed),
            overruns: self.shared.overruns.load(Ordering::Relaxed),
        }
    }
}

enum Tx {
    Bounded(mpsc::Sender<Bytes>),
    Unbounded(mpsc::UnboundedSender<Bytes>),
}

enum Rx {
    Bounded(mpsc::Receiver<Bytes>),
    Unbounded(mpsc::UnboundedReceiver<Bytes>),
}

/// Producer end, owned by the receive task
pub struct ChunkSender {
    tx: Tx,
    shared: Arc<Shared>,
}

/// Consumer end, owned by the playback thread or file sink
pub struct ChunkReceiver {
    rx: Rx,
    shared: Arc<Shared>,
}

/// Create a hand-off queue. `None` means unbounded.
///
/// # Panics
///
/// Panics if `capacity` is `Some(0)`.
pub fn chunk_queue(capacity: Option<usize>) -> (ChunkSender, ChunkReceiver) {
    let shared = Arc::new(Shared::default());
    let (tx, rx) = match capacity {
        Some(capacity) => {
            let (tx, rx) = mpsc::channel(capacity);
            (Tx::Bounded(tx), Rx::Bounded(rx))
        }
        None => {
            let (tx, rx) = mpsc::unbounded_channel();
            (Tx::Unbounded(tx), Rx::Unbounded(rx))
        }
    };

    (
        ChunkSender {
            tx,
            shared: shared.clone(),
        },
        ChunkReceiver { rx, shared },
    )
}

impl ChunkSender {
    /// Enqueue without waiting.
    pub fn try_put(&self, chunk: Bytes) -> Result<(), QueueError> {
        self.shared.depth.fetch_add(1, Ordering::Relaxed);
        let result = match &self.tx {
            Tx::Bounded(tx) => tx.try_send(chunk).map_err(|e| match e {
                TrySendError::Full(_) => QueueError::Overrun {
                    depth: self.depth_excluding_self(),
                },
                TrySendError::Closed(_) => QueueError::Closed,
            }),
            Tx::Unbounded(tx) => tx.send(chunk).map_err(|_| QueueError::Closed),
        };
        self.settle(result)
    }

    /// Enqueue, waiting up to `timeout` for space.
    pub async fn put_timeout(&self, chunk: Bytes, timeout: Duration) -> Result<(), QueueError> {
        self.shared.depth.fetch_add(1, Ordering::Relaxed);
        let result = match &self.tx {
            Tx::Bounded(tx) => tx.send_timeout(chunk, timeout).await.map_err(|e| match e {
                SendTimeoutError::Timeout(_) => QueueError::Overrun {
                    depth: self.depth_excluding_self(),
                },
                SendTimeoutError::Closed(_) => QueueError::Closed,
            }),
            Tx::Unbounded(tx) => tx.send(chunk).map_err(|_| QueueError::Closed),
        };
        self.settle(result)
    }

    /// Enqueue according to `policy`.
    ///
    /// Overruns are counted and logged. They are returned as errors only
    /// when the policy does not ignore them. A closed queue is always an error.
    pub async fn put(&self, chunk: Bytes, policy: &OverrunPolicy) -> Result<Enqueued, QueueError> {
        let result = match policy.put_timeout {
            None => self.try_put(chunk),
            Some(timeout) => self.put_timeout(chunk, timeout).await,
        };

        match result {
            Ok(()) => Ok(Enqueued::Delivered),
            Err(QueueError::Overrun { depth }) => {
                self.shared.overruns.fetch_add(1, Ordering::Relaxed);
                if policy.ignore_overruns {
                    tracing::warn!(depth, "buffer overrun, dropping chunk");
                    Ok(Enqueued::Dropped)
                } else {
                    Err(QueueError::Overrun { depth })
                }
            }
            Err(e) => Err(e),
        }
    }

    pub fn probe(&self) -> QueueProbe {
        QueueProbe {
            shared: self.shared.clone(),
        }
    }

    fn depth_excluding_self(&self) -> usize {
        self.shared.depth.load(Ordering::Relaxed).saturating_sub(1)
    }

    fn settle(&self, result: Result<(), QueueError>) -> Result<(), QueueError> {
        match result {
            Ok(()) => {
                self.shared.delivered.fetch_add(1, Ordering::Relaxed);
            }
            Err(_) => {
                self.shared.depth.fetch_sub(1, Ordering::Relaxed);
            }
        }
        result
    }
}

impl ChunkReceiver {
    /// Wait for the next chunk. `None` once the sender is gone and the
    /// queue is drained.
    pub async fn recv(&mut self) -> Option<Bytes> {
        let chunk = match &mut self.rx {
            Rx::Bounded(rx) => rx.recv().await,
            Rx::Unbounded(rx) => rx.recv().await,
        };
        self.taken(chunk)
    }

    /// Blocking variant of [`recv`](Self::recv) for the playback thread.
    ///
    /// # Panics
    ///
    /// Panics when called from within an async runtime.
    pub fn blocking_recv(&mut self) -> Option<Bytes> {
        let chunk = match &mut self.rx {
            Rx::Bounded(rx) => rx.blocking_recv(),
            Rx::Unbounded(rx) => rx.blocking_recv(),
        };
        self.taken(chunk)
    }

    /// Take a chunk if one is ready.
    pub fn try_recv(&mut self) -> Option<Bytes> {
        let chunk = match &mut self.rx {
            Rx::Bounded(rx) => rx.try_recv().ok(),
            Rx::Unbounded(rx) => rx.try_recv().ok(),
        };
        self.taken(chunk)
    }

    /// Turn the receiver into a blocking iterator of chunks.
    pub fn into_blocking_iter(self) -> BlockingChunks {
        BlockingChunks { rx: self }
    }

    pub fn probe(&self) -> QueueProbe {
        QueueProbe {
            shared: self.shared.clone(),
        }
    }

    pub fn len(&self) -> usize {
        self.shared.depth.load(Ordering::Relaxed)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn taken(&self, chunk: Option<Bytes>) -> Option<Bytes> {
        if chunk.is_some() {
            self.shared.depth.fetch_sub(1, Ordering::Relaxed);
        }
        chunk
    }
}

/// Blocking iterator over received chunks
pub struct BlockingChunks {
    rx: ChunkReceiver,
}

impl Iterator for BlockingChunks {
    type Item = Bytes;

    fn next(&mut self) -> Option<Bytes> {
        self.rx.blocking_recv()
    }
}
