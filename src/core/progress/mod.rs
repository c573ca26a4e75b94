//! Transfer progress observation
//!
//! [`ProgressObserver`] wraps a chunk stream and reports the running byte
//! total under a textual label without buffering, reordering or suppressing
//! anything. The display side is behind the [`ProgressReporter`] trait; the
//! default implementation logs via `tracing`, and tests substitute a
//! recording reporter to assert totals.

use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use bytes::Bytes;
use futures::Stream;
use tracing::{debug, info};

/// Receives progress updates for one labeled transfer.
pub trait ProgressReporter: Send + Sync {
    /// Called after every observed chunk with the new cumulative total.
    fn update(&self, label: &str, total_bytes: u64);

    /// Called exactly once when the observed stream ends.
    fn finish(&self, label: &str, total_bytes: u64);
}

/// Default reporter: per-chunk totals at debug level, a summary at info.
#[derive(Debug, Default)]
pub struct LogReporter;

impl ProgressReporter for LogReporter {
    fn update(&self, label: &str, total_bytes: u64) {
        debug!(label, total_bytes, "transfer progress");
    }

    fn finish(&self, label: &str, total_bytes: u64) {
        info!(label, total_bytes, "transfer complete");
    }
}

/// Items whose payload size can be observed without consuming them.
pub trait ChunkLen {
    fn chunk_len(&self) -> usize;
}

impl ChunkLen for Bytes {
    fn chunk_len(&self) -> usize {
        self.len()
    }
}

impl<E> ChunkLen for Result<Bytes, E> {
    fn chunk_len(&self) -> usize {
        self.as_ref().map(Bytes::len).unwrap_or(0)
    }
}

/// Pass-through stream adapter that reports cumulative bytes observed.
pub struct ProgressObserver<S> {
    inner: S,
    label: String,
    reporter: Arc<dyn ProgressReporter>,
    total: u64,
    finished: bool,
}

impl<S> ProgressObserver<S> {
    pub fn new(label: impl Into<String>, inner: S, reporter: Arc<dyn ProgressReporter>) -> Self {
        Self {
            inner,
            label: label.into(),
            reporter,
            total: 0,
            finished: false,
        }
    }

    /// Bytes observed so far.
    pub fn total_bytes(&self) -> u64 {
        self.total
    }
}

impl<S> Stream for ProgressObserver<S>
where
    S: Stream + Unpin,
    S::Item: ChunkLen,
{
    type Item = S::Item;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        match Pin::new(&mut self.inner).poll_next(cx) {
            Poll::Ready(Some(item)) => {
                self.total += item.chunk_len() as u64;
                let total = self.total;
                self.reporter.update(&self.label, total);
                Poll::Ready(Some(item))
            }
            Poll::Ready(None) => {
                if !self.finished {
                    self.finished = true;
                    self.reporter.finish(&self.label, self.total);
                }
                Poll::Ready(None)
            }
            Poll::Pending => Poll::Pending,
        }
    }
}
