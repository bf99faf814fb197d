//! Queue edges between the parts of a chain.
//!
//! An edge with a non-zero buffer is a bounded Tokio channel of that
//! capacity. An edge with a zero buffer is a hand-off: the channel keeps a
//! single slot, and a send only completes once the reader has taken the item
//! out of it. A blocked writer therefore holds at most the item it is trying
//! to deliver.

use crate::cancellation::CancellationToken;
use crate::errors::{PipelineError, PipelineResult};
use std::sync::Arc;
use tokio::sync::mpsc::{self, error::TryRecvError};
use tokio::sync::Semaphore;

/// Allocates an edge for the requested buffer size.
pub(crate) fn channel<T>(buffer_size: usize) -> (QueueSender<T>, Outlet<T>) {
    if buffer_size == 0 {
        let (tx, rx) = mpsc::channel(1);
        let acks = Arc::new(Semaphore::new(0));
        let sender = QueueSender {
            tx,
            acks: Some(acks.clone()),
        };
        (sender, Outlet { rx, acks: Some(acks) })
    } else {
        let (tx, rx) = mpsc::channel(buffer_size);
        (QueueSender { tx, acks: None }, Outlet { rx, acks: None })
    }
}

/// Writing side of an edge.
pub(crate) struct QueueSender<T> {
    tx: mpsc::Sender<T>,
    /// One permit per item taken by the reader; present on hand-off edges.
    acks: Option<Arc<Semaphore>>,
}

impl<T> Clone for QueueSender<T> {
    fn clone(&self) -> Self {
        Self {
            tx: self.tx.clone(),
            acks: self.acks.clone(),
        }
    }
}

impl<T> QueueSender<T> {
    /// Delivers `item`, racing every wait against cancellation.
    ///
    /// On a hand-off edge this returns only after the reader took the item.
    pub(crate) async fn send(
        &self,
        item: T,
        token: &CancellationToken,
        stage: &str,
    ) -> PipelineResult<()> {
        tokio::select! {
            biased;
            () = token.cancelled() => return Err(PipelineError::Cancelled),
            sent = self.tx.send(item) => {
                sent.map_err(|_| PipelineError::disconnected(stage))?;
            }
        }

        let Some(acks) = &self.acks else {
            return Ok(());
        };
        tokio::select! {
            biased;
            () = token.cancelled() => Err(PipelineError::Cancelled),
            ack = acks.acquire() => {
                ack.map_err(|_| PipelineError::disconnected(stage))?.forget();
                Ok(())
            }
            () = self.tx.closed() => Err(PipelineError::disconnected(stage)),
        }
    }
}

/// Reading side of an edge, handed to callers of [`Builder::build`] and
/// [`Builder::emit`].
///
/// Reads behave like a Tokio bounded receiver: `None` marks the end of the
/// sequence once every writer has finished. Dropping the outlet while the
/// chain still produces makes the last stage fail with
/// [`PipelineError::Disconnected`].
///
/// [`Builder::build`]: super::Builder::build
/// [`Builder::emit`]: super::Builder::emit
#[derive(Debug)]
pub struct Outlet<T> {
    rx: mpsc::Receiver<T>,
    acks: Option<Arc<Semaphore>>,
}

impl<T> Outlet<T> {
    /// Receives the next item, or `None` once the edge is closed and empty.
    pub async fn recv(&mut self) -> Option<T> {
        let item = self.rx.recv().await?;
        self.ack();
        Some(item)
    }

    /// Receives an item if one is ready, without waiting.
    ///
    /// # Errors
    ///
    /// Returns [`TryRecvError::Empty`] if nothing is queued and
    /// [`TryRecvError::Disconnected`] once the edge is closed and empty.
    pub fn try_recv(&mut self) -> Result<T, TryRecvError> {
        let item = self.rx.try_recv()?;
        self.ack();
        Ok(item)
    }

    /// Number of items the edge holds ahead of a blocked writer; zero for a
    /// hand-off edge.
    pub fn buffer_size(&self) -> usize {
        if self.acks.is_some() {
            0
        } else {
            self.rx.max_capacity()
        }
    }

    fn ack(&self) {
        if let Some(acks) = &self.acks {
            acks.add_permits(1);
        }
    }
}

impl<T> From<mpsc::Receiver<T>> for Outlet<T> {
    /// Wraps a caller's queue; its own capacity applies.
    fn from(rx: mpsc::Receiver<T>) -> Self {
        Self { rx, acks: None }
    }
}
