//! Bounded in-process envelope queues.
//!
//! A conveyor is a multi-producer, multi-consumer queue: every channel loop
//! of a binding pushes into the same inbound conveyor that every dispatch
//! worker drains, and the reverse for outbound. Consumers share the single
//! tokio receiver behind an async mutex; `recv` is cancel-safe, so it can sit
//! in a `select!` next to shutdown and broker I/O.

use std::sync::Arc;

use tokio::sync::{mpsc, Mutex};
use tokio::time::Instant;

use crate::envelope::Envelope;

#[derive(Debug, Clone)]
pub struct Conveyor {
    tx: mpsc::Sender<Envelope>,
    rx: Arc<Mutex<mpsc::Receiver<Envelope>>>,
}

impl Conveyor {
    pub fn new(capacity: usize) -> Self {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        Self {
            tx,
            rx: Arc::new(Mutex::new(rx)),
        }
    }

    /// Enqueue, waiting for room.
    ///
    /// Hands the envelope back if the queue is closed.
    pub async fn send(&self, envelope: Envelope) -> Result<(), Envelope> {
        self.tx.send(envelope).await.map_err(|e| e.0)
    }

    /// Enqueue, giving up at `deadline`.
    ///
    /// Returns false if the queue stayed full until the deadline or is closed.
    pub async fn send_until(&self, envelope: Envelope, deadline: Instant) -> bool {
        matches!(
            tokio::time::timeout_at(deadline, self.tx.send(envelope)).await,
            Ok(Ok(()))
        )
    }

    /// Wait for room in the queue.
    ///
    /// Cancel-safe: dropping the future before it resolves enqueues nothing.
    /// `None` if the queue is closed.
    pub async fn reserve(&self) -> Option<mpsc::Permit<'_, Envelope>> {
        self.tx.reserve().await.ok()
    }

    /// Dequeue the next envelope.
    pub async fn recv(&self) -> Option<Envelope> {
        self.rx.lock().await.recv().await
    }

    /// Dequeue without waiting.
    pub fn try_recv(&self) -> Option<Envelope> {
        self.rx.try_lock().ok()?.try_recv().ok()
    }

    /// Envelopes currently queued.
    pub fn len(&self) -> usize {
        self.tx.max_capacity() - self.tx.capacity()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
