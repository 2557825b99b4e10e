//! In-process broker.
//!
//! Behaves like an AMQP broker reduced to the default exchange: named
//! queues, publishing routes by queue name, unroutable messages are
//! dropped, and each channel holds at most `prefetch` unacknowledged
//! deliveries. A private queue is removed when its last consumer is
//! dropped. Several orchestrators sharing one `MemoryBroker` can call
//! each other exactly as they would over RabbitMQ.
//!
//! [`MemoryBroker::inject_fault`] kills every live channel, which is how
//! the supervision tests provoke a transport fault.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::{mpsc, OnceCell, OwnedSemaphorePermit, Semaphore};
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

use super::traits::{AckMode, Broker, ChannelSpec, Consumer, Inbound, Publisher};
use crate::envelope::Envelope;
use crate::error::{Error, Result};

#[derive(Debug)]
struct MemoryQueue {
    tx: mpsc::UnboundedSender<Envelope>,
    rx: tokio::sync::Mutex<mpsc::UnboundedReceiver<Envelope>>,
    auto_delete: bool,
    consumers: AtomicUsize,
}

impl MemoryQueue {
    fn new(auto_delete: bool) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        Self {
            tx,
            rx: tokio::sync::Mutex::new(rx),
            auto_delete,
            consumers: AtomicUsize::new(0),
        }
    }
}

#[derive(Debug)]
struct BrokerInner {
    queues: Mutex<HashMap<String, Arc<MemoryQueue>>>,
    connected: OnceCell<()>,
    dials: AtomicUsize,
    fault: Mutex<CancellationToken>,
    published: AtomicU64,
    dropped: AtomicU64,
}

/// In-process broker. Cloning shares the same queues.
#[derive(Debug, Clone)]
pub struct MemoryBroker {
    inner: Arc<BrokerInner>,
}

impl Default for MemoryBroker {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryBroker {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(BrokerInner {
                queues: Mutex::new(HashMap::new()),
                connected: OnceCell::new(),
                dials: AtomicUsize::new(0),
                fault: Mutex::new(CancellationToken::new()),
                published: AtomicU64::new(0),
                dropped: AtomicU64::new(0),
            }),
        }
    }

    /// Declare a durable queue. Idempotent.
    pub fn declare(&self, queue: &str) {
        self.queue(queue, false);
    }

    /// Whether `queue` is currently declared.
    pub fn has_queue(&self, queue: &str) -> bool {
        self.inner.queues.lock().contains_key(queue)
    }

    fn queue(&self, name: &str, auto_delete: bool) -> Arc<MemoryQueue> {
        Arc::clone(
            self.inner
                .queues
                .lock()
                .entry(name.to_owned())
                .or_insert_with(|| Arc::new(MemoryQueue::new(auto_delete))),
        )
    }

    fn release(&self, name: &str, queue: &Arc<MemoryQueue>) {
        if queue.consumers.fetch_sub(1, Ordering::AcqRel) != 1 || !queue.auto_delete {
            return;
        }
        let mut queues = self.inner.queues.lock();
        if queues.get(name).is_some_and(|q| Arc::ptr_eq(q, queue)) && queue.consumers.load(Ordering::Acquire) == 0 {
            queues.remove(name);
            debug!(queue = %name, "private queue deleted");
        }
    }

    fn route(&self, envelope: &Envelope) -> bool {
        let queue = self.inner.queues.lock().get(&envelope.route).cloned();
        match queue {
            Some(queue) => queue.tx.send(envelope.clone()).is_ok(),
            None => false,
        }
    }

    /// Times the connection was dialed.
    pub fn dials(&self) -> usize {
        self.inner.dials.load(Ordering::Acquire)
    }

    /// Messages accepted by a queue.
    pub fn published(&self) -> u64 {
        self.inner.published.load(Ordering::Acquire)
    }

    /// Messages dropped as unroutable.
    pub fn dropped(&self) -> u64 {
        self.inner.dropped.load(Ordering::Acquire)
    }

    /// Kill every channel opened so far. Channels opened afterwards are
    /// unaffected.
    pub fn inject_fault(&self) {
        let old = std::mem::take(&mut *self.inner.fault.lock());
        old.cancel();
    }

    fn fault_token(&self) -> CancellationToken {
        self.inner.fault.lock().clone()
    }
}

#[async_trait]
impl Broker for MemoryBroker {
    type Publisher = MemoryPublisher;
    type Consumer = MemoryConsumer;

    async fn connect(&self) -> Result<()> {
        self.inner
            .connected
            .get_or_init(|| async {
                self.inner.dials.fetch_add(1, Ordering::AcqRel);
                debug!("memory broker connected");
            })
            .await;
        Ok(())
    }

    async fn open_channel(&self, spec: &ChannelSpec) -> Result<(MemoryPublisher, MemoryConsumer)> {
        self.connect().await?;
        let queue = self.queue(&spec.queue, spec.private);
        queue.consumers.fetch_add(1, Ordering::AcqRel);
        let fault = self.fault_token();
        let unacked = Arc::new(Mutex::new(HashMap::new()));

        let publisher = MemoryPublisher {
            broker: self.clone(),
            unacked: Arc::clone(&unacked),
            fault: fault.clone(),
            closed: false,
        };
        let consumer = MemoryConsumer {
            broker: self.clone(),
            name: spec.queue.clone(),
            queue,
            ack: spec.ack,
            credit: Arc::new(Semaphore::new(usize::from(spec.prefetch.max(1)))),
            unacked,
            next_tag: 0,
            fault,
        };
        Ok((publisher, consumer))
    }
}

type Unacked = Arc<Mutex<HashMap<u64, OwnedSemaphorePermit>>>;

/// Outbound half of a memory channel.
#[derive(Debug)]
pub struct MemoryPublisher {
    broker: MemoryBroker,
    unacked: Unacked,
    fault: CancellationToken,
    closed: bool,
}

impl MemoryPublisher {
    fn check_open(&self) -> Result<()> {
        if self.closed || self.fault.is_cancelled() {
            Err(Error::ChannelClosed)
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl Publisher for MemoryPublisher {
    async fn publish(&mut self, envelope: &Envelope) -> Result<()> {
        self.check_open()?;
        if self.broker.route(envelope) {
            self.broker.inner.published.fetch_add(1, Ordering::AcqRel);
        } else {
            self.broker.inner.dropped.fetch_add(1, Ordering::AcqRel);
            trace!(route = %envelope.route, "unroutable message dropped");
        }
        Ok(())
    }

    async fn ack(&mut self, tag: u64) -> Result<()> {
        self.check_open()?;
        // Dropping the permit returns the prefetch credit.
        self.unacked.lock().remove(&tag);
        Ok(())
    }

    async fn close(&mut self) -> Result<()> {
        self.closed = true;
        self.unacked.lock().clear();
        Ok(())
    }
}

/// Inbound half of a memory channel.
#[derive(Debug)]
pub struct MemoryConsumer {
    broker: MemoryBroker,
    name: String,
    queue: Arc<MemoryQueue>,
    ack: AckMode,
    credit: Arc<Semaphore>,
    unacked: Unacked,
    next_tag: u64,
    fault: CancellationToken,
}

impl MemoryConsumer {
    /// Deliveries held without an ack.
    pub fn unacked(&self) -> usize {
        self.unacked.lock().len()
    }
}

impl Drop for MemoryConsumer {
    fn drop(&mut self) {
        self.broker.release(&self.name, &self.queue);
    }
}

#[async_trait]
impl Consumer for MemoryConsumer {
    async fn next(&mut self) -> Option<Result<Inbound>> {
        let permit = tokio::select! {
            _ = self.fault.cancelled() => return Some(Err(Error::ChannelClosed)),
            permit = Arc::clone(&self.credit).acquire_owned() => permit.ok()?,
        };

        let queue = Arc::clone(&self.queue);
        let mut envelope = tokio::select! {
            _ = self.fault.cancelled() => return Some(Err(Error::ChannelClosed)),
            envelope = async move { queue.rx.lock().await.recv().await } => envelope?,
        };

        self.next_tag += 1;
        let tag = self.next_tag;
        match self.ack {
            AckMode::Auto => drop(permit),
            AckMode::Explicit => {
                self.unacked.lock().insert(tag, permit);
            }
        }

        envelope.route = self.name.clone();
        Some(Ok(Inbound { tag, envelope }))
    }
}
