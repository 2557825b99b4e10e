//! Broker seam.
//!
//! A broker opens channels; each channel comes back split into a
//! [`Publisher`] half and a [`Consumer`] half so the channel loop can wait
//! on a delivery while it publishes from the same channel.

use async_trait::async_trait;

use crate::envelope::Envelope;
use crate::error::Result;

/// When a delivery counts as consumed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AckMode {
    /// Consumed the moment the broker hands it over.
    Auto,
    /// Consumed once the channel loop acknowledges it.
    Explicit,
}

impl AckMode {
    pub fn from_wait(wait_for_ack: bool) -> Self {
        if wait_for_ack {
            AckMode::Explicit
        } else {
            AckMode::Auto
        }
    }
}

/// What a channel subscribes to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelSpec {
    /// Queue declared and consumed by the channel
    pub queue: String,
    pub ack: AckMode,
    /// Maximum unacknowledged deliveries held by the channel
    pub prefetch: u16,
    /// Exclusive, auto-delete queue instead of a durable one
    pub private: bool,
}

/// A delivery converted to an envelope, plus the tag needed to ack it.
#[derive(Debug)]
pub struct Inbound {
    pub tag: u64,
    pub envelope: Envelope,
}

/// A message broker reachable through one logical connection.
#[async_trait]
pub trait Broker: Send + Sync + 'static {
    type Publisher: Publisher;
    type Consumer: Consumer;

    /// Dial the connection if it is not up yet. Idempotent.
    async fn connect(&self) -> Result<()>;

    /// Open a channel: declare the queue (durable, or exclusive and
    /// auto-delete when `spec.private`), set the prefetch credit and start
    /// consuming.
    async fn open_channel(&self, spec: &ChannelSpec) -> Result<(Self::Publisher, Self::Consumer)>;
}

/// Outbound half of a channel.
#[async_trait]
pub trait Publisher: Send + 'static {
    /// Publish to the queue named by `envelope.route`.
    async fn publish(&mut self, envelope: &Envelope) -> Result<()>;

    /// Acknowledge the delivery with `tag`.
    async fn ack(&mut self, tag: u64) -> Result<()>;

    /// Close the channel.
    async fn close(&mut self) -> Result<()>;
}

/// Inbound half of a channel.
#[async_trait]
pub trait Consumer: Send + 'static {
    /// Next delivery. `None` once the subscription has ended.
    ///
    /// Must be cancel-safe: dropping the future before it resolves loses
    /// no delivery.
    async fn next(&mut self) -> Option<Result<Inbound>>;
}
