//! Correlation router: matches inbound replies to waiting callers.
//!
//! The router is the single source of truth for whether a call is still
//! outstanding. Each registration is a one-shot slot keyed by correlation
//! id; it is consumed exactly once, either by [`CorrelationRouter::deliver`]
//! or by [`CorrelationRouter::cancel`]. All three operations take the same
//! lock, so a reply racing a timeout is handled by exactly one of them.
//!
//! Cancelled ids are retired for a cooldown period. Id generation treats a
//! retired id as taken, so a late reply for an abandoned call can never be
//! matched against a newer call that happened to reuse the id.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::{Duration, Instant};

use parking_lot::RwLock;
use tokio::sync::oneshot;
use tracing::trace;

use crate::envelope::Envelope;
use crate::error::{Error, Result};

/// Retired ids are swept once the table grows past this.
const RETIRED_SWEEP_THRESHOLD: usize = 1024;

#[derive(Debug, Default)]
struct RouterState {
    pending: HashMap<String, oneshot::Sender<Envelope>>,
    retired: HashMap<String, Instant>,
}

/// Pending-call table.
#[derive(Debug)]
pub struct CorrelationRouter {
    state: RwLock<RouterState>,
    cooldown: Duration,
}

impl CorrelationRouter {
    /// Router retiring cancelled ids for `cooldown`. Zero disables retirement.
    pub fn new(cooldown: Duration) -> Self {
        Self {
            state: RwLock::new(RouterState::default()),
            cooldown,
        }
    }

    /// Store a one-shot reply slot for `correlation_id`.
    ///
    /// Fails if the id already has a live registration. Unique id generation
    /// makes that a programming error, not a runtime condition.
    pub fn register(&self, correlation_id: &str) -> Result<Waiter> {
        let (tx, rx) = oneshot::channel();
        let mut state = self.state.write();
        if state.pending.contains_key(correlation_id) {
            return Err(Error::DuplicateCorrelation(correlation_id.to_owned()));
        }
        state.retired.remove(correlation_id);
        state.pending.insert(correlation_id.to_owned(), tx);
        Ok(Waiter {
            correlation_id: correlation_id.to_owned(),
            rx,
        })
    }

    /// Hand a reply to its waiter.
    ///
    /// Returns false when no live registration exists (late, duplicate or
    /// already-expired reply); the caller drops the envelope.
    pub fn deliver(&self, envelope: Envelope) -> bool {
        let slot = self.state.write().pending.remove(&envelope.correlation_id);
        match slot {
            Some(tx) => {
                let correlation_id = envelope.correlation_id.clone();
                let delivered = tx.send(envelope).is_ok();
                if !delivered {
                    trace!(correlation_id = %correlation_id, "waiter dropped before reply");
                }
                delivered
            }
            None => false,
        }
    }

    /// Remove a registration without delivering.
    ///
    /// Returns true if a registration was removed.
    pub fn cancel(&self, correlation_id: &str) -> bool {
        let mut state = self.state.write();
        let removed = state.pending.remove(correlation_id).is_some();
        if removed && !self.cooldown.is_zero() {
            let now = Instant::now();
            if state.retired.len() >= RETIRED_SWEEP_THRESHOLD {
                state.retired.retain(|_, until| *until > now);
            }
            state
                .retired
                .insert(correlation_id.to_owned(), now + self.cooldown);
        }
        removed
    }

    /// True if `correlation_id` is live or still cooling down.
    pub fn is_reserved(&self, correlation_id: &str) -> bool {
        let state = self.state.read();
        state.pending.contains_key(correlation_id)
            || state
                .retired
                .get(correlation_id)
                .is_some_and(|until| *until > Instant::now())
    }

    /// True if `correlation_id` has a live registration.
    pub fn is_pending(&self, correlation_id: &str) -> bool {
        self.state.read().pending.contains_key(correlation_id)
    }

    /// Number of outstanding calls.
    pub fn len(&self) -> usize {
        self.state.read().pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for CorrelationRouter {
    fn default() -> Self {
        Self::new(Duration::ZERO)
    }
}

/// Receiving half of a registration. Resolves to the matched reply.
#[derive(Debug)]
pub struct Waiter {
    correlation_id: String,
    rx: oneshot::Receiver<Envelope>,
}

impl Waiter {
    pub fn correlation_id(&self) -> &str {
        &self.correlation_id
    }
}

impl Future for Waiter {
    type Output = Result<Envelope>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.rx)
            .poll(cx)
            .map(|reply| reply.map_err(|_| Error::ChannelClosed))
    }
}
