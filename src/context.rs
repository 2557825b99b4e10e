//! Explicit call context.
//!
//! Every call boundary (client call, dispatch, handler) takes a
//! `CallContext` by reference instead of relying on ambient state. The
//! context carries the absolute deadline of the call and a cancellation
//! token; on the serving side it also exposes the correlation metadata of
//! the envelope that produced it.

use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::envelope::Envelope;

/// Deadline and cancellation scope for one call.
#[derive(Debug, Clone, Default)]
pub struct CallContext {
    deadline: Option<DateTime<Utc>>,
    cancel: CancellationToken,
    correlation_id: Option<String>,
    method: Option<String>,
    sender_id: Option<String>,
}

impl CallContext {
    /// Context with no deadline. Calls made with it fail with
    /// [`Error::MissingDeadline`](crate::Error::MissingDeadline).
    pub fn new() -> Self {
        Self::default()
    }

    /// Context expiring at `deadline`.
    pub fn with_deadline(deadline: DateTime<Utc>) -> Self {
        Self {
            deadline: Some(deadline),
            ..Self::default()
        }
    }

    /// Context expiring `timeout` from now.
    pub fn with_timeout(timeout: Duration) -> Self {
        // Out-of-range timeouts clamp to a century rather than overflow.
        let timeout = chrono::Duration::from_std(timeout)
            .unwrap_or_else(|_| chrono::Duration::days(36_500));
        Self::with_deadline(Utc::now() + timeout)
    }

    /// Context derived from an inbound envelope.
    pub fn from_envelope(envelope: &Envelope) -> Self {
        Self {
            deadline: Some(envelope.deadline),
            cancel: CancellationToken::new(),
            correlation_id: Some(envelope.correlation_id.clone()),
            method: Some(envelope.method.clone()),
            sender_id: Some(envelope.sender_id.clone()),
        }
    }

    /// Child context sharing this deadline, cancelled when this one is.
    pub fn child(&self) -> Self {
        Self {
            deadline: self.deadline,
            cancel: self.cancel.child_token(),
            correlation_id: None,
            method: None,
            sender_id: None,
        }
    }

    pub fn deadline(&self) -> Option<DateTime<Utc>> {
        self.deadline
    }

    /// Time left before the deadline, zero once it has passed.
    pub fn remaining(&self) -> Option<Duration> {
        self.deadline
            .map(|deadline| (deadline - Utc::now()).to_std().unwrap_or(Duration::ZERO))
    }

    /// True once the deadline has passed.
    pub fn is_expired(&self) -> bool {
        self.deadline.is_some_and(|deadline| deadline <= Utc::now())
    }

    /// The deadline mapped onto the tokio clock.
    pub fn deadline_instant(&self) -> Option<Instant> {
        self.remaining().map(|left| Instant::now() + left)
    }

    /// Cancel the call. Waiters observe it through [`cancelled`](Self::cancelled).
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Resolves once the context is cancelled.
    pub async fn cancelled(&self) {
        self.cancel.cancelled().await
    }

    /// Correlation id of the inbound envelope (serving side only).
    pub fn correlation_id(&self) -> Option<&str> {
        self.correlation_id.as_deref()
    }

    /// Method targeted by the inbound envelope (serving side only).
    pub fn method(&self) -> Option<&str> {
        self.method.as_deref()
    }

    /// Sender of the inbound envelope (serving side only).
    pub fn sender_id(&self) -> Option<&str> {
        self.sender_id.as_deref()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_context_without_deadline() {
        let ctx = CallContext::new();
        assert!(ctx.deadline().is_none());
        assert!(ctx.remaining().is_none());
        assert!(!ctx.is_expired());
    }

    #[test]
    fn test_past_deadline_is_expired() {
        let ctx = CallContext::with_deadline(Utc::now() - chrono::Duration::seconds(1));
        assert!(ctx.is_expired());
        assert_eq!(ctx.remaining(), Some(Duration::ZERO));
    }

    #[test]
    fn test_child_cancelled_with_parent() {
        let parent = CallContext::with_timeout(Duration::from_secs(5));
        let child = parent.child();
        assert_eq!(child.deadline(), parent.deadline());
        parent.cancel();
        assert!(child.is_cancelled());
    }
}
