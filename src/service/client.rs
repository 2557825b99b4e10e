//! Client call surface.
//!
//! `call` is what generated client stubs use. It sits on `invoke` (raw
//! bytes), which sits on `order` (send a prepared Serve envelope and wait
//! for the reply). `send` and `receive` move envelopes in and out of the
//! conveyors directly.

use std::sync::atomic::Ordering;

use bytes::Bytes;
use prost::Message;
use tracing::{debug, trace};

use super::{Inner, Orchestrator};
use crate::codec;
use crate::context::CallContext;
use crate::envelope::Envelope;
use crate::error::{Error, Result};

impl Inner {
    /// Next correlation id: a fixed-width decimal counter, skipping ids that
    /// are still pending or cooling down.
    fn next_correlation_id(&self) -> String {
        loop {
            let n = self.counter.fetch_add(1, Ordering::Relaxed).wrapping_add(1);
            let id = format!("{:010}", n);
            if !self.router.is_reserved(&id) {
                return id;
            }
            trace!(correlation_id = %id, "correlation id still reserved, skipping");
        }
    }
}

impl Orchestrator {
    /// Call `method` on the service consuming `queue` and decode its response.
    ///
    /// `ctx` must carry a deadline. Returns [`Error::DeadlineExceeded`] once
    /// it passes without a reply and [`Error::Cancelled`] if `ctx` is
    /// cancelled first; either way the pending registration is released.
    pub async fn call<Req, Resp>(&self, ctx: &CallContext, queue: &str, method: &str, request: &Req) -> Result<Resp>
    where
        Req: Message,
        Resp: Message + Default,
    {
        if ctx.deadline().is_none() {
            return Err(Error::MissingDeadline);
        }
        let body = codec::encode(request)?;
        let reply = self.invoke(ctx, queue, method, body).await?;
        codec::decode(&reply)
    }

    /// [`call`](Self::call) with an already-encoded request and response.
    pub async fn invoke(&self, ctx: &CallContext, queue: &str, method: &str, body: Bytes) -> Result<Bytes> {
        let deadline = ctx.deadline().ok_or(Error::MissingDeadline)?;
        let reply_to = self.queue().ok_or(Error::NoTransport)?;

        let envelope = Envelope::serve(
            queue,
            reply_to,
            method,
            self.inner.next_correlation_id(),
            deadline,
            body,
        )
        .with_sender(self.sender_id());

        let reply = self.order(ctx, envelope).await?;
        match reply.error {
            Some(reason) => Err(Error::Remote(reason)),
            None => Ok(reply.body),
        }
    }

    /// Publish a prepared Serve envelope and wait for its reply.
    ///
    /// The envelope's correlation id is registered with the router before
    /// it is queued; on deadline, cancellation or shutdown the registration
    /// is cancelled before returning.
    pub async fn order(&self, ctx: &CallContext, envelope: Envelope) -> Result<Envelope> {
        let deadline = ctx.deadline_instant().ok_or(Error::MissingDeadline)?;
        if ctx.is_cancelled() {
            return Err(Error::Cancelled);
        }
        if ctx.is_expired() {
            return Err(Error::DeadlineExceeded);
        }
        if self.is_shut_down() {
            return Err(Error::NoTransport);
        }

        let correlation_id = envelope.correlation_id.clone();
        let waiter = self.inner.router.register(&correlation_id)?;
        trace!(
            correlation_id = %correlation_id,
            route = %envelope.route,
            method = %envelope.method,
            "call issued"
        );

        let exchange = async {
            if !self.inner.conveyors.outbound.send_until(envelope, deadline).await {
                return Err(Error::DeadlineExceeded);
            }
            waiter.await
        };

        let outcome = tokio::select! {
            biased;

            _ = ctx.cancelled() => Err(Error::Cancelled),
            _ = self.inner.shutdown.cancelled() => Err(Error::NoTransport),
            reply = exchange => reply,
            _ = tokio::time::sleep_until(deadline) => Err(Error::DeadlineExceeded),
        };

        if let Err(e) = &outcome {
            if self.inner.router.cancel(&correlation_id) {
                debug!(correlation_id = %correlation_id, "call abandoned: {}", e);
            }
        }
        outcome
    }

    /// Queue an envelope for publish without waiting for a reply.
    ///
    /// Gives up at the context deadline, if any.
    pub async fn send(&self, ctx: &CallContext, envelope: Envelope) -> Result<()> {
        if self.queue().is_none() {
            return Err(Error::NoTransport);
        }
        let outbound = &self.inner.conveyors.outbound;
        let enqueue = async {
            match ctx.deadline_instant() {
                Some(deadline) => {
                    if outbound.send_until(envelope, deadline).await {
                        Ok(())
                    } else {
                        Err(Error::DeadlineExceeded)
                    }
                }
                None => outbound.send(envelope).await.map_err(|_| Error::NoTransport),
            }
        };

        tokio::select! {
            biased;

            _ = ctx.cancelled() => Err(Error::Cancelled),
            sent = enqueue => sent,
        }
    }

    /// Take the next inbound envelope.
    ///
    /// Only meaningful when the dispatch workers are not started; otherwise
    /// they race for the same envelopes. Returns `None` on cancellation,
    /// deadline or shutdown.
    pub async fn receive(&self, ctx: &CallContext) -> Option<Envelope> {
        let deadline = ctx.deadline_instant();
        let expiry = async {
            match deadline {
                Some(deadline) => tokio::time::sleep_until(deadline).await,
                None => std::future::pending::<()>().await,
            }
        };

        tokio::select! {
            biased;

            _ = ctx.cancelled() => None,
            _ = self.inner.shutdown.cancelled() => None,
            envelope = self.inner.conveyors.inbound.recv() => envelope,
            _ = expiry => None,
        }
    }
}
