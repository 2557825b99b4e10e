//! Dispatch workers.
//!
//! Each worker drains the shared inbound conveyor. A Serve envelope runs the
//! registered handler and its reply goes back out through the outbound
//! conveyor; a Reply envelope is handed to the correlation router. Nothing
//! that goes wrong here reaches the remote caller except as a timeout, or
//! as an error reply when `error_replies` is enabled.

use std::sync::Arc;

use tokio::time::Instant;
use tracing::{debug, error, trace, warn};

use super::Inner;
use crate::context::CallContext;
use crate::envelope::{Envelope, Kind};

pub(super) async fn run_worker(index: usize, inner: Arc<Inner>) {
    debug!(worker = index, "dispatch worker started");
    loop {
        let envelope = tokio::select! {
            biased;

            _ = inner.shutdown.cancelled() => break,

            envelope = inner.conveyors.inbound.recv() => match envelope {
                Some(envelope) => envelope,
                None => break,
            },
        };
        inner.dispatch(envelope).await;
    }
    debug!(worker = index, "dispatch worker stopped");
}

impl Inner {
    pub(super) async fn dispatch(&self, envelope: Envelope) {
        if let Kind::Unknown(tag) = &envelope.kind {
            warn!(
                kind = %tag,
                correlation_id = %envelope.correlation_id,
                "malformed envelope dropped"
            );
            return;
        }

        if envelope.kind == Kind::Serve {
            self.serve(envelope).await;
            return;
        }

        let correlation_id = envelope.correlation_id.clone();
        if self.router.deliver(envelope) {
            trace!(correlation_id = %correlation_id, "reply delivered");
        } else {
            debug!(correlation_id = %correlation_id, "unmatched reply dropped");
        }
    }

    async fn serve(&self, envelope: Envelope) {
        if envelope.is_expired() {
            debug!(
                method = %envelope.method,
                correlation_id = %envelope.correlation_id,
                "request expired before dispatch, dropped"
            );
            return;
        }

        let Some(handler) = self.registry.get(&envelope.method) else {
            warn!(
                correlation_id = %envelope.correlation_id,
                sender = %envelope.sender_id,
                "unknown method {}",
                envelope.method
            );
            let reason = format!("unknown method {}", envelope.method);
            self.fail(envelope, reason).await;
            return;
        };

        let ctx = CallContext::from_envelope(&envelope);
        match handler(ctx, envelope.body.clone()).await {
            Ok(body) => {
                if envelope.is_fire_and_forget() {
                    trace!(method = %envelope.method, "fire-and-forget call served");
                    return;
                }
                self.reply(envelope.into_reply(body)).await;
            }
            Err(e) => {
                error!(
                    method = %envelope.method,
                    correlation_id = %envelope.correlation_id,
                    "handler failed: {:#}",
                    e
                );
                self.fail(envelope, format!("{:#}", e)).await;
            }
        }
    }

    /// Drop a failed request, or answer it with an error reply if enabled.
    async fn fail(&self, envelope: Envelope, reason: String) {
        if self.config.error_replies && !envelope.is_fire_and_forget() {
            self.reply(envelope.into_error_reply(reason)).await;
        }
    }

    async fn reply(&self, reply: Envelope) {
        if reply.is_expired() {
            debug!(correlation_id = %reply.correlation_id, "reply dropped, deadline passed");
            return;
        }
        let deadline = CallContext::with_deadline(reply.deadline)
            .deadline_instant()
            .unwrap_or_else(Instant::now);
        let correlation_id = reply.correlation_id.clone();
        if !self.conveyors.outbound.send_until(reply, deadline).await {
            warn!(correlation_id = %correlation_id, "reply dropped, deadline passed before publish");
        }
    }
}
