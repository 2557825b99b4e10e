//! Transport-agnostic call/response record.
//!
//! An [`Envelope`] is the unit that flows through the inbound and outbound
//! conveyors. Transport bindings translate broker deliveries into envelopes
//! and envelopes into broker publishes; everything between those two edges
//! only sees this type.

use std::fmt;

use bytes::Bytes;
use chrono::{DateTime, Utc};

/// Wire tag for a request.
pub const KIND_SERVE: &str = "serve";
/// Wire tag for a response.
pub const KIND_REPLY: &str = "reply";

/// What an envelope carries.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Kind {
    /// A request addressed to a registered method.
    Serve,
    /// A response to an earlier Serve.
    Reply,
    /// Any other wire tag. Dropped by dispatch as malformed.
    Unknown(String),
}

impl Kind {
    /// Parse the broker-level type tag.
    pub fn parse(tag: &str) -> Self {
        match tag {
            KIND_SERVE => Kind::Serve,
            KIND_REPLY => Kind::Reply,
            other => Kind::Unknown(other.to_owned()),
        }
    }

    /// Broker-level type tag.
    pub fn as_str(&self) -> &str {
        match self {
            Kind::Serve => KIND_SERVE,
            Kind::Reply => KIND_REPLY,
            Kind::Unknown(tag) => tag,
        }
    }
}

impl fmt::Display for Kind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One call or one reply, with the metadata needed to correlate them.
#[derive(Debug, Clone, PartialEq)]
pub struct Envelope {
    /// Destination queue when publishing. On ingest, the queue it came from.
    pub route: String,
    /// Queue the sender listens on for the reply. Empty for fire-and-forget.
    pub reply_to: String,
    /// Absolute expiry of the call.
    pub deadline: DateTime<Utc>,
    /// Wall-clock time the envelope was created.
    pub sent_at: DateTime<Utc>,
    pub kind: Kind,
    pub correlation_id: String,
    /// Method name targeted by a Serve.
    pub method: String,
    pub sender_id: String,
    /// Opaque serialized payload.
    pub body: Bytes,
    /// Failure reason carried by an explicit error reply.
    pub error: Option<String>,
}

impl Envelope {
    /// Build a request addressed to `route`.
    pub fn serve(
        route: impl Into<String>,
        reply_to: impl Into<String>,
        method: impl Into<String>,
        correlation_id: impl Into<String>,
        deadline: DateTime<Utc>,
        body: Bytes,
    ) -> Self {
        Self {
            route: route.into(),
            reply_to: reply_to.into(),
            deadline,
            sent_at: Utc::now(),
            kind: Kind::Serve,
            correlation_id: correlation_id.into(),
            method: method.into(),
            sender_id: String::new(),
            body,
            error: None,
        }
    }

    /// Set the sender id.
    pub fn with_sender(mut self, sender_id: impl Into<String>) -> Self {
        self.sender_id = sender_id.into();
        self
    }

    /// True when the sender expects no response.
    pub fn is_fire_and_forget(&self) -> bool {
        self.reply_to.is_empty()
    }

    /// True once the deadline has passed.
    pub fn is_expired(&self) -> bool {
        self.deadline <= Utc::now()
    }

    /// Turn a served request into its response.
    ///
    /// Swaps `route` and `reply_to`, so the reply travels back to the
    /// caller's queue, and replaces the body.
    pub fn into_reply(mut self, body: Bytes) -> Self {
        std::mem::swap(&mut self.route, &mut self.reply_to);
        self.kind = Kind::Reply;
        self.body = body;
        self.sent_at = Utc::now();
        self.error = None;
        self
    }

    /// Turn a served request into an explicit error reply.
    pub fn into_error_reply(self, reason: impl Into<String>) -> Self {
        let mut reply = self.into_reply(Bytes::new());
        reply.error = Some(reason.into());
        reply
    }
}
