//! Error types for the warren runtime.

use thiserror::Error;

/// Errors returned by the runtime.
///
/// Startup faults (duplicate registration, failed dial) surface from the
/// registration and bind calls. Call-path faults are returned from
/// [`Orchestrator::call`](crate::Orchestrator::call). Dispatch faults never
/// reach this type; they are logged by the worker that hit them.
#[derive(Debug, Error)]
pub enum Error {
    /// The call context has no deadline.
    #[error("call context carries no deadline")]
    MissingDeadline,

    /// The deadline passed before a reply arrived.
    #[error("deadline exceeded")]
    DeadlineExceeded,

    /// The caller cancelled the call.
    #[error("call cancelled")]
    Cancelled,

    /// Request or response could not be serialized.
    #[error("encode failed: {0}")]
    Encode(#[from] prost::EncodeError),

    /// Request or response bytes were not well-formed for the target type.
    #[error("decode failed: {0}")]
    Decode(#[from] prost::DecodeError),

    /// No binding is attached, or its outbound queue is gone.
    #[error("no underlying transport available")]
    NoTransport,

    /// A method name was registered twice.
    #[error("duplicate method {0} registered")]
    DuplicateMethod(String),

    /// A correlation id already has a live waiter.
    #[error("correlation id {0} already has a registered waiter")]
    DuplicateCorrelation(String),

    /// The orchestrator already owns a transport binding.
    #[error("orchestrator is already bound to queue {0}")]
    AlreadyBound(String),

    /// The remote side answered with an explicit error reply.
    #[error("remote error: {0}")]
    Remote(String),

    /// AMQP client error.
    #[error("amqp error: {0}")]
    Amqp(#[from] lapin::Error),

    /// A broker channel or consumer stream closed underneath us.
    #[error("channel closed")]
    ChannelClosed,

    /// Configuration could not be loaded.
    #[error("configuration error: {0}")]
    Config(#[from] config::ConfigError),

    /// IO error.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// True for the deadline category of call-path faults.
    pub fn is_deadline(&self) -> bool {
        matches!(self, Error::MissingDeadline | Error::DeadlineExceeded)
    }

    /// True when the payload could not be decoded.
    pub fn is_decode(&self) -> bool {
        matches!(self, Error::Decode(_))
    }

    /// True when no transport could carry the call.
    pub fn is_transport(&self) -> bool {
        matches!(self, Error::NoTransport | Error::ChannelClosed | Error::Amqp(_))
    }
}

/// Result type alias for runtime operations.
pub type Result<T> = std::result::Result<T, Error>;
