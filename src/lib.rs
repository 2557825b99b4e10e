//! Warren: request/response RPC over an asynchronous message broker.
//!
//! An [`Orchestrator`] registers method handlers, consumes its own queue
//! through a transport [`Binding`](transport::Binding) and lets callers
//! issue deadline-bound calls to other queues. Replies are matched to
//! callers by correlation id in the [`CorrelationRouter`].

pub mod cli;
pub mod codec;
pub mod config;
pub mod context;
pub mod conveyor;
pub mod envelope;
pub mod error;
pub mod ping;
pub mod router;
pub mod service;
pub mod transport;

// Re-export commonly used types
pub use config::{RuntimeArgs, RuntimeConfig};
pub use context::CallContext;
pub use envelope::{Envelope, Kind};
pub use error::{Error, Result};
pub use router::CorrelationRouter;
pub use service::{unary, HandlerFuture, MethodDesc, Orchestrator, ServiceDesc};
pub use transport::{AmqpBroker, BindingConfig, MemoryBroker, RestartPolicy};
