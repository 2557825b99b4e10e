//! Service orchestrator.
//!
//! The [`Orchestrator`] is the object an application embeds. It owns
//!
//! - the method registry (`registry`), written once at startup
//! - the correlation router and id counter behind the client call surface
//!   (`client`)
//! - a pool of dispatch workers draining the inbound conveyor (`dispatch`)
//! - at most one transport [`Binding`] feeding and draining the conveyors
//!
//! ```ignore
//! let server = Orchestrator::new(config);
//! ping::register_ping_service(&server, Arc::new(PingServer))?;
//! server.bind(Arc::new(AmqpBroker::new(url))).await?;
//! server.start();
//! ```

mod client;
mod dispatch;
pub mod registry;

use std::sync::atomic::AtomicU32;
use std::sync::{Arc, OnceLock};

use bytes::Bytes;
use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::config::RuntimeConfig;
use crate::context::CallContext;
use crate::conveyor::Conveyor;
use crate::error::{Error, Result};
use crate::router::CorrelationRouter;
use crate::transport::{Binding, BindingConfig, BindingStats, Broker, Conveyors};

pub use registry::{unary, Handler, HandlerFuture, MethodDesc, ServiceDesc};

use registry::MethodRegistry;

struct Inner {
    config: RuntimeConfig,
    sender_id: String,
    registry: MethodRegistry,
    router: CorrelationRouter,
    counter: AtomicU32,
    conveyors: Conveyors,
    shutdown: CancellationToken,
    queue: OnceLock<String>,
    stats: OnceLock<Arc<BindingStats>>,
    binding: tokio::sync::Mutex<Option<Binding>>,
    workers: Mutex<Vec<JoinHandle<()>>>,
}

/// RPC runtime instance. Cloning shares the same instance.
#[derive(Clone)]
pub struct Orchestrator {
    inner: Arc<Inner>,
}

impl Orchestrator {
    pub fn new(config: RuntimeConfig) -> Self {
        let capacity = config.conveyor_capacity();
        let inner = Inner {
            sender_id: config.sender(),
            router: CorrelationRouter::new(config.id_cooldown()),
            registry: MethodRegistry::default(),
            counter: AtomicU32::new(0),
            conveyors: Conveyors {
                inbound: Conveyor::new(capacity),
                outbound: Conveyor::new(capacity),
            },
            shutdown: CancellationToken::new(),
            queue: OnceLock::new(),
            stats: OnceLock::new(),
            binding: tokio::sync::Mutex::new(None),
            workers: Mutex::new(Vec::new()),
            config,
        };
        Self {
            inner: Arc::new(inner),
        }
    }

    /// Register a raw handler for `name`, bound to `service`.
    ///
    /// Registering the same name twice fails with
    /// [`Error::DuplicateMethod`]; callers treat that as fatal.
    pub fn register_method<S, F>(&self, name: impl Into<String>, service: Arc<S>, handler: F) -> Result<()>
    where
        S: ?Sized + Send + Sync + 'static,
        F: Fn(Arc<S>, CallContext, Bytes) -> HandlerFuture + Send + Sync + 'static,
    {
        let name = name.into();
        let bound: Handler = Arc::new(move |ctx: CallContext, body: Bytes| handler(Arc::clone(&service), ctx, body));
        self.inner.registry.insert(name.clone(), bound)?;
        debug!(method = %name, "method registered");
        Ok(())
    }

    /// Register every method of a generated service descriptor.
    pub fn register_service<S>(&self, desc: &ServiceDesc<S>, service: Arc<S>) -> Result<()>
    where
        S: ?Sized + Send + Sync + 'static,
    {
        for method in desc.methods {
            self.register_method(method.name, Arc::clone(&service), method.handler)?;
        }
        info!(
            service = desc.service_name,
            methods = desc.methods.len(),
            "service registered"
        );
        Ok(())
    }

    pub fn has_method(&self, name: &str) -> bool {
        self.inner.registry.contains(name)
    }

    /// Names of every registered method, sorted.
    pub fn methods(&self) -> Vec<String> {
        self.inner.registry.names()
    }

    /// Attach the transport binding described by the runtime configuration.
    pub async fn bind<B: Broker>(&self, broker: Arc<B>) -> Result<()> {
        let config = self.inner.config.binding.clone();
        self.bind_with(broker, &config).await
    }

    /// Attach a transport binding. Only one binding per orchestrator.
    ///
    /// Dials the broker and opens every channel before returning; a failed
    /// dial is a startup fault.
    pub async fn bind_with<B: Broker>(&self, broker: Arc<B>, config: &BindingConfig) -> Result<()> {
        let mut slot = self.inner.binding.lock().await;
        if let Some(queue) = self.inner.queue.get() {
            return Err(Error::AlreadyBound(queue.clone()));
        }

        let binding = Binding::open(
            broker,
            config,
            self.inner.conveyors.clone(),
            self.inner.config.supervisor.clone(),
            self.inner.shutdown.child_token(),
        )
        .await?;

        let _ = self.inner.stats.set(binding.stats());
        let _ = self.inner.queue.set(binding.queue().to_owned());
        *slot = Some(binding);
        info!(queue = %config.queue, sender = %self.inner.sender_id, "orchestrator bound");
        Ok(())
    }

    /// Spawn the dispatch workers. Returns how many were started; a second
    /// call starts none.
    ///
    /// Without workers nothing drains the inbound conveyor, which is what
    /// [`receive`](Self::receive) is for.
    pub fn start(&self) -> usize {
        let mut workers = self.inner.workers.lock();
        if !workers.is_empty() {
            return 0;
        }
        let count = self.inner.config.worker_count();
        for index in 0..count {
            workers.push(tokio::spawn(dispatch::run_worker(index, Arc::clone(&self.inner))));
        }
        info!(workers = count, "dispatch workers started");
        count
    }

    /// Queue this orchestrator consumes from, once bound.
    pub fn queue(&self) -> Option<&str> {
        self.inner.queue.get().map(String::as_str)
    }

    pub fn sender_id(&self) -> &str {
        &self.inner.sender_id
    }

    /// Calls currently waiting for a reply.
    pub fn pending_calls(&self) -> usize {
        self.inner.router.len()
    }

    /// Channel statistics of the binding, once bound.
    pub fn binding_stats(&self) -> Option<Arc<BindingStats>> {
        self.inner.stats.get().cloned()
    }

    /// Broadcast shutdown, then wait for channel loops and workers to exit.
    ///
    /// Handlers already running finish first. Envelopes still queued are
    /// dropped.
    pub async fn shutdown(&self) {
        info!("orchestrator shutting down");
        self.inner.shutdown.cancel();

        if let Some(binding) = self.inner.binding.lock().await.take() {
            binding.close().await;
        }

        let workers: Vec<_> = self.inner.workers.lock().drain(..).collect();
        for worker in workers {
            let _ = worker.await;
        }
        info!("orchestrator stopped");
    }

    pub fn is_shut_down(&self) -> bool {
        self.inner.shutdown.is_cancelled()
    }
}

impl std::fmt::Debug for Orchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Orchestrator")
            .field("queue", &self.queue())
            .field("sender_id", &self.inner.sender_id)
            .field("pending_calls", &self.pending_calls())
            .finish()
    }
}
