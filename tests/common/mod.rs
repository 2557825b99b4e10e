//! Common test utilities: orchestrators wired to a shared in-process broker.

#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use warren_core::service::HandlerFuture;
use warren_core::{BindingConfig, CallContext, MemoryBroker, Orchestrator, RestartPolicy, RuntimeConfig};

#[derive(Clone, PartialEq, prost::Message)]
pub struct Text {
    #[prost(string, tag = "1")]
    pub data: String,
}

impl Text {
    pub fn new(data: impl Into<String>) -> Self {
        Self { data: data.into() }
    }
}

pub fn runtime_config(queue: &str) -> RuntimeConfig {
    let mut config = RuntimeConfig {
        workers: 2,
        queue_capacity: 16,
        ..RuntimeConfig::default()
    };
    config.binding = BindingConfig::new("memory://", queue);
    config
}

/// Orchestrator bound to `queue` on `broker` with workers running.
pub async fn start_node(broker: &MemoryBroker, config: RuntimeConfig) -> Orchestrator {
    let orchestrator = Orchestrator::new(config);
    orchestrator
        .bind(Arc::new(broker.clone()))
        .await
        .expect("bind to memory broker");
    orchestrator.start();
    orchestrator
}

pub async fn node(broker: &MemoryBroker, queue: &str) -> Orchestrator {
    start_node(broker, runtime_config(queue)).await
}

pub fn backoff() -> RestartPolicy {
    RestartPolicy::Backoff {
        initial_ms: 10,
        max_ms: 50,
        max_restarts: None,
    }
}

/// Raw echo handler: the response body is the request body.
pub fn echo(_service: Arc<()>, _ctx: CallContext, body: Bytes) -> HandlerFuture {
    Box::pin(async move { Ok(body) })
}

/// Server with an `Echo` method registered.
pub async fn echo_server(broker: &MemoryBroker, config: RuntimeConfig) -> Orchestrator {
    let server = Orchestrator::new(config);
    server.register_method("Echo", Arc::new(()), echo).unwrap();
    server.bind(Arc::new(broker.clone())).await.unwrap();
    server.start();
    server
}

/// Poll `condition` until it holds or two seconds pass.
pub async fn eventually(condition: impl Fn() -> bool) -> bool {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
    while tokio::time::Instant::now() < deadline {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    condition()
}
