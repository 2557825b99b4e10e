//! Ping service.
//!
//! A complete unary service in the shape the stub generator emits: the
//! request and response messages, the server trait, a static descriptor
//! table with one byte-level handler per method, a registration function
//! and a typed client.

use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, TimeZone, Utc};

use crate::context::CallContext;
use crate::error::Result;
use crate::service::{unary, HandlerFuture, MethodDesc, Orchestrator, ServiceDesc};

/// Queue the Ping service is conventionally served on.
pub const PING_SERVICE_NAME: &str = "ping.PingService";

#[derive(Clone, PartialEq, prost::Message)]
pub struct PingRequest {}

/// Server wall-clock time when the ping was answered.
#[derive(Clone, PartialEq, prost::Message)]
pub struct PingResponse {
    #[prost(int64, tag = "1")]
    pub seconds: i64,
    #[prost(int32, tag = "2")]
    pub nanos: i32,
}

impl PingResponse {
    pub fn now() -> Self {
        let now = Utc::now();
        Self {
            seconds: now.timestamp(),
            nanos: now.timestamp_subsec_nanos() as i32,
        }
    }

    pub fn time(&self) -> Option<DateTime<Utc>> {
        let nanos = u32::try_from(self.nanos).ok()?;
        Utc.timestamp_opt(self.seconds, nanos).single()
    }
}

#[async_trait]
pub trait PingService: Send + Sync + 'static {
    async fn ping(&self, ctx: &CallContext, request: PingRequest) -> anyhow::Result<PingResponse>;
}

fn ping_handler(service: Arc<dyn PingService>, ctx: CallContext, body: Bytes) -> HandlerFuture {
    unary(service, ctx, body, |service, ctx, request: PingRequest| async move {
        service.ping(&ctx, request).await
    })
}

pub static PING_SERVICE_DESC: ServiceDesc<dyn PingService> = ServiceDesc {
    service_name: PING_SERVICE_NAME,
    methods: &[MethodDesc {
        name: "Ping",
        handler: ping_handler,
    }],
};

pub fn register_ping_service<T: PingService>(orchestrator: &Orchestrator, service: Arc<T>) -> Result<()> {
    let service: Arc<dyn PingService> = service;
    orchestrator.register_service(&PING_SERVICE_DESC, service)
}

/// Answers every ping with the current time.
#[derive(Debug, Default, Clone, Copy)]
pub struct PingServer;

#[async_trait]
impl PingService for PingServer {
    async fn ping(&self, _ctx: &CallContext, _request: PingRequest) -> anyhow::Result<PingResponse> {
        Ok(PingResponse::now())
    }
}

/// Typed client for the Ping service.
#[derive(Debug, Clone)]
pub struct PingClient {
    orchestrator: Orchestrator,
    queue: String,
}

impl PingClient {
    pub fn new(orchestrator: Orchestrator) -> Self {
        Self::with_queue(orchestrator, PING_SERVICE_NAME)
    }

    /// Client for a Ping service consuming `queue`.
    pub fn with_queue(orchestrator: Orchestrator, queue: impl Into<String>) -> Self {
        Self {
            orchestrator,
            queue: queue.into(),
        }
    }

    pub async fn ping(&self, ctx: &CallContext, request: &PingRequest) -> Result<PingResponse> {
        self.orchestrator.call(ctx, &self.queue, "Ping", request).await
    }
}
