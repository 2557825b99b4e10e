mod common;

use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use bytes::Bytes;
use chrono::Utc;
use common::{echo, echo_server, eventually, node, runtime_config, Text};
use warren_core::ping::{register_ping_service, PingClient, PingRequest, PingServer};
use warren_core::service::{unary, HandlerFuture};
use warren_core::{CallContext, Envelope, Error, MemoryBroker, Orchestrator};

fn ctx(ms: u64) -> CallContext {
    CallContext::with_timeout(Duration::from_millis(ms))
}

#[tokio::test]
async fn test_echo_round_trip() {
    let broker = MemoryBroker::new();
    let server = echo_server(&broker, runtime_config("server")).await;
    let client = node(&broker, "client").await;

    let response: Text = client
        .call(&ctx(1000), "server", "Echo", &Text::new("hi"))
        .await
        .unwrap();

    assert_eq!(response, Text::new("hi"));
    assert_eq!(client.pending_calls(), 0);

    client.shutdown().await;
    server.shutdown().await;
}

#[tokio::test]
async fn test_timeout_with_no_consumer() {
    let broker = MemoryBroker::new();
    broker.declare("idle");
    let client = node(&broker, "client").await;

    let started = Instant::now();
    let err = client
        .call::<_, Text>(&ctx(100), "idle", "Echo", &Text::new("hi"))
        .await
        .unwrap_err();
    let elapsed = started.elapsed();

    assert!(matches!(err, Error::DeadlineExceeded), "got {:?}", err);
    assert!(elapsed >= Duration::from_millis(90), "returned early: {:?}", elapsed);
    assert!(elapsed < Duration::from_millis(600), "returned late: {:?}", elapsed);
    assert_eq!(client.pending_calls(), 0);
}

#[tokio::test]
async fn test_past_deadline_fails_immediately() {
    let broker = MemoryBroker::new();
    let client = node(&broker, "client").await;

    let expired = CallContext::with_deadline(Utc::now() - chrono::Duration::seconds(1));
    let err = client
        .call::<_, Text>(&expired, "server", "Echo", &Text::new("hi"))
        .await
        .unwrap_err();

    assert!(matches!(err, Error::DeadlineExceeded));
    assert_eq!(client.pending_calls(), 0);
    assert_eq!(broker.published(), 0);
}

#[tokio::test]
async fn test_missing_deadline() {
    let broker = MemoryBroker::new();
    let client = node(&broker, "client").await;

    let err = client
        .call::<_, Text>(&CallContext::new(), "server", "Echo", &Text::new("hi"))
        .await
        .unwrap_err();
    assert!(matches!(err, Error::MissingDeadline));
}

#[test]
fn test_duplicate_registration_is_rejected() {
    let orchestrator = Orchestrator::new(runtime_config("server"));
    orchestrator.register_method("Echo", Arc::new(()), echo).unwrap();

    let err = orchestrator
        .register_method("Echo", Arc::new(()), echo)
        .unwrap_err();
    assert!(matches!(err, Error::DuplicateMethod(ref name) if name == "Echo"));
    assert_eq!(err.to_string(), "duplicate method Echo registered");
}

#[tokio::test]
async fn test_concurrent_calls_get_their_own_replies() {
    let broker = MemoryBroker::new();
    let server = echo_server(&broker, runtime_config("server")).await;
    let client = node(&broker, "client").await;

    let calls = (0..64).map(|i| {
        let client = client.clone();
        tokio::spawn(async move {
            let request = Text::new(format!("call-{}", i));
            let response: Text = client.call(&ctx(2000), "server", "Echo", &request).await.unwrap();
            assert_eq!(response, request);
            response.data
        })
    });

    let mut seen = HashSet::new();
    for call in calls.collect::<Vec<_>>() {
        assert!(seen.insert(call.await.unwrap()));
    }
    assert_eq!(seen.len(), 64);
    assert_eq!(client.pending_calls(), 0);

    server.shutdown().await;
}

#[tokio::test]
async fn test_unknown_method_times_out_without_error_replies() {
    let broker = MemoryBroker::new();
    let _server = echo_server(&broker, runtime_config("server")).await;
    let client = node(&broker, "client").await;

    let err = client
        .call::<_, Text>(&ctx(150), "server", "Missing", &Text::new("hi"))
        .await
        .unwrap_err();
    assert!(matches!(err, Error::DeadlineExceeded));
}

#[tokio::test]
async fn test_error_replies_fail_fast() {
    let broker = MemoryBroker::new();
    let mut config = runtime_config("server");
    config.error_replies = true;
    let server = echo_server(&broker, config).await;

    fn fails(_service: Arc<()>, _ctx: CallContext, _body: Bytes) -> HandlerFuture {
        Box::pin(async { Err(anyhow::anyhow!("disk on fire")) })
    }
    server.register_method("Fail", Arc::new(()), fails).unwrap();

    let client = node(&broker, "client").await;

    let started = Instant::now();
    let err = client
        .call::<_, Text>(&ctx(5000), "server", "Missing", &Text::new("hi"))
        .await
        .unwrap_err();
    assert!(matches!(err, Error::Remote(ref reason) if reason == "unknown method Missing"));
    assert!(started.elapsed() < Duration::from_secs(2));

    let err = client
        .call::<_, Text>(&ctx(5000), "server", "Fail", &Text::new("hi"))
        .await
        .unwrap_err();
    assert!(matches!(err, Error::Remote(ref reason) if reason.contains("disk on fire")));
}

#[tokio::test]
async fn test_decode_failure_is_reported() {
    let broker = MemoryBroker::new();
    let _server = echo_server(&broker, runtime_config("server")).await;
    let client = node(&broker, "client").await;

    // Echo hands back the raw request bytes, which are not a valid Text.
    let body = Bytes::from_static(&[0x0a, 0xff]);
    let reply = client.invoke(&ctx(1000), "server", "Echo", body.clone()).await.unwrap();
    assert_eq!(reply, body);

    let err = warren_core::codec::decode::<Text>(&reply).unwrap_err();
    assert!(err.is_decode());
}

#[tokio::test]
async fn test_late_reply_is_dropped_and_id_not_reused() {
    let broker = MemoryBroker::new();
    let server = Orchestrator::new(runtime_config("server"));

    fn slow(_service: Arc<()>, _ctx: CallContext, body: Bytes) -> HandlerFuture {
        Box::pin(async move {
            tokio::time::sleep(Duration::from_millis(200)).await;
            Ok(body)
        })
    }
    server.register_method("Slow", Arc::new(()), slow).unwrap();
    server.register_method("Echo", Arc::new(()), echo).unwrap();
    server.bind(Arc::new(broker.clone())).await.unwrap();
    server.start();

    let client = node(&broker, "client").await;

    let err = client
        .call::<_, Text>(&ctx(50), "server", "Slow", &Text::new("late"))
        .await
        .unwrap_err();
    assert!(matches!(err, Error::DeadlineExceeded));
    assert_eq!(client.pending_calls(), 0);

    // The handler finishes after the deadline, so its reply is dropped
    // instead of queued; a fresh call still gets its own answer.
    tokio::time::sleep(Duration::from_millis(300)).await;
    let response: Text = client
        .call(&ctx(1000), "server", "Echo", &Text::new("fresh"))
        .await
        .unwrap();
    assert_eq!(response, Text::new("fresh"));
}

#[tokio::test]
async fn test_cancelled_call_releases_registration() {
    let broker = MemoryBroker::new();
    broker.declare("idle");
    let client = node(&broker, "client").await;

    let call_ctx = ctx(5000);
    let canceller = call_ctx.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(30)).await;
        canceller.cancel();
    });

    let err = client
        .call::<_, Text>(&call_ctx, "idle", "Echo", &Text::new("hi"))
        .await
        .unwrap_err();
    assert!(matches!(err, Error::Cancelled));
    assert_eq!(client.pending_calls(), 0);
}

#[tokio::test]
async fn test_handler_sees_call_metadata() {
    let broker = MemoryBroker::new();
    let server = Orchestrator::new(runtime_config("server"));

    fn whoami(service: Arc<()>, ctx: CallContext, body: Bytes) -> HandlerFuture {
        unary(service, ctx, body, |_service: Arc<()>, ctx: CallContext, _request: Text| async move {
            let remaining = ctx.remaining().unwrap_or_default();
            Ok(Text::new(format!(
                "{}|{}|{}",
                ctx.method().unwrap_or_default(),
                ctx.sender_id().unwrap_or_default(),
                remaining > Duration::ZERO
            )))
        })
    }
    server.register_method("WhoAmI", Arc::new(()), whoami).unwrap();
    server.bind(Arc::new(broker.clone())).await.unwrap();
    server.start();

    let client = node(&broker, "client").await;
    let response: Text = client
        .call(&ctx(1000), "server", "WhoAmI", &Text::new(""))
        .await
        .unwrap();
    assert_eq!(response.data, format!("WhoAmI|{}|true", client.sender_id()));
}

#[tokio::test]
async fn test_fire_and_forget() {
    let broker = MemoryBroker::new();
    let server = Orchestrator::new(runtime_config("server"));
    let hits = Arc::new(AtomicUsize::new(0));

    fn count(hits: Arc<AtomicUsize>, _ctx: CallContext, body: Bytes) -> HandlerFuture {
        hits.fetch_add(1, Ordering::SeqCst);
        Box::pin(async move { Ok(body) })
    }
    server.register_method("Count", Arc::clone(&hits), count).unwrap();
    server.bind(Arc::new(broker.clone())).await.unwrap();
    server.start();

    let client = node(&broker, "client").await;
    let call_ctx = ctx(1000);
    let envelope = Envelope::serve(
        "server",
        "",
        "Count",
        "0000000001",
        call_ctx.deadline().unwrap(),
        Bytes::from_static(b"x"),
    );
    client.send(&call_ctx, envelope).await.unwrap();

    assert!(eventually(|| hits.load(Ordering::SeqCst) == 1).await);
    // Only the request itself was published; no reply followed it.
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(broker.published(), 1);
}

#[tokio::test]
async fn test_ping_service() {
    let broker = MemoryBroker::new();
    let server = Orchestrator::new(runtime_config("ping.PingService"));
    register_ping_service(&server, Arc::new(PingServer)).unwrap();
    server.bind(Arc::new(broker.clone())).await.unwrap();
    server.start();

    let client = node(&broker, "client").await;
    let before = Utc::now();
    let pong = PingClient::new(client.clone())
        .ping(&ctx(1000), &PingRequest {})
        .await
        .unwrap();

    let time = pong.time().unwrap();
    assert!(time >= before - chrono::Duration::seconds(1));
    assert!(time <= Utc::now() + chrono::Duration::seconds(1));
}

#[tokio::test]
async fn test_second_bind_is_rejected() {
    let broker = MemoryBroker::new();
    let client = node(&broker, "client").await;

    let err = client.bind(Arc::new(broker.clone())).await.unwrap_err();
    assert!(matches!(err, Error::AlreadyBound(ref queue) if queue == "client"));
}

#[tokio::test]
async fn test_unbound_call_has_no_transport() {
    let client = Orchestrator::new(runtime_config("client"));
    let err = client
        .call::<_, Text>(&ctx(1000), "server", "Echo", &Text::new("hi"))
        .await
        .unwrap_err();
    assert!(err.is_transport());
}

#[tokio::test]
async fn test_call_after_shutdown() {
    let broker = MemoryBroker::new();
    let client = node(&broker, "client").await;
    client.shutdown().await;

    let err = client
        .call::<_, Text>(&ctx(1000), "server", "Echo", &Text::new("hi"))
        .await
        .unwrap_err();
    assert!(matches!(err, Error::NoTransport));
}

#[tokio::test]
async fn test_receive_without_workers() {
    let broker = MemoryBroker::new();
    let inbox = Orchestrator::new(runtime_config("inbox"));
    inbox.bind(Arc::new(broker.clone())).await.unwrap();

    let sender = node(&broker, "sender").await;
    let call_ctx = ctx(1000);
    let envelope = Envelope::serve(
        "inbox",
        "sender",
        "Anything",
        "0000000009",
        call_ctx.deadline().unwrap(),
        Bytes::from_static(b"raw"),
    );
    sender.send(&call_ctx, envelope).await.unwrap();

    let received = inbox.receive(&call_ctx).await.unwrap();
    assert_eq!(received.method, "Anything");
    assert_eq!(received.route, "inbox");
    assert_eq!(received.body, Bytes::from_static(b"raw"));
}
