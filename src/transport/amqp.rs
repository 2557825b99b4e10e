//! AMQP broker binding (RabbitMQ) via `lapin`.
//!
//! One connection per broker, dialed lazily and exactly once; every channel
//! declares the queue, sets a prefetch of one and consumes from it. Private
//! queues are exclusive to the connection and deleted by the broker once
//! their last consumer goes away.
//! Publishing goes through the default exchange with the envelope route as
//! the routing key.
//!
//! # Wire mapping
//!
//! | Envelope        | AMQP property / header          |
//! |-----------------|---------------------------------|
//! | `reply_to`      | `reply-to`                      |
//! | `correlation_id`| `correlation-id`                |
//! | `method`        | `message-id`                    |
//! | `sender_id`     | `app-id`                        |
//! | `kind`          | `type` (`serve` / `reply`)      |
//! | `deadline`      | `timestamp` (seconds) and `x-deadline-ms` |
//! | `sent_at`       | `x-sent-at-ms`                  |
//! | `error`         | `x-error`                       |
//! | `body`          | message body                    |
//!
//! The broker timestamp only has second resolution, so the precise
//! deadline travels in a header; on ingest the header wins.

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, TimeZone, Utc};
use futures::StreamExt;
use lapin::message::Delivery;
use lapin::options::{
    BasicAckOptions, BasicConsumeOptions, BasicPublishOptions, BasicQosOptions,
    QueueDeclareOptions,
};
use lapin::types::{AMQPValue, FieldTable, LongString, ShortString};
use lapin::{BasicProperties, Channel, Connection, ConnectionProperties};
use tokio::sync::OnceCell;
use tracing::{debug, info};

use super::traits::{AckMode, Broker, ChannelSpec, Consumer, Inbound, Publisher};
use crate::envelope::{Envelope, Kind};
use crate::error::{Error, Result};

const CONTENT_TYPE: &str = "application/octet-stream";
const HEADER_DEADLINE: &str = "x-deadline-ms";
const HEADER_SENT_AT: &str = "x-sent-at-ms";
const HEADER_ERROR: &str = "x-error";

/// RabbitMQ (or any AMQP 0-9-1) broker.
pub struct AmqpBroker {
    url: String,
    connection: OnceCell<Connection>,
}

impl AmqpBroker {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            connection: OnceCell::new(),
        }
    }

    async fn connection(&self) -> Result<&Connection> {
        self.connection
            .get_or_try_init(|| async {
                info!("dialing {}", redact(&self.url));
                let connection = Connection::connect(&self.url, ConnectionProperties::default()).await?;
                info!("connected to {}", redact(&self.url));
                Ok::<_, Error>(connection)
            })
            .await
    }
}

#[async_trait]
impl Broker for AmqpBroker {
    type Publisher = AmqpPublisher;
    type Consumer = AmqpConsumer;

    async fn connect(&self) -> Result<()> {
        self.connection().await.map(|_| ())
    }

    async fn open_channel(&self, spec: &ChannelSpec) -> Result<(AmqpPublisher, AmqpConsumer)> {
        let channel = self.connection().await?.create_channel().await?;

        let queue = channel
            .queue_declare(
                &spec.queue,
                QueueDeclareOptions {
                    durable: !spec.private,
                    exclusive: spec.private,
                    auto_delete: spec.private,
                    ..QueueDeclareOptions::default()
                },
                FieldTable::default(),
            )
            .await?;

        channel
            .basic_qos(spec.prefetch, BasicQosOptions::default())
            .await?;

        let consumer = channel
            .basic_consume(
                queue.name().as_str(),
                "",
                BasicConsumeOptions {
                    no_ack: spec.ack == AckMode::Auto,
                    ..BasicConsumeOptions::default()
                },
                FieldTable::default(),
            )
            .await?;

        debug!(queue = %spec.queue, ack = ?spec.ack, private = spec.private, "amqp channel consuming");
        Ok((AmqpPublisher { channel }, AmqpConsumer { consumer }))
    }
}

/// Outbound half of an AMQP channel.
pub struct AmqpPublisher {
    channel: Channel,
}

#[async_trait]
impl Publisher for AmqpPublisher {
    async fn publish(&mut self, envelope: &Envelope) -> Result<()> {
        self.channel
            .basic_publish(
                "",
                &envelope.route,
                BasicPublishOptions::default(),
                &envelope.body,
                properties(envelope),
            )
            .await?
            .await?;
        Ok(())
    }

    async fn ack(&mut self, tag: u64) -> Result<()> {
        self.channel
            .basic_ack(tag, BasicAckOptions::default())
            .await?;
        Ok(())
    }

    async fn close(&mut self) -> Result<()> {
        self.channel.close(200, "shutdown").await?;
        Ok(())
    }
}

/// Inbound half of an AMQP channel.
pub struct AmqpConsumer {
    consumer: lapin::Consumer,
}

#[async_trait]
impl Consumer for AmqpConsumer {
    async fn next(&mut self) -> Option<Result<Inbound>> {
        let delivery = self.consumer.next().await?;
        Some(delivery.map_err(Error::from).map(|delivery| Inbound {
            tag: delivery.delivery_tag,
            envelope: from_delivery(delivery),
        }))
    }
}

/// Publish properties for an envelope. The route is consumed as the
/// routing key and is not carried in the message itself.
pub fn properties(envelope: &Envelope) -> BasicProperties {
    let mut headers = FieldTable::default();
    headers.insert(
        HEADER_DEADLINE.into(),
        AMQPValue::LongLongInt(envelope.deadline.timestamp_millis()),
    );
    headers.insert(
        HEADER_SENT_AT.into(),
        AMQPValue::LongLongInt(envelope.sent_at.timestamp_millis()),
    );
    if let Some(error) = &envelope.error {
        headers.insert(
            HEADER_ERROR.into(),
            AMQPValue::LongString(LongString::from(error.clone())),
        );
    }

    BasicProperties::default()
        .with_content_type(CONTENT_TYPE.into())
        .with_reply_to(ShortString::from(envelope.reply_to.as_str()))
        .with_correlation_id(ShortString::from(envelope.correlation_id.as_str()))
        .with_message_id(ShortString::from(envelope.method.as_str()))
        .with_app_id(ShortString::from(envelope.sender_id.as_str()))
        .with_kind(ShortString::from(envelope.kind.as_str()))
        .with_timestamp(envelope.deadline.timestamp().max(0) as u64)
        .with_headers(headers)
}

/// Envelope for a consumed delivery.
pub fn from_delivery(delivery: Delivery) -> Envelope {
    envelope_from_parts(
        delivery.routing_key.as_str(),
        &delivery.properties,
        Bytes::from(delivery.data),
    )
}

/// Envelope from the routing key, properties and body of a delivery.
pub fn envelope_from_parts(route: &str, properties: &BasicProperties, body: Bytes) -> Envelope {
    let short = |value: &Option<ShortString>| {
        value
            .as_ref()
            .map(|s| s.as_str().to_owned())
            .unwrap_or_default()
    };
    let headers = properties.headers().as_ref();
    let header_ms = |name: &str| {
        headers
            .and_then(|table| table.inner().get(&ShortString::from(name)))
            .and_then(|value| match value {
                AMQPValue::LongLongInt(ms) => Some(*ms),
                AMQPValue::LongInt(ms) => Some(i64::from(*ms)),
                AMQPValue::Timestamp(secs) => i64::try_from(*secs).ok().map(|s| s * 1000),
                _ => None,
            })
            .and_then(|ms| Utc.timestamp_millis_opt(ms).single())
    };

    let coarse_deadline = (*properties.timestamp())
        .and_then(|secs| i64::try_from(secs).ok())
        .and_then(|secs| Utc.timestamp_opt(secs, 0).single());
    let deadline = header_ms(HEADER_DEADLINE)
        .or(coarse_deadline)
        .unwrap_or(DateTime::<Utc>::MIN_UTC);
    let sent_at = header_ms(HEADER_SENT_AT).unwrap_or_else(Utc::now);

    let error = headers
        .and_then(|table| table.inner().get(&ShortString::from(HEADER_ERROR)))
        .and_then(|value| match value {
            AMQPValue::LongString(s) => Some(String::from_utf8_lossy(s.as_bytes()).into_owned()),
            _ => None,
        });

    Envelope {
        route: route.to_owned(),
        reply_to: short(properties.reply_to()),
        deadline,
        sent_at,
        kind: Kind::parse(&short(properties.kind())),
        correlation_id: short(properties.correlation_id()),
        method: short(properties.message_id()),
        sender_id: short(properties.app_id()),
        body,
        error,
    }
}

/// Strip credentials from a broker URL for logging.
fn redact(url: &str) -> String {
    match (url.find("://"), url.rfind('@')) {
        (Some(scheme), Some(at)) if at > scheme => format!("{}://***@{}", &url[..scheme], &url[at + 1..]),
        _ => url.to_owned(),
    }
}
