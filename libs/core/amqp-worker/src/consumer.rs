//! Broker connection, topology declaration and inbound deliveries.

use crate::config::WorkerConfig;
use crate::dlq;
use crate::error::AmqpError;
use lapin::message::Delivery;
use lapin::options::{ExchangeDeclareOptions, QueueBindOptions, QueueDeclareOptions};
use lapin::types::{AMQPValue, FieldTable, ShortString};
use lapin::{Channel, Connection, ConnectionProperties, ExchangeKind};
use tracing::info;

/// Header RabbitMQ maintains on quorum queues.
pub const HEADER_DELIVERY_COUNT: &str = "x-delivery-count";

/// Open a connection and a single channel on it.
pub async fn connect(uri: &str) -> Result<(Connection, Channel), AmqpError> {
    let connection = Connection::connect(uri, ConnectionProperties::default()).await?;
    let channel = connection.create_channel().await?;
    info!(channel_id = channel.id(), "Connected to AMQP broker");
    Ok((connection, channel))
}

/// Arguments for the work queue. With a dead-letter destination configured,
/// broker-side rejections are routed there too.
///
/// A redelivery bound needs `x-delivery-count`, which only quorum queues
/// maintain, so a bounded worker declares its queue as quorum.
pub fn queue_arguments(config: &WorkerConfig) -> FieldTable {
    let mut args = FieldTable::default();
    if config.max_redeliveries.is_some() {
        args.insert(
            ShortString::from("x-queue-type"),
            AMQPValue::LongString("quorum".into()),
        );
    }
    if let Some(dead_letter) = &config.dead_letter {
        args.insert(
            ShortString::from("x-dead-letter-exchange"),
            AMQPValue::LongString(dead_letter.exchange.clone().into()),
        );
        args.insert(
            ShortString::from("x-dead-letter-routing-key"),
            AMQPValue::LongString(dead_letter.routing_key.clone().into()),
        );
    }
    args
}

/// Declare the dead-letter topology (if any), then the work exchange and
/// queue and their binding. Everything is durable.
pub async fn declare_topology(channel: &Channel, config: &WorkerConfig) -> Result<(), AmqpError> {
    if let Some(dead_letter) = &config.dead_letter {
        dlq::declare(channel, dead_letter).await?;
    }

    channel
        .exchange_declare(
            &config.exchange,
            ExchangeKind::Direct,
            ExchangeDeclareOptions {
                durable: true,
                ..Default::default()
            },
            FieldTable::default(),
        )
        .await
        .map_err(|e| AmqpError::declare(format!("exchange {}", config.exchange), e))?;

    channel
        .queue_declare(
            &config.queue,
            QueueDeclareOptions {
                durable: true,
                ..Default::default()
            },
            queue_arguments(config),
        )
        .await
        .map_err(|e| AmqpError::declare(format!("queue {}", config.queue), e))?;

    channel
        .queue_bind(
            &config.queue,
            &config.exchange,
            &config.routing_key,
            QueueBindOptions::default(),
            FieldTable::default(),
        )
        .await
        .map_err(|e| AmqpError::declare(format!("binding {}", config.queue), e))?;

    info!(
        exchange = %config.exchange,
        queue = %config.queue,
        routing_key = %config.routing_key,
        dead_letter = config.dead_letter.is_some(),
        "Topology declared"
    );
    Ok(())
}

/// How many times this message was delivered before the current attempt.
///
/// Uses `x-delivery-count` when the broker provides it, otherwise counts the
/// `redelivered` flag as one.
pub fn redelivery_count(headers: Option<&FieldTable>, redelivered: bool) -> u32 {
    let counted = headers.and_then(|table| {
        table
            .inner()
            .iter()
            .find(|(key, _)| key.as_str() == HEADER_DELIVERY_COUNT)
            .and_then(|(_, value)| as_u32(value))
    });

    match counted {
        Some(count) => count,
        None if redelivered => 1,
        None => 0,
    }
}

fn as_u32(value: &AMQPValue) -> Option<u32> {
    let wide: i64 = match value {
        AMQPValue::ShortShortInt(v) => i64::from(*v),
        AMQPValue::ShortShortUInt(v) => i64::from(*v),
        AMQPValue::ShortInt(v) => i64::from(*v),
        AMQPValue::ShortUInt(v) => i64::from(*v),
        AMQPValue::LongInt(v) => i64::from(*v),
        AMQPValue::LongUInt(v) => i64::from(*v),
        AMQPValue::LongLongInt(v) => *v,
        _ => return None,
    };
    u32::try_from(wide.max(0)).ok()
}

/// A delivery detached from its acker. Acknowledgment goes through the
/// dispatcher by `delivery_tag`.
#[derive(Debug, Clone)]
pub struct InboundMessage {
    pub delivery_tag: u64,
    pub body: Vec<u8>,
    pub redelivered: bool,
    pub redeliveries: u32,
}

impl InboundMessage {
    pub fn from_delivery(delivery: Delivery) -> Self {
        let redeliveries =
            redelivery_count(delivery.properties.headers().as_ref(), delivery.redelivered);
        Self {
            delivery_tag: delivery.delivery_tag,
            body: delivery.data,
            redelivered: delivery.redelivered,
            redeliveries,
        }
    }
}
