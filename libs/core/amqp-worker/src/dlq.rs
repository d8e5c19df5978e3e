//! Dead-letter destination: topology and diagnostic headers.

use crate::config::DeadLetterConfig;
use crate::error::AmqpError;
use chrono::Utc;
use lapin::options::{ExchangeDeclareOptions, QueueBindOptions, QueueDeclareOptions};
use lapin::types::{AMQPValue, FieldTable, ShortString};
use lapin::{Channel, ExchangeKind};
use messaging::ErrorKind;
use tracing::info;

pub const HEADER_ERROR_TYPE: &str = "x-error-type";
pub const HEADER_ERROR_MESSAGE: &str = "x-error-message";
pub const HEADER_TIMESTAMP: &str = "x-timestamp";

/// Headers attached to a dead-lettered message. The body is republished
/// untouched.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeadLetterHeaders {
    pub error_type: ErrorKind,
    pub error_message: String,
    /// Unix seconds
    pub timestamp: i64,
}

impl DeadLetterHeaders {
    pub fn new(error_type: ErrorKind, error_message: impl Into<String>) -> Self {
        Self {
            error_type,
            error_message: error_message.into(),
            timestamp: Utc::now().timestamp(),
        }
    }

    pub fn to_field_table(&self) -> FieldTable {
        let mut table = FieldTable::default();
        table.insert(
            ShortString::from(HEADER_ERROR_TYPE),
            AMQPValue::LongString(self.error_type.to_string().into()),
        );
        table.insert(
            ShortString::from(HEADER_ERROR_MESSAGE),
            AMQPValue::LongString(self.error_message.clone().into()),
        );
        table.insert(
            ShortString::from(HEADER_TIMESTAMP),
            AMQPValue::LongLongInt(self.timestamp),
        );
        table
    }
}

/// Declare the dead-letter exchange and queue and bind them.
pub async fn declare(channel: &Channel, dead_letter: &DeadLetterConfig) -> Result<(), AmqpError> {
    channel
        .exchange_declare(
            &dead_letter.exchange,
            ExchangeKind::Direct,
            ExchangeDeclareOptions {
                durable: true,
                ..Default::default()
            },
            FieldTable::default(),
        )
        .await
        .map_err(|e| AmqpError::declare(format!("exchange {}", dead_letter.exchange), e))?;

    channel
        .queue_declare(
            &dead_letter.queue,
            QueueDeclareOptions {
                durable: true,
                ..Default::default()
            },
            FieldTable::default(),
        )
        .await
        .map_err(|e| AmqpError::declare(format!("queue {}", dead_letter.queue), e))?;

    channel
        .queue_bind(
            &dead_letter.queue,
            &dead_letter.exchange,
            &dead_letter.routing_key,
            QueueBindOptions::default(),
            FieldTable::default(),
        )
        .await
        .map_err(|e| AmqpError::declare(format!("binding {}", dead_letter.queue), e))?;

    info!(
        exchange = %dead_letter.exchange,
        queue = %dead_letter.queue,
        routing_key = %dead_letter.routing_key,
        "Dead-letter topology declared"
    );
    Ok(())
}
