//! Acknowledgment dispatcher.
//!
//! Workers never touch the channel. They send an [`AckCommand`] to the
//! dispatcher task, which owns the channel and applies commands in the order
//! received.

use crate::config::DeadLetterConfig;
use crate::dlq::DeadLetterHeaders;
use crate::error::AmqpError;
use crate::metrics::WorkerMetrics;
use async_trait::async_trait;
use lapin::options::{BasicAckOptions, BasicNackOptions, BasicPublishOptions};
use lapin::{BasicProperties, Channel};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, warn};

/// Instruction for the dispatcher.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AckCommand {
    Ack {
        delivery_tag: u64,
    },
    Requeue {
        delivery_tag: u64,
    },
    DeadLetter {
        delivery_tag: u64,
        body: Vec<u8>,
        headers: DeadLetterHeaders,
    },
}

/// Broker operations the dispatcher needs.
#[async_trait]
pub trait AckChannel: Send + Sync + 'static {
    async fn ack(&self, delivery_tag: u64) -> Result<(), AmqpError>;

    async fn requeue(&self, delivery_tag: u64) -> Result<(), AmqpError>;

    async fn publish(
        &self,
        exchange: &str,
        routing_key: &str,
        body: &[u8],
        headers: &DeadLetterHeaders,
    ) -> Result<(), AmqpError>;
}

#[async_trait]
impl AckChannel for Channel {
    async fn ack(&self, delivery_tag: u64) -> Result<(), AmqpError> {
        self.basic_ack(delivery_tag, BasicAckOptions::default())
            .await?;
        Ok(())
    }

    async fn requeue(&self, delivery_tag: u64) -> Result<(), AmqpError> {
        self.basic_nack(
            delivery_tag,
            BasicNackOptions {
                multiple: false,
                requeue: true,
            },
        )
        .await?;
        Ok(())
    }

    async fn publish(
        &self,
        exchange: &str,
        routing_key: &str,
        body: &[u8],
        headers: &DeadLetterHeaders,
    ) -> Result<(), AmqpError> {
        let properties = BasicProperties::default()
            .with_content_type("application/json".into())
            .with_delivery_mode(2)
            .with_headers(headers.to_field_table());

        let confirm = self
            .basic_publish(
                exchange,
                routing_key,
                BasicPublishOptions::default(),
                body,
                properties,
            )
            .await?;
        let confirmation = confirm.await?;
        if confirmation.is_nack() {
            return Err(AmqpError::Publish(format!(
                "broker rejected publish to {}",
                exchange
            )));
        }
        Ok(())
    }
}

/// Owns the channel and applies [`AckCommand`]s sequentially.
pub struct Dispatcher<C> {
    channel: C,
    dead_letter: Option<DeadLetterConfig>,
    metrics: WorkerMetrics,
}

impl<C: AckChannel> Dispatcher<C> {
    pub fn new(channel: C, dead_letter: Option<DeadLetterConfig>, metrics: WorkerMetrics) -> Self {
        Self {
            channel,
            dead_letter,
            metrics,
        }
    }

    /// Start the dispatcher task. It stops once every handle is dropped and
    /// the queue is drained.
    pub fn spawn(self, capacity: usize) -> (DispatcherHandle, JoinHandle<()>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        let task = tokio::spawn(self.run(rx));
        (DispatcherHandle { tx }, task)
    }

    async fn run(self, mut rx: mpsc::Receiver<AckCommand>) {
        while let Some(command) = rx.recv().await {
            self.apply(command).await;
        }
        debug!("Dispatcher queue closed");
    }

    /// Broker errors are logged and counted, never propagated: a tag that
    /// could not be acknowledged is redelivered by the broker.
    pub async fn apply(&self, command: AckCommand) {
        match command {
            AckCommand::Ack { delivery_tag } => self.ack(delivery_tag).await,
            AckCommand::Requeue { delivery_tag } => {
                if let Err(e) = self.channel.requeue(delivery_tag).await {
                    error!(delivery_tag, error = %e, "Failed to requeue message");
                    self.metrics.broker_call_failed("nack");
                }
            }
            AckCommand::DeadLetter {
                delivery_tag,
                body,
                headers,
            } => {
                match &self.dead_letter {
                    Some(dead_letter) => {
                        if let Err(e) = self
                            .channel
                            .publish(
                                &dead_letter.exchange,
                                &dead_letter.routing_key,
                                &body,
                                &headers,
                            )
                            .await
                        {
                            error!(
                                delivery_tag,
                                exchange = %dead_letter.exchange,
                                error = %e,
                                "Failed to publish to dead-letter exchange, message is lost"
                            );
                            self.metrics.broker_call_failed("publish");
                        } else {
                            debug!(
                                delivery_tag,
                                exchange = %dead_letter.exchange,
                                error_type = %headers.error_type,
                                "Message dead-lettered"
                            );
                        }
                    }
                    None => {
                        warn!(
                            delivery_tag,
                            error_type = %headers.error_type,
                            error_message = %headers.error_message,
                            "Dead letter exchange not configured, discarding failed message"
                        );
                        self.metrics.message_dropped();
                    }
                }
                self.ack(delivery_tag).await;
            }
        }
    }

    async fn ack(&self, delivery_tag: u64) {
        if let Err(e) = self.channel.ack(delivery_tag).await {
            error!(delivery_tag, error = %e, "Failed to acknowledge message");
            self.metrics.broker_call_failed("ack");
        }
    }
}

/// Cloneable sender side of the dispatcher queue.
#[derive(Debug, Clone)]
pub struct DispatcherHandle {
    tx: mpsc::Sender<AckCommand>,
}

impl DispatcherHandle {
    pub async fn send(&self, command: AckCommand) -> Result<(), AmqpError> {
        self.tx
            .send(command)
            .await
            .map_err(|_| AmqpError::DispatcherClosed)
    }
}


#[cfg(test)]
mod tests {
    use super::testing::{Call, RecordingChannel};
    use super::*;
    use messaging::ErrorKind;

    fn metrics() -> WorkerMetrics {
        WorkerMetrics::new("notifications", "test")
    }

    fn dead_letter() -> Option<DeadLetterConfig> {
        Some(DeadLetterConfig::new(
            "notifications.dlq",
            "notifications.dlx",
            "dead",
        ))
    }

    fn headers() -> DeadLetterHeaders {
        DeadLetterHeaders {
            error_type: ErrorKind::Validation,
            error_message: "userID is required".to_string(),
            timestamp: 1_700_000_000,
        }
    }

    #[tokio::test]
    async fn test_ack_and_requeue() {
        let channel = RecordingChannel::default();
        let dispatcher = Dispatcher::new(channel.clone(), None, metrics());

        dispatcher.apply(AckCommand::Ack { delivery_tag: 1 }).await;
        dispatcher.apply(AckCommand::Requeue { delivery_tag: 2 }).await;

        assert_eq!(channel.calls(), vec![Call::Ack(1), Call::Requeue(2)]);
    }

    #[tokio::test]
    async fn test_dead_letter_publishes_original_body_then_acks() {
        let channel = RecordingChannel::default();
        let dispatcher = Dispatcher::new(channel.clone(), dead_letter(), metrics());
        let body = br#"{"externalID":"e-1","type":"email"}"#.to_vec();

        dispatcher
            .apply(AckCommand::DeadLetter {
                delivery_tag: 7,
                body: body.clone(),
                headers: headers(),
            })
            .await;

        assert_eq!(
            channel.calls(),
            vec![
                Call::Publish {
                    exchange: "notifications.dlx".to_string(),
                    routing_key: "dead".to_string(),
                    body,
                    headers: headers(),
                },
                Call::Ack(7),
            ]
        );
    }

    #[tokio::test]
    async fn test_dead_letter_without_destination_only_acks() {
        let channel = RecordingChannel::default();
        let dispatcher = Dispatcher::new(channel.clone(), None, metrics());

        dispatcher
            .apply(AckCommand::DeadLetter {
                delivery_tag: 3,
                body: b"{}".to_vec(),
                headers: headers(),
            })
            .await;

        assert_eq!(channel.calls(), vec![Call::Ack(3)]);
    }

    #[tokio::test]
    async fn test_failed_dead_letter_publish_still_acks() {
        let channel = RecordingChannel::failing_publish();
        let dispatcher = Dispatcher::new(channel.clone(), dead_letter(), metrics());

        dispatcher
            .apply(AckCommand::DeadLetter {
                delivery_tag: 9,
                body: b"{}".to_vec(),
                headers: headers(),
            })
            .await;

        assert_eq!(channel.calls(), vec![Call::Ack(9)]);
    }

    #[tokio::test]
    async fn test_spawned_dispatcher_applies_in_order_and_stops() {
        let channel = RecordingChannel::default();
        let (handle, task) = Dispatcher::new(channel.clone(), None, metrics()).spawn(4);

        for tag in 1..=5 {
            handle.send(AckCommand::Ack { delivery_tag: tag }).await.unwrap();
        }
        handle
            .send(AckCommand::Requeue { delivery_tag: 6 })
            .await
            .unwrap();
        drop(handle);
        task.await.unwrap();

        assert_eq!(
            channel.calls(),
            vec![
                Call::Ack(1),
                Call::Ack(2),
                Call::Ack(3),
                Call::Ack(4),
                Call::Ack(5),
                Call::Requeue(6),
            ]
        );
    }

    #[tokio::test]
    async fn test_send_after_stop_fails() {
        let (handle, task) =
            Dispatcher::new(RecordingChannel::default(), None, metrics()).spawn(1);
        task.abort();
        let _ = task.await;

        let result = handle.send(AckCommand::Ack { delivery_tag: 1 }).await;
        assert!(matches!(result, Err(AmqpError::DispatcherClosed)));
    }
}
