//! AMQP worker: bounded concurrent consumption feeding the dispatcher.

use crate::config::WorkerConfig;
use crate::consumer::{declare_topology, InboundMessage};
use crate::dispatcher::{AckCommand, Dispatcher, DispatcherHandle};
use crate::dlq::DeadLetterHeaders;
use crate::error::AmqpError;
use crate::health::HealthState;
use crate::metrics::WorkerMetrics;
use futures::{Stream, StreamExt};
use lapin::options::{BasicCancelOptions, BasicConsumeOptions, BasicQosOptions};
use lapin::types::FieldTable;
use lapin::Channel;
use messaging::{AckAction, AckPolicy, Processor};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{watch, Semaphore};
use tokio::task::{JoinError, JoinHandle, JoinSet};
use tracing::{debug, error, info, warn};

/// Runs one message through the processor and turns the outcome into an
/// [`AckCommand`].
pub struct MessageHandler<P> {
    processor: Arc<P>,
    policy: AckPolicy,
    dispatcher: DispatcherHandle,
    metrics: WorkerMetrics,
    requeue_delay: Option<Duration>,
}

impl<P: Processor> MessageHandler<P> {
    pub fn new(
        processor: Arc<P>,
        policy: AckPolicy,
        dispatcher: DispatcherHandle,
        metrics: WorkerMetrics,
    ) -> Self {
        Self {
            processor,
            policy,
            dispatcher,
            metrics,
            requeue_delay: None,
        }
    }

    pub fn with_requeue_delay(mut self, delay: Option<Duration>) -> Self {
        self.requeue_delay = delay;
        self
    }

    pub async fn handle(&self, message: InboundMessage) -> Result<(), AmqpError> {
        let delivery_tag = message.delivery_tag;
        self.metrics.message_received();

        if message.redelivered {
            debug!(
                delivery_tag,
                redeliveries = message.redeliveries,
                "Processing redelivered message"
            );
        }

        let start = Instant::now();
        let outcome = self.processor.process(&message.body).await;
        let duration = start.elapsed();

        if let Err(e) = &outcome {
            self.metrics.message_failed(e.kind());
        }

        let command = match self.policy.decide(&outcome, message.redeliveries) {
            AckAction::Ack => {
                self.metrics.message_processed(duration);
                debug!(
                    delivery_tag,
                    duration_ms = duration.as_millis() as u64,
                    "Message processed successfully"
                );
                AckCommand::Ack { delivery_tag }
            }
            AckAction::Requeue => {
                warn!(
                    delivery_tag,
                    error = %outcome.as_ref().err().map(|e| e.detailed()).unwrap_or_default(),
                    redeliveries = message.redeliveries,
                    "Retriable error, requeueing message"
                );
                self.metrics.message_requeued();
                if let Some(delay) = self.requeue_delay {
                    tokio::time::sleep(delay).await;
                }
                AckCommand::Requeue { delivery_tag }
            }
            AckAction::DeadLetter { kind, description } => {
                error!(
                    delivery_tag,
                    error_type = %kind,
                    error = %description,
                    "Message failed, dead-lettering"
                );
                self.metrics.message_dead_lettered(kind);
                AckCommand::DeadLetter {
                    delivery_tag,
                    body: message.body,
                    headers: DeadLetterHeaders::new(kind, description),
                }
            }
        };

        self.dispatcher.send(command).await
    }
}

/// Consumes the work queue with at most `max_concurrent_jobs` messages in
/// flight.
pub struct AmqpWorker<P: Processor> {
    channel: Channel,
    config: WorkerConfig,
    processor: Arc<P>,
    handler: Arc<MessageHandler<P>>,
    dispatcher: JoinHandle<()>,
    metrics: WorkerMetrics,
    health: Option<HealthState>,
}

impl<P: Processor + 'static> AmqpWorker<P> {
    /// Declare topology, apply qos and start the dispatcher on `channel`.
    pub async fn new(
        channel: Channel,
        processor: Arc<P>,
        config: WorkerConfig,
    ) -> Result<Self, AmqpError> {
        declare_topology(&channel, &config).await?;

        if config.prefetch_count > 0 {
            channel
                .basic_qos(config.prefetch_count, BasicQosOptions::default())
                .await?;
        }

        let metrics = WorkerMetrics::new(&config.queue, processor.name());
        let (dispatcher_handle, dispatcher) =
            Dispatcher::new(channel.clone(), config.dead_letter.clone(), metrics.clone())
                .spawn(config.dispatcher_capacity);

        let policy = AckPolicy::new().with_max_redeliveries(config.max_redeliveries);
        let handler = MessageHandler::new(
            processor.clone(),
            policy,
            dispatcher_handle,
            metrics.clone(),
        )
        .with_requeue_delay(config.requeue_delay);

        Ok(Self {
            channel,
            config,
            processor,
            handler: Arc::new(handler),
            dispatcher,
            metrics,
            health: None,
        })
    }

    pub fn with_health(mut self, health: HealthState) -> Self {
        self.health = Some(health);
        self
    }

    /// Consume until shutdown is signalled or the broker closes the stream,
    /// then wait for in-flight messages and the dispatcher to finish.
    pub async fn run(self, shutdown_rx: watch::Receiver<bool>) -> Result<(), AmqpError> {
        let Self {
            channel,
            config,
            processor,
            handler,
            dispatcher,
            metrics,
            health,
        } = self;

        let consumer = channel
            .basic_consume(
                &config.queue,
                &config.consumer_tag,
                BasicConsumeOptions::default(),
                FieldTable::default(),
            )
            .await?;

        info!(
            queue = %config.queue,
            consumer_tag = %config.consumer_tag,
            max_concurrent_jobs = config.max_concurrent_jobs,
            prefetch = config.prefetch_count,
            "Starting AMQP worker"
        );

        let health_task = health.clone().map(|state| {
            tokio::spawn(monitor_processor(
                processor.clone(),
                state,
                config.health_interval,
            ))
        });
        if let Some(state) = &health {
            state.set_broker_connected(true).await;
        }

        let deliveries = Box::pin(consumer.map(|delivery| {
            delivery
                .map(InboundMessage::from_delivery)
                .map_err(AmqpError::from)
        }));
        let semaphore = Arc::new(Semaphore::new(config.max_concurrent_jobs.max(1)));
        let result = consume(deliveries, handler, semaphore, metrics, shutdown_rx).await;

        if let Some(state) = &health {
            state.set_broker_connected(false).await;
            if let Err(e) = &result {
                state.set_consumer_error(e.to_string()).await;
            }
        }
        if let Some(health_task) = health_task {
            health_task.abort();
        }

        if let Err(e) = channel
            .basic_cancel(&config.consumer_tag, BasicCancelOptions::default())
            .await
        {
            debug!(error = %e, "Consumer cancel failed");
        }

        if let Err(e) = dispatcher.await {
            error!(error = %e, "Dispatcher task failed");
        }

        info!(queue = %config.queue, "AMQP worker stopped");
        result
    }
}

/// Resolves once shutdown is requested or the sender is gone.
async fn shutdown_requested(shutdown_rx: &mut watch::Receiver<bool>) {
    let _ = shutdown_rx.wait_for(|stop| *stop).await;
}

fn report(joined: Result<(), JoinError>) {
    if let Err(e) = joined {
        error!(error = %e, "Message task panicked");
    }
}

pub(crate) async fn consume<P, S>(
    mut deliveries: S,
    handler: Arc<MessageHandler<P>>,
    semaphore: Arc<Semaphore>,
    metrics: WorkerMetrics,
    mut shutdown_rx: watch::Receiver<bool>,
) -> Result<(), AmqpError>
where
    P: Processor + 'static,
    S: Stream<Item = Result<InboundMessage, AmqpError>> + Unpin,
{
    let mut in_flight = JoinSet::new();

    let result = loop {
        let permit = tokio::select! {
            _ = shutdown_requested(&mut shutdown_rx) => {
                info!("Shutdown signal received, stopping consumption");
                break Ok(());
            }
            Some(joined) = in_flight.join_next(), if !in_flight.is_empty() => {
                report(joined);
                metrics.in_flight(in_flight.len());
                continue;
            }
            permit = semaphore.clone().acquire_owned() => match permit {
                Ok(permit) => permit,
                Err(_) => break Ok(()),
            },
        };

        let next = tokio::select! {
            _ = shutdown_requested(&mut shutdown_rx) => {
                info!("Shutdown signal received, stopping consumption");
                break Ok(());
            }
            next = deliveries.next() => next,
        };

        match next {
            Some(Ok(message)) => {
                let handler = handler.clone();
                in_flight.spawn(async move {
                    let _permit = permit;
                    let delivery_tag = message.delivery_tag;
                    if let Err(e) = handler.handle(message).await {
                        error!(delivery_tag, error = %e, "Failed to hand off acknowledgment");
                    }
                });
                metrics.in_flight(in_flight.len());
            }
            Some(Err(e)) => {
                error!(error = %e, "Consumer stream failed");
                break Err(e);
            }
            None => {
                warn!("Consumer stream closed by broker");
                break Err(AmqpError::ConsumerClosed);
            }
        }
    };

    if !in_flight.is_empty() {
        info!(in_flight = in_flight.len(), "Waiting for in-flight messages");
    }
    while let Some(joined) = in_flight.join_next().await {
        report(joined);
    }
    metrics.in_flight(0);

    result
}

async fn monitor_processor<P: Processor>(processor: Arc<P>, state: HealthState, every: Duration) {
    let mut interval = tokio::time::interval(every);
    loop {
        interval.tick().await;
        check_processor(processor.as_ref(), &state).await;
    }
}

async fn check_processor<P: Processor>(processor: &P, state: &HealthState) {
    match processor.health_check().await {
        Ok(healthy) => state.set_processor_status(healthy, None).await,
        Err(e) => {
            warn!(processor = processor.name(), error = %e, "Processor health check failed");
            state.set_processor_status(false, Some(e.to_string())).await;
        }
    }
}
